use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Process-wide stop request shared by every bridge thread
///
/// Loops check [`is_triggered`](Self::is_triggered) once per iteration and
/// use [`sleep`](Self::sleep) for delays so a stop request cuts them short.
#[derive(Default)]
pub struct Shutdown {
    stop: Mutex<bool>,
    wake: Condvar,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.stop.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn trigger(&self) {
        *self.lock() = true;
        self.wake.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.lock()
    }

    /// Sleep for `duration` unless stopped first; returns whether stop was requested
    pub fn sleep(&self, duration: Duration) -> bool {
        let stop = self.lock();
        let (stop, _) = self
            .wake
            .wait_timeout_while(stop, duration, |stop| !*stop)
            .unwrap_or_else(|e| e.into_inner());
        *stop
    }
}
