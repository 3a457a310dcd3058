//! WiFi link state
//!
//! [`WifiGate`] is the only view of the radio the bridge core has: a boolean
//! that the platform's link-state callback flips and that the remote client
//! can block on.

use log::info;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

#[cfg(target_os = "espidf")]
pub mod esp;

/// Waitable link up/down flag
pub struct WifiGate {
    up: Mutex<bool>,
    changed: Condvar,
}

impl WifiGate {
    pub fn new(up: bool) -> Self {
        Self {
            up: Mutex::new(up),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.up.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_up(&self) -> bool {
        *self.lock()
    }

    /// Record a link transition; called from the platform's event callback
    pub fn set_up(&self, up: bool) {
        let mut state = self.lock();
        if *state != up {
            *state = up;
            info!("WiFi link {}", if up { "up" } else { "down" });
            self.changed.notify_all();
        }
    }

    /// Block until the link is up or `timeout` passes; returns the link state
    pub fn wait_for_up(&self, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |up| !*up)
            .unwrap_or_else(|e| e.into_inner());
        *state
    }
}

impl Default for WifiGate {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn wait_returns_immediately_when_up() {
        let gate = WifiGate::new(true);
        let start = Instant::now();
        assert!(gate.wait_for_up(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn wait_times_out_while_down() {
        let gate = WifiGate::default();
        let start = Instant::now();
        assert!(!gate.wait_for_up(Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn link_up_wakes_waiter() {
        let gate = Arc::new(WifiGate::default());
        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.wait_for_up(Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(20));
        gate.set_up(true);
        assert!(waiter.join().unwrap());
    }
}
