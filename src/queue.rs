//! Per-connection outbound queue
//!
//! A fixed-depth FIFO of [`Buffer`] handles with a condition variable so the
//! owning connection worker can sleep until data arrives or its poll
//! interval expires.

use heapless::Deque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::buffer::Buffer;

/// Maximum number of buffers a connection may have pending
pub const QUEUE_DEPTH: usize = 8;

/// Bounded FIFO owned by one connection
pub struct OutboundQueue {
    items: Mutex<Deque<Buffer, QUEUE_DEPTH>>,
    ready: Condvar,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Deque::new()),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Deque<Buffer, QUEUE_DEPTH>> {
        // Every mutation is a single Deque call, so a poisoned guard still
        // holds a consistent queue.
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue without blocking; a full queue hands the buffer back
    pub fn try_push(&self, buf: Buffer) -> Result<(), Buffer> {
        let mut items = self.lock();
        items.push_back(buf)?;
        drop(items);
        self.ready.notify_one();
        Ok(())
    }

    pub fn pop(&self) -> Option<Buffer> {
        self.lock().pop_front()
    }

    /// Block up to `timeout` for the queue to become non-empty
    pub fn wait_for_data(&self, timeout: Duration) -> bool {
        let items = self.lock();
        let (items, _) = self
            .ready
            .wait_timeout_while(items, timeout, |items| items.is_empty())
            .unwrap_or_else(|e| e.into_inner());
        !items.is_empty()
    }

    /// Wake a worker blocked in [`wait_for_data`](Self::wait_for_data)
    pub fn wake(&self) {
        self.ready.notify_all();
    }

    /// Release every pending buffer, returning how many were dropped
    pub fn drain(&self) -> usize {
        let mut items = self.lock();
        let mut dropped = 0;
        while items.pop_front().is_some() {
            dropped += 1;
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.lock().is_full()
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn full_queue_returns_buffer() {
        let pool = BufferPool::new(1024);
        let queue = OutboundQueue::new();
        for i in 0..QUEUE_DEPTH {
            queue.try_push(pool.alloc(&[i as u8]).unwrap()).unwrap();
        }
        assert!(queue.is_full());

        let rejected = queue.try_push(pool.alloc(b"x").unwrap()).unwrap_err();
        assert_eq!(rejected.as_slice(), b"x");
        drop(rejected);

        assert_eq!(queue.pop().unwrap().as_slice(), &[0]);
        assert_eq!(queue.drain(), QUEUE_DEPTH - 1);
        assert_eq!(pool.stats().live_bytes, 0);
    }

    #[test]
    fn wait_wakes_on_push() {
        let pool = BufferPool::new(1024);
        let queue = Arc::new(OutboundQueue::new());

        let producer = {
            let queue = Arc::clone(&queue);
            let buf = pool.alloc(b"data").unwrap();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                queue.try_push(buf).unwrap();
            })
        };

        let start = Instant::now();
        assert!(queue.wait_for_data(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(5));
        producer.join().unwrap();
    }

    #[test]
    fn wait_times_out_when_empty() {
        let queue = OutboundQueue::new();
        assert!(!queue.wait_for_data(Duration::from_millis(10)));
    }
}
