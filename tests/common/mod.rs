#![allow(dead_code)]

use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use spp_bridge::{Result, UartSink, WorkerSettings};

/// UART double that records every chunk handed to it
#[derive(Default)]
pub struct RecordingSink {
    chunks: Mutex<Vec<Vec<u8>>>,
}

impl RecordingSink {
    pub fn chunks(&self) -> Vec<Vec<u8>> {
        self.chunks.lock().unwrap().clone()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.chunks().concat()
    }

    pub fn calls(&self) -> usize {
        self.chunks.lock().unwrap().len()
    }
}

impl UartSink for RecordingSink {
    fn send(&self, data: &[u8]) -> Result<()> {
        self.chunks.lock().unwrap().push(data.to_vec());
        Ok(())
    }
}

pub fn settings() -> WorkerSettings {
    WorkerSettings {
        buffer_size: 1024,
        poll_interval: Duration::from_millis(5),
    }
}

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
