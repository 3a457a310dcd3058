//! UART module
//!
//! The bridge sees the UART only through [`UartSink`] (bytes from any TCP
//! peer) and [`UartSource`] (bytes to broadcast). [`start_forwarding`] runs
//! the receive side: read a chunk, hand it to the [`Relay`].

use log::{error, info, trace};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::{UartConfig, THREAD_STACK_SIZE};
use crate::error::{Error, Result};
use crate::relay::Relay;
use crate::shutdown::Shutdown;

#[cfg(target_os = "espidf")]
pub mod esp;

/// Destination for bytes received from TCP peers
pub trait UartSink: Send + Sync {
    /// Write all of `data` to the UART
    fn send(&self, data: &[u8]) -> Result<()>;
}

/// Origin of bytes to broadcast to TCP peers
pub trait UartSource: Send + Sync {
    /// Read whatever is available within `timeout`; `Ok(0)` means nothing arrived
    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize>;
}

/// Start the UART receive service
///
/// Spawns a thread that reads the UART in `config.buffer_size` chunks and
/// broadcasts each chunk through `relay` until `shutdown` is triggered.
pub fn start_forwarding(
    source: Arc<dyn UartSource>,
    relay: Relay,
    config: UartConfig,
    shutdown: Arc<Shutdown>,
) -> Result<thread::JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("uart_forwarding".into())
        .stack_size(THREAD_STACK_SIZE)
        .spawn(move || {
            let mut buffer = vec![0u8; config.buffer_size];
            let poll_interval = Duration::from_millis(config.poll_interval_ms);

            while !shutdown.is_triggered() {
                match source.receive(&mut buffer, poll_interval) {
                    Ok(0) => {}
                    Ok(len) => {
                        if log::log_enabled!(log::Level::Trace) {
                            trace!("UART rx {} bytes", len);
                        }
                        // Budget rejections are already logged by the relay.
                        let _ = relay.ingest(&buffer[..len]);
                    }
                    Err(e) => {
                        error!("UART receive error: {}", e);
                        if shutdown.sleep(poll_interval) {
                            break;
                        }
                    }
                }
            }
            info!("UART forwarding stopped");
        })
        .map_err(|e| Error::Uart(format!("Failed to spawn UART forwarding thread: {}", e)))?;

    info!("UART to TCP forwarding service started");
    Ok(handle)
}

/// Host stand-in for the UART: stdin is the receive side, stdout the send side
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default)]
pub struct StdioUart {
    eof_seen: std::sync::atomic::AtomicBool,
}

#[cfg(not(target_os = "espidf"))]
impl StdioUart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch end of input; true only the first time
    fn mark_eof(&self) -> bool {
        !self.eof_seen.swap(true, std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(not(target_os = "espidf"))]
impl UartSink for StdioUart {
    fn send(&self, data: &[u8]) -> Result<()> {
        use std::io::Write;

        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(data)
            .and_then(|_| stdout.flush())
            .map_err(|e| Error::Uart(format!("Failed to write to stdout: {}", e)))
    }
}

#[cfg(not(target_os = "espidf"))]
impl UartSource for StdioUart {
    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        use std::io::Read;

        match std::io::stdin().read(buf) {
            Ok(0) => {
                // stdin closed: behave like an idle line
                if self.mark_eof() {
                    log::warn!("stdin closed, UART receive side idle");
                }
                thread::sleep(timeout.max(Duration::from_secs(1)));
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(Error::Uart(format!("Failed to read stdin: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use crate::queue::OutboundQueue;
    use crate::registry::{QueueRegistry, SlotKind};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedSource {
        chunks: Mutex<VecDeque<Vec<u8>>>,
    }

    impl UartSource for ScriptedSource {
        fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
            match self.chunks.lock().unwrap().pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None => {
                    thread::sleep(timeout);
                    Ok(0)
                }
            }
        }
    }

    #[test]
    fn forwarding_broadcasts_each_chunk() {
        let registry = QueueRegistry::new(1);
        let reg = registry
            .register(SlotKind::Local, Arc::new(OutboundQueue::new()))
            .unwrap();
        let relay = Relay::new(BufferPool::new(1024), Arc::clone(&registry));
        let source = Arc::new(ScriptedSource {
            chunks: Mutex::new(VecDeque::from([b"ab".to_vec(), b"cd".to_vec()])),
        });
        let shutdown = Arc::new(Shutdown::new());

        let config = UartConfig {
            poll_interval_ms: 5,
            ..UartConfig::default()
        };
        let handle = start_forwarding(source, relay, config, Arc::clone(&shutdown)).unwrap();

        let mut received = Vec::new();
        while received.len() < 2 {
            if reg.queue().wait_for_data(Duration::from_secs(5)) {
                received.push(reg.queue().pop().unwrap().as_slice().to_vec());
            } else {
                break;
            }
        }
        shutdown.trigger();
        handle.join().unwrap();

        assert_eq!(received, vec![b"ab".to_vec(), b"cd".to_vec()]);
    }

    #[cfg(not(target_os = "espidf"))]
    #[test]
    fn stdin_eof_is_reported_once() {
        let uart = StdioUart::new();
        assert!(uart.mark_eof());
        assert!(!uart.mark_eof());
        assert!(!uart.mark_eof());
    }
}
