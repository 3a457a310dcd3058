//! Per-connection event loop
//!
//! A [`ConnectionWorker`] owns one socket and one registered queue. Each pass
//! it waits (bounded) for queued data, writes whatever the socket will take,
//! then drains one read's worth of socket input into the UART. Dropping the
//! worker is its teardown: the slot is deregistered, pending buffers are
//! released and the socket is closed.

use log::{debug, error, info, trace};
use std::fmt;
use std::io::{Read, Write};
use std::net::{Shutdown as NetShutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use crate::buffer::Buffer;
use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::registry::Registration;
use crate::shutdown::Shutdown;
use crate::uart::UartSink;

/// Why a connection worker stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed its end (zero-length read)
    PeerClosed,
    /// Socket read failed
    ReadFailed(String),
    /// Socket write failed
    WriteFailed(String),
    /// Process-wide stop requested
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "peer closed"),
            CloseReason::ReadFailed(e) => write!(f, "read failed: {}", e),
            CloseReason::WriteFailed(e) => write!(f, "write failed: {}", e),
            CloseReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Socket-level tuning shared by every worker
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    /// Scratch buffer size for one socket read
    pub buffer_size: usize,
    /// Upper bound on one readiness wait
    pub poll_interval: Duration,
}

impl From<&RelayConfig> for WorkerSettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            buffer_size: config.socket_buffer_size,
            poll_interval: config.poll_interval(),
        }
    }
}

/// A buffer taken off the queue but not yet fully written
struct PendingWrite {
    buf: Buffer,
    offset: usize,
}

enum ReadOutcome {
    Idle,
    Forwarded,
    Closed,
}

pub struct ConnectionWorker {
    label: String,
    stream: TcpStream,
    registration: Registration,
    pending: Option<PendingWrite>,
    uart: Arc<dyn UartSink>,
    settings: WorkerSettings,
    shutdown: Arc<Shutdown>,
}

impl ConnectionWorker {
    /// Bind a connected socket to its registered queue
    pub fn new(
        label: impl Into<String>,
        stream: TcpStream,
        registration: Registration,
        uart: Arc<dyn UartSink>,
        settings: WorkerSettings,
        shutdown: Arc<Shutdown>,
    ) -> Result<Self> {
        stream.set_nonblocking(true)?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }

        Ok(Self {
            label: label.into(),
            stream,
            registration,
            pending: None,
            uart,
            settings,
            shutdown,
        })
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }

    /// Forward data in both directions until the connection ends, then tear down
    pub fn run(mut self) -> CloseReason {
        info!("{} active in {}", self.label, self.registration.slot());
        let reason = self.event_loop();
        self.teardown(&reason);
        reason
    }

    fn event_loop(&mut self) -> CloseReason {
        let mut scratch = vec![0u8; self.settings.buffer_size];
        let mut busy = false;

        loop {
            if self.shutdown.is_triggered() {
                return CloseReason::Shutdown;
            }

            // Bounded readiness wait. Skipped right after I/O so a busy peer
            // is served back to back; a stalled write waits out the interval.
            if !busy {
                if self.pending.is_some() {
                    self.shutdown.sleep(self.settings.poll_interval);
                } else {
                    self.registration
                        .queue()
                        .wait_for_data(self.settings.poll_interval);
                }
            }

            let wrote = match self.flush_queue() {
                Ok(wrote) => wrote,
                Err(e) => return CloseReason::WriteFailed(e.to_string()),
            };

            let read = match self.read_socket(&mut scratch) {
                Ok(ReadOutcome::Closed) => return CloseReason::PeerClosed,
                Ok(ReadOutcome::Forwarded) => true,
                Ok(ReadOutcome::Idle) => false,
                Err(e) => return CloseReason::ReadFailed(e.to_string()),
            };

            busy = wrote || read;
        }
    }

    /// Write queued buffers in FIFO order until the queue is empty or the
    /// socket stops accepting data. A partly written buffer is kept and
    /// resumed on the next pass.
    fn flush_queue(&mut self) -> Result<bool> {
        let mut wrote = false;
        loop {
            if self.pending.is_none() {
                self.pending = self
                    .registration
                    .queue()
                    .pop()
                    .map(|buf| PendingWrite { buf, offset: 0 });
            }
            let Some(pending) = self.pending.as_mut() else {
                return Ok(wrote);
            };

            while pending.offset < pending.buf.len() {
                match self.stream.write(&pending.buf.as_slice()[pending.offset..]) {
                    Ok(0) => {
                        return Err(Error::Connection("socket accepted zero bytes".into()));
                    }
                    Ok(n) => {
                        pending.offset += n;
                        wrote = true;
                    }
                    Err(e) => {
                        let err = Error::from_socket(e);
                        if err.is_transient() {
                            trace!("{} send deferred: {}", self.label, err);
                            return Ok(wrote);
                        }
                        return Err(err);
                    }
                }
            }

            if log::log_enabled!(log::Level::Trace) {
                trace!("UART -> TCP: {} bytes to {}", pending.buf.len(), self.label);
            }
            // Fully sent: release our reference.
            self.pending = None;
        }
    }

    fn read_socket(&mut self, scratch: &mut [u8]) -> Result<ReadOutcome> {
        match self.stream.read(scratch) {
            Ok(0) => Ok(ReadOutcome::Closed),
            Ok(n) => {
                if log::log_enabled!(log::Level::Trace) {
                    let hex_str: String = scratch[..n].iter().map(|b| format!("{:02X} ", b)).collect();
                    trace!("TCP -> UART: {} bytes from {} (hex): {}", n, self.label, hex_str);
                } else {
                    debug!("TCP -> UART: {} bytes from {}", n, self.label);
                }
                if let Err(e) = self.uart.send(&scratch[..n]) {
                    error!("Error sending data to UART: {}", e);
                }
                Ok(ReadOutcome::Forwarded)
            }
            Err(e) => {
                let err = Error::from_socket(e);
                if err.is_transient() {
                    Ok(ReadOutcome::Idle)
                } else {
                    Err(err)
                }
            }
        }
    }

    fn teardown(self, reason: &CloseReason) {
        match reason {
            CloseReason::PeerClosed | CloseReason::Shutdown => {
                info!("{} disconnected: {}", self.label, reason)
            }
            _ => error!("{} closed: {}", self.label, reason),
        }

        let Self {
            label,
            stream,
            registration,
            pending,
            ..
        } = self;

        // Deregister before releasing anything so no broadcast refills the queue.
        drop(registration);
        drop(pending);
        let _ = stream.shutdown(NetShutdown::Both);
        drop(stream);
        debug!("{} terminated", label);
    }
}
