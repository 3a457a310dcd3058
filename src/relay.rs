//! UART-to-network relay
//!
//! Entry point of the UART receive path: wraps each chunk read from the UART
//! in a budgeted [`Buffer`] and fans it out to every connected peer.

use log::{trace, warn};
use std::sync::Arc;

use crate::buffer::{BufferPool, PoolStats};
use crate::error::Result;
use crate::registry::{BroadcastReport, QueueRegistry};

/// Facade between the UART source and the queue registry
#[derive(Clone)]
pub struct Relay {
    pool: Arc<BufferPool>,
    registry: Arc<QueueRegistry>,
}

impl Relay {
    pub fn new(pool: Arc<BufferPool>, registry: Arc<QueueRegistry>) -> Self {
        Self { pool, registry }
    }

    /// Broadcast one UART receive event to every registered connection.
    ///
    /// Fails with `ResourceExhausted` when the bytes do not fit in the
    /// in-flight budget; nothing is allocated or queued in that case.
    pub fn ingest(&self, data: &[u8]) -> Result<BroadcastReport> {
        if data.is_empty() {
            return Ok(BroadcastReport::default());
        }

        let buf = self.pool.alloc(data).inspect_err(|e| {
            warn!("UART -> TCP: dropping {} bytes: {}", data.len(), e);
        })?;

        let report = self.registry.broadcast(buf);
        if log::log_enabled!(log::Level::Trace) {
            trace!("UART -> TCP: {} bytes to {} peer(s)", data.len(), report.delivered);
        }
        Ok(report)
    }

    pub fn registry(&self) -> &Arc<QueueRegistry> {
        &self.registry
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }
}
