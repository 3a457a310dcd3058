//! Queue registry
//!
//! Fixed set of outbound queues, one per live connection, behind a single
//! mutex. Broadcasting walks every occupied slot under that mutex, so a
//! broadcast never observes a half-registered or half-removed connection.

use log::{debug, info, trace, warn};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::queue::OutboundQueue;

/// Which side of the bridge a queue belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// A client accepted by the local TCP server
    Local,
    /// The single persistent remote connection
    Remote,
}

/// Index of an occupied registry slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

impl SlotId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

/// Outcome of one broadcast pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Queues that accepted the buffer
    pub delivered: usize,
    /// Queues that were full and skipped
    pub dropped: usize,
}

const REMOTE_SLOT: usize = 0;

/// Registry of per-connection outbound queues
///
/// Slot 0 is reserved for the remote connection; the remaining
/// `local_capacity` slots serve local clients.
pub struct QueueRegistry {
    slots: Mutex<Vec<Option<Arc<OutboundQueue>>>>,
}

impl QueueRegistry {
    pub fn new(local_capacity: usize) -> Arc<Self> {
        let mut slots = Vec::with_capacity(local_capacity + 1);
        slots.resize_with(local_capacity + 1, || None);
        Arc::new(Self {
            slots: Mutex::new(slots),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Option<Arc<OutboundQueue>>>> {
        // Slot writes are single assignments; poisoning cannot leave a torn slot.
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Total number of slots, remote included
    pub fn capacity(&self) -> usize {
        self.lock().len()
    }

    /// Claim a slot for `queue`.
    ///
    /// The returned [`Registration`] frees the slot and drains the queue when
    /// dropped. Fails with [`Error::ResourceExhausted`] when no slot of the
    /// requested kind is free.
    pub fn register(
        self: &Arc<Self>,
        kind: SlotKind,
        queue: Arc<OutboundQueue>,
    ) -> Result<Registration> {
        let mut slots = self.lock();
        let index = match kind {
            SlotKind::Remote => Some(REMOTE_SLOT).filter(|&i| slots[i].is_none()),
            SlotKind::Local => slots
                .iter()
                .enumerate()
                .skip(REMOTE_SLOT + 1)
                .find(|(_, slot)| slot.is_none())
                .map(|(i, _)| i),
        };

        let Some(index) = index else {
            warn!("No free {:?} slot in queue registry", kind);
            return Err(Error::ResourceExhausted(format!(
                "queue registry has no free {:?} slot",
                kind
            )));
        };

        slots[index] = Some(Arc::clone(&queue));
        let active = slots.iter().filter(|slot| slot.is_some()).count();
        drop(slots);

        let slot = SlotId(index);
        info!("Registered {:?} queue in {} ({} active)", kind, slot, active);
        Ok(Registration {
            registry: Arc::clone(self),
            slot,
            queue,
        })
    }

    fn deregister(&self, slot: SlotId) {
        let mut slots = self.lock();
        if slots[slot.0].take().is_some() {
            let active = slots.iter().filter(|slot| slot.is_some()).count();
            drop(slots);
            info!("Deregistered {} ({} active)", slot, active);
        }
    }

    /// Offer `buf` to every registered queue.
    ///
    /// A full queue skips this buffer; other queues are unaffected. The
    /// caller's handle is consumed and released once all slots are visited.
    pub fn broadcast(&self, buf: Buffer) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        {
            let slots = self.lock();
            for (index, queue) in slots.iter().enumerate() {
                let Some(queue) = queue else { continue };
                match queue.try_push(buf.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(rejected) => {
                        drop(rejected);
                        report.dropped += 1;
                        debug!("Queue in slot#{} full, dropping {} bytes", index, buf.len());
                    }
                }
            }
        }

        if log::log_enabled!(log::Level::Trace) {
            trace!(
                "Broadcast {} bytes: {} delivered, {} dropped",
                buf.len(),
                report.delivered,
                report.dropped
            );
        }
        report
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.lock().iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of connected local clients
    pub fn local_count(&self) -> usize {
        self.lock()
            .iter()
            .skip(REMOTE_SLOT + 1)
            .filter(|slot| slot.is_some())
            .count()
    }

    /// Whether the remote connection currently holds its slot
    pub fn remote_connected(&self) -> bool {
        self.lock()[REMOTE_SLOT].is_some()
    }
}

/// Ownership of one registry slot and its queue
///
/// Dropping it deregisters the slot first, so no broadcast can refill the
/// queue, then releases anything still pending.
pub struct Registration {
    registry: Arc<QueueRegistry>,
    slot: SlotId,
    queue: Arc<OutboundQueue>,
}

impl Registration {
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn queue(&self) -> &Arc<OutboundQueue> {
        &self.queue
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration").field("slot", &self.slot).finish()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(self.slot);
        let dropped = self.queue.drain();
        if dropped > 0 {
            debug!("Released {} undelivered buffers from {}", dropped, self.slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use crate::queue::QUEUE_DEPTH;

    fn queue() -> Arc<OutboundQueue> {
        Arc::new(OutboundQueue::new())
    }

    #[test]
    fn broadcast_takes_once_per_queue_and_releases_producer() {
        let pool = BufferPool::new(1024);
        let registry = QueueRegistry::new(3);
        let regs: Vec<_> = (0..3)
            .map(|_| registry.register(SlotKind::Local, queue()).unwrap())
            .collect();

        let report = registry.broadcast(pool.alloc(b"ping").unwrap());
        assert_eq!(report, BroadcastReport { delivered: 3, dropped: 0 });

        // one initial reference plus one per queue, producer's already released
        let stats = pool.stats();
        assert_eq!(stats.takes, 4);
        assert_eq!(stats.releases, 1);

        for reg in &regs {
            assert_eq!(reg.queue().pop().unwrap().as_slice(), b"ping");
        }
        let stats = pool.stats();
        assert_eq!(stats.takes, stats.releases);
        assert_eq!(stats.live_bytes, 0);
    }

    #[test]
    fn full_queue_only_skips_its_own_slot() {
        let pool = BufferPool::new(4096);
        let registry = QueueRegistry::new(2);
        let slow = registry.register(SlotKind::Local, queue()).unwrap();
        let fast = registry.register(SlotKind::Local, queue()).unwrap();

        for _ in 0..QUEUE_DEPTH {
            slow.queue().try_push(pool.alloc(b"old").unwrap()).unwrap();
        }

        let report = registry.broadcast(pool.alloc(b"new").unwrap());
        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 1 });
        assert_eq!(fast.queue().pop().unwrap().as_slice(), b"new");
        assert_eq!(slow.queue().len(), QUEUE_DEPTH);

        drop(slow);
        drop(fast);
        let stats = pool.stats();
        assert_eq!(stats.outstanding(), 0);
        assert_eq!(stats.live_bytes, 0);
    }

    #[test]
    fn register_beyond_capacity_fails_without_disturbing_others() {
        let pool = BufferPool::new(1024);
        let registry = QueueRegistry::new(2);
        let remote = registry.register(SlotKind::Remote, queue()).unwrap();
        let a = registry.register(SlotKind::Local, queue()).unwrap();
        let b = registry.register(SlotKind::Local, queue()).unwrap();
        assert_eq!(registry.len(), registry.capacity());

        let err = registry.register(SlotKind::Local, queue()).unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted(_)));
        let err = registry.register(SlotKind::Remote, queue()).unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted(_)));

        let report = registry.broadcast(pool.alloc(b"x").unwrap());
        assert_eq!(report.delivered, 3);
        for reg in [&remote, &a, &b] {
            assert_eq!(reg.queue().len(), 1);
        }
    }

    #[test]
    fn dropping_registration_frees_slot_and_drains() {
        let pool = BufferPool::new(1024);
        let registry = QueueRegistry::new(1);
        let reg = registry.register(SlotKind::Local, queue()).unwrap();
        registry.broadcast(pool.alloc(b"abc").unwrap());
        assert_eq!(pool.stats().live_bytes, 3);

        drop(reg);
        assert!(registry.is_empty());
        assert_eq!(pool.stats().live_bytes, 0);

        let again = registry.register(SlotKind::Local, queue()).unwrap();
        assert_eq!(again.slot().index(), 1);
        assert_eq!(registry.local_count(), 1);
        assert!(!registry.remote_connected());
    }
}
