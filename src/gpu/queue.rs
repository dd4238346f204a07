//! Thread-safe pool of submission queues.
//!
//! A fixed set of slots circulates through a bounded channel. Acquiring
//! spins on a non-blocking take until a slot is free; dropping the lease
//! puts the slot back, on success and failure paths alike.

use std::ops::Deref;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::error::{DeviceResourceError, Result};

pub struct QueuePool<Q = wgpu::Queue> {
    sender: Sender<Arc<Q>>,
    receiver: Receiver<Arc<Q>>,
    slots: usize,
}

impl<Q> QueuePool<Q> {
    /// A pool of `slots` leases over one queue. At least one slot is kept.
    pub fn new(queue: Q, slots: usize) -> Self {
        let slots = slots.max(1);
        let queue = Arc::new(queue);
        let (sender, receiver) = crossbeam_channel::bounded(slots);
        for _ in 0..slots {
            // Capacity equals the slot count, so these sends cannot block.
            let _ = sender.try_send(Arc::clone(&queue));
        }
        Self {
            sender,
            receiver,
            slots,
        }
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Slots not currently leased.
    pub fn available(&self) -> usize {
        self.receiver.len()
    }

    pub fn try_acquire(&self) -> Option<QueueLease<'_, Q>> {
        self.receiver.try_recv().ok().map(|queue| QueueLease {
            pool: self,
            queue: Some(queue),
        })
    }

    /// Spin until a slot is free.
    pub fn acquire(&self) -> Result<QueueLease<'_, Q>> {
        let mut spins: u64 = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(queue) => {
                    if spins > 0 {
                        tracing::trace!(spins, "queue slot acquired after contention");
                    }
                    return Ok(QueueLease {
                        pool: self,
                        queue: Some(queue),
                    });
                }
                Err(TryRecvError::Empty) => {
                    spins += 1;
                    std::hint::spin_loop();
                    if spins % 1024 == 0 {
                        std::thread::yield_now();
                    }
                }
                Err(TryRecvError::Disconnected) => {
                    return Err(DeviceResourceError::QueuePoolClosed.into())
                }
            }
        }
    }
}

/// Exclusive use of one queue slot until dropped.
pub struct QueueLease<'a, Q = wgpu::Queue> {
    pool: &'a QueuePool<Q>,
    queue: Option<Arc<Q>>,
}

impl<Q> Deref for QueueLease<'_, Q> {
    type Target = Q;

    fn deref(&self) -> &Q {
        match &self.queue {
            Some(queue) => queue,
            None => unreachable!("queue lease used after release"),
        }
    }
}

impl<Q> Drop for QueueLease<'_, Q> {
    fn drop(&mut self) {
        if let Some(queue) = self.queue.take() {
            let _ = self.pool.sender.try_send(queue);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_lease_returns_slot_on_drop() {
        let pool = QueuePool::new(7u32, 2);
        assert_eq!(pool.available(), 2);
        {
            let a = pool.acquire().unwrap();
            let b = pool.acquire().unwrap();
            assert_eq!(*a + *b, 14);
            assert_eq!(pool.available(), 0);
            assert!(pool.try_acquire().is_none());
        }
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_zero_slots_keeps_one() {
        let pool = QueuePool::new((), 0);
        assert_eq!(pool.slots(), 1);
        assert!(pool.try_acquire().is_some());
    }

    #[test]
    fn test_slot_released_on_error_path() {
        fn submit(pool: &QueuePool<u32>) -> std::result::Result<(), &'static str> {
            let _lease = pool.acquire().map_err(|_| "closed")?;
            Err("device lost")
        }
        let pool = QueuePool::new(0u32, 1);
        assert!(submit(&pool).is_err());
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_concurrent_leases_never_exceed_slots() {
        let pool = QueuePool::new((), 2);
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..200 {
                        let _lease = pool.acquire().unwrap();
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::hint::spin_loop();
                        active.fetch_sub(1, Ordering::SeqCst);
                    }
                });
            }
        });
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.available(), 2);
    }
}
