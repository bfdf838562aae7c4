use std::sync::{Arc, Mutex, MutexGuard};

use slog::{o, Logger};

use crate::bridge::Bridge;
use crate::support::{ErrorKind, RelayError, RelayResult};

/// Lock a bridge, recovering the guard if a panicking handler poisoned it.
#[inline]
pub fn lock_bridge(bridge: &Arc<Mutex<Bridge>>) -> MutexGuard<'_, Bridge> {
    match bridge.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Fixed-capacity arena of pre-allocated bridges addressed by stable slot
/// index. `acquire` fails fast when empty so the accept path can reject the
/// connection; `release` returns a reset slot to the free list.
pub struct BridgePool {
    slots: Vec<Arc<Mutex<Bridge>>>,
    free: Mutex<Vec<usize>>,
}

impl BridgePool {
    pub fn new(capacity: usize, log: &Logger) -> BridgePool {
        let slots = (0..capacity)
            .map(|slot| {
                Arc::new(Mutex::new(Bridge::new(
                    slot,
                    log.new(o!("slot" => slot)),
                )))
            })
            .collect();

        BridgePool {
            slots,
            free: Mutex::new((0..capacity).rev().collect()),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn get(&self, slot: usize) -> &Arc<Mutex<Bridge>> {
        &self.slots[slot]
    }

    pub fn acquire(&self) -> RelayResult<usize> {
        let mut free = match self.free.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        free.pop()
            .ok_or(RelayError::Fatal(ErrorKind::PoolExhausted))
    }

    /// Return a slot to the free list. The bridge must already be reset and
    /// its lock released.
    pub fn release(&self, slot: usize) {
        let mut free = match self.free.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        free.push(slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::Drain;

    fn test_logger() -> Logger {
        Logger::root(slog::Discard.fuse(), o!())
    }

    #[test]
    fn acquire_to_exhaustion_then_release() {
        let pool = BridgePool::new(2, &test_logger());

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(a, b);
        assert_eq!(
            pool.acquire(),
            Err(RelayError::Fatal(ErrorKind::PoolExhausted))
        );

        pool.release(a);
        assert_eq!(pool.acquire().unwrap(), a);
    }

    #[test]
    fn single_slot_pool_rejects_second_accept() {
        let pool = BridgePool::new(1, &test_logger());

        let first = pool.acquire().unwrap();
        assert!(pool.acquire().is_err());
        let _ = first;
    }

    #[test]
    fn slots_are_stable() {
        let pool = BridgePool::new(4, &test_logger());
        let slot = pool.acquire().unwrap();

        assert_eq!(lock_bridge(pool.get(slot)).slot(), slot);
    }
}
