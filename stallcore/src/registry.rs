use std::sync::Mutex;

use indexmap::IndexSet;

use crate::bridge::Bridge;
use crate::pool::{lock_bridge, BridgePool};

/// A set of pool slots sharing a lifecycle stage. The server keeps two:
/// relays with a live client, and headless offline stalls. A slot is in at
/// most one list at a time.
///
/// Lookups snapshot the slot set first and lock bridges one at a time, so
/// callers may hold another bridge's lock while searching.
pub struct BridgeList {
    slots: Mutex<IndexSet<usize>>,
}

impl BridgeList {
    pub fn new() -> BridgeList {
        BridgeList {
            slots: Mutex::new(IndexSet::new()),
        }
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, IndexSet<usize>> {
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn insert(&self, slot: usize) -> bool {
        self.guard().insert(slot)
    }

    pub fn remove(&self, slot: usize) -> bool {
        self.guard().shift_remove(&slot)
    }

    pub fn contains(&self, slot: usize) -> bool {
        self.guard().contains(&slot)
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    pub fn snapshot(&self) -> Vec<usize> {
        self.guard().iter().copied().collect()
    }

    /// First slot whose bridge satisfies the predicate.
    pub fn find<F>(&self, pool: &BridgePool, pred: F) -> Option<usize>
    where
        F: Fn(&Bridge) -> bool,
    {
        for slot in self.snapshot() {
            let bridge = lock_bridge(pool.get(slot));
            if pred(&bridge) {
                return Some(slot);
            }
        }
        None
    }

    /// Account names compare case-insensitively.
    pub fn find_by_account(&self, pool: &BridgePool, account: &str) -> Option<usize> {
        let wanted = account.to_lowercase();
        self.find(pool, |bridge| {
            bridge.session.account.to_lowercase() == wanted
        })
    }

    /// Character names compare case-insensitively.
    pub fn find_by_character(&self, pool: &BridgePool, name: &str) -> Option<usize> {
        let wanted = name.to_lowercase();
        self.find(pool, |bridge| {
            bridge.session.character_name.to_lowercase() == wanted
        })
    }

    /// Visit every member, locking one bridge at a time.
    pub fn for_each<F>(&self, pool: &BridgePool, mut visit: F)
    where
        F: FnMut(&mut Bridge),
    {
        for slot in self.snapshot() {
            let mut bridge = lock_bridge(pool.get(slot));
            visit(&mut bridge);
        }
    }
}

impl Default for BridgeList {
    fn default() -> BridgeList {
        BridgeList::new()
    }
}
