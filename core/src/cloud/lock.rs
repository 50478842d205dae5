//! Per-slot leases serializing cloud operations.
//!
//! RULE: at most one cloud check is in flight per slot. Slot switches,
//! imports and resets refuse to touch a leased slot.

use crate::{
    error::{SaveError, SaveResult},
    types::SlotId,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Default)]
pub struct SlotLocks {
    busy: Arc<Mutex<HashSet<SlotId>>>,
}

impl SlotLocks {
    pub fn try_acquire(&self, slot: SlotId) -> SaveResult<SlotLease> {
        let mut busy = self.busy.lock().unwrap_or_else(PoisonError::into_inner);
        if !busy.insert(slot) {
            return Err(SaveError::SlotBusy { slot });
        }
        Ok(SlotLease {
            slot,
            locks: self.clone(),
        })
    }

    pub fn is_busy(&self, slot: SlotId) -> bool {
        self.busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&slot)
    }

    fn release(&self, slot: SlotId) {
        self.busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&slot);
    }
}

/// Held for the duration of one cloud operation; released on drop.
#[derive(Debug)]
pub struct SlotLease {
    slot: SlotId,
    locks: SlotLocks,
}

impl SlotLease {
    pub fn slot(&self) -> SlotId {
        self.slot
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        self.locks.release(self.slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_is_exclusive_until_dropped() {
        let locks = SlotLocks::default();
        let lease = locks.try_acquire(1).unwrap();
        assert!(locks.is_busy(1));
        assert!(matches!(locks.try_acquire(1), Err(SaveError::SlotBusy { slot: 1 })));
        assert!(locks.try_acquire(2).is_ok());
        drop(lease);
        assert!(!locks.is_busy(1));
    }
}
