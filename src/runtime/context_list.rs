//! Per-thread list of bound contexts.
//!
//! Every registered thread owns a list of the contexts it has bound. The
//! cancellation propagation pass walks each thread's list under that thread's
//! list lock, so the tree of contexts is maintained in per-thread pieces and
//! cross-thread access happens only while a cancellation is in flight.
//!
//! The list is a slot table rather than a pointer-chased intrusive chain: a
//! context records the index of its slot at bind time and clears it at
//! destroy time, both under the lock. Iteration order is irrelevant to
//! propagation, which visits every live entry.
//!
//! The `epoch` counter is this thread's snapshot of the global propagation
//! epoch. Binders read it with acquire ordering before speculatively copying
//! the parent's state; the propagation pass writes it with release ordering
//! (while still holding the list lock) after the walk has covered this
//! thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;

use parking_lot::{Mutex, MutexGuard};

use crate::context::group::GroupCell;

/// Context-list state owned by one registered thread.
#[derive(Debug)]
pub(crate) struct ContextListState {
    slots: Mutex<ContextSlots>,
    epoch: AtomicU64,
}

impl ContextListState {
    /// Creates an empty list with room for `capacity` contexts.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(ContextSlots::with_capacity(capacity)),
            epoch: AtomicU64::new(0),
        }
    }

    /// Locks the slot table for a structural edit or a propagation walk.
    pub(crate) fn lock(&self) -> MutexGuard<'_, ContextSlots> {
        self.slots.lock()
    }

    /// Acquire-loads the local propagation epoch.
    ///
    /// The acquire edge keeps the binder's subsequent speculative load of the
    /// parent's state from being reordered ahead of the snapshot.
    pub(crate) fn epoch_snapshot(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Release-stores the local epoch after a propagation pass.
    ///
    /// Called while the list lock is still held; the release edge keeps flag
    /// stores from the walk from drifting past the sync point.
    pub(crate) fn sync_epoch(&self, value: u64) {
        self.epoch.store(value, Ordering::Release);
    }
}

/// The slot table behind a thread's list lock.
#[derive(Debug)]
pub(crate) struct ContextSlots {
    slots: Vec<Option<Weak<GroupCell>>>,
    free: Vec<u32>,
    live: usize,
}

impl ContextSlots {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Inserts a context and returns its slot index.
    pub(crate) fn insert(&mut self, cell: Weak<GroupCell>) -> u32 {
        self.live += 1;
        if let Some(slot) = self.free.pop() {
            debug_assert!(self.slots[slot as usize].is_none(), "free slot occupied");
            self.slots[slot as usize] = Some(cell);
            slot
        } else {
            let slot = u32::try_from(self.slots.len()).expect("context list overflow");
            self.slots.push(Some(cell));
            slot
        }
    }

    /// Removes the context at `slot`, returning its entry.
    pub(crate) fn remove(&mut self, slot: u32) -> Option<Weak<GroupCell>> {
        let entry = self.slots.get_mut(slot as usize)?.take();
        debug_assert!(entry.is_some(), "removing vacant context slot");
        if entry.is_some() {
            self.free.push(slot);
            self.live -= 1;
        }
        entry
    }

    /// Iterates the live contexts, skipping entries whose context is already
    /// being torn down.
    pub(crate) fn iter_live(&self) -> impl Iterator<Item = std::sync::Arc<GroupCell>> + '_ {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref().and_then(Weak::upgrade))
    }

    /// Number of occupied slots.
    pub(crate) fn live(&self) -> usize {
        self.live
    }

    /// Structural self-check: the free list and the occupancy count agree
    /// with the slot table.
    pub(crate) fn is_well_formed(&self) -> bool {
        let occupied = self.slots.iter().filter(|slot| slot.is_some()).count();
        if occupied != self.live {
            return false;
        }
        if self.free.len() + occupied != self.slots.len() {
            return false;
        }
        let mut seen = vec![false; self.slots.len()];
        self.free.iter().all(|&slot| {
            let index = slot as usize;
            let fresh = index < self.slots.len()
                && self.slots[index].is_none()
                && !seen[index];
            if fresh {
                seen[index] = true;
            }
            fresh
        })
    }
}
