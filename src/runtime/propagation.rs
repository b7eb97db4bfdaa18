//! Cancellation propagation engine.
//!
//! When a context with descendants is cancelled, the engine walks every
//! registered thread's context list and marks each listed descendant of the
//! cancelled node. The whole walk runs under a single global lock so that
//! cancellations racing at different levels of one tree cannot miss each
//! other.
//!
//! Consider two cancellations in one chain, `ctx1 ← ctx2 ← ctx3 ← ctx4`,
//! with thread 1 cancelling `ctx1` and thread 2 cancelling `ctx3`. Each
//! propagator bumps the global epoch, but the propagator of the outermost
//! cancellation may be the last to finish: thread 2 can complete its walk
//! (syncing local epochs) before thread 1 has reached `ctx2`. A context bound
//! to `ctx2` in that window would validate its epoch snapshot and still miss
//! thread 1's cancellation if the walks were not serialized. Running the
//! entire propagation under the lock closes that window; binders that detect
//! an epoch mismatch re-validate under the same lock (see
//! `context::group`).
//!
//! The engine is generic over *which* monotonic flag it propagates. Today
//! only the cancellation flag implements [`PropagatedField`], but the walk,
//! the epoch discipline, and the ancestry marking are flag-agnostic.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::group::GroupCell;
use crate::runtime::Runtime;
use crate::tracing_compat::trace;

/// Accessor for a monotonic per-context flag that the engine can propagate.
pub(crate) trait PropagatedField {
    /// The flag's atomic cell within a context.
    fn slot(cell: &GroupCell) -> &AtomicU32;
}

/// The cancellation-request flag.
pub(crate) struct CancellationField;

impl PropagatedField for CancellationField {
    fn slot(cell: &GroupCell) -> &AtomicU32 {
        cell.cancellation_cell()
    }
}

/// Process-wide propagation state, one per runtime.
#[derive(Debug)]
pub(crate) struct PropagationState {
    /// Global propagation epoch; incremented under `lock` per propagation.
    epoch: AtomicU64,
    /// Serializes whole-tree propagations and epoch-mismatch rebinds.
    lock: Mutex<()>,
    /// Number of bindings that re-validated under `lock`.
    slow_path_rebinds: AtomicU64,
}

impl PropagationState {
    pub(crate) fn new() -> Self {
        Self {
            epoch: AtomicU64::new(0),
            lock: Mutex::new(()),
            slow_path_rebinds: AtomicU64::new(0),
        }
    }

    /// Relaxed view of the global epoch.
    pub(crate) fn epoch_relaxed(&self) -> u64 {
        self.epoch.load(Ordering::Relaxed)
    }

    /// The epoch cell itself, for local-epoch syncs during a walk.
    pub(crate) fn epoch_cell(&self) -> &AtomicU64 {
        &self.epoch
    }

    /// Runs `f` under the propagation lock, counting it as a slow-path
    /// rebind.
    pub(crate) fn rebind_slow_path<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.lock.lock();
        self.slow_path_rebinds.fetch_add(1, Ordering::Relaxed);
        f()
    }

    pub(crate) fn slow_path_rebinds(&self) -> u64 {
        self.slow_path_rebinds.load(Ordering::Relaxed)
    }
}

/// Propagates `new_state` from `src` to its listed descendants.
///
/// Returns `false` when another thread changed `src`'s flag back under the
/// lock (possible only through `reset`, whose single-threaded precondition
/// makes the race a caller bug); `true` otherwise, including the fast path
/// where `src` never had children and there is nothing to walk.
pub(crate) fn propagate_group_state<F: PropagatedField>(
    runtime: &Runtime,
    src: &Arc<GroupCell>,
    new_state: u32,
) -> bool {
    if !src.may_have_children() {
        // Future children inherit the state at bind time.
        return true;
    }

    let state = runtime.propagation();
    let _guard = state.lock.lock();
    if F::slot(src).load(Ordering::Relaxed) != new_state {
        // Another thread changed the state under the lock. Back down.
        return false;
    }
    state.epoch.fetch_add(1, Ordering::Relaxed);
    trace!(epoch = state.epoch_relaxed(), "propagating group state");

    // Pool workers and externally registered threads alike; each local pass
    // takes only that thread's list lock.
    for td in runtime.registered_threads() {
        td.propagate_group_state::<F>(src, new_state, state.epoch_cell());
    }
    true
}

/// Marks `ctx` and its ancestors up to (excluding) `src`, provided `src` is
/// an ancestor of `ctx`.
pub(crate) fn mark_ancestry<F: PropagatedField>(
    ctx: &Arc<GroupCell>,
    src: &Arc<GroupCell>,
    new_state: u32,
) {
    if Arc::ptr_eq(ctx, src) {
        return;
    }

    let mut ancestor = ctx.parent();
    while let Some(candidate) = ancestor {
        if Arc::ptr_eq(&candidate, src) {
            // src is an ancestor: mark the whole chain below it.
            let mut cursor = Arc::clone(ctx);
            while !Arc::ptr_eq(&cursor, src) {
                F::slot(&cursor).store(new_state, Ordering::Relaxed);
                match cursor.parent() {
                    Some(next) => cursor = next,
                    None => break,
                }
            }
            return;
        }
        ancestor = candidate.parent();
    }
}
