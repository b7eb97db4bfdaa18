//! The task-group context: shared cell, owning handle, binding protocol.
//!
//! A context is created cheaply and lazily attached to the context tree on
//! first use ("binding"). Binding runs on the thread that first executes
//! under the context; it links the context into that thread's list and copies
//! the parent's cancellation state. The copy is speculative: a cancellation
//! propagating from a grand-ancestor may be in flight concurrently, so the
//! binder snapshots its thread-local propagation epoch first and re-validates
//! against the global epoch after the list insertion. Epoch agreement proves
//! the speculation safe: any propagation that missed the child in the list
//! must have advanced the global epoch after the snapshot, and the mismatch
//! then forces one re-copy under the global propagation lock.
//!
//! Reading the cancellation flag is a relaxed atomic load; creating and
//! binding a context takes no lock other than the owner's own list lock.
//! Cancellation is the cold path and carries all of the synchronization.

use core::fmt;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use crate::context::fp_env::FpEnv;
use crate::context::panic_cell::PendingPanic;
use crate::context::state::LifetimeState;
use crate::runtime::propagation::{self, CancellationField};
use crate::runtime::thread_data::ThreadData;
use crate::runtime::Runtime;
use crate::tracing_compat::{debug, trace};
use crate::types::ContextTraits;

/// Spins before yielding while another thread finishes a binding.
const LOCKED_SPIN_LIMIT: u32 = 64;

/// Where a bound context lives: its owner thread and list slot.
#[derive(Debug)]
pub(crate) struct Registration {
    pub(crate) owner: Arc<ThreadData>,
    pub(crate) slot: u32,
}

/// Shared state cell of a task-group context.
///
/// Everything another thread may legitimately touch lives here: the
/// life-cycle state, the monotonic flags, the parent back-reference, and the
/// pending panic. The owning [`TaskGroupContext`] handle holds the only
/// long-lived `Arc`; lists and children hold `Weak` references, expressing
/// that neither owns the context.
pub(crate) struct GroupCell {
    lifetime: AtomicU8,
    cancellation_requested: AtomicU32,
    may_have_children: AtomicU32,
    /// Creation trait: attach to a parent on first use.
    bound_trait: bool,
    /// Monotonic: set at creation, by capture, or by inheritance at bind.
    fp_settings: AtomicBool,
    fp_env: AtomicU64,
    parent: OnceLock<Weak<GroupCell>>,
    registration: OnceLock<Registration>,
    pending: Mutex<Option<PendingPanic>>,
}

impl GroupCell {
    pub(crate) fn new(traits: ContextTraits) -> Arc<Self> {
        let fp_env = if traits.fp_settings {
            FpEnv::capture_current()
        } else {
            FpEnv::DEFAULT
        };
        let cell = Arc::new(Self {
            lifetime: AtomicU8::new(LifetimeState::Created.as_u8()),
            cancellation_requested: AtomicU32::new(0),
            may_have_children: AtomicU32::new(0),
            bound_trait: traits.bound,
            fp_settings: AtomicBool::new(traits.fp_settings),
            fp_env: AtomicU64::new(fp_env.bits()),
            parent: OnceLock::new(),
            registration: OnceLock::new(),
            pending: Mutex::new(None),
        });
        trace!(bound = traits.bound, "context created");
        cell
    }

    /// The "no effective parent" root a runtime hands to unattached work.
    pub(crate) fn new_default_root(env: FpEnv) -> Arc<Self> {
        Arc::new(Self {
            lifetime: AtomicU8::new(LifetimeState::Isolated.as_u8()),
            cancellation_requested: AtomicU32::new(0),
            may_have_children: AtomicU32::new(0),
            bound_trait: false,
            fp_settings: AtomicBool::new(true),
            fp_env: AtomicU64::new(env.bits()),
            parent: OnceLock::new(),
            registration: OnceLock::new(),
            pending: Mutex::new(None),
        })
    }

    pub(crate) fn lifetime_state(&self) -> LifetimeState {
        LifetimeState::from_u8(self.lifetime.load(Ordering::Acquire))
    }

    pub(crate) fn cancellation_cell(&self) -> &AtomicU32 {
        &self.cancellation_requested
    }

    pub(crate) fn may_have_children(&self) -> bool {
        self.may_have_children.load(Ordering::Relaxed) == 1
    }

    /// Upgraded parent link; `None` for roots, isolated contexts, and
    /// contexts whose parent is already being torn down.
    pub(crate) fn parent(&self) -> Option<Arc<GroupCell>> {
        self.parent.get().and_then(Weak::upgrade)
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation_requested.load(Ordering::Relaxed) != 0
    }

    /// First-use binding. Idempotent: later calls (from any thread) wait out
    /// a binding in progress and return.
    pub(crate) fn bind_to(self: &Arc<Self>, td: &Arc<ThreadData>) {
        let state = self.lifetime.load(Ordering::Acquire);
        if state <= LifetimeState::Locked.as_u8() {
            if state == LifetimeState::Created.as_u8()
                && self
                    .lifetime
                    .compare_exchange(
                        LifetimeState::Created.as_u8(),
                        LifetimeState::Locked.as_u8(),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
            {
                let parent = td.active_context();
                if Arc::ptr_eq(&parent, td.runtime().default_context()) || !self.bound_trait {
                    // Outermost dispatch slot of this thread, or a context
                    // that opted out of binding: nothing to attach to.
                    if !self.fp_settings.load(Ordering::Relaxed) {
                        self.copy_fp_settings_from(td.runtime().default_context());
                    }
                    self.lifetime
                        .store(LifetimeState::Isolated.as_u8(), Ordering::Release);
                    trace!(thread = td.id(), "context isolated");
                } else {
                    self.bind_to_impl(td, &parent);
                    trace!(thread = td.id(), "context bound");
                }
            }
            self.spin_wait_while_locked();
        }
        debug_assert_ne!(
            self.lifetime.load(Ordering::Relaxed),
            LifetimeState::Created.as_u8()
        );
        debug_assert_ne!(
            self.lifetime.load(Ordering::Relaxed),
            LifetimeState::Locked.as_u8()
        );
    }

    fn bind_to_impl(self: &Arc<Self>, td: &Arc<ThreadData>, parent: &Arc<GroupCell>) {
        debug_assert_eq!(
            self.lifetime.load(Ordering::Relaxed),
            LifetimeState::Locked.as_u8(),
            "binding requires the locked state"
        );
        debug_assert!(
            self.parent.get().is_none(),
            "parent set before initial binding"
        );

        let installed = self.parent.set(Arc::downgrade(parent));
        debug_assert!(installed.is_ok());

        // Inherit FP settings only if this context has not captured its own.
        if !self.fp_settings.load(Ordering::Relaxed) {
            self.copy_fp_settings_from(parent);
        }

        // Skip the store when the bit is already set to avoid thrashing the
        // parent's cache line; the list lock below orders the store.
        if parent.may_have_children.load(Ordering::Relaxed) != 1 {
            parent.may_have_children.store(1, Ordering::Relaxed);
        }

        let parent_owner = parent.registration.get().map(|reg| Arc::clone(&reg.owner));
        match (parent.parent.get().is_some(), parent_owner) {
            (true, Some(parent_owner)) => {
                // A propagation may be in flight from any grand-ancestor.
                // Snapshot the parent owner's local epoch, speculate the
                // parent's state, publish through the list lock, then
                // validate the snapshot against the global epoch.
                let snapshot = parent_owner.context_list().epoch_snapshot();
                self.cancellation_requested.store(
                    parent.cancellation_requested.load(Ordering::Relaxed),
                    Ordering::Relaxed,
                );
                self.register_with(td);

                let runtime = td.runtime();
                if snapshot != runtime.propagation().epoch_relaxed() {
                    // A propagation raced with the speculation. Repeat the
                    // copy under the global lock, where the parent's state
                    // is settled.
                    runtime.propagation().rebind_slow_path(|| {
                        self.cancellation_requested.store(
                            parent.cancellation_requested.load(Ordering::Relaxed),
                            Ordering::Relaxed,
                        );
                    });
                }
            }
            (has_grandparent, _) => {
                // A parent with a parent link is always registered; treat a
                // missing registration as the root case rather than reading
                // a half-built binding.
                debug_assert!(!has_grandparent, "bound parent without registration");
                self.register_with(td);
                // Without a grand-ancestor, a concurrent propagation can
                // only originate at the parent itself, so its state can be
                // copied directly after the insertion's fence.
                self.cancellation_requested.store(
                    parent.cancellation_requested.load(Ordering::Relaxed),
                    Ordering::Relaxed,
                );
            }
        }

        self.lifetime
            .store(LifetimeState::Bound.as_u8(), Ordering::Release);
    }

    /// Links this context into `td`'s list. The propagation walk assumes new
    /// contexts become visible no later than the lock release here.
    fn register_with(self: &Arc<Self>, td: &Arc<ThreadData>) {
        let mut slots = td.context_list().lock();
        let slot = slots.insert(Arc::downgrade(self));
        let installed = self.registration.set(Registration {
            owner: Arc::clone(td),
            slot,
        });
        debug_assert!(installed.is_ok(), "context registered twice");
    }

    fn spin_wait_while_locked(&self) {
        let mut spins = 0_u32;
        while self.lifetime.load(Ordering::Acquire) == LifetimeState::Locked.as_u8() {
            if spins < LOCKED_SPIN_LIMIT {
                spins += 1;
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
    }

    /// Requests cancellation; `true` if this call effected the transition.
    pub(crate) fn cancel(self: &Arc<Self>) -> bool {
        debug_assert!(
            self.cancellation_requested.load(Ordering::Relaxed) <= 1,
            "the cancellation state can be either 0 or 1"
        );
        if self.cancellation_requested.load(Ordering::Relaxed) != 0
            || self.cancellation_requested.swap(1, Ordering::SeqCst) != 0
        {
            // Already cancelled. A newly added descendant inherits the flag
            // at bind time, and a context cannot be un-cancelled, so there is
            // nothing left to do.
            return false;
        }
        debug!("group cancellation requested");
        let runtime = self.resolve_runtime();
        propagation::propagate_group_state::<CancellationField>(&runtime, self, 1);
        true
    }

    fn resolve_runtime(&self) -> Arc<Runtime> {
        match self.registration.get() {
            Some(reg) => Arc::clone(reg.owner.runtime()),
            None => Arc::clone(ThreadData::current().runtime()),
        }
    }

    fn copy_fp_settings_from(&self, src: &GroupCell) {
        debug_assert!(
            !self.fp_settings.load(Ordering::Relaxed),
            "context already has FP settings"
        );
        debug_assert!(
            src.fp_settings.load(Ordering::Relaxed),
            "source context has no FP settings"
        );
        self.fp_env
            .store(src.fp_env.load(Ordering::Relaxed), Ordering::Relaxed);
        self.fp_settings.store(true, Ordering::Relaxed);
    }

    fn capture_fp_settings(&self) {
        self.fp_env
            .store(FpEnv::capture_current().bits(), Ordering::Relaxed);
        self.fp_settings.store(true, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub(crate) fn adopt_parent_for_test(&self, parent: &Arc<GroupCell>) {
        let _ = self.parent.set(Arc::downgrade(parent));
    }

    #[cfg(test)]
    pub(crate) fn fp_env_for_test(&self) -> FpEnv {
        FpEnv::from_bits(self.fp_env.load(Ordering::Relaxed))
    }
}

impl fmt::Debug for GroupCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupCell")
            .field("lifetime", &self.lifetime_state())
            .field("cancelled", &self.is_cancelled())
            .field("may_have_children", &self.may_have_children())
            .finish_non_exhaustive()
    }
}

/// A task-group context: a node grouping related units of parallel work.
///
/// The handle owns the context. Shared references are enough for everything
/// tasks do concurrently (reading the flag, requesting cancellation,
/// recording a failure); the operations with a "no concurrent user"
/// precondition ([`reset`](Self::reset),
/// [`capture_fp_settings`](Self::capture_fp_settings),
/// [`take_pending_panic`](Self::take_pending_panic)) take `&mut self`.
/// Dropping the handle destroys the context: it is unlinked from its owner's
/// list and any pending panic is released. The owner must outlive the
/// group's children.
pub struct TaskGroupContext {
    cell: Arc<GroupCell>,
}

impl TaskGroupContext {
    /// Creates a context that attaches to the active parent on first use.
    #[must_use]
    pub fn new() -> Self {
        Self::with_traits(ContextTraits::default())
    }

    /// Creates a context with explicit traits.
    #[must_use]
    pub fn with_traits(traits: ContextTraits) -> Self {
        Self {
            cell: GroupCell::new(traits),
        }
    }

    /// Creates a context that never attaches to a parent.
    #[must_use]
    pub fn isolated() -> Self {
        Self::with_traits(ContextTraits::ISOLATED)
    }

    /// Current view of the creation traits (the FP bit reflects captures and
    /// bind-time inheritance).
    #[must_use]
    pub fn traits(&self) -> ContextTraits {
        ContextTraits {
            bound: self.cell.bound_trait,
            fp_settings: self.cell.fp_settings.load(Ordering::Relaxed),
        }
    }

    /// Current life-cycle state.
    #[must_use]
    pub fn lifetime_state(&self) -> LifetimeState {
        self.cell.lifetime_state()
    }

    /// Binds this context on `td` if this is its first use.
    ///
    /// Normally driven by [`ThreadData::enter`]; exposed for dispatchers that
    /// bind contexts ahead of executing under them.
    pub fn bind_to(&self, td: &Arc<ThreadData>) {
        self.cell.bind_to(td);
    }

    /// Requests cancellation of this group and all its descendants.
    ///
    /// Returns `true` if this call effected the transition, `false` if the
    /// group was already cancelled. After a `true` return, every descendant
    /// that existed when the call began reports cancelled, and descendants
    /// bound concurrently or later inherit the flag.
    pub fn cancel_group_execution(&self) -> bool {
        self.cell.cancel()
    }

    /// Whether cancellation has been requested for this group.
    #[must_use]
    pub fn is_group_execution_cancelled(&self) -> bool {
        self.cell.is_cancelled()
    }

    /// Clears the cancellation flag and releases any pending panic.
    ///
    /// Precondition (unchecked): no task is concurrently using the group and
    /// the group has no live children. Binding and list membership are
    /// untouched.
    pub fn reset(&mut self) {
        self.cell.pending.lock().take();
        self.cell.cancellation_requested.store(0, Ordering::Relaxed);
    }

    /// Captures the calling thread's ambient FP environment into this
    /// context.
    pub fn capture_fp_settings(&mut self) {
        self.cell.capture_fp_settings();
    }

    /// The captured FP environment, if any.
    #[must_use]
    pub fn fp_env(&self) -> Option<FpEnv> {
        if self.cell.fp_settings.load(Ordering::Relaxed) {
            Some(FpEnv::from_bits(self.cell.fp_env.load(Ordering::Relaxed)))
        } else {
            None
        }
    }

    /// Records the payload of a failed task.
    ///
    /// The first failure wins; `false` means a panic was already pending and
    /// this payload was discarded. Callers cancel the group first, so
    /// install races are already serialized by the cancellation exchange.
    pub fn record_pending_panic(&self, payload: Box<dyn Any + Send + 'static>) -> bool {
        let mut pending = self.cell.pending.lock();
        if pending.is_some() {
            return false;
        }
        let cell = PendingPanic::capture(payload);
        debug!(summary = %cell.summary(), "pending panic recorded");
        *pending = Some(cell);
        true
    }

    /// Whether a panic is pending re-throw at the group boundary.
    #[must_use]
    pub fn has_pending_panic(&self) -> bool {
        self.cell.pending.lock().is_some()
    }

    /// Takes ownership of the pending panic, if any.
    pub fn take_pending_panic(&mut self) -> Option<PendingPanic> {
        self.cell.pending.lock().take()
    }

    /// Re-throws the pending panic at the group boundary; returns normally
    /// when none is pending.
    pub fn rethrow_pending_panic(&mut self) {
        if let Some(pending) = self.take_pending_panic() {
            pending.throw_self();
        }
    }

    pub(crate) fn cell(&self) -> &Arc<GroupCell> {
        &self.cell
    }
}

impl Default for TaskGroupContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskGroupContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroupContext")
            .field("state", &self.lifetime_state())
            .field("cancelled", &self.is_group_execution_cancelled())
            .finish()
    }
}

impl Drop for TaskGroupContext {
    fn drop(&mut self) {
        let state = LifetimeState::from_u8(self.cell.lifetime.load(Ordering::Relaxed));
        debug_assert_ne!(
            state,
            LifetimeState::Locked,
            "context destroyed while binding"
        );
        if state == LifetimeState::Bound {
            if let Some(reg) = self.cell.registration.get() {
                let mut slots = reg.owner.context_list().lock();
                slots.remove(reg.slot);
            }
        }
        self.cell.pending.lock().take();
        self.cell
            .lifetime
            .store(LifetimeState::Dead.as_u8(), Ordering::Relaxed);
        trace!("context destroyed");
    }
}
