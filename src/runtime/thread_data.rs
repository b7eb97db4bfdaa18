//! Per-thread descriptor and the active-context stack.
//!
//! Every thread that creates, binds, or cancels contexts is registered with a
//! runtime and owns a [`ThreadData`]: its context-list state plus a
//! back-reference to the runtime. Registration is lazy; the first call to
//! [`ThreadData::current`] on a thread registers it as an external thread,
//! the way a pool embedding this core registers its workers at spawn.
//!
//! The "currently executing context" of the dispatcher is modeled as a
//! thread-local stack: entering a context pushes it and returns an RAII
//! guard. An empty stack means the runtime's default root is active, which is
//! exactly the situation in which a freshly bound context becomes isolated.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::context::group::{GroupCell, TaskGroupContext};
use crate::runtime::context_list::ContextListState;
use crate::runtime::propagation::{self, PropagatedField};
use crate::runtime::Runtime;
use crate::tracing_compat::trace;

thread_local! {
    static CURRENT_THREAD: RefCell<Option<Arc<ThreadData>>> = const { RefCell::new(None) };
    static ACTIVE_CONTEXTS: RefCell<Vec<Weak<GroupCell>>> = const { RefCell::new(Vec::new()) };
}

/// Descriptor for a thread registered with a runtime.
#[derive(Debug)]
pub struct ThreadData {
    id: u64,
    runtime: Arc<Runtime>,
    context_list: ContextListState,
}

impl ThreadData {
    pub(crate) fn new(id: u64, runtime: Arc<Runtime>, list_capacity: usize) -> Self {
        Self {
            id,
            runtime,
            context_list: ContextListState::with_capacity(list_capacity),
        }
    }

    /// Returns the calling thread's descriptor, registering the thread with
    /// the global runtime on first use.
    #[must_use]
    pub fn current() -> Arc<Self> {
        Self::current_for(Runtime::global())
    }

    /// Returns the calling thread's descriptor, registering the thread with
    /// `runtime` on first use.
    ///
    /// A thread registers once for its lifetime; if it is already registered
    /// (with any runtime), the existing descriptor is returned.
    #[must_use]
    pub fn current_for(runtime: &Arc<Runtime>) -> Arc<Self> {
        CURRENT_THREAD.with(|current| {
            let mut slot = current.borrow_mut();
            if let Some(td) = slot.as_ref() {
                return Arc::clone(td);
            }
            let td = runtime.register_thread();
            trace!(thread = td.id, "registered thread");
            *slot = Some(Arc::clone(&td));
            td
        })
    }

    /// The runtime this thread is registered with.
    #[must_use]
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Registration id of this thread within its runtime.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Enters `ctx` on this thread: binds it on first use and makes it the
    /// active context until the returned guard drops.
    ///
    /// Must be called on the thread this descriptor belongs to.
    pub fn enter(self: &Arc<Self>, ctx: &TaskGroupContext) -> ExecutionGuard {
        debug_assert!(
            self.is_current(),
            "enter() called from a thread that does not own this descriptor"
        );
        ctx.bind_to(self);
        let depth = ACTIVE_CONTEXTS.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(Arc::downgrade(ctx.cell()));
            stack.len()
        });
        ExecutionGuard {
            depth,
            _not_send: PhantomData,
        }
    }

    /// The context the dispatcher is currently executing under on this
    /// thread; the runtime default root when none has been entered.
    pub(crate) fn active_context(&self) -> Arc<GroupCell> {
        debug_assert!(self.is_current());
        ACTIVE_CONTEXTS
            .with(|stack| stack.borrow().last().and_then(Weak::upgrade))
            .unwrap_or_else(|| Arc::clone(self.runtime.default_context()))
    }

    /// Number of contexts currently bound to this thread.
    #[must_use]
    pub fn bound_context_count(&self) -> usize {
        self.context_list.lock().live()
    }

    /// Diagnostic: structural self-check of this thread's context list.
    /// Every reachable entry must also still be in the bound state.
    #[must_use]
    pub fn context_list_well_formed(&self) -> bool {
        let slots = self.context_list.lock();
        slots.is_well_formed()
            && slots
                .iter_live()
                .all(|cell| cell.lifetime_state() == crate::context::state::LifetimeState::Bound)
    }

    pub(crate) fn context_list(&self) -> &ContextListState {
        &self.context_list
    }

    /// Local propagation pass: under this thread's list lock, mark every
    /// listed descendant of `src`, then sync the local epoch with the global
    /// one.
    pub(crate) fn propagate_group_state<F: PropagatedField>(
        &self,
        src: &Arc<GroupCell>,
        new_state: u32,
        global_epoch: &AtomicU64,
    ) {
        let slots = self.context_list.lock();
        // The lock acquire makes entries inserted by the owning thread (and
        // their parent links) visible before the walk reads them.
        for cell in slots.iter_live() {
            if F::slot(&cell).load(Ordering::Relaxed) != new_state {
                propagation::mark_ancestry::<F>(&cell, src, new_state);
            }
        }
        // Sync while still holding the lock so no flag store from this walk
        // is ordered after the sync point.
        self.context_list
            .sync_epoch(global_epoch.load(Ordering::Relaxed));
        drop(slots);
    }

    fn is_current(&self) -> bool {
        CURRENT_THREAD.with(|current| {
            current
                .borrow()
                .as_ref()
                .is_some_and(|td| std::ptr::eq(Arc::as_ptr(td), self))
        })
    }
}

/// RAII guard returned by [`ThreadData::enter`].
///
/// Restores the previously active context when dropped. Guards nest and must
/// drop in LIFO order, which scoping enforces naturally.
#[derive(Debug)]
pub struct ExecutionGuard {
    depth: usize,
    _not_send: PhantomData<*mut ()>,
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        ACTIVE_CONTEXTS.with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(stack.len(), self.depth, "execution guards dropped out of order");
            stack.pop();
        });
    }
}
