//! The runtime: thread registry, default root context, propagation state.
//!
//! A [`Runtime`] is the process-level collaborator of the cancellation core:
//! it owns the default root context (the "no effective parent" marker), the
//! registry of threads whose context lists a propagation must visit, and the
//! global propagation epoch and lock. A process singleton is available via
//! [`Runtime::global`]; embedders and tests may build private instances with
//! [`RuntimeBuilder`].
//!
//! # Lock order
//!
//! When more than one lock is held, acquire in this order:
//!
//! ```text
//! propagation lock → thread registry lock → any thread's list lock
//! ```
//!
//! The binding fast path takes only the binder's own list lock; its
//! epoch-mismatch fallback takes the propagation lock strictly after that
//! list lock is released.

pub mod builder;
pub(crate) mod context_list;
pub(crate) mod propagation;
pub mod thread_data;

pub use builder::{RuntimeBuilder, RuntimeConfig};
pub use thread_data::{ExecutionGuard, ThreadData};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use crate::context::fp_env::FpEnv;
use crate::context::group::GroupCell;
use crate::runtime::propagation::PropagationState;
use crate::tracing_compat::debug;

static GLOBAL: OnceLock<Arc<Runtime>> = OnceLock::new();

/// Process-level state shared by all contexts of one scheduler instance.
#[derive(Debug)]
pub struct Runtime {
    config: RuntimeConfig,
    default_ctx: Arc<GroupCell>,
    registry: Mutex<Vec<Weak<ThreadData>>>,
    next_thread_id: AtomicU64,
    propagation: PropagationState,
}

impl Runtime {
    /// Returns a builder for a private runtime instance.
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// The process-global runtime, built with defaults on first use.
    #[must_use]
    pub fn global() -> &'static Arc<Self> {
        GLOBAL.get_or_init(|| RuntimeBuilder::new().build())
    }

    pub(crate) fn with_config(config: RuntimeConfig) -> Arc<Self> {
        let env = config.default_fp_env.unwrap_or_else(FpEnv::capture_current);
        let runtime = Arc::new(Self {
            default_ctx: GroupCell::new_default_root(env),
            registry: Mutex::new(Vec::new()),
            next_thread_id: AtomicU64::new(0),
            propagation: PropagationState::new(),
            config,
        });
        debug!(label = runtime.config.label.as_str(), "runtime created");
        runtime
    }

    /// The configuration this runtime was built with.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Registers the calling context's thread descriptor.
    pub(crate) fn register_thread(self: &Arc<Self>) -> Arc<ThreadData> {
        let id = self.next_thread_id.fetch_add(1, Ordering::Relaxed);
        let td = Arc::new(ThreadData::new(
            id,
            Arc::clone(self),
            self.config.context_list_capacity,
        ));
        self.registry.lock().push(Arc::downgrade(&td));
        td
    }

    /// Snapshot of the live registered threads; dead registrations are
    /// pruned in passing.
    pub(crate) fn registered_threads(&self) -> Vec<Arc<ThreadData>> {
        let mut registry = self.registry.lock();
        registry.retain(|td| td.strong_count() > 0);
        registry.iter().filter_map(Weak::upgrade).collect()
    }

    /// The root context marking "no effective parent".
    pub(crate) fn default_context(&self) -> &Arc<GroupCell> {
        &self.default_ctx
    }

    pub(crate) fn propagation(&self) -> &PropagationState {
        &self.propagation
    }

    /// Current global propagation epoch.
    #[must_use]
    pub fn propagation_epoch(&self) -> u64 {
        self.propagation.epoch_relaxed()
    }

    /// Number of bindings that re-validated the parent's state under the
    /// propagation lock instead of through the epoch fast path.
    #[must_use]
    pub fn slow_path_rebinds(&self) -> u64 {
        self.propagation.slow_path_rebinds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_runtime_is_a_singleton() {
        let a = Runtime::global();
        let b = Runtime::global();
        assert!(Arc::ptr_eq(a, b));
    }

    #[test]
    fn registry_prunes_dead_threads() {
        let runtime = Runtime::builder().label("prune-test").build();
        {
            let _td = runtime.register_thread();
            assert_eq!(runtime.registered_threads().len(), 1);
        }
        assert!(runtime.registered_threads().is_empty());
    }

    #[test]
    fn default_context_carries_configured_fp_env() {
        let runtime = Runtime::builder()
            .default_fp_env(FpEnv::from_bits(0xABCD))
            .build();
        assert_eq!(
            runtime.default_context().fp_env_for_test().bits(),
            0xABCD
        );
    }

    #[test]
    fn thread_ids_are_distinct() {
        let runtime = Runtime::builder().build();
        let a = runtime.register_thread();
        let b = runtime.register_thread();
        assert_ne!(a.id(), b.id());
    }
}
