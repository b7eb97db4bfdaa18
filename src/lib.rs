//! Taskgrove: the task-group cancellation core of a work-stealing parallel
//! scheduler.
//!
//! # Overview
//!
//! A [`TaskGroupContext`] is a node in a per-process tree that groups related
//! units of parallel work. It carries a monotonic cancellation flag, an
//! optionally captured floating-point environment, and at most one pending
//! panic re-thrown at the group boundary. Cancelling any node reaches every
//! transitive descendant, including descendants being bound concurrently,
//! while the hot path (creating, binding, and polling a context during
//! normal execution) stays free of cross-thread synchronization.
//!
//! # How cancellation propagates
//!
//! The context tree is maintained in per-thread pieces: each registered
//! thread keeps a list of the contexts it bound, so normal execution never
//! touches another thread's structures. A cancellation walks every thread's
//! list under a single global lock and marks the descendants of the cancelled
//! node. Bindings that race with a propagation are caught by an epoch
//! protocol: the binder speculates the parent's state, publishes the child
//! through its list lock, and re-validates the speculation against the
//! global propagation epoch, falling back to one re-copy under the global
//! lock when the epochs disagree.
//!
//! # Core guarantees
//!
//! - **Monotonic flag**: once cancelled, a group stays cancelled until an
//!   explicitly single-threaded [`reset`](TaskGroupContext::reset).
//! - **No escaping children**: a child bound during or after a cancellation
//!   inherits the flag before `bind` returns.
//! - **Cold-path synchronization only**: polling the flag is a relaxed load;
//!   the global lock is taken only to cancel or to close the bind race.
//! - **First failure wins**: one panic per group is retained and re-thrown
//!   at the boundary with its original payload type.
//!
//! # Module structure
//!
//! - [`types`]: creation traits and the panic summary type
//! - [`context`]: the context cell, life-cycle machine, FP env, panic carrier
//! - [`runtime`]: thread registry, per-thread context lists, propagation
//! - [`util`]: deterministic RNG for reproducible stress tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod context;
pub mod runtime;
pub mod tracing_compat;
pub mod types;
pub mod util;

pub use context::{
    ambient_fp_env, set_ambient_fp_env, FpEnv, LifetimeState, PendingPanic, TaskGroupContext,
};
pub use runtime::{ExecutionGuard, Runtime, RuntimeBuilder, RuntimeConfig, ThreadData};
pub use types::{ContextTraits, PanicPayload};
