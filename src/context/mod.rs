//! Task-group contexts: life-cycle, binding, and cancellation entry points.
//!
//! A [`TaskGroupContext`] is a node in a per-process tree that groups related
//! units of parallel work. It carries a monotonic cancellation flag, an
//! optionally captured floating-point environment, and at most one pending
//! panic to be re-thrown at the group boundary.
//!
//! The premise of the design is that cancellation is not part of the hot
//! path. Creating a context, binding it on first use, and reading its
//! cancellation flag involve no cross-thread synchronization; the context
//! tree is split into per-thread lists so that cross-thread access happens
//! only when a cancellation is actually propagated.

pub mod fp_env;
pub mod group;
pub mod panic_cell;
pub mod state;

pub use fp_env::{ambient_fp_env, set_ambient_fp_env, FpEnv};
pub use group::TaskGroupContext;
pub use panic_cell::PendingPanic;
pub use state::LifetimeState;
