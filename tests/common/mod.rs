#![allow(dead_code)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use std::sync::Arc;

use taskgrove::{Runtime, RuntimeBuilder, TaskGroupContext, ThreadData};

/// Default seed for randomized stress tests; override with
/// `TASKGROVE_TEST_SEED` to reproduce a reported failure.
pub const DEFAULT_TEST_SEED: u64 = 0xDEADBEEF;

const TEST_SEED_ENV: &str = "TASKGROVE_TEST_SEED";

/// Returns the stress-test seed, honoring the environment override.
#[must_use]
pub fn test_seed() -> u64 {
    std::env::var(TEST_SEED_ENV)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(DEFAULT_TEST_SEED)
}

/// Builds a private runtime so epoch counters and metrics start from zero.
#[must_use]
pub fn fresh_runtime(label: &str) -> Arc<Runtime> {
    RuntimeBuilder::new().label(label).build()
}

/// Runs `f` on a freshly spawned thread registered with `runtime` and
/// returns its result.
pub fn on_fresh_thread<T, F>(runtime: &Arc<Runtime>, f: F) -> T
where
    T: Send + 'static,
    F: FnOnce(Arc<ThreadData>) -> T + Send + 'static,
{
    let runtime = Arc::clone(runtime);
    std::thread::spawn(move || f(ThreadData::current_for(&runtime)))
        .join()
        .expect("worker thread panicked")
}

/// Builds `chain[0] ← chain[1] ← …` on the calling thread; `chain[0]` binds
/// under the default context and therefore isolates, acting as the root.
#[must_use]
pub fn bind_chain(td: &Arc<ThreadData>, len: usize) -> Vec<TaskGroupContext> {
    let contexts: Vec<_> = (0..len).map(|_| TaskGroupContext::new()).collect();
    let mut guards = Vec::with_capacity(len);
    for ctx in &contexts {
        guards.push(td.enter(ctx));
    }
    while guards.pop().is_some() {}
    contexts
}

/// Destroys a chain youngest-first, respecting "a parent outlives its
/// children".
pub fn drop_chain(mut chain: Vec<TaskGroupContext>) {
    while chain.pop().is_some() {}
}
