//! Loom model of the bind-versus-propagation epoch protocol.
//!
//! These tests explore all interleavings of a binder speculating its
//! parent's cancellation state against a concurrent propagation from a
//! grand-ancestor, verifying that no interleaving loses the cancellation.
//!
//! Run with: RUSTFLAGS="--cfg loom" cargo test --test context_loom --release
//!
//! The model mirrors the production algorithm rather than instantiating the
//! production types (which use std primitives loom cannot intercept):
//! contexts are indices, the parent chain is a static array, and the worker
//! list, local epoch, global epoch, and global lock follow the exact
//! ordering discipline of the real implementation.

#![cfg(loom)]

use loom::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use loom::sync::{Arc, Mutex};
use loom::thread;

const GRANDPARENT: usize = 0;
const PARENT: usize = 1;
const CHILD: usize = 2;

/// Static parent links: child → parent → grandparent.
const PARENT_OF: [Option<usize>; 3] = [None, Some(GRANDPARENT), Some(PARENT)];

struct Model {
    /// Per-context cancellation flags.
    flags: [AtomicU32; 3],
    /// The single worker's context list (indices of bound contexts).
    list: Mutex<Vec<usize>>,
    /// The worker's local propagation epoch.
    local_epoch: AtomicU64,
    /// Global propagation epoch.
    global_epoch: AtomicU64,
    /// Global propagation lock.
    global_lock: Mutex<()>,
}

impl Model {
    fn new() -> Self {
        Self {
            flags: [AtomicU32::new(0), AtomicU32::new(0), AtomicU32::new(0)],
            // The parent is already bound on the worker.
            list: Mutex::new(vec![PARENT]),
            local_epoch: AtomicU64::new(0),
            global_epoch: AtomicU64::new(0),
            global_lock: Mutex::new(()),
        }
    }

    fn is_descendant(&self, node: usize, ancestor: usize) -> bool {
        let mut cursor = PARENT_OF[node];
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = PARENT_OF[current];
        }
        false
    }

    /// The propagation engine: cancel `src`, then walk the worker list under
    /// the global lock, marking descendants and syncing the local epoch.
    fn cancel(&self, src: usize) {
        if self.flags[src].load(Ordering::Relaxed) != 0
            || self.flags[src].swap(1, Ordering::SeqCst) != 0
        {
            return;
        }

        let _global = self.global_lock.lock().unwrap();
        self.global_epoch.fetch_add(1, Ordering::Relaxed);

        let list = self.list.lock().unwrap();
        for &ctx in list.iter() {
            if self.flags[ctx].load(Ordering::Relaxed) != 1 && self.is_descendant(ctx, src) {
                let mut cursor = ctx;
                while cursor != src {
                    self.flags[cursor].store(1, Ordering::Relaxed);
                    match PARENT_OF[cursor] {
                        Some(next) => cursor = next,
                        None => break,
                    }
                }
            }
        }
        self.local_epoch
            .store(self.global_epoch.load(Ordering::Relaxed), Ordering::Release);
        drop(list);
    }

    /// The binder: attach `CHILD` under `PARENT` with the speculative copy
    /// plus epoch validation.
    fn bind_child(&self) {
        // Parent has a grand-ancestor, so a propagation may be in flight.
        let snapshot = self.local_epoch.load(Ordering::Acquire);
        self.flags[CHILD].store(
            self.flags[PARENT].load(Ordering::Relaxed),
            Ordering::Relaxed,
        );
        self.list.lock().unwrap().push(CHILD);

        if snapshot != self.global_epoch.load(Ordering::Relaxed) {
            let _global = self.global_lock.lock().unwrap();
            self.flags[CHILD].store(
                self.flags[PARENT].load(Ordering::Relaxed),
                Ordering::Relaxed,
            );
        }
    }
}

#[test]
fn loom_bind_during_cancel_never_loses_the_flag() {
    loom::model(|| {
        let model = Arc::new(Model::new());

        let canceller = {
            let model = Arc::clone(&model);
            thread::spawn(move || model.cancel(GRANDPARENT))
        };
        let binder = {
            let model = Arc::clone(&model);
            thread::spawn(move || model.bind_child())
        };
        canceller.join().unwrap();
        binder.join().unwrap();

        assert_eq!(
            model.flags[CHILD].load(Ordering::SeqCst),
            1,
            "child escaped a concurrent cancellation"
        );
        assert_eq!(model.flags[PARENT].load(Ordering::SeqCst), 1);
    });
}

#[test]
fn loom_double_cancel_is_idempotent() {
    loom::model(|| {
        let model = Arc::new(Model::new());

        let a = {
            let model = Arc::clone(&model);
            thread::spawn(move || model.cancel(GRANDPARENT))
        };
        let b = {
            let model = Arc::clone(&model);
            thread::spawn(move || model.cancel(GRANDPARENT))
        };
        a.join().unwrap();
        b.join().unwrap();

        assert_eq!(model.flags[GRANDPARENT].load(Ordering::SeqCst), 1);
        assert_eq!(model.flags[PARENT].load(Ordering::SeqCst), 1);
    });
}
