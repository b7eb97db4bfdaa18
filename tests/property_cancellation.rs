//! Property-based tests for the cancellation protocol.
//!
//! Covers the core invariants over randomized context trees:
//!
//! - **Monotonicity**: once a group reports cancelled it keeps reporting
//!   cancelled, whatever else is cancelled afterwards.
//! - **Idempotence**: the first cancellation returns `true`, every repeat
//!   returns `false`, and the flag reads 1 in both cases.
//! - **Inheritance boundary**: cancelling a node marks exactly the node and
//!   its transitive descendants; siblings, ancestors, and isolated contexts
//!   are untouched.

mod common;

use common::*;
use proptest::prelude::*;
use taskgrove::{TaskGroupContext, ThreadData};

/// A node of a randomized tree: the parent (an earlier index) and whether
/// the context opts out of binding.
#[derive(Debug, Clone, Copy)]
struct NodeSpec {
    parent: Option<usize>,
    isolated: bool,
}

fn tree_strategy() -> impl Strategy<Value = Vec<NodeSpec>> {
    prop::collection::vec((any::<u8>(), any::<bool>()), 1..10).prop_map(|raw| {
        raw.iter()
            .enumerate()
            .map(|(i, &(pick, isolated))| NodeSpec {
                parent: if i == 0 {
                    None
                } else {
                    Some(pick as usize % i)
                },
                isolated,
            })
            .collect()
    })
}

/// Binds `child` with `spec[target]`'s context active, entering the whole
/// ancestor path so guards drop in LIFO order.
fn bind_under_path(
    td: &std::sync::Arc<ThreadData>,
    contexts: &[TaskGroupContext],
    specs: &[NodeSpec],
    target: usize,
    child: &TaskGroupContext,
) {
    fn enter_path(
        td: &std::sync::Arc<ThreadData>,
        contexts: &[TaskGroupContext],
        path: &[usize],
        child: &TaskGroupContext,
    ) {
        match path.split_first() {
            None => child.bind_to(td),
            Some((&head, rest)) => {
                let _guard = td.enter(&contexts[head]);
                enter_path(td, contexts, rest, child);
            }
        }
    }

    let mut path = vec![target];
    while let Some(parent) = specs[*path.last().expect("path non-empty")].parent {
        path.push(parent);
    }
    path.reverse();
    enter_path(td, contexts, &path, child);
}

/// Builds the tree and returns the contexts, index-aligned with `specs`.
fn build_tree(
    td: &std::sync::Arc<ThreadData>,
    specs: &[NodeSpec],
) -> Vec<TaskGroupContext> {
    let mut contexts: Vec<TaskGroupContext> = Vec::with_capacity(specs.len());
    for spec in specs {
        let ctx = if spec.isolated {
            TaskGroupContext::isolated()
        } else {
            TaskGroupContext::new()
        };
        match spec.parent {
            None => {
                let _guard = td.enter(&ctx);
            }
            Some(parent) => bind_under_path(td, &contexts, specs, parent, &ctx),
        }
        contexts.push(ctx);
    }
    contexts
}

/// The parent a node actually attached to: none for isolated-trait nodes and
/// nodes bound at the outermost dispatch slot.
fn effective_parent(specs: &[NodeSpec], node: usize) -> Option<usize> {
    if specs[node].isolated {
        None
    } else {
        specs[node].parent
    }
}

fn is_descendant_of(specs: &[NodeSpec], node: usize, ancestor: usize) -> bool {
    let mut cursor = effective_parent(specs, node);
    while let Some(current) = cursor {
        if current == ancestor {
            return true;
        }
        cursor = effective_parent(specs, current);
    }
    false
}

proptest! {
    #[test]
    fn cancellation_marks_exactly_the_subtree(
        specs in tree_strategy(),
        target_pick in any::<u8>(),
    ) {
        let rt = fresh_runtime("prop-subtree");
        let outcome = on_fresh_thread(&rt, move |td| {
            let contexts = build_tree(&td, &specs);
            let target = target_pick as usize % specs.len();

            let first = contexts[target].cancel_group_execution();
            let flags: Vec<bool> = contexts
                .iter()
                .map(TaskGroupContext::is_group_execution_cancelled)
                .collect();
            let repeat = contexts[target].cancel_group_execution();
            let flags_after: Vec<bool> = contexts
                .iter()
                .map(TaskGroupContext::is_group_execution_cancelled)
                .collect();

            (specs, target, first, repeat, flags, flags_after)
        });
        let (specs, target, first, repeat, flags, flags_after) = outcome;

        // Idempotence.
        prop_assert!(first, "first cancellation must report the transition");
        prop_assert!(!repeat, "repeated cancellation must report a no-op");

        for (node, (&now, &later)) in flags.iter().zip(&flags_after).enumerate() {
            let expected = node == target || is_descendant_of(&specs, node, target);
            prop_assert_eq!(
                now, expected,
                "node {} cancelled={} expected={}", node, now, expected
            );
            // Monotonicity: nothing un-cancels, nothing new appears.
            prop_assert_eq!(now, later, "node {} changed after a no-op cancel", node);
        }
    }

    #[test]
    fn two_cancellations_union_their_subtrees(
        specs in tree_strategy(),
        first_pick in any::<u8>(),
        second_pick in any::<u8>(),
    ) {
        let rt = fresh_runtime("prop-union");
        let outcome = on_fresh_thread(&rt, move |td| {
            let contexts = build_tree(&td, &specs);
            let first = first_pick as usize % specs.len();
            let second = second_pick as usize % specs.len();

            contexts[first].cancel_group_execution();
            contexts[second].cancel_group_execution();
            let flags: Vec<bool> = contexts
                .iter()
                .map(TaskGroupContext::is_group_execution_cancelled)
                .collect();
            (specs, first, second, flags)
        });
        let (specs, first, second, flags) = outcome;

        for (node, &cancelled) in flags.iter().enumerate() {
            let expected = node == first
                || node == second
                || is_descendant_of(&specs, node, first)
                || is_descendant_of(&specs, node, second);
            prop_assert_eq!(
                cancelled, expected,
                "node {} cancelled={} expected={}", node, cancelled, expected
            );
        }
    }
}
