//! # Property-Based Tests
//!
//! Determinism and pruning invariants checked with proptest.

use proptest::collection::{btree_set, vec};
use proptest::prelude::*;
use std::collections::BTreeSet;
use viewkeep_core::{CreationId, IdAllocator, TreeReconciler, UiNode};

#[derive(Debug, Clone, Copy)]
enum IdOp {
    Next,
    Component,
    Start,
    End,
    Metadata,
}

fn id_op() -> impl Strategy<Value = IdOp> {
    prop_oneof![
        4 => Just(IdOp::Next),
        1 => Just(IdOp::Component),
        2 => Just(IdOp::Start),
        2 => Just(IdOp::End),
        1 => Just(IdOp::Metadata),
    ]
}

/// Run `script` against `ids`, skipping unbalanced closes.
fn run_script(ids: &mut IdAllocator, script: &[IdOp]) -> Vec<String> {
    let mut out = Vec::new();
    for op in script {
        match op {
            IdOp::Next => out.push(ids.next_id()),
            IdOp::Component => out.push(ids.next_component_id()),
            IdOp::Start => out.push(ids.start_section()),
            IdOp::End => {
                if ids.depth() > 0 {
                    ids.end_section().expect("balanced");
                }
            }
            IdOp::Metadata => {
                ids.enter_metadata();
                out.push(ids.next_id());
                ids.exit_metadata().expect("balanced");
            }
        }
    }
    out
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Replaying a recorded pass reproduces every id it minted.
    #[test]
    fn replay_reproduces_recorded_pass(script in vec(id_op(), 0..80)) {
        let mut recorder = IdAllocator::new();
        recorder.start_recording();
        let recorded_out = run_script(&mut recorder, &script);
        let journal = recorder.take_recorded().expect("recording");

        let mut replayer = IdAllocator::new();
        replayer.replay(journal);
        let replayed_out = run_script(&mut replayer, &script);

        prop_assert_eq!(recorded_out, replayed_out);
        prop_assert_eq!(replayer.replay_remaining(), 0);
    }

    /// Unique ids minted in one pass never repeat.
    #[test]
    fn unique_ids_never_repeat(script in vec(id_op(), 0..80)) {
        let mut ids = IdAllocator::new();
        let mut seen = BTreeSet::new();
        for op in &script {
            match op {
                IdOp::Next => prop_assert!(seen.insert(ids.next_id())),
                IdOp::Start => prop_assert!(seen.insert(ids.start_section())),
                IdOp::End => {
                    if ids.depth() > 0 {
                        ids.end_section().expect("balanced");
                    }
                }
                IdOp::Component | IdOp::Metadata => {}
            }
        }
    }

    /// `end_level` removes exactly the marked children nobody re-affirmed.
    #[test]
    fn end_level_removes_exactly_unreaffirmed(
        children in btree_set("[a-z]{1,6}", 0..20),
        keep_mask in vec(any::<bool>(), 20),
        programmatic in 0usize..4,
    ) {
        let mut parent = UiNode::created("panel", "parent-root");
        for id in &children {
            parent = parent.with_child(UiNode::created("text", id.as_str()));
        }
        for _ in 0..programmatic {
            parent = parent.with_child(UiNode::new("script"));
        }

        let mut reconciler = TreeReconciler::new();
        reconciler.mark_for_deletion(&parent).expect("mark");

        let mut kept = BTreeSet::new();
        for (id, keep) in children.iter().zip(&keep_mask) {
            if *keep {
                reconciler.unmark(&UiNode::created("text", id.as_str())).expect("unmark");
                kept.insert(id.clone());
            }
        }

        let removed: BTreeSet<String> = reconciler
            .end_level(&mut parent)
            .expect("end")
            .into_iter()
            .map(|id: CreationId| id.as_str().to_string())
            .collect();
        let expected: BTreeSet<String> = children.difference(&kept).cloned().collect();

        prop_assert_eq!(removed, expected);
        prop_assert_eq!(parent.children.len(), kept.len() + programmatic);
        prop_assert_eq!(reconciler.depth(), 0);
    }
}
