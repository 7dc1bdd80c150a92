//! # Tree Reconciler
//!
//! Prunes nodes that a partial rebuild did not re-affirm, without diffing the
//! whole tree.
//!
//! A rebuild of a subtree runs as:
//!
//! ```text
//! begin_level()          push an empty mark map
//! mark(node)             record node + its id-carrying children/facets
//!   ... rebuild ...      unmark(child) for every node re-created this pass
//! end_level(&mut node)   delete whatever is still marked, pop the level
//! ```
//!
//! Levels nest. Unmarking at depth `n` also clears the same id at depth
//! `n - 1`, so a node re-affirmed by an inner rebuild is never deleted when
//! the outer level concludes.

use crate::primitives::ROOT_SENTINEL_ID;
use crate::tree::UiNode;
use crate::{CreationId, ViewkeepError};
use std::collections::BTreeMap;

/// Where a marked node sits relative to the node passed to `mark`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkSlot {
    /// The node passed to `mark` itself.
    Owner,
    /// An ordinary child.
    Child,
    /// A facet with its own identity.
    Facet(String),
    /// A child of a transparent wrapper facet.
    WrapperChild(String),
}

/// Record kept for every marked node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkedNode {
    pub component_type: String,
    pub slot: MarkSlot,
}

type MarkLevel = BTreeMap<CreationId, MarkedNode>;

/// Mark-and-prune reconciliation session for one rebuild pass.
#[derive(Debug, Default)]
pub struct TreeReconciler {
    /// One map per open level; `levels.len()` is the nesting depth.
    levels: Vec<MarkLevel>,
    /// Cleared maps kept for reuse by later levels.
    spare: Vec<MarkLevel>,
}

impl TreeReconciler {
    /// Create a reconciler with no open level.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current nesting depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Open a new level.
    pub fn begin_level(&mut self) {
        let level = self.spare.pop().unwrap_or_default();
        self.levels.push(level);
    }

    /// Open a level and mark `node` in it.
    pub fn mark_for_deletion(&mut self, node: &UiNode) -> Result<(), ViewkeepError> {
        self.begin_level();
        self.mark(node)
    }

    /// Mark `node` and its id-carrying children and facets on the current level.
    pub fn mark(&mut self, node: &UiNode) -> Result<(), ViewkeepError> {
        let depth = self.depth();
        let level = self
            .levels
            .last_mut()
            .ok_or(ViewkeepError::UnbalancedLevel { depth })?;

        level.insert(
            own_id(node),
            MarkedNode {
                component_type: node.component_type.clone(),
                slot: MarkSlot::Owner,
            },
        );

        for (name, facet) in &node.facets {
            if let Some(id) = &facet.creation_id {
                level.insert(
                    id.clone(),
                    MarkedNode {
                        component_type: facet.component_type.clone(),
                        slot: MarkSlot::Facet(name.clone()),
                    },
                );
            } else if facet.is_transparent_wrapper() {
                for child in &facet.children {
                    if let Some(id) = &child.creation_id {
                        level.insert(
                            id.clone(),
                            MarkedNode {
                                component_type: child.component_type.clone(),
                                slot: MarkSlot::WrapperChild(name.clone()),
                            },
                        );
                    }
                }
            }
        }

        for child in &node.children {
            if let Some(id) = &child.creation_id {
                level.insert(
                    id.clone(),
                    MarkedNode {
                        component_type: child.component_type.clone(),
                        slot: MarkSlot::Child,
                    },
                );
            }
        }

        Ok(())
    }

    /// Re-affirm `node`: it was rebuilt this pass and must survive.
    ///
    /// Returns whether the node was marked on the current level.
    pub fn unmark(&mut self, node: &UiNode) -> Result<bool, ViewkeepError> {
        if self.levels.is_empty() {
            return Err(ViewkeepError::UnbalancedLevel { depth: 0 });
        }
        Ok(self.take_mark(&own_id(node)).is_some())
    }

    /// Whether `id` is still marked on the current level.
    #[must_use]
    pub fn is_marked(&self, id: &str) -> bool {
        self.levels
            .last()
            .is_some_and(|level| level.contains_key(&CreationId::new(id)))
    }

    /// Ids still marked on the current level, in order.
    #[must_use]
    pub fn pending(&self) -> Vec<CreationId> {
        self.levels
            .last()
            .map(|level| level.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Close the current level, deleting every node of `node` still marked.
    ///
    /// `node` must be the node passed to the `mark` call that opened this
    /// level. Returns the creation ids removed from the tree.
    pub fn end_level(&mut self, node: &mut UiNode) -> Result<Vec<CreationId>, ViewkeepError> {
        if self.levels.is_empty() {
            return Err(ViewkeepError::UnbalancedLevel { depth: 0 });
        }

        self.take_mark(&own_id(node));
        let mut removed = Vec::new();

        node.children.retain(|child| match &child.creation_id {
            Some(id) if self.take_mark(id).is_some() => {
                removed.push(id.clone());
                false
            }
            _ => true,
        });

        node.facets.retain(|_, facet| {
            if let Some(id) = &facet.creation_id {
                if self.take_mark(id).is_some() {
                    removed.push(id.clone());
                    return false;
                }
                return true;
            }
            if !facet.is_transparent_wrapper() {
                return true;
            }
            facet.children.retain(|child| match &child.creation_id {
                Some(id) if self.take_mark(id).is_some() => {
                    removed.push(id.clone());
                    false
                }
                _ => true,
            });
            !facet.children.is_empty()
        });

        if let Some(mut level) = self.levels.pop() {
            if !level.is_empty() {
                tracing::debug!(
                    depth = self.levels.len() + 1,
                    leftover = level.len(),
                    "discarding marks not found under the reconciled node"
                );
            }
            level.clear();
            self.spare.push(level);
        }

        if !removed.is_empty() {
            tracing::debug!(count = removed.len(), "pruned stale nodes");
        }
        Ok(removed)
    }

    /// Remove `id` from the current level and, when found below the outermost
    /// level, from the parent level as well.
    fn take_mark(&mut self, id: &CreationId) -> Option<MarkedNode> {
        let depth = self.levels.len();
        let removed = self.levels.last_mut()?.remove(id);
        if removed.is_some() && depth > 1 {
            self.levels[depth - 2].remove(id);
        }
        removed
    }
}

fn own_id(node: &UiNode) -> CreationId {
    node.creation_id
        .clone()
        .unwrap_or_else(|| CreationId::new(ROOT_SENTINEL_ID))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> UiNode {
        UiNode::new("root")
            .with_child(UiNode::created("text", "a"))
            .with_child(UiNode::created("text", "b"))
            .with_child(UiNode::created("text", "c"))
    }

    #[test]
    fn mark_uses_root_sentinel_for_unidentified_node() {
        let mut reconciler = TreeReconciler::new();
        reconciler.mark_for_deletion(&page()).expect("mark");

        assert!(reconciler.is_marked(ROOT_SENTINEL_ID));
        assert_eq!(reconciler.pending().len(), 4);
    }

    #[test]
    fn mark_without_level_is_unbalanced() {
        let mut reconciler = TreeReconciler::new();
        let result = reconciler.mark(&page());
        assert!(matches!(result, Err(ViewkeepError::UnbalancedLevel { depth: 0 })));
    }

    #[test]
    fn end_level_removes_only_unaffirmed_children() {
        let mut tree = page();
        let mut reconciler = TreeReconciler::new();
        reconciler.mark_for_deletion(&tree).expect("mark");

        let b = tree.child("b").cloned().expect("b");
        let c = tree.child("c").cloned().expect("c");
        assert!(reconciler.unmark(&b).expect("unmark"));
        assert!(reconciler.unmark(&c).expect("unmark"));

        let removed = reconciler.end_level(&mut tree).expect("end");

        assert_eq!(removed, vec![CreationId::new("a")]);
        assert!(tree.child("a").is_none());
        assert!(tree.child("b").is_some());
        assert!(tree.child("c").is_some());
        assert_eq!(reconciler.depth(), 0);
    }

    #[test]
    fn children_without_creation_id_are_never_pruned() {
        let mut tree = page().with_child(UiNode::new("programmatic"));
        let mut reconciler = TreeReconciler::new();
        reconciler.mark_for_deletion(&tree).expect("mark");

        reconciler.end_level(&mut tree).expect("end");

        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].component_type, "programmatic");
    }

    #[test]
    fn facets_with_identity_are_pruned_by_name() {
        let mut tree = UiNode::new("root")
            .with_facet("header", UiNode::created("text", "h"))
            .with_facet("footer", UiNode::created("text", "f"));
        let mut reconciler = TreeReconciler::new();
        reconciler.mark_for_deletion(&tree).expect("mark");

        let footer = tree.facets["footer"].clone();
        reconciler.unmark(&footer).expect("unmark");
        reconciler.end_level(&mut tree).expect("end");

        assert!(!tree.facets.contains_key("header"));
        assert!(tree.facets.contains_key("footer"));
    }

    #[test]
    fn wrapper_facet_is_dropped_once_childless() {
        let mut tree = UiNode::new("root").with_facet(
            "actions",
            UiNode::wrapper(vec![UiNode::created("button", "x"), UiNode::created("button", "y")]),
        );
        let mut reconciler = TreeReconciler::new();

        // First pass: only y is re-affirmed.
        reconciler.mark_for_deletion(&tree).expect("mark");
        assert!(reconciler.is_marked("x"));
        assert!(!reconciler.is_marked("wrapper"));
        let y = UiNode::created("button", "y");
        reconciler.unmark(&y).expect("unmark");
        assert_eq!(reconciler.end_level(&mut tree).expect("end"), vec![CreationId::new("x")]);
        assert_eq!(tree.facets["actions"].children.len(), 1);

        // Second pass: nothing re-affirmed, wrapper disappears.
        reconciler.mark_for_deletion(&tree).expect("mark");
        reconciler.end_level(&mut tree).expect("end");
        assert!(tree.facets.is_empty());
    }

    #[test]
    fn inner_unmark_protects_node_from_outer_level() {
        let mut tree = UiNode::new("root").with_child(
            UiNode::created("panel", "p").with_child(UiNode::created("text", "t")),
        );
        let mut reconciler = TreeReconciler::new();

        reconciler.mark_for_deletion(&tree).expect("mark outer");
        let mut panel = tree.children.remove(0);
        reconciler.mark_for_deletion(&panel).expect("mark inner");
        assert_eq!(reconciler.depth(), 2);

        // The inner level re-affirms the panel itself.
        reconciler.end_level(&mut panel).expect("end inner");
        tree.children.push(panel);

        let removed = reconciler.end_level(&mut tree).expect("end outer");
        assert!(removed.is_empty());
        assert!(tree.child("p").is_some());
        assert!(tree.find("t").is_none());
    }

    #[test]
    fn end_without_level_is_unbalanced() {
        let mut reconciler = TreeReconciler::new();
        let mut tree = page();
        assert!(reconciler.end_level(&mut tree).is_err());
        assert!(reconciler.unmark(&tree).is_err());
    }

    #[test]
    fn levels_are_reused_after_clearing() {
        let mut reconciler = TreeReconciler::new();
        let mut tree = page();
        for _ in 0..3 {
            reconciler.mark_for_deletion(&tree).expect("mark");
            reconciler.end_level(&mut tree).expect("end");
        }
        assert_eq!(reconciler.depth(), 0);
        assert!(reconciler.pending().is_empty());
    }
}
