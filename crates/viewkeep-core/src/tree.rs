//! # UI Tree Model
//!
//! The concrete node tree the reconciler prunes and the default codec
//! persists.
//!
//! A node has an ordered child list and a set of named, single-slot facets.
//! Nodes built from a template instruction carry a [`CreationId`]; nodes
//! created programmatically do not, and are never pruned by reconciliation.

use crate::CreationId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Structural role of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum NodeRole {
    /// An ordinary node with its own identity.
    #[default]
    Component,
    /// A synthetic grouping node inserted only to hold several facet
    /// children. Its identity is never tracked; its children's is.
    TransparentWrapper,
}

/// A node in a UI tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UiNode {
    /// Component type name (e.g. `panel`, `input`).
    pub component_type: String,
    /// Creation id stamped by the template instruction that built the node.
    pub creation_id: Option<CreationId>,
    /// Structural role.
    pub role: NodeRole,
    /// Mutable state carried across requests.
    pub attributes: BTreeMap<String, String>,
    /// Ordered children.
    pub children: Vec<UiNode>,
    /// Named facets.
    pub facets: BTreeMap<String, UiNode>,
}

impl UiNode {
    /// Create a node without a creation id.
    #[must_use]
    pub fn new(component_type: impl Into<String>) -> Self {
        Self {
            component_type: component_type.into(),
            ..Self::default()
        }
    }

    /// Create a node built from a template instruction.
    #[must_use]
    pub fn created(component_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(component_type).with_creation_id(id)
    }

    /// Create a transparent wrapper holding the given facet children.
    #[must_use]
    pub fn wrapper(children: Vec<UiNode>) -> Self {
        Self {
            component_type: "wrapper".to_string(),
            role: NodeRole::TransparentWrapper,
            children,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_creation_id(mut self, id: impl Into<String>) -> Self {
        self.creation_id = Some(CreationId::new(id));
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_child(mut self, child: UiNode) -> Self {
        self.children.push(child);
        self
    }

    #[must_use]
    pub fn with_facet(mut self, name: impl Into<String>, facet: UiNode) -> Self {
        self.facets.insert(name.into(), facet);
        self
    }

    /// Whether this node defers identity to its children.
    #[must_use]
    pub fn is_transparent_wrapper(&self) -> bool {
        self.role == NodeRole::TransparentWrapper
    }

    /// Find a direct child by creation id.
    #[must_use]
    pub fn child(&self, id: &str) -> Option<&UiNode> {
        self.children
            .iter()
            .find(|c| c.creation_id.as_ref().is_some_and(|cid| cid.as_str() == id))
    }

    /// Find a direct child by creation id, mutably.
    pub fn child_mut(&mut self, id: &str) -> Option<&mut UiNode> {
        self.children
            .iter_mut()
            .find(|c| c.creation_id.as_ref().is_some_and(|cid| cid.as_str() == id))
    }

    /// Depth-first search for a node by creation id, including facets.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<&UiNode> {
        if self.creation_id.as_ref().is_some_and(|cid| cid.as_str() == id) {
            return Some(self);
        }
        self.facets
            .values()
            .chain(self.children.iter())
            .find_map(|n| n.find(id))
    }

    /// Total number of nodes in this subtree, including facets.
    #[must_use]
    pub fn subtree_len(&self) -> usize {
        1 + self
            .facets
            .values()
            .chain(self.children.iter())
            .map(UiNode::subtree_len)
            .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_descends_into_facets_and_children() {
        let tree = UiNode::new("root")
            .with_child(UiNode::created("panel", "a").with_child(UiNode::created("text", "b")))
            .with_facet("header", UiNode::wrapper(vec![UiNode::created("text", "c")]));

        assert!(tree.find("b").is_some());
        assert!(tree.find("c").is_some());
        assert!(tree.find("missing").is_none());
        assert_eq!(tree.subtree_len(), 5);
    }

    #[test]
    fn wrapper_role_is_explicit() {
        assert!(UiNode::wrapper(Vec::new()).is_transparent_wrapper());
        assert!(!UiNode::new("panel").is_transparent_wrapper());
    }
}
