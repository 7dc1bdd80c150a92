//! # Build Context
//!
//! The composition context of one rebuild pass: id allocation, reconciliation
//! and the scoped stacks that tree-construction handlers push and pop in
//! matching pairs.
//!
//! Nothing here is shared between passes or threads.

use crate::config::{self, ConfigSource, keys};
use crate::ids::IdAllocator;
use crate::reconcile::TreeReconciler;
use crate::{CreationId, ViewkeepError};
use std::cell::OnceCell;

// =============================================================================
// SCOPED STACK
// =============================================================================

/// A stack pushed and popped around one kind of tree-construction region.
#[derive(Debug, Clone)]
pub struct ScopedStack<T> {
    items: Vec<T>,
}

impl<T> Default for ScopedStack<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> ScopedStack<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    /// Pop the top entry. Popping an empty stack is a no-op.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop()
    }

    /// Top of the stack.
    #[must_use]
    pub fn peek(&self) -> Option<&T> {
        self.items.last()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Entries from top to bottom.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter().rev()
    }
}

// =============================================================================
// BUILD FLAGS
// =============================================================================

/// Per-pass flags, each resolved from configuration at most once.
#[derive(Debug, Default)]
struct BuildFlags {
    building_view_metadata: OnceCell<bool>,
    refreshing_transient_build: OnceCell<bool>,
    mark_initial_state: OnceCell<bool>,
}

// =============================================================================
// BUILD CONTEXT
// =============================================================================

/// Composition context of one rebuild pass.
pub struct BuildContext<'a> {
    config: &'a dyn ConfigSource,
    ids: IdAllocator,
    reconciler: TreeReconciler,
    flags: BuildFlags,
    /// Composite component boundaries, innermost on top.
    pub composites: ScopedStack<CreationId>,
    /// Validation groups of enclosing validation regions.
    pub validation_groups: ScopedStack<String>,
    /// Validator ids disabled by enclosing regions.
    pub excluded_validators: ScopedStack<String>,
    /// Validator ids applied by enclosing regions.
    pub enclosing_validators: ScopedStack<String>,
}

impl std::fmt::Debug for BuildContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildContext")
            .field("ids", &self.ids)
            .field("reconciler", &self.reconciler)
            .field("composites", &self.composites)
            .finish_non_exhaustive()
    }
}

impl<'a> BuildContext<'a> {
    /// Create a context reading its flags from `config`.
    pub fn new(config: &'a dyn ConfigSource) -> Self {
        Self::with_allocator(config, IdAllocator::new())
    }

    /// Create a context around a prepared allocator (recording, replaying,
    /// or backed by an id cache).
    pub fn with_allocator(config: &'a dyn ConfigSource, ids: IdAllocator) -> Self {
        Self {
            config,
            ids,
            reconciler: TreeReconciler::new(),
            flags: BuildFlags::default(),
            composites: ScopedStack::new(),
            validation_groups: ScopedStack::new(),
            excluded_validators: ScopedStack::new(),
            enclosing_validators: ScopedStack::new(),
        }
    }

    pub fn ids(&mut self) -> &mut IdAllocator {
        &mut self.ids
    }

    pub fn reconciler(&mut self) -> &mut TreeReconciler {
        &mut self.reconciler
    }

    /// Enter a composite component: opens an id section and pushes the
    /// component on the composite stack. Returns the section boundary id.
    pub fn enter_composite(&mut self, component: CreationId) -> String {
        self.composites.push(component);
        self.ids.start_section()
    }

    /// Leave the innermost composite component and close its id section.
    ///
    /// Fails without touching the allocator when no composite is open, so a
    /// section opened directly through [`Self::ids`] stays open.
    pub fn exit_composite(&mut self) -> Result<CreationId, ViewkeepError> {
        if self.composites.is_empty() {
            return Err(ViewkeepError::UnbalancedSection {
                depth: self.ids.depth(),
            });
        }
        self.ids.end_section()?;
        self.composites
            .pop()
            .ok_or(ViewkeepError::UnbalancedSection { depth: 0 })
    }

    /// Whether validator `id` is applied by an enclosing region.
    #[must_use]
    pub fn has_enclosing_validator(&self, id: &str) -> bool {
        self.enclosing_validators.iter().any(|v| v == id)
    }

    #[must_use]
    pub fn is_building_view_metadata(&self) -> bool {
        *self.flags.building_view_metadata.get_or_init(|| {
            config::read_bool(self.config, keys::BUILDING_VIEW_METADATA, false)
        })
    }

    #[must_use]
    pub fn is_refreshing_transient_build(&self) -> bool {
        *self.flags.refreshing_transient_build.get_or_init(|| {
            config::read_bool(self.config, keys::REFRESHING_TRANSIENT_BUILD, false)
        })
    }

    #[must_use]
    pub fn is_mark_initial_state(&self) -> bool {
        *self
            .flags
            .mark_initial_state
            .get_or_init(|| config::read_bool(self.config, keys::MARK_INITIAL_STATE, false))
    }

    /// Override the initial-state flag for the rest of the pass.
    pub fn set_mark_initial_state(&mut self, value: bool) {
        self.flags.mark_initial_state = OnceCell::from(value);
    }

    /// Whether nodes built now belong to a section being refreshed rather
    /// than built for the first time.
    #[must_use]
    pub fn is_refreshing_section(&self) -> bool {
        self.is_refreshing_transient_build()
            || (!self.is_building_view_metadata() && self.ids.is_in_metadata())
    }

    /// Hand back the allocator, e.g. to collect a recorded id sequence.
    #[must_use]
    pub fn into_allocator(self) -> IdAllocator {
        self.ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn config(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn scoped_stack_pops_in_reverse_order() {
        let mut stack = ScopedStack::new();
        stack.push("outer");
        stack.push("inner");
        assert_eq!(stack.peek(), Some(&"inner"));
        assert_eq!(stack.iter().copied().collect::<Vec<_>>(), vec!["inner", "outer"]);
        assert_eq!(stack.pop(), Some("inner"));
        assert_eq!(stack.pop(), Some("outer"));
        assert_eq!(stack.pop(), None);
        assert!(stack.is_empty());
    }

    #[test]
    fn composite_regions_open_id_sections() {
        let cfg = config(&[]);
        let mut ctx = BuildContext::new(&cfg);

        let boundary = ctx.enter_composite(CreationId::new("cc"));
        assert_eq!(boundary, "j_id1");
        assert_eq!(ctx.ids().next_id(), "j_id1_1");
        assert_eq!(ctx.composites.peek(), Some(&CreationId::new("cc")));

        assert_eq!(ctx.exit_composite().expect("exit"), CreationId::new("cc"));
        assert!(ctx.exit_composite().is_err());
    }

    #[test]
    fn exit_without_composite_keeps_plain_section_open() {
        let cfg = config(&[]);
        let mut ctx = BuildContext::new(&cfg);
        ctx.ids().start_section();

        assert!(matches!(
            ctx.exit_composite(),
            Err(ViewkeepError::UnbalancedSection { depth: 1 })
        ));
        assert_eq!(ctx.ids().depth(), 1);
        ctx.ids().end_section().expect("plain section still open");
    }

    #[test]
    fn flags_read_configuration() {
        let cfg = config(&[
            (keys::REFRESHING_TRANSIENT_BUILD, "true"),
            (keys::MARK_INITIAL_STATE, "true"),
        ]);
        let mut ctx = BuildContext::new(&cfg);

        assert!(ctx.is_refreshing_transient_build());
        assert!(!ctx.is_building_view_metadata());
        assert!(ctx.is_mark_initial_state());
        ctx.set_mark_initial_state(false);
        assert!(!ctx.is_mark_initial_state());
    }

    #[test]
    fn metadata_region_counts_as_refreshing_outside_metadata_build() {
        let cfg = config(&[]);
        let mut ctx = BuildContext::new(&cfg);
        assert!(!ctx.is_refreshing_section());

        ctx.ids().enter_metadata();
        assert!(ctx.is_refreshing_section());
        ctx.ids().exit_metadata().expect("exit");

        let metadata_cfg = config(&[(keys::BUILDING_VIEW_METADATA, "true")]);
        let mut metadata_ctx = BuildContext::new(&metadata_cfg);
        metadata_ctx.ids().enter_metadata();
        assert!(!metadata_ctx.is_refreshing_section());
    }

    #[test]
    fn enclosing_validators_are_searchable() {
        let cfg = config(&[]);
        let mut ctx = BuildContext::new(&cfg);
        ctx.enclosing_validators.push("required".to_string());
        assert!(ctx.has_enclosing_validator("required"));
        assert!(!ctx.has_enclosing_validator("length"));
        ctx.enclosing_validators.pop();
        assert!(!ctx.has_enclosing_validator("required"));
    }
}
