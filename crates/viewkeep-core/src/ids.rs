//! # Identifier Allocation
//!
//! Deterministic, sectioned id generation for tree nodes.
//!
//! Ids are `prefix + count`. Entering a uniquely-scoped region (a composite
//! component boundary) mints a boundary id from the enclosing section and
//! opens a nested section whose prefix is that boundary, so ids stay unique
//! without coordination across sections:
//!
//! ```text
//! j_id1
//! j_id2          <- start_section()
//!   j_id2_1
//!   j_id2_2
//! j_id3          <- after end_section()
//! ```
//!
//! Two counters run side by side: the unique-id counter (`next_id`) and the
//! component-id counter (`next_component_id`). Inside a metadata region both
//! are swapped for a dedicated metadata set so metadata builds never consume
//! the normal sequence.

use crate::ViewkeepError;
use crate::config::{self, ConfigSource, keys};
use crate::primitives::{
    COMPONENT_ID_PREFIX, DEFAULT_COMPONENT_ID_CACHE_SIZE, METADATA_ID_PREFIX, SECTION_SEPARATOR,
    UNIQUE_ID_PREFIX,
};
use std::sync::Arc;

// =============================================================================
// ID CACHE
// =============================================================================

/// Precomputed top-level ids, shared across allocators.
///
/// Building a view mints the same first few hundred top-level ids on every
/// request; this table hands out the preformatted strings instead.
#[derive(Debug, Clone)]
pub struct IdCache {
    prefix: String,
    ids: Arc<[String]>,
}

impl IdCache {
    /// Precompute `size` ids for `prefix` (`prefix1` ..= `prefix{size}`).
    #[must_use]
    pub fn new(prefix: &str, size: usize) -> Self {
        let ids: Vec<String> = (1..=size).map(|n| format!("{prefix}{n}")).collect();
        Self {
            prefix: prefix.to_string(),
            ids: ids.into(),
        }
    }

    /// Component id table sized by `viewkeep.component_unique_ids_cache_size`.
    pub fn from_config(source: &dyn ConfigSource) -> Self {
        let size = config::read_usize(
            source,
            keys::COMPONENT_UNIQUE_IDS_CACHE_SIZE,
            DEFAULT_COMPONENT_ID_CACHE_SIZE,
        );
        Self::new(COMPONENT_ID_PREFIX, size)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn get(&self, prefix: &str, count: u64) -> Option<&str> {
        if prefix != self.prefix || count == 0 {
            return None;
        }
        let index = usize::try_from(count - 1).ok()?;
        self.ids.get(index).map(String::as_str)
    }
}

// =============================================================================
// SECTION COUNTER
// =============================================================================

#[derive(Debug, Clone)]
struct Section {
    prefix: String,
    count: u64,
}

/// A stack of sections, each with its own running counter.
#[derive(Debug, Clone)]
pub struct SectionCounter {
    sections: Vec<Section>,
    cache: Option<IdCache>,
}

impl SectionCounter {
    /// Create a counter whose outermost section uses `prefix`.
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        Self {
            sections: vec![Section {
                prefix: prefix.to_string(),
                count: 0,
            }],
            cache: None,
        }
    }

    /// Create a counter that serves outermost ids from a precomputed table.
    #[must_use]
    pub fn with_cache(prefix: &str, cache: IdCache) -> Self {
        Self {
            cache: Some(cache),
            ..Self::new(prefix)
        }
    }

    /// Number of open nested sections (the outermost section is not counted).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.sections.len() - 1
    }

    /// Advance the current section and return the new id.
    pub fn next_id(&mut self) -> String {
        let outermost = self.sections.len() == 1;
        let Some(section) = self.sections.last_mut() else {
            return String::new();
        };
        section.count = section.count.saturating_add(1);
        if outermost {
            if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(&section.prefix, section.count)) {
                return cached.to_string();
            }
        }
        format!("{}{}", section.prefix, section.count)
    }

    /// Advance the current section without producing an id.
    pub fn skip(&mut self) {
        if let Some(section) = self.sections.last_mut() {
            section.count = section.count.saturating_add(1);
        }
    }

    /// Mint a boundary id and open a section nested under it.
    pub fn start_section(&mut self) -> String {
        let boundary = self.next_id();
        let mut prefix = boundary.clone();
        prefix.push(SECTION_SEPARATOR);
        self.sections.push(Section { prefix, count: 0 });
        boundary
    }

    /// Close the innermost section.
    pub fn end_section(&mut self) -> Result<(), ViewkeepError> {
        if self.sections.len() <= 1 {
            return Err(ViewkeepError::UnbalancedSection { depth: 0 });
        }
        self.sections.pop();
        Ok(())
    }
}

// =============================================================================
// ALLOCATOR
// =============================================================================

#[derive(Debug, Clone)]
struct CounterSet {
    unique: SectionCounter,
    component: SectionCounter,
}

impl CounterSet {
    fn normal(cache: Option<IdCache>) -> Self {
        let component = match cache {
            Some(cache) => SectionCounter::with_cache(COMPONENT_ID_PREFIX, cache),
            None => SectionCounter::new(COMPONENT_ID_PREFIX),
        };
        Self {
            unique: SectionCounter::new(UNIQUE_ID_PREFIX),
            component,
        }
    }

    fn metadata() -> Self {
        Self {
            unique: SectionCounter::new(METADATA_ID_PREFIX),
            component: SectionCounter::new(METADATA_ID_PREFIX),
        }
    }
}

/// Replay/record companion state.
#[derive(Debug, Clone, Default)]
enum Journal {
    #[default]
    Off,
    Recording(Vec<String>),
    Replaying { ids: Vec<String>, cursor: usize },
}

/// Sectioned, replayable identifier allocator for one rebuild pass.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    normal: CounterSet,
    metadata: Option<CounterSet>,
    /// Nested metadata region count.
    metadata_depth: usize,
    /// Nested section count.
    level: usize,
    journal: Journal,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            normal: CounterSet::normal(None),
            metadata: None,
            metadata_depth: 0,
            level: 0,
            journal: Journal::Off,
        }
    }

    /// Create an allocator whose top-level component ids come from `cache`.
    #[must_use]
    pub fn with_id_cache(cache: IdCache) -> Self {
        Self {
            normal: CounterSet::normal(Some(cache)),
            ..Self::new()
        }
    }

    /// Current section nesting depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.level
    }

    /// Whether any metadata region is open.
    #[must_use]
    pub fn is_in_metadata(&self) -> bool {
        self.metadata_depth > 0
    }

    fn active(&mut self) -> &mut CounterSet {
        if self.metadata_depth > 0 {
            self.metadata.get_or_insert_with(CounterSet::metadata)
        } else {
            &mut self.normal
        }
    }

    fn at_journal_scope(&self) -> bool {
        self.level == 0 && self.metadata_depth == 0
    }

    /// Open a uniquely-scoped section and return its boundary id.
    pub fn start_section(&mut self) -> String {
        self.level += 1;
        let set = self.active();
        set.component.start_section();
        set.unique.start_section()
    }

    /// Close the innermost section.
    pub fn end_section(&mut self) -> Result<(), ViewkeepError> {
        if self.level == 0 {
            return Err(ViewkeepError::UnbalancedSection { depth: 0 });
        }
        let level = self.level;
        let set = self.active();
        set.unique
            .end_section()
            .and_then(|()| set.component.end_section())
            .map_err(|_| ViewkeepError::UnbalancedSection { depth: level })?;
        self.level -= 1;
        Ok(())
    }

    /// Next unique id.
    ///
    /// While replaying, ids at the outermost level outside metadata come from
    /// the replay sequence; the counter advances in lockstep so boundary ids
    /// minted later keep their positions.
    pub fn next_id(&mut self) -> String {
        if self.at_journal_scope() {
            if let Journal::Replaying { ids, cursor } = &mut self.journal {
                if let Some(id) = ids.get(*cursor).cloned() {
                    *cursor += 1;
                    self.normal.unique.skip();
                    return id;
                }
            }
        }

        let id = self.active().unique.next_id();
        if self.at_journal_scope() {
            if let Journal::Recording(ids) = &mut self.journal {
                ids.push(id.clone());
            }
        }
        id
    }

    /// Next component id.
    pub fn next_component_id(&mut self) -> String {
        self.active().component.next_id()
    }

    /// Enter a metadata region. Regions nest.
    pub fn enter_metadata(&mut self) {
        if self.metadata_depth == 0 && self.metadata.is_none() {
            self.metadata = Some(CounterSet::metadata());
        }
        self.metadata_depth += 1;
    }

    /// Leave a metadata region; the last exit restores the normal counters.
    pub fn exit_metadata(&mut self) -> Result<(), ViewkeepError> {
        if self.metadata_depth == 0 {
            return Err(ViewkeepError::UnbalancedMetadata);
        }
        self.metadata_depth -= 1;
        Ok(())
    }

    /// Start recording outermost ids; discards any replay sequence.
    pub fn start_recording(&mut self) {
        self.journal = Journal::Recording(Vec::new());
    }

    /// Replay a previously recorded sequence; discards any recording.
    ///
    /// Replayed ids bypass the counter's output but still advance it by one
    /// each, so boundary ids and fresh ids minted after the sequence runs out
    /// land where they did in the recorded pass and never collide with a
    /// replayed id.
    pub fn replay(&mut self, ids: Vec<String>) {
        self.journal = Journal::Replaying { ids, cursor: 0 };
    }

    /// Ids recorded so far, if recording.
    #[must_use]
    pub fn recorded(&self) -> Option<&[String]> {
        match &self.journal {
            Journal::Recording(ids) => Some(ids),
            _ => None,
        }
    }

    /// Take the recorded sequence and stop recording.
    pub fn take_recorded(&mut self) -> Option<Vec<String>> {
        match std::mem::take(&mut self.journal) {
            Journal::Recording(ids) => Some(ids),
            other => {
                self.journal = other;
                None
            }
        }
    }

    /// Replayed ids not consumed yet.
    #[must_use]
    pub fn replay_remaining(&self) -> usize {
        match &self.journal {
            Journal::Replaying { ids, cursor } => ids.len().saturating_sub(*cursor),
            _ => 0,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
