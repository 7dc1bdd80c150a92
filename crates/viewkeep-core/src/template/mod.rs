//! # Template Cache
//!
//! Maps a template source to its compiled artifact and revalidates entries
//! against the source's modification time once a refresh window elapses.
//!
//! ## Namespaces
//!
//! The same source compiles differently depending on which subset of its
//! instructions matters, so there are three independent namespaces:
//! - `Standard`: the full tree
//! - `ViewMetadata`: only the view-metadata section
//! - `CompositeMetadata`: only composite component declarations
//!
//! No namespace ever invalidates another.
//!
//! ## Concurrency
//!
//! Each namespace is an `RwLock<BTreeMap>`. Two requests missing on the same
//! source at the same time may both compile it; compilation is pure with
//! respect to the source, so whichever insert lands last simply wins.

mod source;

pub use source::{Clock, FileSystemSource, ManualClock, SystemClock, TemplateSource};

use crate::config::{self, ConfigSource, keys};
use crate::primitives::DEFAULT_REFRESH_PERIOD_SECS;
use crate::{SourceId, ViewkeepError};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

// =============================================================================
// NAMESPACES & WINDOWS
// =============================================================================

/// Cache namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheNamespace {
    Standard,
    ViewMetadata,
    CompositeMetadata,
}

impl CacheNamespace {
    pub const ALL: [Self; 3] = [Self::Standard, Self::ViewMetadata, Self::CompositeMetadata];
}

impl fmt::Display for CacheNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => f.write_str("standard"),
            Self::ViewMetadata => f.write_str("view-metadata"),
            Self::CompositeMetadata => f.write_str("composite-metadata"),
        }
    }
}

/// How long a compiled handle is trusted before its source is rechecked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshWindow {
    /// Never recheck.
    Infinite,
    /// Never cache; every request recompiles.
    Disabled,
    /// Recheck once this many milliseconds have passed since compilation.
    Every(u64),
}

impl RefreshWindow {
    /// Convert a configured period in seconds.
    ///
    /// Negative means infinite, zero disables caching.
    #[must_use]
    pub fn from_secs(secs: i64) -> Self {
        match secs {
            s if s < 0 => Self::Infinite,
            0 => Self::Disabled,
            s => Self::Every((s as u64).saturating_mul(1000)),
        }
    }
}

/// Refresh window per namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshWindows {
    pub standard: RefreshWindow,
    pub view_metadata: RefreshWindow,
    pub composite_metadata: RefreshWindow,
}

impl RefreshWindows {
    /// The same window for every namespace.
    #[must_use]
    pub fn uniform(window: RefreshWindow) -> Self {
        Self {
            standard: window,
            view_metadata: window,
            composite_metadata: window,
        }
    }

    /// Read windows from configuration.
    ///
    /// `viewkeep.refresh_period` sets all three; the metadata namespaces may
    /// override it individually.
    pub fn from_config(source: &dyn ConfigSource) -> Self {
        let base = config::read_i64(source, keys::REFRESH_PERIOD, DEFAULT_REFRESH_PERIOD_SECS);
        let view_metadata = config::read_i64(source, keys::VIEW_METADATA_REFRESH_PERIOD, base);
        let composite_metadata =
            config::read_i64(source, keys::COMPOSITE_METADATA_REFRESH_PERIOD, base);
        Self {
            standard: RefreshWindow::from_secs(base),
            view_metadata: RefreshWindow::from_secs(view_metadata),
            composite_metadata: RefreshWindow::from_secs(composite_metadata),
        }
    }

    #[must_use]
    pub fn get(&self, namespace: CacheNamespace) -> RefreshWindow {
        match namespace {
            CacheNamespace::Standard => self.standard,
            CacheNamespace::ViewMetadata => self.view_metadata,
            CacheNamespace::CompositeMetadata => self.composite_metadata,
        }
    }
}

impl Default for RefreshWindows {
    fn default() -> Self {
        Self::uniform(RefreshWindow::from_secs(DEFAULT_REFRESH_PERIOD_SECS))
    }
}

// =============================================================================
// COLLABORATORS
// =============================================================================

/// Builds the compiled artifact for a template source.
///
/// Failures propagate out of the cache unchanged and are never cached.
pub trait TemplateCompiler: Send + Sync {
    type Artifact: Send + Sync;

    fn compile(
        &self,
        namespace: CacheNamespace,
        source: &SourceId,
    ) -> Result<Self::Artifact, ViewkeepError>;
}

/// Template parameters an evaluation context has seen so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownParameters(BTreeSet<String>);

impl KnownParameters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>) {
        self.0.insert(name.into());
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

impl<S: Into<String>> FromIterator<S> for KnownParameters {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// A compiled template, shared read-only with callers.
#[derive(Debug)]
pub struct TemplateHandle<A> {
    source: SourceId,
    artifact: A,
    created_at: u64,
    params: BTreeSet<String>,
}

impl<A> TemplateHandle<A> {
    #[must_use]
    pub fn source(&self) -> &SourceId {
        &self.source
    }

    #[must_use]
    pub fn artifact(&self) -> &A {
        &self.artifact
    }

    /// Compilation time in milliseconds since the epoch.
    #[must_use]
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Parameters the artifact was compiled with.
    #[must_use]
    pub fn params(&self) -> &BTreeSet<String> {
        &self.params
    }
}

type Namespace<A> = RwLock<BTreeMap<SourceId, Arc<TemplateHandle<A>>>>;

// =============================================================================
// CACHE
// =============================================================================

/// Compiled-template cache with three namespaces.
pub struct TemplateCache<C: TemplateCompiler> {
    compiler: C,
    source: Arc<dyn TemplateSource>,
    clock: Arc<dyn Clock>,
    windows: RefreshWindows,
    standard: Namespace<C::Artifact>,
    view_metadata: Namespace<C::Artifact>,
    composite_metadata: Namespace<C::Artifact>,
}

impl<C: TemplateCompiler> fmt::Debug for TemplateCache<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateCache")
            .field("windows", &self.windows)
            .field("standard", &self.len(CacheNamespace::Standard))
            .field("view_metadata", &self.len(CacheNamespace::ViewMetadata))
            .field("composite_metadata", &self.len(CacheNamespace::CompositeMetadata))
            .finish_non_exhaustive()
    }
}

impl<C: TemplateCompiler> TemplateCache<C> {
    /// Create a cache on the wall clock.
    pub fn new(compiler: C, source: Arc<dyn TemplateSource>, windows: RefreshWindows) -> Self {
        Self::with_clock(compiler, source, windows, Arc::new(SystemClock))
    }

    /// Create a cache on an explicit clock.
    pub fn with_clock(
        compiler: C,
        source: Arc<dyn TemplateSource>,
        windows: RefreshWindows,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            compiler,
            source,
            clock,
            windows,
            standard: RwLock::new(BTreeMap::new()),
            view_metadata: RwLock::new(BTreeMap::new()),
            composite_metadata: RwLock::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn windows(&self) -> RefreshWindows {
        self.windows
    }

    fn namespace(&self, namespace: CacheNamespace) -> &Namespace<C::Artifact> {
        match namespace {
            CacheNamespace::Standard => &self.standard,
            CacheNamespace::ViewMetadata => &self.view_metadata,
            CacheNamespace::CompositeMetadata => &self.composite_metadata,
        }
    }

    fn cached(
        &self,
        namespace: CacheNamespace,
        source: &SourceId,
    ) -> Option<Arc<TemplateHandle<C::Artifact>>> {
        self.namespace(namespace)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
            .cloned()
    }

    /// Get the compiled handle for `source`, compiling it when absent or stale.
    ///
    /// A stale `Standard` entry keeps the parameters it already knew.
    pub fn get(
        &self,
        namespace: CacheNamespace,
        source: &SourceId,
    ) -> Result<Arc<TemplateHandle<C::Artifact>>, ViewkeepError> {
        let cached = self.cached(namespace, source);
        if let Some(handle) = &cached {
            if !self.needs_refresh(namespace, handle)? {
                tracing::trace!(%namespace, %source, "template cache hit");
                return Ok(Arc::clone(handle));
            }
        }

        let params = match (namespace, cached) {
            (CacheNamespace::Standard, Some(previous)) => previous.params.clone(),
            _ => BTreeSet::new(),
        };
        self.compile_and_store(namespace, source, params)
    }

    /// Get the `Standard` handle for `source` on behalf of an evaluation
    /// context that already knows `known` parameters.
    ///
    /// Recompiles when `known` holds a parameter the cached artifact was not
    /// compiled with, baking in the union. Parameters that disappear from
    /// `known` never trigger a rebuild. Afterwards `known` contains every
    /// parameter the returned handle declares.
    pub fn get_with_params(
        &self,
        source: &SourceId,
        known: &mut KnownParameters,
    ) -> Result<Arc<TemplateHandle<C::Artifact>>, ViewkeepError> {
        let namespace = CacheNamespace::Standard;
        let cached = self.cached(namespace, source);
        let baked = cached
            .as_ref()
            .map(|h| h.params.clone())
            .unwrap_or_default();
        let has_new_params = known.iter().any(|p| !baked.contains(p));

        let handle = match cached {
            Some(handle) if !has_new_params && !self.needs_refresh(namespace, &handle)? => handle,
            _ => {
                if has_new_params {
                    tracing::debug!(%source, "recompiling template for newly known parameters");
                }
                let mut params = baked;
                params.extend(known.iter().cloned());
                self.compile_and_store(namespace, source, params)?
            }
        };

        for param in &handle.params {
            if !known.contains(param) {
                known.add(param.clone());
            }
        }
        Ok(handle)
    }

    /// Whether `source` has an entry in `namespace`. No staleness check.
    #[must_use]
    pub fn is_cached(&self, namespace: CacheNamespace, source: &SourceId) -> bool {
        self.namespace(namespace)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(source)
    }

    /// Number of entries in `namespace`.
    #[must_use]
    pub fn len(&self, namespace: CacheNamespace) -> usize {
        self.namespace(namespace)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drop the entry for `source` in `namespace`. Returns whether one existed.
    pub fn invalidate(&self, namespace: CacheNamespace, source: &SourceId) -> bool {
        self.namespace(namespace)
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(source)
            .is_some()
    }

    /// Whether `handle` must be recompiled under the namespace's window.
    ///
    /// The source's modification time is only consulted once the window has
    /// elapsed since compilation.
    pub fn needs_refresh(
        &self,
        namespace: CacheNamespace,
        handle: &TemplateHandle<C::Artifact>,
    ) -> Result<bool, ViewkeepError> {
        match self.windows.get(namespace) {
            RefreshWindow::Disabled => Ok(true),
            RefreshWindow::Infinite => Ok(false),
            RefreshWindow::Every(window) => {
                let target = handle.created_at.saturating_add(window);
                if self.clock.now_millis() <= target {
                    return Ok(false);
                }
                let modified = self.source.last_modified(&handle.source).map_err(|cause| {
                    ViewkeepError::StalenessCheck {
                        source_name: self.source.display_name(&handle.source),
                        cause,
                    }
                })?;
                Ok(modified == 0 || modified > target)
            }
        }
    }

    fn compile_and_store(
        &self,
        namespace: CacheNamespace,
        source: &SourceId,
        params: BTreeSet<String>,
    ) -> Result<Arc<TemplateHandle<C::Artifact>>, ViewkeepError> {
        let artifact = self.compiler.compile(namespace, source)?;
        let handle = Arc::new(TemplateHandle {
            source: source.clone(),
            artifact,
            created_at: self.clock.now_millis(),
            params,
        });

        if self.windows.get(namespace) != RefreshWindow::Disabled {
            self.namespace(namespace)
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(source.clone(), Arc::clone(&handle));
        }
        tracing::debug!(%namespace, %source, "compiled template");
        Ok(handle)
    }
}

// =============================================================================
// TESTS
// =============================================================================
