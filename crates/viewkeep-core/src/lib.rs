//! # viewkeep-core
//!
//! The view-state engine for viewkeep - THE LOGIC.
//!
//! Keeps request-scoped UI trees alive across stateless request/response
//! cycles:
//! - `state`: save a view's state between requests (client payload or
//!   server-side store behind a token)
//! - `template`: cache compiled templates and revalidate them on a refresh
//!   window
//! - `reconcile`: prune nodes that a rebuild pass no longer produces
//! - `ids`: allocate deterministic, sectioned, replayable identifiers
//!
//! ## Architectural Constraints
//!
//! - NO async, NO network dependencies (pure Rust)
//! - Deterministic: BTreeMap only, no floats, no randomness
//! - Compilers, codecs and boundary sinks are traits supplied by the caller

// =============================================================================
// MODULES
// =============================================================================

pub mod build;
pub mod config;
pub mod context;
pub mod ids;
pub mod primitives;
pub mod reconcile;
pub mod state;
pub mod template;
pub mod tree;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    CreationId, PersistenceMode, SavedState, SessionScope, SourceId, ViewId, ViewkeepError,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use build::{BuildContext, ScopedStack};
pub use config::{ConfigSource, StateConfig};
pub use context::{ProcessingContext, SavingGuard};
pub use ids::{IdAllocator, IdCache};
pub use reconcile::TreeReconciler;
pub use tree::{NodeRole, UiNode};

// =============================================================================
// RE-EXPORTS: State & Templates
// =============================================================================

pub use state::{
    InMemoryStateStore, MacKey, PostcardCodec, PostedToken, RedbStateStore, StateCodec,
    StateSettings, StateSink, StateSource, StateStore, StoreBackend, ViewStateManager,
    ViewStateToken,
};
pub use template::{
    CacheNamespace, Clock, FileSystemSource, KnownParameters, ManualClock, RefreshWindow,
    RefreshWindows, SystemClock, TemplateCache, TemplateCompiler, TemplateHandle, TemplateSource,
};
