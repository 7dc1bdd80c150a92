//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the viewkeep core:
//! - Identifiers (`ViewId`, `SourceId`, `CreationId`, `SessionScope`)
//! - The persistence mode selector (`PersistenceMode`)
//! - The saved-state carrier exchanged with the boundary (`SavedState`)
//! - Error types (`ViewkeepError`)
//!
//! ## Determinism Guarantees
//!
//! Every identifier implements `Ord` so that all maps in the core can be
//! `BTreeMap`s with a stable iteration order.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new identifier from a string.
            #[must_use]
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Get the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of one logical page/screen (a view).
    ViewId
);

string_id!(
    /// Opaque, comparable identifier of a template source.
    SourceId
);

string_id!(
    /// Stable creation identifier stamped on a tree node when its template
    /// instruction first built it. Survives rebuild passes.
    CreationId
);

string_id!(
    /// Session scope under which server-side views are retained and evicted.
    SessionScope
);

// =============================================================================
// PERSISTENCE MODE
// =============================================================================

/// Where view state lives between requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PersistenceMode {
    /// Full state travels with the response payload.
    Client,
    /// State stays on the server behind an opaque token.
    #[default]
    Server,
}

impl PersistenceMode {
    /// Parse a configured value, case-insensitively.
    ///
    /// Returns `None` for anything other than `client` or `server`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("client") {
            Some(Self::Client)
        } else if value.eq_ignore_ascii_case("server") {
            Some(Self::Server)
        } else {
            None
        }
    }
}

impl fmt::Display for PersistenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => f.write_str("client"),
            Self::Server => f.write_str("server"),
        }
    }
}

// =============================================================================
// SAVED STATE
// =============================================================================

/// What `save_view` hands to the boundary.
///
/// Both variants are printable strings that can round-trip through a
/// client-visible channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SavedState {
    /// Opaque token referencing server-held state.
    Token(String),
    /// Full, self-contained state payload.
    Payload(String),
}

impl SavedState {
    /// The printable value to embed in the response.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Token(s) | Self::Payload(s) => s,
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the viewkeep core.
///
/// - No silent failures
/// - Use `Result<T, ViewkeepError>` for fallible operations
/// - Restore misses are NOT errors; they surface as `Ok(None)`
#[derive(Debug, Error)]
pub enum ViewkeepError {
    /// A template or tree could not be constructed.
    #[error("Construction failed for {source_id}: {message}")]
    Construction { source_id: SourceId, message: String },

    /// The last-modified lookup for a template source failed.
    #[error("Error checking last modified for {source_name}")]
    StalenessCheck {
        source_name: String,
        #[source]
        cause: std::io::Error,
    },

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// A client payload failed its integrity check.
    #[error("Client state for view {0} failed integrity check")]
    TamperedState(ViewId),

    /// An encoded payload exceeds the allowed size.
    #[error("Payload of {size} bytes exceeds maximum allowed {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// A reconciliation call was made without a matching open level.
    #[error("Unbalanced reconciliation level at depth {depth}")]
    UnbalancedLevel { depth: usize },

    /// An identifier section was closed without being opened.
    #[error("Unbalanced identifier section at depth {depth}")]
    UnbalancedSection { depth: usize },

    /// A metadata region was exited without being entered.
    #[error("Metadata region exited without matching entry")]
    UnbalancedMetadata,

    /// An I/O error occurred in a state store backend.
    #[error("I/O error: {0}")]
    IoError(String),
}

// =============================================================================
// TESTS
// =============================================================================
