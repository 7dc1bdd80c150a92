//! # Primitives
//!
//! Fixed constants shared by every subsystem of the core.
//!
//! These values are compiled into the binary; anything tunable at runtime
//! lives in [`crate::config`] instead.

/// Creation id used for a node that carries none (the view root).
pub const ROOT_SENTINEL_ID: &str = "oam.VIEW_ROOT";

/// Prefix of counter-derived unique ids at the outermost section.
pub const UNIQUE_ID_PREFIX: &str = "j_id";

/// Prefix of counter-derived component ids at the outermost section.
pub const COMPONENT_ID_PREFIX: &str = "_";

/// Prefix used by both counters while inside a metadata region.
///
/// Keeps ids minted for metadata disjoint from the normal sequence.
pub const METADATA_ID_PREFIX: &str = "__md_";

/// Separator appended to a section boundary id to form its children's prefix.
pub const SECTION_SEPARATOR: char = '_';

/// Magic bytes for the client-state envelope header.
///
/// - Envelope = Magic Bytes ("VKST") + Version (u8) + Flags (u8) before payload.
pub const MAGIC_BYTES: &[u8; 4] = b"VKST";

/// Current envelope format version.
///
/// Increment this when making breaking changes to the envelope format.
pub const FORMAT_VERSION: u8 = 1;

/// Length in bytes of the keyed MAC appended to signed client payloads.
pub const MAC_LENGTH: usize = 32;

// =============================================================================
// DEFAULTS
// =============================================================================

/// Default number of views retained per session scope.
pub const DEFAULT_VIEWS_IN_SESSION: usize = 20;

/// Default refresh window in seconds (negative: never refresh).
pub const DEFAULT_REFRESH_PERIOD_SECS: i64 = -1;

/// Default size of the precomputed component id table.
pub const DEFAULT_COMPONENT_ID_CACHE_SIZE: usize = 100;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum encoded size of a single view state payload (16 MB).
///
/// Validated BEFORE any decoding is attempted.
pub const MAX_STATE_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Maximum length of a token accepted from the boundary.
///
/// A minted token is a varint sequence plus a 32-byte view digest, base64
/// encoded, so anything longer is a miss.
pub const MAX_TOKEN_LENGTH: usize = 64;
