//! Opaque server-side state tokens.
//!
//! The printable form carries the sequence and a digest of the view id, never
//! the view id itself, so its length does not depend on the view. The stores
//! keep the full view id next to each entry.

use crate::primitives::MAX_TOKEN_LENGTH;
use crate::{ViewId, ViewkeepError};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

/// Reference to one stored view state.
///
/// `sequence` is unique per store and grows with every save, so it doubles as
/// the eviction order within a session scope.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ViewStateToken {
    pub view_id: ViewId,
    pub sequence: u64,
}

impl ViewStateToken {
    #[must_use]
    pub fn new(view_id: ViewId, sequence: u64) -> Self {
        Self { view_id, sequence }
    }

    /// Printable form handed to the boundary.
    pub fn encode(&self) -> Result<String, ViewkeepError> {
        let posted = PostedToken {
            sequence: self.sequence,
            view_digest: view_digest(&self.view_id),
        };
        let bytes = postcard::to_stdvec(&posted)
            .map_err(|e| ViewkeepError::SerializationError(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Parse a token posted back by the boundary.
    ///
    /// Anything this store could not have minted yields `None`. The result
    /// still has to be matched against the requested view with
    /// [`PostedToken::for_view`].
    #[must_use]
    pub fn decode(raw: &str) -> Option<PostedToken> {
        let raw = raw.trim();
        if raw.is_empty() || raw.len() > MAX_TOKEN_LENGTH {
            return None;
        }
        let bytes = URL_SAFE_NO_PAD.decode(raw).ok()?;
        postcard::from_bytes(&bytes).ok()
    }
}

impl std::fmt::Display for ViewStateToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.view_id, self.sequence)
    }
}

/// A token as it comes back from the boundary, not yet tied to a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedToken {
    sequence: u64,
    view_digest: [u8; 32],
}

impl PostedToken {
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The full token, if this one was minted for `view_id`.
    #[must_use]
    pub fn for_view(&self, view_id: &ViewId) -> Option<ViewStateToken> {
        (self.view_digest == view_digest(view_id))
            .then(|| ViewStateToken::new(view_id.clone(), self.sequence))
    }
}

fn view_digest(view_id: &ViewId) -> [u8; 32] {
    *blake3::hash(view_id.as_str().as_bytes()).as_bytes()
}
