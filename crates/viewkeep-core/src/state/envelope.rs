//! # Client State Envelope
//!
//! Binary framing for view state that travels with the response.
//!
//! Format: Header (6 bytes) + postcard body + optional MAC (32 bytes), the
//! whole thing base64 encoded (URL-safe, unpadded).
//! - 4 bytes: Magic ("VKST")
//! - 1 byte: Version
//! - 1 byte: Flags (bit 0 = signed)
//!
//! The body names the view it belongs to, so a payload posted back to a
//! different view is recognised and treated as a miss.
//!
//! ## Validation Order
//!
//! 1. Encoded length against [`MAX_STATE_PAYLOAD_SIZE`]
//! 2. Header magic bytes and version
//! 3. MAC, in constant time, when a key is configured
//! 4. Body decoding

use crate::context::ProcessingContext;
use crate::primitives::{self, MAC_LENGTH, MAX_STATE_PAYLOAD_SIZE};
use crate::{ViewId, ViewkeepError};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use subtle::ConstantTimeEq;

const HEADER_LEN: usize = 6;

/// Header flag: a MAC follows the body.
const FLAG_SIGNED: u8 = 0b0000_0001;

/// Context string for deriving the MAC key from the configured secret.
const MAC_KEY_CONTEXT: &str = "viewkeep client state 2026-01 mac key";

// =============================================================================
// CODEC
// =============================================================================

/// Turns a view's state into bytes and back.
///
/// `decode(encode(s))` must yield a state equivalent to `s`.
pub trait StateCodec: Send + Sync {
    type State;

    /// Serialize `state`. Runs while `ctx` reports
    /// [`ProcessingContext::is_saving_state`].
    fn encode(&self, ctx: &ProcessingContext, state: &Self::State)
    -> Result<Vec<u8>, ViewkeepError>;

    fn decode(&self, bytes: &[u8]) -> Result<Self::State, ViewkeepError>;
}

/// [`StateCodec`] for any serde type, using postcard.
pub struct PostcardCodec<T> {
    _state: PhantomData<fn() -> T>,
}

impl<T> PostcardCodec<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            _state: PhantomData,
        }
    }
}

impl<T> Default for PostcardCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for PostcardCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PostcardCodec")
    }
}

impl<T: Serialize + DeserializeOwned> StateCodec for PostcardCodec<T> {
    type State = T;

    fn encode(&self, _ctx: &ProcessingContext, state: &T) -> Result<Vec<u8>, ViewkeepError> {
        postcard::to_stdvec(state).map_err(|e| ViewkeepError::SerializationError(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, ViewkeepError> {
        postcard::from_bytes(bytes).map_err(|e| {
            ViewkeepError::DeserializationError(format!("Failed to decode view state: {e}"))
        })
    }
}

// =============================================================================
// MAC KEY
// =============================================================================

/// Key for authenticating client payloads, derived from a configured secret.
#[derive(Clone)]
pub struct MacKey([u8; 32]);

impl MacKey {
    #[must_use]
    pub fn derive(secret: &str) -> Self {
        Self(blake3::derive_key(MAC_KEY_CONTEXT, secret.as_bytes()))
    }

    fn tag(&self, signed: &[u8]) -> blake3::Hash {
        blake3::keyed_hash(&self.0, signed)
    }
}

impl std::fmt::Debug for MacKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MacKey(..)")
    }
}

// =============================================================================
// HEADER
// =============================================================================

/// The envelope header precedes every client payload.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeHeader {
    pub magic: [u8; 4],
    pub version: u8,
    pub flags: u8,
}

impl EnvelopeHeader {
    /// Create a header with the current format version.
    #[must_use]
    pub fn new(signed: bool) -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
            flags: if signed { FLAG_SIGNED } else { 0 },
        }
    }

    #[must_use]
    pub fn is_signed(&self) -> bool {
        self.flags & FLAG_SIGNED != 0
    }

    /// Validate magic bytes and version.
    pub fn validate(&self) -> Result<(), ViewkeepError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(ViewkeepError::DeserializationError(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(ViewkeepError::DeserializationError(format!(
                "Unsupported version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes[5] = self.flags;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ViewkeepError> {
        let header = bytes.get(..HEADER_LEN).ok_or_else(|| {
            ViewkeepError::DeserializationError("Header too short".to_string())
        })?;
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&header[0..4]);
        Ok(Self {
            magic,
            version: header[4],
            flags: header[5],
        })
    }
}

// =============================================================================
// SEAL / OPEN
// =============================================================================

#[derive(Serialize, Deserialize)]
struct ClientBody {
    view_id: ViewId,
    state: Vec<u8>,
}

/// Wrap encoded state for `view_id` into a printable client payload.
pub fn seal(view_id: &ViewId, state: Vec<u8>, key: Option<&MacKey>) -> Result<String, ViewkeepError> {
    let body = postcard::to_stdvec(&ClientBody {
        view_id: view_id.clone(),
        state,
    })
    .map_err(|e| ViewkeepError::SerializationError(e.to_string()))?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + body.len() + MAC_LENGTH);
    bytes.extend_from_slice(&EnvelopeHeader::new(key.is_some()).to_bytes());
    bytes.extend_from_slice(&body);
    if let Some(key) = key {
        let tag = key.tag(&bytes);
        bytes.extend_from_slice(tag.as_bytes());
    }

    let encoded = URL_SAFE_NO_PAD.encode(&bytes);
    if encoded.len() > MAX_STATE_PAYLOAD_SIZE {
        return Err(ViewkeepError::PayloadTooLarge {
            size: encoded.len(),
            max: MAX_STATE_PAYLOAD_SIZE,
        });
    }
    Ok(encoded)
}

/// Unwrap a client payload posted back for `view_id`.
///
/// Returns `Ok(None)` when the payload belongs to another view. A missing or
/// wrong MAC under a configured key is [`ViewkeepError::TamperedState`].
pub fn open(
    view_id: &ViewId,
    payload: &str,
    key: Option<&MacKey>,
) -> Result<Option<Vec<u8>>, ViewkeepError> {
    if payload.len() > MAX_STATE_PAYLOAD_SIZE {
        return Err(ViewkeepError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_STATE_PAYLOAD_SIZE,
        });
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim())
        .map_err(|e| ViewkeepError::DeserializationError(format!("Malformed client state: {e}")))?;

    let header = EnvelopeHeader::from_bytes(&bytes)?;
    header.validate()?;

    let body = match (key, header.is_signed()) {
        (Some(key), true) => {
            let split = bytes
                .len()
                .checked_sub(MAC_LENGTH)
                .filter(|&split| split >= HEADER_LEN)
                .ok_or_else(|| ViewkeepError::TamperedState(view_id.clone()))?;
            let (signed, tag) = bytes.split_at(split);
            let expected = key.tag(signed);
            if !bool::from(expected.as_bytes()[..].ct_eq(tag)) {
                return Err(ViewkeepError::TamperedState(view_id.clone()));
            }
            &signed[HEADER_LEN..]
        }
        (Some(_), false) => return Err(ViewkeepError::TamperedState(view_id.clone())),
        (None, true) => bytes
            .len()
            .checked_sub(MAC_LENGTH)
            .and_then(|split| bytes.get(HEADER_LEN..split))
            .ok_or_else(|| ViewkeepError::DeserializationError("Truncated payload".to_string()))?,
        (None, false) => &bytes[HEADER_LEN..],
    };

    let body: ClientBody = postcard::from_bytes(body).map_err(|e| {
        ViewkeepError::DeserializationError(format!("Failed to decode client state: {e}"))
    })?;

    if &body.view_id != view_id {
        tracing::warn!(
            expected = %view_id,
            found = %body.view_id,
            "client state belongs to another view"
        );
        return Ok(None);
    }
    Ok(Some(body.state))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = EnvelopeHeader::new(true);
        let restored = EnvelopeHeader::from_bytes(&header.to_bytes()).expect("parse header");

        assert_eq!(restored.magic, *primitives::MAGIC_BYTES);
        assert_eq!(restored.version, primitives::FORMAT_VERSION);
        assert!(restored.is_signed());
        assert!(restored.validate().is_ok());
    }

    #[test]
    fn header_rejects_bad_magic_and_version() {
        let mut bytes = EnvelopeHeader::new(false).to_bytes();
        bytes[0] = b'X';
        let header = EnvelopeHeader::from_bytes(&bytes).expect("parse");
        assert!(header.validate().is_err());

        let mut bytes = EnvelopeHeader::new(false).to_bytes();
        bytes[4] = 99;
        let header = EnvelopeHeader::from_bytes(&bytes).expect("parse");
        assert!(header.validate().is_err());

        assert!(EnvelopeHeader::from_bytes(b"VKS").is_err());
    }

    #[test]
    fn unsigned_payload_opens() {
        let view = ViewId::new("/home.xhtml");
        let payload = seal(&view, vec![1, 2, 3], None).expect("seal");
        assert_eq!(open(&view, &payload, None).expect("open"), Some(vec![1, 2, 3]));
    }

    #[test]
    fn signed_payload_opens_with_same_key() {
        let view = ViewId::new("/home.xhtml");
        let key = MacKey::derive("s3cret");
        let payload = seal(&view, vec![7; 64], Some(&key)).expect("seal");

        assert_eq!(open(&view, &payload, Some(&key)).expect("open"), Some(vec![7; 64]));
        // Without a key the MAC is skipped, not misread as body.
        assert_eq!(open(&view, &payload, None).expect("open"), Some(vec![7; 64]));
    }

    #[test]
    fn flipped_byte_is_tampering() {
        let view = ViewId::new("/home.xhtml");
        let key = MacKey::derive("s3cret");
        let payload = seal(&view, vec![7; 16], Some(&key)).expect("seal");

        let mut raw = URL_SAFE_NO_PAD.decode(&payload).expect("decode");
        raw[HEADER_LEN + 2] ^= 0xFF;
        let forged = URL_SAFE_NO_PAD.encode(&raw);

        assert!(matches!(
            open(&view, &forged, Some(&key)),
            Err(ViewkeepError::TamperedState(_))
        ));
    }

    #[test]
    fn foreign_key_and_unsigned_payload_are_tampering() {
        let view = ViewId::new("/home.xhtml");
        let ours = MacKey::derive("ours");
        let theirs = MacKey::derive("theirs");

        let foreign = seal(&view, vec![1], Some(&theirs)).expect("seal");
        assert!(matches!(
            open(&view, &foreign, Some(&ours)),
            Err(ViewkeepError::TamperedState(_))
        ));

        let unsigned = seal(&view, vec![1], None).expect("seal");
        assert!(matches!(
            open(&view, &unsigned, Some(&ours)),
            Err(ViewkeepError::TamperedState(_))
        ));
    }

    #[test]
    fn other_view_is_a_miss() {
        let payload = seal(&ViewId::new("/a.xhtml"), vec![1], None).expect("seal");
        assert_eq!(open(&ViewId::new("/b.xhtml"), &payload, None).expect("open"), None);
    }

    #[test]
    fn garbage_is_rejected_before_decoding() {
        let view = ViewId::new("/home.xhtml");
        assert!(matches!(
            open(&view, "***", None),
            Err(ViewkeepError::DeserializationError(_))
        ));

        let oversized = "A".repeat(MAX_STATE_PAYLOAD_SIZE + 1);
        assert!(matches!(
            open(&view, &oversized, None),
            Err(ViewkeepError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn postcard_codec_roundtrip() {
        let codec = PostcardCodec::<Vec<String>>::new();
        let state = vec!["a".to_string(), "b".to_string()];
        let ctx = ProcessingContext::new(
            std::sync::Arc::new(std::collections::BTreeMap::<String, String>::new()),
            "session-1",
        );
        let bytes = codec.encode(&ctx, &state).expect("encode");
        assert_eq!(codec.decode(&bytes).expect("decode"), state);
        assert!(codec.decode(&[0xFF, 0xFF, 0xFF]).is_err());
    }
}
