//! # View State Persistence
//!
//! Saves a view's state between requests and restores it on the next one.
//!
//! ## Modes
//!
//! - `Client`: the whole state is enveloped, optionally authenticated, and
//!   handed to the boundary as a printable payload.
//! - `Server`: the state stays in a bounded [`StateStore`] and the boundary
//!   only sees an opaque token.
//!
//! The mode is resolved once per [`ProcessingContext`].
//!
//! ## Misses
//!
//! A token that is unknown, evicted, malformed or minted for another view is
//! not an error: restore returns `Ok(None)` and the caller builds a fresh view.
//! Tampered client payloads are errors.

mod envelope;
mod redb_store;
mod store;
mod token;

pub use envelope::{EnvelopeHeader, MacKey, PostcardCodec, StateCodec};
pub use redb_store::RedbStateStore;
pub use store::{InMemoryStateStore, StateStore, StoreBackend};
pub use token::{PostedToken, ViewStateToken};

use crate::config::{self, ConfigSource, keys};
use crate::context::ProcessingContext;
use crate::primitives::{DEFAULT_VIEWS_IN_SESSION, MAX_STATE_PAYLOAD_SIZE};
use crate::{PersistenceMode, SavedState, SessionScope, ViewId, ViewkeepError};

// =============================================================================
// BOUNDARY TRAITS
// =============================================================================

/// Where a saved state goes on the way out (the response).
pub trait StateSink {
    fn write_state(&mut self, view_id: &ViewId, saved: &SavedState) -> Result<(), ViewkeepError>;
}

/// Where a saved state comes from on the way in (the request).
pub trait StateSource {
    /// The printable value posted back for `view_id`, if any.
    fn saved_state(&self, view_id: &ViewId) -> Option<String>;
}

// =============================================================================
// SETTINGS
// =============================================================================

/// Application-wide persistence settings.
#[derive(Debug, Clone)]
pub struct StateSettings {
    /// Views retained per session scope. Never below 1.
    pub views_in_session: usize,
    /// Key for authenticating client payloads.
    pub mac_key: Option<MacKey>,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            views_in_session: DEFAULT_VIEWS_IN_SESSION,
            mac_key: None,
        }
    }
}

impl StateSettings {
    pub fn from_config(source: &dyn ConfigSource) -> Self {
        let views_in_session = config::read_usize(
            source,
            keys::NUMBER_OF_VIEWS_IN_SESSION,
            DEFAULT_VIEWS_IN_SESSION,
        );
        if views_in_session == 0 {
            tracing::warn!(
                key = keys::NUMBER_OF_VIEWS_IN_SESSION,
                "retention of zero views is not allowed, keeping one"
            );
        }
        let mac_key = source
            .get(keys::CLIENT_STATE_SECRET)
            .filter(|secret| !secret.is_empty())
            .map(|secret| MacKey::derive(&secret));

        Self {
            views_in_session: views_in_session.max(1),
            mac_key,
        }
    }
}

// =============================================================================
// MANAGER
// =============================================================================

/// Persistence strategy for view state.
#[derive(Debug)]
pub struct ViewStateManager<C: StateCodec> {
    codec: C,
    store: StoreBackend,
    settings: StateSettings,
}

impl<C: StateCodec> ViewStateManager<C> {
    pub fn new(codec: C, store: StoreBackend, settings: StateSettings) -> Self {
        Self {
            codec,
            store,
            settings,
        }
    }

    #[must_use]
    pub fn store(&self) -> &StoreBackend {
        &self.store
    }

    #[must_use]
    pub fn settings(&self) -> &StateSettings {
        &self.settings
    }

    /// Persistence mode for this request.
    pub fn resolve_mode(&self, ctx: &ProcessingContext) -> PersistenceMode {
        ctx.persistence_mode()
    }

    /// Save `state` for `view_id`.
    ///
    /// The context reports "saving state" for the duration of the call.
    pub fn save_view(
        &self,
        ctx: &ProcessingContext,
        view_id: &ViewId,
        state: &C::State,
    ) -> Result<SavedState, ViewkeepError> {
        let _saving = ctx.begin_saving();
        let bytes = self.codec.encode(ctx, state)?;
        if bytes.len() > MAX_STATE_PAYLOAD_SIZE {
            return Err(ViewkeepError::PayloadTooLarge {
                size: bytes.len(),
                max: MAX_STATE_PAYLOAD_SIZE,
            });
        }

        match self.resolve_mode(ctx) {
            PersistenceMode::Client => {
                let payload = envelope::seal(view_id, bytes, self.settings.mac_key.as_ref())?;
                Ok(SavedState::Payload(payload))
            }
            PersistenceMode::Server => {
                let token = self.store.insert(
                    ctx.session(),
                    view_id,
                    bytes,
                    self.settings.views_in_session,
                )?;
                tracing::debug!(session = %ctx.session(), %token, "stored view state");
                Ok(SavedState::Token(token.encode()?))
            }
        }
    }

    /// Restore the state `saved` for `view_id`.
    pub fn restore_view(
        &self,
        ctx: &ProcessingContext,
        view_id: &ViewId,
        saved: &str,
    ) -> Result<Option<C::State>, ViewkeepError> {
        let bytes = match self.resolve_mode(ctx) {
            PersistenceMode::Client => {
                envelope::open(view_id, saved, self.settings.mac_key.as_ref())?
            }
            PersistenceMode::Server => self.lookup(ctx.session(), view_id, saved)?,
        };
        bytes.map(|bytes| self.codec.decode(&bytes)).transpose()
    }

    fn lookup(
        &self,
        scope: &SessionScope,
        view_id: &ViewId,
        saved: &str,
    ) -> Result<Option<Vec<u8>>, ViewkeepError> {
        let Some(posted) = ViewStateToken::decode(saved) else {
            tracing::warn!(session = %scope, view = %view_id, "malformed view state token");
            return Ok(None);
        };
        let Some(token) = posted.for_view(view_id) else {
            tracing::warn!(
                session = %scope,
                view = %view_id,
                sequence = posted.sequence(),
                "token belongs to another view"
            );
            return Ok(None);
        };
        let found = self.store.get(scope, &token)?;
        if found.is_none() {
            tracing::warn!(session = %scope, %token, "view state expired or unknown");
        }
        Ok(found)
    }

    /// Save `state` and hand the result to `sink`.
    pub fn write_state(
        &self,
        ctx: &ProcessingContext,
        view_id: &ViewId,
        state: &C::State,
        sink: &mut dyn StateSink,
    ) -> Result<SavedState, ViewkeepError> {
        let saved = self.save_view(ctx, view_id, state)?;
        sink.write_state(view_id, &saved)?;
        Ok(saved)
    }

    /// Restore whatever `source` posted back for `view_id`.
    pub fn read_state(
        &self,
        ctx: &ProcessingContext,
        view_id: &ViewId,
        source: &dyn StateSource,
    ) -> Result<Option<C::State>, ViewkeepError> {
        match source.saved_state(view_id) {
            Some(saved) => self.restore_view(ctx, view_id, &saved),
            None => Ok(None),
        }
    }

    /// Drop every view retained for `scope`.
    pub fn invalidate_session(&self, scope: &SessionScope) -> Result<usize, ViewkeepError> {
        let removed = self.store.invalidate_session(scope)?;
        tracing::debug!(session = %scope, removed, "invalidated session");
        Ok(removed)
    }

    /// Drop every retained state of `view_id` in `scope`.
    pub fn invalidate_view(
        &self,
        scope: &SessionScope,
        view_id: &ViewId,
    ) -> Result<usize, ViewkeepError> {
        self.store.invalidate_view(scope, view_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UiNode;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    type Manager = ViewStateManager<PostcardCodec<UiNode>>;

    fn ctx(pairs: &[(&str, &str)]) -> ProcessingContext {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ProcessingContext::new(Arc::new(map), "session-1")
    }

    fn manager(settings: StateSettings) -> Manager {
        ViewStateManager::new(PostcardCodec::new(), StoreBackend::default(), settings)
    }

    fn tree() -> UiNode {
        UiNode::created("form", "f1").with_child(UiNode::created("input", "i1"))
    }

    #[test]
    fn server_mode_round_trips_through_token() {
        let m = manager(StateSettings::default());
        let c = ctx(&[]);
        let view = ViewId::new("/home.xhtml");

        let saved = m.save_view(&c, &view, &tree()).expect("save");
        assert!(matches!(saved, SavedState::Token(_)));
        assert_eq!(m.restore_view(&c, &view, saved.as_str()).expect("restore"), Some(tree()));
    }

    #[test]
    fn client_mode_round_trips_through_payload() {
        let m = manager(StateSettings::default());
        let c = ctx(&[(keys::STATE_SAVING_METHOD, "client")]);
        let view = ViewId::new("/home.xhtml");

        let saved = m.save_view(&c, &view, &tree()).expect("save");
        assert!(matches!(saved, SavedState::Payload(_)));
        assert!(m.store().scopes().expect("scopes").is_empty());
        assert_eq!(m.restore_view(&c, &view, saved.as_str()).expect("restore"), Some(tree()));
    }

    #[test]
    fn server_misses_are_not_errors() {
        let m = manager(StateSettings::default());
        let c = ctx(&[]);
        let view = ViewId::new("/home.xhtml");

        assert_eq!(m.restore_view(&c, &view, "garbage").expect("malformed"), None);

        let other = m
            .save_view(&c, &ViewId::new("/other.xhtml"), &tree())
            .expect("save");
        assert_eq!(m.restore_view(&c, &view, other.as_str()).expect("foreign"), None);

        let saved = m.save_view(&c, &view, &tree()).expect("save");
        m.invalidate_view(c.session(), &view).expect("invalidate");
        assert_eq!(m.restore_view(&c, &view, saved.as_str()).expect("evicted"), None);
    }

    #[test]
    fn settings_clamp_retention_and_derive_key() {
        let map: BTreeMap<String, String> = [
            (keys::NUMBER_OF_VIEWS_IN_SESSION.to_string(), "0".to_string()),
            (keys::CLIENT_STATE_SECRET.to_string(), "s3cret".to_string()),
        ]
        .into_iter()
        .collect();
        let settings = StateSettings::from_config(&map);
        assert_eq!(settings.views_in_session, 1);
        assert!(settings.mac_key.is_some());

        let defaults = StateSettings::from_config(&BTreeMap::<String, String>::new());
        assert_eq!(defaults.views_in_session, DEFAULT_VIEWS_IN_SESSION);
        assert!(defaults.mac_key.is_none());
    }

    #[test]
    fn saving_flag_clears_after_save() {
        let m = manager(StateSettings::default());
        let c = ctx(&[]);
        m.save_view(&c, &ViewId::new("/a.xhtml"), &tree()).expect("save");
        assert!(!c.is_saving_state());
    }

    #[test]
    fn long_view_id_round_trips_through_token() {
        let m = manager(StateSettings::default());
        let c = ctx(&[]);
        let view = ViewId::new(format!("/{}.xhtml", "section/".repeat(100)));

        let saved = m.save_view(&c, &view, &tree()).expect("save");
        assert_eq!(m.restore_view(&c, &view, saved.as_str()).expect("restore"), Some(tree()));
    }

    /// Codec that records whether the context reported saving while it ran.
    struct ObservingCodec {
        fail: bool,
        saw_saving: std::sync::atomic::AtomicBool,
    }

    impl ObservingCodec {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                saw_saving: std::sync::atomic::AtomicBool::new(false),
            }
        }
    }

    impl StateCodec for ObservingCodec {
        type State = UiNode;

        fn encode(&self, ctx: &ProcessingContext, state: &UiNode) -> Result<Vec<u8>, ViewkeepError> {
            self.saw_saving
                .store(ctx.is_saving_state(), std::sync::atomic::Ordering::SeqCst);
            if self.fail {
                return Err(ViewkeepError::SerializationError("refused".to_string()));
            }
            PostcardCodec::<UiNode>::new().encode(ctx, state)
        }

        fn decode(&self, bytes: &[u8]) -> Result<UiNode, ViewkeepError> {
            PostcardCodec::<UiNode>::new().decode(bytes)
        }
    }

    #[test]
    fn codec_sees_saving_flag_during_encode() {
        let m = ViewStateManager::new(
            ObservingCodec::new(false),
            StoreBackend::default(),
            StateSettings::default(),
        );
        let c = ctx(&[]);
        assert!(!c.is_saving_state());

        m.save_view(&c, &ViewId::new("/a.xhtml"), &tree()).expect("save");
        assert!(m.codec.saw_saving.load(std::sync::atomic::Ordering::SeqCst));
        assert!(!c.is_saving_state());
    }

    #[test]
    fn saving_flag_clears_when_encode_fails() {
        let m = ViewStateManager::new(
            ObservingCodec::new(true),
            StoreBackend::default(),
            StateSettings::default(),
        );
        let c = ctx(&[]);

        let result = m.save_view(&c, &ViewId::new("/a.xhtml"), &tree());
        assert!(matches!(result, Err(ViewkeepError::SerializationError(_))));
        assert!(m.codec.saw_saving.load(std::sync::atomic::Ordering::SeqCst));
        assert!(!c.is_saving_state());
        assert!(m.store().scopes().expect("scopes").is_empty());
    }

    #[derive(Default)]
    struct Exchange {
        posted: BTreeMap<ViewId, String>,
    }

    impl StateSink for Exchange {
        fn write_state(&mut self, view_id: &ViewId, saved: &SavedState) -> Result<(), ViewkeepError> {
            self.posted.insert(view_id.clone(), saved.as_str().to_string());
            Ok(())
        }
    }

    impl StateSource for Exchange {
        fn saved_state(&self, view_id: &ViewId) -> Option<String> {
            self.posted.get(view_id).cloned()
        }
    }

    #[test]
    fn sink_and_source_adapters() {
        let m = manager(StateSettings::default());
        let c = ctx(&[]);
        let view = ViewId::new("/home.xhtml");
        let mut exchange = Exchange::default();

        m.write_state(&c, &view, &tree(), &mut exchange).expect("write");
        assert_eq!(m.read_state(&c, &view, &exchange).expect("read"), Some(tree()));
        assert_eq!(
            m.read_state(&c, &ViewId::new("/never.xhtml"), &exchange).expect("read"),
            None
        );
    }
}
