//! # Server-Side State Store
//!
//! Bounded, per-session retention of serialized view state.
//!
//! Every save gets a fresh [`ViewStateToken`]. Within one session scope the
//! store keeps at most `retain` entries and evicts the oldest first; scopes
//! never evict each other's entries.
//!
//! ## Backends
//!
//! - [`InMemoryStateStore`]: mutex-guarded maps, lost on restart
//! - [`RedbStateStore`](super::RedbStateStore): redb database, survives restarts
//!
//! [`StoreBackend`] selects one at runtime.

use super::RedbStateStore;
use super::token::ViewStateToken;
use crate::{SessionScope, ViewId, ViewkeepError};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

// =============================================================================
// STORE TRAIT
// =============================================================================

/// Bounded store of serialized view state keyed by session scope.
pub trait StateStore: Send + Sync {
    /// Store `state` for `view_id`, then evict the oldest entries of `scope`
    /// beyond `retain`.
    fn insert(
        &self,
        scope: &SessionScope,
        view_id: &ViewId,
        state: Vec<u8>,
        retain: usize,
    ) -> Result<ViewStateToken, ViewkeepError>;

    /// Look up the state behind `token`. `None` if evicted or never stored.
    fn get(
        &self,
        scope: &SessionScope,
        token: &ViewStateToken,
    ) -> Result<Option<Vec<u8>>, ViewkeepError>;

    /// Drop every entry of `scope`. Returns how many were removed.
    fn invalidate_session(&self, scope: &SessionScope) -> Result<usize, ViewkeepError>;

    /// Drop every entry of `scope` saved for `view_id`.
    fn invalidate_view(&self, scope: &SessionScope, view_id: &ViewId)
    -> Result<usize, ViewkeepError>;

    /// Tokens held for `scope`, oldest first.
    fn tokens(&self, scope: &SessionScope) -> Result<Vec<ViewStateToken>, ViewkeepError>;

    /// Every scope with at least one entry.
    fn scopes(&self) -> Result<Vec<SessionScope>, ViewkeepError>;
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

#[derive(Debug, Default)]
struct Retained {
    next_sequence: u64,
    scopes: BTreeMap<SessionScope, BTreeMap<u64, (ViewId, Vec<u8>)>>,
}

/// Volatile store; all bookkeeping happens under one mutex.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    inner: Mutex<Retained>,
}

impl InMemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Retained> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StateStore for InMemoryStateStore {
    fn insert(
        &self,
        scope: &SessionScope,
        view_id: &ViewId,
        state: Vec<u8>,
        retain: usize,
    ) -> Result<ViewStateToken, ViewkeepError> {
        let mut inner = self.lock();
        inner.next_sequence = inner.next_sequence.saturating_add(1);
        let sequence = inner.next_sequence;

        let entries = inner.scopes.entry(scope.clone()).or_default();
        entries.insert(sequence, (view_id.clone(), state));
        while entries.len() > retain.max(1) {
            if let Some((evicted, (evicted_view, _))) = entries.pop_first() {
                tracing::debug!(%scope, view = %evicted_view, sequence = evicted, "evicted view state");
            }
        }
        Ok(ViewStateToken::new(view_id.clone(), sequence))
    }

    fn get(
        &self,
        scope: &SessionScope,
        token: &ViewStateToken,
    ) -> Result<Option<Vec<u8>>, ViewkeepError> {
        Ok(self
            .lock()
            .scopes
            .get(scope)
            .and_then(|entries| entries.get(&token.sequence))
            .filter(|(view_id, _)| *view_id == token.view_id)
            .map(|(_, state)| state.clone()))
    }

    fn invalidate_session(&self, scope: &SessionScope) -> Result<usize, ViewkeepError> {
        Ok(self
            .lock()
            .scopes
            .remove(scope)
            .map_or(0, |entries| entries.len()))
    }

    fn invalidate_view(
        &self,
        scope: &SessionScope,
        view_id: &ViewId,
    ) -> Result<usize, ViewkeepError> {
        let mut inner = self.lock();
        let Some(entries) = inner.scopes.get_mut(scope) else {
            return Ok(0);
        };
        let before = entries.len();
        entries.retain(|_, (stored, _)| stored != view_id);
        let removed = before - entries.len();
        if entries.is_empty() {
            inner.scopes.remove(scope);
        }
        Ok(removed)
    }

    fn tokens(&self, scope: &SessionScope) -> Result<Vec<ViewStateToken>, ViewkeepError> {
        Ok(self
            .lock()
            .scopes
            .get(scope)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(sequence, (view_id, _))| ViewStateToken::new(view_id.clone(), *sequence))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn scopes(&self) -> Result<Vec<SessionScope>, ViewkeepError> {
        Ok(self.lock().scopes.keys().cloned().collect())
    }
}

// =============================================================================
// BACKEND SELECTION
// =============================================================================

/// Storage backend of the server-side store.
#[derive(Debug)]
pub enum StoreBackend {
    /// Process-local maps (fast, volatile).
    InMemory(InMemoryStateStore),
    /// Disk-backed store using redb (ACID, persistent).
    Persistent(RedbStateStore),
}

impl Default for StoreBackend {
    fn default() -> Self {
        Self::InMemory(InMemoryStateStore::new())
    }
}

impl StoreBackend {
    /// Open or create a persistent store at `path`.
    pub fn with_redb(path: impl AsRef<Path>) -> Result<Self, ViewkeepError> {
        Ok(Self::Persistent(RedbStateStore::open(path)?))
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Persistent(_))
    }

    fn inner(&self) -> &dyn StateStore {
        match self {
            Self::InMemory(store) => store,
            Self::Persistent(store) => store,
        }
    }
}

impl StateStore for StoreBackend {
    fn insert(
        &self,
        scope: &SessionScope,
        view_id: &ViewId,
        state: Vec<u8>,
        retain: usize,
    ) -> Result<ViewStateToken, ViewkeepError> {
        self.inner().insert(scope, view_id, state, retain)
    }

    fn get(
        &self,
        scope: &SessionScope,
        token: &ViewStateToken,
    ) -> Result<Option<Vec<u8>>, ViewkeepError> {
        self.inner().get(scope, token)
    }

    fn invalidate_session(&self, scope: &SessionScope) -> Result<usize, ViewkeepError> {
        self.inner().invalidate_session(scope)
    }

    fn invalidate_view(
        &self,
        scope: &SessionScope,
        view_id: &ViewId,
    ) -> Result<usize, ViewkeepError> {
        self.inner().invalidate_view(scope, view_id)
    }

    fn tokens(&self, scope: &SessionScope) -> Result<Vec<ViewStateToken>, ViewkeepError> {
        self.inner().tokens(scope)
    }

    fn scopes(&self) -> Result<Vec<SessionScope>, ViewkeepError> {
        self.inner().scopes()
    }
}
