//! # redb-backed State Store
//!
//! A disk-backed [`StateStore`] using the redb embedded database.
//!
//! Entries are keyed by `(scope, sequence)` so that one range scan yields a
//! scope's entries oldest first. Insert and eviction share one write
//! transaction, which also serializes concurrent savers.

use super::store::StateStore;
use super::token::ViewStateToken;
use crate::{SessionScope, ViewId, ViewkeepError};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Table for view state: (scope, sequence) -> serialized `StoredView`
const VIEWS: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("views");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const NEXT_SEQUENCE: &str = "next_sequence";

#[derive(Serialize, Deserialize)]
struct StoredView {
    view_id: ViewId,
    state: Vec<u8>,
}

fn io_err(e: impl std::fmt::Display) -> ViewkeepError {
    ViewkeepError::IoError(e.to_string())
}

fn decode_stored(bytes: &[u8]) -> Result<StoredView, ViewkeepError> {
    postcard::from_bytes(bytes).map_err(|e| {
        ViewkeepError::DeserializationError(format!("Failed to decode stored view: {e}"))
    })
}

/// `(sequence, view)` pairs held for `scope`, oldest first.
fn entries_of<T>(table: &T, scope: &SessionScope) -> Result<Vec<(u64, ViewId)>, ViewkeepError>
where
    T: ReadableTable<(&'static str, u64), &'static [u8]>,
{
    let mut entries = Vec::new();
    for entry in table
        .range((scope.as_str(), 0u64)..=(scope.as_str(), u64::MAX))
        .map_err(io_err)?
    {
        let (key, value) = entry.map_err(io_err)?;
        let (_, sequence) = key.value();
        entries.push((sequence, decode_stored(value.value())?.view_id));
    }
    Ok(entries)
}

/// A disk-backed state store using redb.
pub struct RedbStateStore {
    db: Database,
}

impl std::fmt::Debug for RedbStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStateStore").finish_non_exhaustive()
    }
}

impl RedbStateStore {
    /// Open or create a state database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ViewkeepError> {
        let db = Database::create(path.as_ref()).map_err(io_err)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(io_err)?;
            let _ = write_txn.open_table(VIEWS).map_err(io_err)?;
            let _ = write_txn.open_table(METADATA).map_err(io_err)?;
            write_txn.commit().map_err(io_err)?;
        }

        Ok(Self { db })
    }

    /// Remove every entry of `scope` whose view fails `keep`, in one transaction.
    fn remove_where(
        &self,
        scope: &SessionScope,
        keep: impl Fn(&ViewId) -> bool,
    ) -> Result<usize, ViewkeepError> {
        let write_txn = self.db.begin_write().map_err(io_err)?;
        let removed = {
            let mut views = write_txn.open_table(VIEWS).map_err(io_err)?;
            let doomed: Vec<u64> = entries_of(&views, scope)?
                .into_iter()
                .filter(|(_, view_id)| !keep(view_id))
                .map(|(sequence, _)| sequence)
                .collect();
            for sequence in &doomed {
                views
                    .remove((scope.as_str(), *sequence))
                    .map_err(io_err)?;
            }
            doomed.len()
        };
        write_txn.commit().map_err(io_err)?;
        Ok(removed)
    }
}

impl StateStore for RedbStateStore {
    fn insert(
        &self,
        scope: &SessionScope,
        view_id: &ViewId,
        state: Vec<u8>,
        retain: usize,
    ) -> Result<ViewStateToken, ViewkeepError> {
        let bytes = postcard::to_stdvec(&StoredView {
            view_id: view_id.clone(),
            state,
        })
        .map_err(|e| ViewkeepError::SerializationError(e.to_string()))?;

        let write_txn = self.db.begin_write().map_err(io_err)?;
        let sequence = {
            let mut meta = write_txn.open_table(METADATA).map_err(io_err)?;
            let sequence = meta
                .get(NEXT_SEQUENCE)
                .map_err(io_err)?
                .map(|v| v.value())
                .unwrap_or(0)
                .saturating_add(1);
            meta.insert(NEXT_SEQUENCE, sequence).map_err(io_err)?;

            let mut views = write_txn.open_table(VIEWS).map_err(io_err)?;
            views
                .insert((scope.as_str(), sequence), bytes.as_slice())
                .map_err(io_err)?;

            let held = entries_of(&views, scope)?;
            let excess = held.len().saturating_sub(retain.max(1));
            for (evicted, evicted_view) in held.into_iter().take(excess) {
                views
                    .remove((scope.as_str(), evicted))
                    .map_err(io_err)?;
                tracing::debug!(%scope, view = %evicted_view, sequence = evicted, "evicted view state");
            }
            sequence
        };
        write_txn.commit().map_err(io_err)?;

        Ok(ViewStateToken::new(view_id.clone(), sequence))
    }

    fn get(
        &self,
        scope: &SessionScope,
        token: &ViewStateToken,
    ) -> Result<Option<Vec<u8>>, ViewkeepError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let views = read_txn.open_table(VIEWS).map_err(io_err)?;
        let Some(guard) = views
            .get((scope.as_str(), token.sequence))
            .map_err(io_err)?
        else {
            return Ok(None);
        };
        let stored = decode_stored(guard.value())?;
        Ok((stored.view_id == token.view_id).then_some(stored.state))
    }

    fn invalidate_session(&self, scope: &SessionScope) -> Result<usize, ViewkeepError> {
        self.remove_where(scope, |_| false)
    }

    fn invalidate_view(
        &self,
        scope: &SessionScope,
        view_id: &ViewId,
    ) -> Result<usize, ViewkeepError> {
        self.remove_where(scope, |stored| stored != view_id)
    }

    fn tokens(&self, scope: &SessionScope) -> Result<Vec<ViewStateToken>, ViewkeepError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let views = read_txn.open_table(VIEWS).map_err(io_err)?;
        Ok(entries_of(&views, scope)?
            .into_iter()
            .map(|(sequence, view_id)| ViewStateToken::new(view_id, sequence))
            .collect())
    }

    fn scopes(&self) -> Result<Vec<SessionScope>, ViewkeepError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let views = read_txn.open_table(VIEWS).map_err(io_err)?;
        let mut scopes = BTreeSet::new();
        for entry in views.iter().map_err(io_err)? {
            let (key, _) = entry.map_err(io_err)?;
            let (scope, _) = key.value();
            scopes.insert(SessionScope::new(scope));
        }
        Ok(scopes.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn eviction_matches_in_memory_rules() {
        let dir = tempdir().expect("temp dir");
        let store = RedbStateStore::open(dir.path().join("views.redb")).expect("open");
        let s = SessionScope::new("s1");

        let t1 = store.insert(&s, &ViewId::new("v1"), vec![1], 2).expect("v1");
        let t2 = store.insert(&s, &ViewId::new("v2"), vec![2], 2).expect("v2");
        let t3 = store.insert(&s, &ViewId::new("v3"), vec![3], 2).expect("v3");

        assert_eq!(store.get(&s, &t1).expect("get"), None);
        assert_eq!(store.get(&s, &t2).expect("get"), Some(vec![2]));
        assert_eq!(store.get(&s, &t3).expect("get"), Some(vec![3]));
        assert_eq!(store.tokens(&s).expect("tokens"), vec![t2, t3]);
    }

    #[test]
    fn state_and_sequence_survive_reopen() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("views.redb");
        let s = SessionScope::new("s1");

        let token = {
            let store = RedbStateStore::open(&path).expect("open");
            store.insert(&s, &ViewId::new("v1"), vec![4, 2], 5).expect("insert")
        };

        let store = RedbStateStore::open(&path).expect("reopen");
        assert_eq!(store.get(&s, &token).expect("get"), Some(vec![4, 2]));
        let next = store.insert(&s, &ViewId::new("v2"), vec![1], 5).expect("insert");
        assert!(next.sequence > token.sequence);
    }

    #[test]
    fn scopes_prefixing_each_other_stay_separate() {
        let dir = tempdir().expect("temp dir");
        let store = RedbStateStore::open(dir.path().join("views.redb")).expect("open");
        let short = SessionScope::new("abc");
        let long = SessionScope::new("abcd");

        store.insert(&short, &ViewId::new("v"), vec![1], 1).expect("short");
        store.insert(&long, &ViewId::new("v"), vec![2], 1).expect("long");
        store.insert(&short, &ViewId::new("w"), vec![3], 1).expect("short again");

        assert_eq!(store.tokens(&long).expect("tokens").len(), 1);
        assert_eq!(store.tokens(&short).expect("tokens").len(), 1);
        assert_eq!(store.scopes().expect("scopes"), vec![short.clone(), long]);
    }

    #[test]
    fn invalidation_by_session_and_view() {
        let dir = tempdir().expect("temp dir");
        let store = RedbStateStore::open(dir.path().join("views.redb")).expect("open");
        let s = SessionScope::new("s");
        store.insert(&s, &ViewId::new("a"), vec![1], 5).expect("a");
        store.insert(&s, &ViewId::new("b"), vec![2], 5).expect("b");

        assert_eq!(store.invalidate_view(&s, &ViewId::new("a")).expect("view"), 1);
        assert_eq!(store.invalidate_session(&s).expect("session"), 1);
        assert!(store.scopes().expect("scopes").is_empty());
    }
}
