//! # Processing Context
//!
//! Per-request state shared by the persistence strategy and the collaborators
//! it calls into.
//!
//! A context lives for exactly one request/response cycle on one thread. It
//! memoizes values resolved from configuration (each read at most once) and
//! carries the "state is being saved" flag that nested collaborators consult
//! while a save is in progress.

use crate::config::{ConfigSource, keys};
use crate::{PersistenceMode, SessionScope};
use std::cell::{Cell, OnceCell};
use std::sync::Arc;

/// Per-request processing context.
pub struct ProcessingContext {
    config: Arc<dyn ConfigSource>,
    session: SessionScope,
    mode: OnceCell<PersistenceMode>,
    saving_state: Cell<bool>,
}

impl std::fmt::Debug for ProcessingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingContext")
            .field("session", &self.session)
            .field("mode", &self.mode.get())
            .field("saving_state", &self.saving_state.get())
            .finish_non_exhaustive()
    }
}

impl ProcessingContext {
    /// Create a context for one request in `session`.
    pub fn new(config: Arc<dyn ConfigSource>, session: impl Into<SessionScope>) -> Self {
        Self {
            config,
            session: session.into(),
            mode: OnceCell::new(),
            saving_state: Cell::new(false),
        }
    }

    /// The session scope server-side views are retained under.
    #[must_use]
    pub fn session(&self) -> &SessionScope {
        &self.session
    }

    /// The configuration this context reads from.
    #[must_use]
    pub fn config(&self) -> &dyn ConfigSource {
        self.config.as_ref()
    }

    /// Resolve the persistence mode, reading configuration only the first time.
    ///
    /// Absent or unrecognized values resolve to [`PersistenceMode::Server`].
    pub fn persistence_mode(&self) -> PersistenceMode {
        *self.mode.get_or_init(|| {
            match self.config.get(keys::STATE_SAVING_METHOD) {
                None => {
                    tracing::info!(
                        session = %self.session,
                        "no state saving method defined, assuming server state saving"
                    );
                    PersistenceMode::Server
                }
                Some(raw) => PersistenceMode::parse(&raw).unwrap_or_else(|| {
                    tracing::warn!(
                        session = %self.session,
                        value = %raw,
                        "illegal state saving method, server state saving will be used"
                    );
                    PersistenceMode::Server
                }),
            }
        })
    }

    /// Whether view state is currently being serialized.
    #[must_use]
    pub fn is_saving_state(&self) -> bool {
        self.saving_state.get()
    }

    /// Flag the context as saving state until the guard is dropped.
    #[must_use = "the flag is cleared as soon as the guard is dropped"]
    pub fn begin_saving(&self) -> SavingGuard<'_> {
        self.saving_state.set(true);
        SavingGuard { context: self }
    }
}

/// Clears the saving-state flag on every exit path.
#[derive(Debug)]
pub struct SavingGuard<'a> {
    context: &'a ProcessingContext,
}

impl Drop for SavingGuard<'_> {
    fn drop(&mut self) {
        self.context.saving_state.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn context_with(pairs: &[(&str, &str)]) -> ProcessingContext {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ProcessingContext::new(Arc::new(map), "session-1")
    }

    #[test]
    fn mode_resolves_configured_value() {
        let ctx = context_with(&[(keys::STATE_SAVING_METHOD, "Client")]);
        assert_eq!(ctx.persistence_mode(), PersistenceMode::Client);
    }

    #[test]
    fn unknown_mode_defaults_to_server() {
        let ctx = context_with(&[(keys::STATE_SAVING_METHOD, "database")]);
        assert_eq!(ctx.persistence_mode(), PersistenceMode::Server);
    }

    #[test]
    fn saving_flag_is_scoped_to_guard() {
        let ctx = context_with(&[]);
        assert!(!ctx.is_saving_state());
        {
            let _guard = ctx.begin_saving();
            assert!(ctx.is_saving_state());
        }
        assert!(!ctx.is_saving_state());
    }

    #[test]
    fn saving_flag_cleared_on_early_return() {
        fn failing_save(ctx: &ProcessingContext) -> Result<(), String> {
            let _guard = ctx.begin_saving();
            Err("serializer failed".to_string())
        }

        let ctx = context_with(&[]);
        assert!(failing_save(&ctx).is_err());
        assert!(!ctx.is_saving_state());
    }
}
