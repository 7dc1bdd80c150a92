//! # Configuration Surface
//!
//! The core never loads configuration itself. It reads plain values through
//! the [`ConfigSource`] trait; how those values got there (TOML file,
//! environment, servlet-style init params) is the embedding application's
//! concern.
//!
//! [`StateConfig`] is the typed form the `viewkeep` binary deserializes from
//! TOML. It implements [`ConfigSource`] so the core sees one uniform surface.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Configuration keys understood by the core.
pub mod keys {
    /// Persistence mode selector: `client` or `server`.
    pub const STATE_SAVING_METHOD: &str = "viewkeep.state_saving_method";
    /// Refresh window in seconds for every template namespace.
    pub const REFRESH_PERIOD: &str = "viewkeep.refresh_period";
    /// Override of the refresh window for the view-metadata namespace.
    pub const VIEW_METADATA_REFRESH_PERIOD: &str = "viewkeep.refresh_period.view_metadata";
    /// Override of the refresh window for the composite-metadata namespace.
    pub const COMPOSITE_METADATA_REFRESH_PERIOD: &str =
        "viewkeep.refresh_period.composite_metadata";
    /// Maximum number of views retained per session scope.
    pub const NUMBER_OF_VIEWS_IN_SESSION: &str = "viewkeep.number_of_views_in_session";
    /// Size of the precomputed component id table.
    pub const COMPONENT_UNIQUE_IDS_CACHE_SIZE: &str = "viewkeep.component_unique_ids_cache_size";
    /// Secret used to authenticate client payloads.
    pub const CLIENT_STATE_SECRET: &str = "viewkeep.client_state_secret";
    /// Whether the current build only produces view metadata.
    pub const BUILDING_VIEW_METADATA: &str = "viewkeep.building_view_metadata";
    /// Whether the current build refreshes transient nodes of a restored tree.
    pub const REFRESHING_TRANSIENT_BUILD: &str = "viewkeep.refreshing_transient_build";
    /// Whether nodes built in this pass should have their initial state marked.
    pub const MARK_INITIAL_STATE: &str = "viewkeep.mark_initial_state";
}

// =============================================================================
// CONFIG SOURCE TRAIT
// =============================================================================

/// A read-only view of configuration values.
///
/// Implementations must be cheap to query; the core still memoizes anything
/// it reads per processing context.
pub trait ConfigSource: Send + Sync {
    /// Get the raw value for a key, if set.
    fn get(&self, key: &str) -> Option<String>;
}

impl ConfigSource for BTreeMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        BTreeMap::get(self, key).cloned()
    }
}

// =============================================================================
// TYPED CONFIG
// =============================================================================

/// Typed configuration, as loaded from a TOML file by the binary.
///
/// Every field is optional; unset fields fall back to the defaults in
/// [`crate::primitives`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StateConfig {
    pub state_saving_method: Option<String>,
    pub refresh_period: Option<i64>,
    pub view_metadata_refresh_period: Option<i64>,
    pub composite_metadata_refresh_period: Option<i64>,
    pub number_of_views_in_session: Option<usize>,
    pub component_unique_ids_cache_size: Option<usize>,
    pub client_state_secret: Option<String>,
    pub building_view_metadata: Option<bool>,
    pub refreshing_transient_build: Option<bool>,
    pub mark_initial_state: Option<bool>,
}

impl ConfigSource for StateConfig {
    fn get(&self, key: &str) -> Option<String> {
        match key {
            keys::STATE_SAVING_METHOD => self.state_saving_method.clone(),
            keys::REFRESH_PERIOD => self.refresh_period.map(|v| v.to_string()),
            keys::VIEW_METADATA_REFRESH_PERIOD => {
                self.view_metadata_refresh_period.map(|v| v.to_string())
            }
            keys::COMPOSITE_METADATA_REFRESH_PERIOD => {
                self.composite_metadata_refresh_period.map(|v| v.to_string())
            }
            keys::NUMBER_OF_VIEWS_IN_SESSION => {
                self.number_of_views_in_session.map(|v| v.to_string())
            }
            keys::COMPONENT_UNIQUE_IDS_CACHE_SIZE => {
                self.component_unique_ids_cache_size.map(|v| v.to_string())
            }
            keys::CLIENT_STATE_SECRET => self.client_state_secret.clone(),
            keys::BUILDING_VIEW_METADATA => self.building_view_metadata.map(|v| v.to_string()),
            keys::REFRESHING_TRANSIENT_BUILD => {
                self.refreshing_transient_build.map(|v| v.to_string())
            }
            keys::MARK_INITIAL_STATE => self.mark_initial_state.map(|v| v.to_string()),
            _ => None,
        }
    }
}

// =============================================================================
// TYPED READERS
// =============================================================================

/// Read an integer value, falling back to `default` when unset or malformed.
pub fn read_i64(source: &dyn ConfigSource, key: &str, default: i64) -> i64 {
    match source.get(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, default, "ignoring non-integer configuration value");
            default
        }),
    }
}

/// Read a non-negative size, falling back to `default` when unset or malformed.
pub fn read_usize(source: &dyn ConfigSource, key: &str, default: usize) -> usize {
    match source.get(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, default, "ignoring non-numeric configuration value");
            default
        }),
    }
}

/// Read a boolean value (`true`/`false`, case-insensitive).
pub fn read_bool(source: &dyn ConfigSource, key: &str, default: bool) -> bool {
    match source.get(key) {
        None => default,
        Some(raw) if raw.trim().eq_ignore_ascii_case("true") => true,
        Some(raw) if raw.trim().eq_ignore_ascii_case("false") => false,
        Some(raw) => {
            tracing::warn!(key, value = %raw, default, "ignoring non-boolean configuration value");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn typed_config_answers_known_keys() {
        let config = StateConfig {
            state_saving_method: Some("client".into()),
            refresh_period: Some(2),
            number_of_views_in_session: Some(5),
            ..StateConfig::default()
        };

        assert_eq!(config.get(keys::STATE_SAVING_METHOD).as_deref(), Some("client"));
        assert_eq!(config.get(keys::REFRESH_PERIOD).as_deref(), Some("2"));
        assert_eq!(config.get(keys::NUMBER_OF_VIEWS_IN_SESSION).as_deref(), Some("5"));
        assert_eq!(config.get(keys::CLIENT_STATE_SECRET), None);
        assert_eq!(config.get("viewkeep.unknown"), None);
    }

    #[test]
    fn readers_fall_back_on_malformed_values() {
        let source = map(&[
            (keys::REFRESH_PERIOD, "soon"),
            (keys::NUMBER_OF_VIEWS_IN_SESSION, "-3"),
            (keys::MARK_INITIAL_STATE, "maybe"),
        ]);

        assert_eq!(read_i64(&source, keys::REFRESH_PERIOD, 7), 7);
        assert_eq!(read_usize(&source, keys::NUMBER_OF_VIEWS_IN_SESSION, 20), 20);
        assert!(read_bool(&source, keys::MARK_INITIAL_STATE, true));
    }

    #[test]
    fn readers_parse_well_formed_values() {
        let source = map(&[
            (keys::REFRESH_PERIOD, " -1 "),
            (keys::NUMBER_OF_VIEWS_IN_SESSION, "3"),
            (keys::MARK_INITIAL_STATE, "TRUE"),
        ]);

        assert_eq!(read_i64(&source, keys::REFRESH_PERIOD, 0), -1);
        assert_eq!(read_usize(&source, keys::NUMBER_OF_VIEWS_IN_SESSION, 20), 3);
        assert!(read_bool(&source, keys::MARK_INITIAL_STATE, false));
    }
}
