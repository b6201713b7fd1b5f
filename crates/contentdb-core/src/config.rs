//! Store and controller configuration

use serde::Deserialize;

use crate::errors::{GraphError, Result};

/// Tunables shared by a [`crate::Store`] and its [`crate::Controller`]
///
/// Every field has a default, so an empty TOML document is valid.
///
/// ```
/// use contentdb_core::GraphConfig;
///
/// let config = GraphConfig::from_toml_str("journal_capacity = 8").unwrap();
/// assert_eq!(config.journal_capacity, 8);
/// assert_eq!(config.max_alias_depth, 8);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphConfig {
    /// Completed transactions kept per kind in the controller journal
    pub journal_capacity: usize,
    /// Longest `source_id` chain followed when reading an aliased value
    pub max_alias_depth: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            journal_capacity: 64,
            max_alias_depth: 8,
        }
    }
}

impl GraphConfig {
    /// Parse a TOML document
    ///
    /// # Errors
    ///
    /// `GraphError::Config` on malformed TOML, unknown keys or wrongly typed
    /// values.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| GraphError::Config {
            message: e.to_string(),
        })
    }
}
