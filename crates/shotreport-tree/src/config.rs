#![forbid(unsafe_code)]

//! Session configuration.
//!
//! [`TreeConfig`] groups the tunables of a report session. It can be built in
//! code or, with the `config-files` feature, loaded from TOML or JSON:
//!
//! ```toml
//! # shotreport.toml
//! [ingest]
//! max_suite_depth = 32
//!
//! [reuse]
//! enabled = true
//! sort_after_merge = true
//! ```
//!
//! ```rust,ignore
//! let config = TreeConfig::from_toml_file("shotreport.toml")?;
//! ```
//!
//! Missing keys fall back to [`TreeConfig::default`].

#[cfg(feature = "config-files")]
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hard ceiling for `ingest.max_suite_depth`.
pub const MAX_SUITE_DEPTH_LIMIT: usize = 1024;

/// Top-level configuration for a [`ReportSession`](crate::ReportSession).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Event ingestion limits.
    pub ingest: IngestConfig,
    /// Reuse-merge behavior when seeding.
    pub reuse: ReuseConfig,
}

impl TreeConfig {
    /// Load from a TOML string.
    #[cfg(feature = "config-files")]
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(ConfigError::Toml)
    }

    /// Load from a TOML file on disk.
    #[cfg(feature = "config-files")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    #[cfg(feature = "config-files")]
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(ConfigError::Json)
    }

    /// Load from a JSON file on disk.
    #[cfg(feature = "config-files")]
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_json_str(&content)
    }

    /// Check every parameter is within range.
    ///
    /// Returns a list of problems; an empty list means the config is valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.ingest.max_suite_depth == 0 {
            errors.push("ingest.max_suite_depth must be at least 1".to_string());
        }
        if self.ingest.max_suite_depth > MAX_SUITE_DEPTH_LIMIT {
            errors.push(format!(
                "ingest.max_suite_depth must be <= {MAX_SUITE_DEPTH_LIMIT}, got {}",
                self.ingest.max_suite_depth
            ));
        }

        errors
    }

    /// `self` when valid, otherwise every validation problem.
    pub fn validated(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// Limits applied to incoming events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Events whose suite path is deeper than this are rejected.
    pub max_suite_depth: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { max_suite_depth: 64 }
    }
}

/// Reuse-merge switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReuseConfig {
    /// Merge a previous snapshot when one is supplied to `seed`.
    pub enabled: bool,
    /// Run the sort pass once seeding finishes.
    pub sort_after_merge: bool,
}

impl Default for ReuseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sort_after_merge: true,
        }
    }
}

/// Errors raised while loading a [`TreeConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),

    #[cfg(feature = "config-files")]
    #[error("TOML parse error: {0}")]
    Toml(#[source] toml::de::Error),

    #[cfg(feature = "config-files")]
    #[error("JSON parse error: {0}")]
    Json(#[source] serde_json::Error),

    #[error("validation errors: {}", .0.join("; "))]
    Validation(Vec<String>),
}
