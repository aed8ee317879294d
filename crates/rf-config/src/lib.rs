// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and merging for the Reelforge
//! engine.
//!
//! This crate provides [`EngineConfig`] — storage root, concurrency, retry
//! and per-rate-key budgets — together with helpers for loading from TOML
//! files, merging overlays, and producing advisory [`ConfigWarning`]s.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use rf_error::ErrorCode;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

impl ConfigError {
    /// Map to the stable engine error code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        ErrorCode::ConfigInvalid
    }
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve
/// attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A rate key allows an unusually large in-flight budget.
    LargeInFlightBudget {
        /// The rate key.
        rate_key: String,
        /// The configured budget.
        max_in_flight: usize,
    },
    /// A rate key sets an unusually long deadline.
    LongDeadline {
        /// The rate key.
        rate_key: String,
        /// Deadline in seconds.
        secs: u64,
    },
    /// Concurrency exceeds what a single movie's layers typically hold.
    HighConcurrency {
        /// The configured worker cap.
        concurrency: usize,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::LargeInFlightBudget {
                rate_key,
                max_in_flight,
            } => write!(
                f,
                "rate key '{rate_key}' allows {max_in_flight} concurrent calls"
            ),
            ConfigWarning::LongDeadline { rate_key, secs } => {
                write!(f, "rate key '{rate_key}' has a long deadline ({secs}s)")
            }
            ConfigWarning::HighConcurrency { concurrency } => {
                write!(f, "concurrency {concurrency} is unusually high")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Budget for one rate key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RateLimitConfig {
    /// Maximum concurrent in-flight jobs for the key.
    pub max_in_flight: usize,
    /// Optional per-job deadline in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_secs: Option<u64>,
}

fn default_concurrency() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EngineConfig {
    /// Root directory (or bucket prefix) for all movie state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_root: Option<String>,

    /// Worker cap per layer.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Retry attempt cap for retriable failures.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Log level override (e.g. `"debug"`, `"info"`, `"warn"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Per-rate-key budgets.
    #[serde(default)]
    pub rate_limits: BTreeMap<String, RateLimitConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_root: None,
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            log_level: None,
            rate_limits: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load and validate a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileNotFound`] when the path does not exist,
    /// [`ConfigError::ParseError`] for invalid TOML, and
    /// [`ConfigError::ValidationError`] for semantic problems.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                ConfigError::ParseError {
                    reason: e.to_string(),
                }
            }
        })?;
        let config: Self = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] listing every problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut reasons = Vec::new();
        if self.concurrency == 0 {
            reasons.push("concurrency must be at least 1".to_string());
        }
        if self.max_attempts == 0 {
            reasons.push("max_attempts must be at least 1".to_string());
        }
        for (key, limit) in &self.rate_limits {
            if limit.max_in_flight == 0 {
                reasons.push(format!("rate key '{key}' must allow at least 1 in flight"));
            }
            if limit.deadline_secs == Some(0) {
                reasons.push(format!("rate key '{key}' has a zero deadline"));
            }
        }
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationError { reasons })
        }
    }

    /// Advisory warnings for suspicious but valid settings.
    #[must_use]
    pub fn warnings(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        if self.concurrency > 32 {
            warnings.push(ConfigWarning::HighConcurrency {
                concurrency: self.concurrency,
            });
        }
        for (key, limit) in &self.rate_limits {
            if limit.max_in_flight > 64 {
                warnings.push(ConfigWarning::LargeInFlightBudget {
                    rate_key: key.clone(),
                    max_in_flight: limit.max_in_flight,
                });
            }
            if let Some(secs) = limit.deadline_secs {
                if secs > 600 {
                    warnings.push(ConfigWarning::LongDeadline {
                        rate_key: key.clone(),
                        secs,
                    });
                }
            }
        }
        warnings
    }

    /// Merge an overlay on top of this config. Scalars from the overlay
    /// win when set; rate limits merge per key.
    #[must_use]
    pub fn merged_with(mut self, overlay: Self) -> Self {
        if overlay.storage_root.is_some() {
            self.storage_root = overlay.storage_root;
        }
        if overlay.concurrency != default_concurrency() {
            self.concurrency = overlay.concurrency;
        }
        if overlay.max_attempts != default_max_attempts() {
            self.max_attempts = overlay.max_attempts;
        }
        if overlay.log_level.is_some() {
            self.log_level = overlay.log_level;
        }
        for (key, limit) in overlay.rate_limits {
            self.rate_limits.insert(key, limit);
        }
        self
    }
}
