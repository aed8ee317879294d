// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy with stable error codes for the Reelforge engine.
//!
//! Every engine error carries an [`ErrorCode`] (a machine-readable, stable
//! string tag), a human-readable message, an optional cause chain, and
//! arbitrary key-value context. Use the builder returned by
//! [`EngineError::new`] to construct errors fluently.
//!
//! Errors are surfaced in job diagnostics rather than used as control flow:
//! the runner records them per job and classifies retriability with
//! [`ErrorCode::is_retriable`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed user-supplied inputs or blueprint documents.
    Input,
    /// Producer-graph construction errors.
    Graph,
    /// Planning errors.
    Plan,
    /// Provider handler invocation errors.
    Provider,
    /// Blob / JSON storage errors.
    Storage,
    /// Event log and manifest errors.
    Manifest,
    /// Configuration errors.
    Config,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Input => "input",
            Self::Graph => "graph",
            Self::Plan => "plan",
            Self::Provider => "provider",
            Self::Storage => "storage",
            Self::Manifest => "manifest",
            Self::Config => "config",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Input --
    /// Malformed inputs document or blueprint; never retried.
    UserInput,
    /// A declared input has no value and no binding.
    MissingRequiredInput,

    // -- Graph --
    /// A binding expression names a producer that does not exist.
    UnknownProducer,
    /// An input could not be resolved to any source.
    UnresolvedInput,
    /// Two parents drive the same dimension with different extents, or
    /// fan-in sources disagree on ordering.
    ConflictingDimensions,
    /// An element-level binding indexes past the end of its collection.
    UnresolvableElementIndex,
    /// The job graph contains a cycle.
    CycleDetected,

    // -- Plan / run --
    /// An evaluated predicate excluded the job.
    ConditionFalse,
    /// An ancestor job failed; the job was skipped.
    UpstreamFailed,
    /// The run was cancelled before the job was dequeued.
    Cancelled,

    // -- Provider --
    /// Timeout, 5xx, or quota exhaustion; retried with backoff.
    ProviderTransient,
    /// 4xx, schema violation, or missing output field; failed immediately.
    ProviderPermanent,
    /// No handler is registered for the `(provider, model)` tuple.
    HandlerNotFound,

    // -- Storage / manifest --
    /// Blob or JSON I/O failed.
    StorageFailure,
    /// No manifest snapshot exists for the movie.
    ManifestNotFound,
    /// An event with the same `(id, revision)` already exists with a
    /// different hash.
    ConflictingRevision,

    // -- Config --
    /// Configuration file or value is invalid.
    ConfigInvalid,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UserInput | Self::MissingRequiredInput => ErrorCategory::Input,

            Self::UnknownProducer
            | Self::UnresolvedInput
            | Self::ConflictingDimensions
            | Self::UnresolvableElementIndex
            | Self::CycleDetected => ErrorCategory::Graph,

            Self::ConditionFalse | Self::UpstreamFailed | Self::Cancelled => ErrorCategory::Plan,

            Self::ProviderTransient | Self::ProviderPermanent | Self::HandlerNotFound => {
                ErrorCategory::Provider
            }

            Self::StorageFailure => ErrorCategory::Storage,

            Self::ManifestNotFound | Self::ConflictingRevision => ErrorCategory::Manifest,

            Self::ConfigInvalid => ErrorCategory::Config,

            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"PROVIDER_TRANSIENT"`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserInput => "USER_INPUT",
            Self::MissingRequiredInput => "MISSING_REQUIRED_INPUT",
            Self::UnknownProducer => "UNKNOWN_PRODUCER",
            Self::UnresolvedInput => "UNRESOLVED_INPUT",
            Self::ConflictingDimensions => "CONFLICTING_DIMENSIONS",
            Self::UnresolvableElementIndex => "UNRESOLVABLE_ELEMENT_INDEX",
            Self::CycleDetected => "CYCLE_DETECTED",
            Self::ConditionFalse => "CONDITION_FALSE",
            Self::UpstreamFailed => "UPSTREAM_FAILED",
            Self::Cancelled => "CANCELLED",
            Self::ProviderTransient => "PROVIDER_TRANSIENT",
            Self::ProviderPermanent => "PROVIDER_PERMANENT",
            Self::HandlerNotFound => "HANDLER_NOT_FOUND",
            Self::StorageFailure => "STORAGE_FAILURE",
            Self::ManifestNotFound => "MANIFEST_NOT_FOUND",
            Self::ConflictingRevision => "CONFLICTING_REVISION",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::Internal => "INTERNAL",
        }
    }

    /// Returns `true` when a failure with this code may be retried locally.
    ///
    /// Only transient provider failures and brief storage hiccups qualify;
    /// everything else fails the job (or the operation) deterministically.
    ///
    /// # Examples
    ///
    /// ```
    /// use rf_error::ErrorCode;
    ///
    /// assert!(ErrorCode::ProviderTransient.is_retriable());
    /// assert!(ErrorCode::StorageFailure.is_retriable());
    /// assert!(!ErrorCode::ProviderPermanent.is_retriable());
    /// assert!(!ErrorCode::UserInput.is_retriable());
    /// ```
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::ProviderTransient | Self::StorageFailure)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Unified engine error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use rf_error::{EngineError, ErrorCode};
///
/// let err = EngineError::new(ErrorCode::ProviderTransient, "upstream timed out")
///     .with_context("provider", "elevenlabs")
///     .with_context("attempt", 2);
///
/// assert_eq!(err.code, ErrorCode::ProviderTransient);
/// assert!(err.to_string().contains("PROVIDER_TRANSIENT"));
/// ```
pub struct EngineError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl EngineError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns the category of this error's code.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Returns `true` when this error may be retried locally.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        self.code.is_retriable()
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if !self.context.is_empty() {
            let pairs: Vec<String> = self
                .context
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            write!(f, " ({})", pairs.join(", "))?;
        }
        Ok(())
    }
}

impl fmt::Debug for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineError")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("context", &self.context)
            .field("source", &self.source.as_ref().map(|s| s.to_string()))
            .finish()
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn std::error::Error + 'static))
    }
}
