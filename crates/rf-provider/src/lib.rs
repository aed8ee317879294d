// SPDX-License-Identifier: MIT OR Apache-2.0
//! rf-provider
//!
//! The handler contract and registry.
//!
//! A [`Handler`] is a black box that turns a [`ProviderJobContext`] into a
//! [`ProviderResponse`] — an LLM, an image/video/audio model, or the
//! internal composition engine. The [`HandlerRegistry`] resolves a
//! `(provider, model, environment)` tuple to a handler with model- and
//! environment-specific registrations taking precedence, and supports
//! eager warm starts (API key fetches and the like). [`RegistryProduce`]
//! adapts the registry to the runner's `Produce` seam.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Mock handler for tests and dry wiring.
pub mod mock;
/// The `Produce` adapter over the registry.
pub mod produce;
/// Handler resolution.
pub mod registry;

pub use mock::MockHandler;
pub use produce::RegistryProduce;
pub use registry::HandlerRegistry;

use async_trait::async_trait;
use rf_core::{ArtifactStatus, BlobRef, Diagnostics, JobContext, JobSchemas, RevisionId};
use rf_error::ErrorCode;
use rf_runner::PreparedContext;
use serde::Serialize;
use std::collections::BTreeMap;

/// Errors from handler resolution and warm starts.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// No handler is registered for the tuple.
    #[error("no handler for provider '{provider}' model '{model}'")]
    HandlerNotFound {
        /// Requested provider family.
        provider: String,
        /// Requested model.
        model: String,
    },

    /// A handler's warm start failed.
    #[error("warm start failed for {handlers:?}")]
    WarmStartFailed {
        /// Handlers that failed to warm.
        handlers: Vec<String>,
    },
}

impl ProviderError {
    /// Map to the stable engine error code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::HandlerNotFound { .. } => ErrorCode::HandlerNotFound,
            Self::WarmStartFailed { .. } => ErrorCode::ProviderPermanent,
        }
    }
}

/// Identity metadata a handler reports about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandlerIdentity {
    /// Stable handler id (e.g. `"openai:gpt-image-1"`).
    pub id: String,
    /// Provider family.
    pub provider: String,
    /// Handler/SDK version, when known.
    pub version: Option<String>,
}

/// Runtime handed to [`Handler::warm_start`].
#[derive(Debug, Clone, Default)]
pub struct WarmStartRuntime {
    /// Environment variables the handler may read (API keys are resolved
    /// by the handler's environment, never by the engine).
    pub environment: BTreeMap<String, String>,
}

/// Extras carried alongside a provider call.
#[derive(Debug, Clone)]
pub struct ProviderExtras {
    /// The prepared per-job input view.
    pub resolved_inputs: PreparedContext,
    /// The job's expansion context.
    pub job_context: JobContext,
    /// Declared handler schemas.
    pub schema: JobSchemas,
    /// Gated input name → whether its condition held.
    pub condition_hints: BTreeMap<String, bool>,
}

/// Provider-facing call context.
#[derive(Debug, Clone)]
pub struct ProviderCallContext {
    /// Provider-specific configuration (from the producer's config
    /// inputs).
    pub provider_config: serde_json::Value,
    /// Environment variables for the call.
    pub environment: BTreeMap<String, String>,
    /// Engine-supplied extras.
    pub extras: ProviderExtras,
}

/// Everything a handler receives for one invocation.
#[derive(Debug, Clone)]
pub struct ProviderJobContext {
    /// Canonical job id.
    pub job_id: String,
    /// Provider family.
    pub provider: String,
    /// Model identifier.
    pub model: String,
    /// Revision the run targets.
    pub revision: RevisionId,
    /// Plan-relative layer index.
    pub layer_index: usize,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Canonical ids the job consumes.
    pub inputs: Vec<String>,
    /// Canonical ids the job must produce.
    pub produces: Vec<String>,
    /// Call context.
    pub context: ProviderCallContext,
}

/// Status of a provider response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderResponseStatus {
    /// All requested artifacts were produced.
    Succeeded,
    /// The call failed.
    Failed,
}

/// One artifact in a provider response.
#[derive(Debug, Clone)]
pub struct ProviderArtifact {
    /// Canonical artifact id.
    pub artifact_id: String,
    /// Outcome for this artifact.
    pub status: ArtifactStatus,
    /// Blob-backed output.
    pub blob: Option<BlobRef>,
    /// Inlined small output.
    pub inline: Option<serde_json::Value>,
    /// Diagnostics for failures.
    pub diagnostics: Option<Diagnostics>,
}

impl ProviderArtifact {
    /// A succeeded inline artifact.
    #[must_use]
    pub fn inline(artifact_id: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            status: ArtifactStatus::Succeeded,
            blob: None,
            inline: Some(value),
            diagnostics: None,
        }
    }

    /// A succeeded blob-backed artifact.
    #[must_use]
    pub fn blob(artifact_id: impl Into<String>, blob: BlobRef) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            status: ArtifactStatus::Succeeded,
            blob: Some(blob),
            inline: None,
            diagnostics: None,
        }
    }
}

/// A handler's answer.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    /// Overall status.
    pub status: ProviderResponseStatus,
    /// Per-artifact outcomes.
    pub artifacts: Vec<ProviderArtifact>,
    /// Call-level diagnostics.
    pub diagnostics: Option<Diagnostics>,
}

impl ProviderResponse {
    /// A successful response with the given artifacts.
    #[must_use]
    pub fn succeeded(artifacts: Vec<ProviderArtifact>) -> Self {
        Self {
            status: ProviderResponseStatus::Succeeded,
            artifacts,
            diagnostics: None,
        }
    }
}

/// A provider handler: one model family behind one interface.
///
/// Transient failures (timeouts, 5xx, quota) should surface as
/// [`rf_error::EngineError`]s with `ProviderTransient`; the runner retries
/// those and treats everything unclassified as permanent.
#[async_trait]
pub trait Handler: Send + Sync + std::fmt::Debug {
    /// Identity metadata for this handler.
    fn identity(&self) -> HandlerIdentity;

    /// Execute one job.
    async fn invoke(&self, ctx: ProviderJobContext) -> anyhow::Result<ProviderResponse>;

    /// Optional eager initialisation (key fetch, client construction).
    async fn warm_start(&self, _runtime: &WarmStartRuntime) -> anyhow::Result<()> {
        Ok(())
    }
}
