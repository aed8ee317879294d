// SPDX-License-Identifier: MIT OR Apache-2.0
//! A deterministic mock handler.
//!
//! Echoes its inputs into inline artifacts, optionally fails the first N
//! attempts per job (transient) or every attempt (permanent), and records
//! invocations so tests can assert dispatch behavior.

use crate::{
    Handler, HandlerIdentity, ProviderArtifact, ProviderJobContext, ProviderResponse,
    WarmStartRuntime,
};
use async_trait::async_trait;
use rf_error::{EngineError, ErrorCode};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Scriptable in-process handler.
#[derive(Debug, Default)]
pub struct MockHandler {
    id: String,
    /// job id → number of leading attempts that fail transiently.
    transient_failures: BTreeMap<String, u32>,
    /// job ids that always fail permanently.
    permanent_failures: Vec<String>,
    fail_warm_start: bool,
    warmed: AtomicBool,
    invocations: Mutex<Vec<String>>,
}

impl MockHandler {
    /// Create a mock with the given identity id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Fail the first `attempts` attempts of `job_id` with a transient
    /// error.
    #[must_use]
    pub fn with_transient_failures(mut self, job_id: impl Into<String>, attempts: u32) -> Self {
        self.transient_failures.insert(job_id.into(), attempts);
        self
    }

    /// Fail every attempt of `job_id` permanently.
    #[must_use]
    pub fn with_permanent_failure(mut self, job_id: impl Into<String>) -> Self {
        self.permanent_failures.push(job_id.into());
        self
    }

    /// Make `warm_start` fail.
    #[must_use]
    pub fn failing_warm_start(mut self) -> Self {
        self.fail_warm_start = true;
        self
    }

    /// Whether `warm_start` ran.
    #[must_use]
    pub fn is_warmed(&self) -> bool {
        self.warmed.load(Ordering::SeqCst)
    }

    /// Job ids invoked so far, in order.
    #[must_use]
    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().expect("invocations lock").clone()
    }
}

#[async_trait]
impl Handler for MockHandler {
    fn identity(&self) -> HandlerIdentity {
        HandlerIdentity {
            id: self.id.clone(),
            provider: "mock".into(),
            version: Some("0.0.0".into()),
        }
    }

    async fn invoke(&self, ctx: ProviderJobContext) -> anyhow::Result<ProviderResponse> {
        self.invocations
            .lock()
            .expect("invocations lock")
            .push(ctx.job_id.clone());

        if self.permanent_failures.contains(&ctx.job_id) {
            return Err(EngineError::new(
                ErrorCode::ProviderPermanent,
                "mock permanent failure",
            )
            .with_context("job", &ctx.job_id)
            .into());
        }
        if let Some(&failures) = self.transient_failures.get(&ctx.job_id) {
            if ctx.attempt <= failures {
                return Err(EngineError::new(
                    ErrorCode::ProviderTransient,
                    "mock transient failure",
                )
                .with_context("job", &ctx.job_id)
                .with_context("attempt", ctx.attempt)
                .into());
            }
        }

        let artifacts = ctx
            .produces
            .iter()
            .map(|artifact_id| {
                ProviderArtifact::inline(
                    artifact_id,
                    json!({
                        "artifact": artifact_id,
                        "model": ctx.model,
                        "handler": self.id,
                        "inputs": ctx.inputs,
                    }),
                )
            })
            .collect();
        Ok(ProviderResponse::succeeded(artifacts))
    }

    async fn warm_start(&self, _runtime: &WarmStartRuntime) -> anyhow::Result<()> {
        if self.fail_warm_start {
            anyhow::bail!("mock warm start failure");
        }
        self.warmed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
