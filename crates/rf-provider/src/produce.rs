// SPDX-License-Identifier: MIT OR Apache-2.0
//! Adapter from the runner's `Produce` seam into the handler registry.

use crate::{HandlerRegistry, ProviderCallContext, ProviderExtras, ProviderJobContext,
    ProviderResponseStatus,
};
use async_trait::async_trait;
use rf_core::{ArtifactOutput, JobSchemas};
use rf_runner::{Produce, ProduceRequest, ProduceResult, ProduceStatus, ProducedArtifact};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Dispatches produce requests into a [`HandlerRegistry`].
pub struct RegistryProduce {
    registry: Arc<HandlerRegistry>,
    environment_name: Option<String>,
    environment: BTreeMap<String, String>,
}

impl RegistryProduce {
    /// Create an adapter over the registry.
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            environment_name: None,
            environment: BTreeMap::new(),
        }
    }

    /// Resolve handlers against a named environment (`prod`, `dev`, …).
    #[must_use]
    pub fn with_environment(mut self, name: impl Into<String>) -> Self {
        self.environment_name = Some(name.into());
        self
    }

    /// Environment variables handed to every call.
    #[must_use]
    pub fn with_env_vars(mut self, vars: BTreeMap<String, String>) -> Self {
        self.environment = vars;
        self
    }
}

#[async_trait]
impl Produce for RegistryProduce {
    async fn produce(&self, request: ProduceRequest) -> anyhow::Result<ProduceResult> {
        let job = &request.job;
        let handler = self
            .registry
            .resolve(
                &job.provider,
                &job.provider_model,
                self.environment_name.as_deref(),
            )
            .map_err(|e| {
                rf_error::EngineError::new(e.code(), e.to_string())
                    .with_context("provider", &job.provider)
                    .with_context("model", &job.provider_model)
            })?;

        // Provider SDKs may use their own field names; alias the resolved
        // inputs accordingly without dropping the logical names.
        let mut resolved_inputs = request.context.clone();
        if let Some(mapping) = &job.context.sdk_mapping {
            for (field, logical) in mapping {
                if let Some(value) = request.context.get(logical) {
                    resolved_inputs.values.insert(field.clone(), value.clone());
                }
            }
        }

        let condition_hints: BTreeMap<String, bool> = job
            .context
            .input_conditions
            .iter()
            .map(|(gated, condition)| {
                let value = request.context.value(&condition.input);
                (gated.clone(), condition.evaluate(value))
            })
            .collect();

        // Producer-scoped config values travel as the provider config.
        let provider_config = serde_json::Value::Object(
            job.context
                .input_bindings
                .keys()
                .filter_map(|name| {
                    request
                        .context
                        .value(name)
                        .map(|v| (name.clone(), v.clone()))
                })
                .collect(),
        );

        let ctx = ProviderJobContext {
            job_id: job.job_id.clone(),
            provider: job.provider.clone(),
            model: job.provider_model.clone(),
            revision: request.revision.clone(),
            layer_index: request.layer_index,
            attempt: request.attempt,
            inputs: job.inputs.clone(),
            produces: job.produces.clone(),
            context: ProviderCallContext {
                provider_config,
                environment: self.environment.clone(),
                extras: ProviderExtras {
                    resolved_inputs,
                    job_context: job.context.clone(),
                    schema: JobSchemas {
                        input: job.context.schema.input.clone(),
                        output: job.context.schema.output.clone(),
                    },
                    condition_hints,
                },
            },
        };

        debug!(
            target: "rf.provider",
            job = %job.job_id,
            handler = %handler.identity().id,
            attempt = request.attempt,
            "dispatching to handler"
        );
        let response = handler.invoke(ctx).await?;

        let status = match response.status {
            ProviderResponseStatus::Succeeded => ProduceStatus::Succeeded,
            ProviderResponseStatus::Failed => ProduceStatus::Failed,
        };
        let artifacts = response
            .artifacts
            .into_iter()
            .map(|artifact| {
                let output = match (artifact.blob, artifact.inline) {
                    (Some(blob), _) => Some(ArtifactOutput::Blob { blob }),
                    (None, Some(value)) => Some(ArtifactOutput::Inline(value)),
                    (None, None) => None,
                };
                ProducedArtifact {
                    artifact_id: artifact.artifact_id,
                    status: artifact.status,
                    output,
                    diagnostics: artifact.diagnostics,
                }
            })
            .collect();

        Ok(ProduceResult {
            status,
            artifacts,
            diagnostics: response.diagnostics,
        })
    }
}

impl std::fmt::Debug for RegistryProduce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryProduce")
            .field("environment_name", &self.environment_name)
            .finish_non_exhaustive()
    }
}
