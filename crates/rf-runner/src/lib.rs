// SPDX-License-Identifier: MIT OR Apache-2.0
//! rf-runner
//!
//! Executes an [`ExecutionPlan`] layer by layer with bounded concurrency.
//!
//! Responsibilities:
//! - per-layer worker pools with a strict barrier between layers
//! - per-`rate_key` in-flight budgets and optional deadlines
//! - bounded-exponential retries for retriable failures
//! - condition-based skipping without calling the provider
//! - descendant skipping below failed jobs
//! - event-log recording and an in-memory manifest overlay
//!
//! The single extension point is [`Produce`]: the runner calls it once per
//! job attempt; in production it dispatches into the provider registry, in
//! tests it is a mock.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Cancellation primitives.
pub mod cancel;
/// Per-job context preparation.
pub mod context;
/// Per-key rate limiting.
pub mod limit;
/// Retry policy.
pub mod retry;

pub use cancel::CancellationToken;
pub use context::{prepare_job_context, ContextError, OutputLookup, PreparedContext, ResolvedInput};
pub use limit::{RateLimit, RateLimiter};
pub use retry::{RetryPolicy, RetryPolicyBuilder};

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use rf_blueprint::ResolvedInputs;
use rf_core::{
    hash_artifact_output, hash_payload, payload_digest, ArtifactEvent, ArtifactOutput,
    ArtifactStatus, ContractError, Diagnostics, ExecutionPlan, JobDescriptor, JobStatus, Manifest,
    ManifestArtifact, ManifestInput, RevisionId, SkipReason, TimelineEntry,
};
use rf_error::{EngineError, ErrorCode};
use rf_eventlog::{EventLog, EventLogError};
use rf_manifest::ManifestService;
use rf_storage::StorageContext;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Errors that abort a run before or between jobs (I/O, never job
/// failures — those are recorded per job).
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The event log failed.
    #[error(transparent)]
    EventLog(#[from] EventLogError),

    /// Serialization failed.
    #[error("failed to serialize: {0}")]
    Contract(#[from] ContractError),
}

impl RunnerError {
    /// Map to the stable engine error code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::EventLog(e) => e.code(),
            Self::Contract(e) => e.code(),
        }
    }
}

// ---------------------------------------------------------------------------
// Produce contract
// ---------------------------------------------------------------------------

/// Everything a producer call needs.
#[derive(Debug, Clone)]
pub struct ProduceRequest {
    /// Movie being built.
    pub movie_id: String,
    /// Revision the run targets.
    pub revision: RevisionId,
    /// Plan-relative layer index.
    pub layer_index: usize,
    /// 1-based attempt number.
    pub attempt: u32,
    /// The job being executed.
    pub job: JobDescriptor,
    /// Resolved per-job input view.
    pub context: PreparedContext,
}

/// Terminal status of one produce call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProduceStatus {
    /// Outputs were produced.
    Succeeded,
    /// The call failed; diagnostics say why.
    Failed,
}

/// One produced artifact.
#[derive(Debug, Clone)]
pub struct ProducedArtifact {
    /// Canonical artifact id.
    pub artifact_id: String,
    /// Outcome for this artifact.
    pub status: ArtifactStatus,
    /// The output envelope for succeeded artifacts.
    pub output: Option<ArtifactOutput>,
    /// Structured diagnostics for failed artifacts.
    pub diagnostics: Option<Diagnostics>,
}

/// Result of one produce call.
#[derive(Debug, Clone)]
pub struct ProduceResult {
    /// Overall call status.
    pub status: ProduceStatus,
    /// Per-artifact outcomes.
    pub artifacts: Vec<ProducedArtifact>,
    /// Call-level diagnostics.
    pub diagnostics: Option<Diagnostics>,
}

impl ProduceResult {
    /// A successful result carrying the given outputs.
    #[must_use]
    pub fn succeeded(artifacts: Vec<ProducedArtifact>) -> Self {
        Self {
            status: ProduceStatus::Succeeded,
            artifacts,
            diagnostics: None,
        }
    }
}

/// The runner's single extension point: produce one job's outputs.
///
/// Transient failures should be surfaced as [`EngineError`]s with a
/// retriable [`ErrorCode`] — the runner downcasts the anyhow chain to
/// classify; anything unclassified is treated as permanent.
#[async_trait]
pub trait Produce: Send + Sync {
    /// Execute one job attempt.
    async fn produce(&self, request: ProduceRequest) -> anyhow::Result<ProduceResult>;
}

// ---------------------------------------------------------------------------
// Run configuration and results
// ---------------------------------------------------------------------------

/// Services and state a run executes against.
#[derive(Clone)]
pub struct RunContext {
    /// Movie being built.
    pub movie_id: String,
    /// Manifest the plan was computed against, if any.
    pub base_manifest: Option<Manifest>,
    /// Blob/JSON storage.
    pub storage: StorageContext,
    /// Append-only event log.
    pub event_log: EventLog,
    /// Manifest snapshot service.
    pub manifest_service: ManifestService,
    /// Root input values.
    pub resolved_inputs: ResolvedInputs,
    /// The produce dispatcher.
    pub produce: Arc<dyn Produce>,
}

/// Tunables for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Worker cap per layer (the effective pool is
    /// `min(concurrency, layer_size)`).
    pub concurrency: usize,
    /// Retry policy for retriable failures.
    pub retry: RetryPolicy,
    /// Per-rate-key budgets.
    pub rate_limits: BTreeMap<String, RateLimit>,
    /// Cooperative cancellation.
    pub cancel: CancellationToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            retry: RetryPolicy::default(),
            rate_limits: BTreeMap::new(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every job succeeded or was skipped by its conditions.
    Succeeded,
    /// Some jobs failed; the run itself completed.
    Partial,
    /// The run could not execute (planning or graph error upstream).
    Failed,
}

/// Outcome of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    /// Canonical job id.
    pub job_id: String,
    /// Producer alias.
    pub producer: String,
    /// Terminal status.
    pub status: JobStatus,
    /// Attempts consumed (0 when never dispatched).
    pub attempts: u32,
    /// Why the job was skipped, when it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    /// Diagnostics for failed/skipped jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Diagnostics>,
}

/// Progress events streamed during a run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// The run began.
    RunStarted {
        /// Run identifier.
        run_id: Uuid,
        /// Jobs in the plan.
        job_count: usize,
    },
    /// A layer began.
    LayerStarted {
        /// Plan-relative layer index.
        layer: usize,
        /// Jobs in the layer.
        jobs: usize,
    },
    /// A job attempt began.
    JobStarted {
        /// Canonical job id.
        job_id: String,
        /// 1-based attempt.
        attempt: u32,
    },
    /// A job reached a terminal state.
    JobFinished {
        /// Canonical job id.
        job_id: String,
        /// Terminal status.
        status: JobStatus,
    },
    /// A layer drained.
    LayerFinished {
        /// Plan-relative layer index.
        layer: usize,
    },
    /// The run reached a terminal state.
    RunFinished {
        /// Overall status.
        status: RunStatus,
    },
}

/// Result of a run, plus everything needed to materialise the new
/// manifest.
#[derive(Debug)]
pub struct RunResult {
    /// Run identifier.
    pub run_id: Uuid,
    /// Overall status.
    pub status: RunStatus,
    /// Revision the run targeted.
    pub revision: RevisionId,
    /// Per-job outcomes, in completion order.
    pub jobs: Vec<JobReport>,
    base_manifest: Option<Manifest>,
    input_hashes: BTreeMap<String, String>,
    produced: BTreeMap<String, (ArtifactOutput, String)>,
}

impl RunResult {
    /// Materialise a new manifest snapshot reflecting all succeeded
    /// outputs, preserving unchanged entries from the base manifest.
    /// Skipped and failed outputs are omitted.
    ///
    /// # Errors
    ///
    /// Returns a contract error if an output fails to serialize.
    pub fn build_manifest(&self) -> Result<Manifest, ContractError> {
        let now = Utc::now();
        let mut manifest = match &self.base_manifest {
            Some(base) => {
                let mut m = base.clone();
                m.base_revision = Some(base.revision.clone());
                m.revision = self.revision.clone();
                m.created_at = now;
                m
            }
            None => Manifest::new(self.revision.clone(), None),
        };

        manifest.inputs = self
            .input_hashes
            .iter()
            .map(|(id, hash)| {
                (
                    id.clone(),
                    ManifestInput {
                        payload_digest: payload_digest(hash),
                        hash: hash.clone(),
                        created_at: now,
                    },
                )
            })
            .collect();

        for (artifact_id, (output, job_id)) in &self.produced {
            manifest.artifacts.insert(
                artifact_id.clone(),
                ManifestArtifact {
                    hash: hash_artifact_output(output)?,
                    produced_by: job_id.clone(),
                    status: ArtifactStatus::Succeeded,
                    created_at: now,
                },
            );
        }

        manifest.timeline.push(TimelineEntry {
            revision: self.revision.clone(),
            created_at: now,
        });

        Ok(manifest)
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

struct RunState {
    outputs: BTreeMap<String, ArtifactOutput>,
    poisoned: BTreeSet<String>,
    produced: BTreeMap<String, (ArtifactOutput, String)>,
    reports: Vec<JobReport>,
    failed_jobs: usize,
}

struct Shared<'a> {
    ctx: &'a RunContext,
    opts: &'a RunOptions,
    revision: RevisionId,
    limiter: RateLimiter,
    input_hashes: BTreeMap<String, String>,
    state: Mutex<RunState>,
    log_guard: Mutex<()>,
    progress: Option<mpsc::Sender<RunEvent>>,
}

impl Shared<'_> {
    async fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(event).await;
        }
    }
}

/// Executes plans.
#[derive(Debug, Default)]
pub struct Runner {
    progress: Option<mpsc::Sender<RunEvent>>,
}

impl Runner {
    /// Create a runner without a progress channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a progress channel; every [`RunEvent`] is sent best-effort.
    #[must_use]
    pub fn with_progress(mut self, tx: mpsc::Sender<RunEvent>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Execute a plan.
    ///
    /// Failure of a job lets its layer peers finish; descendants of failed
    /// jobs are recorded as skipped with reason `upstream_failed`. The
    /// returned result reflects every job in the plan.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError`] only for infrastructure failures (event log,
    /// serialization); job failures surface in the result instead.
    pub async fn run(
        &self,
        plan: &ExecutionPlan,
        ctx: &RunContext,
        opts: &RunOptions,
    ) -> Result<RunResult, RunnerError> {
        let run_id = Uuid::new_v4();
        let input_hashes = ctx.resolved_inputs.hashes()?;

        // Outputs of prior runs, for jobs whose upstream is not re-run.
        let mut prior: BTreeMap<String, ArtifactOutput> = BTreeMap::new();
        let mut prior_revisions: BTreeMap<String, RevisionId> = BTreeMap::new();
        for event in ctx.event_log.load_artifacts(&ctx.movie_id, None)? {
            if event.status != ArtifactStatus::Succeeded {
                continue;
            }
            let Some(output) = event.output else { continue };
            if prior_revisions
                .get(&event.artifact_id)
                .is_some_and(|known| *known > event.revision)
            {
                continue;
            }
            prior_revisions.insert(event.artifact_id.clone(), event.revision);
            prior.insert(event.artifact_id, output);
        }

        let shared = Shared {
            ctx,
            opts,
            revision: plan.revision.clone(),
            limiter: RateLimiter::new(opts.rate_limits.clone()),
            input_hashes,
            state: Mutex::new(RunState {
                outputs: prior,
                poisoned: BTreeSet::new(),
                produced: BTreeMap::new(),
                reports: Vec::new(),
                failed_jobs: 0,
            }),
            log_guard: Mutex::new(()),
            progress: self.progress.clone(),
        };

        info!(
            target: "rf.runner",
            movie = %ctx.movie_id,
            %run_id,
            revision = %plan.revision,
            layers = plan.layers.len(),
            jobs = plan.job_count(),
            "run started"
        );
        shared
            .emit(RunEvent::RunStarted {
                run_id,
                job_count: plan.job_count(),
            })
            .await;

        for (layer_index, layer) in plan.layers.iter().enumerate() {
            let workers = opts.concurrency.max(1).min(layer.len().max(1));
            debug!(target: "rf.runner", layer = layer_index, jobs = layer.len(), workers, "layer started");
            shared
                .emit(RunEvent::LayerStarted {
                    layer: layer_index,
                    jobs: layer.len(),
                })
                .await;

            // The layer barrier: every worker drains before the next layer
            // starts.
            futures::stream::iter(layer.iter())
                .for_each_concurrent(workers, |job| run_job(job, layer_index, &shared))
                .await;

            shared.emit(RunEvent::LayerFinished { layer: layer_index }).await;
        }

        let (status, failed_jobs) = {
            let state = shared.state.lock().await;
            let status = if state.failed_jobs > 0 {
                RunStatus::Partial
            } else {
                RunStatus::Succeeded
            };
            (status, state.failed_jobs)
        };
        shared.emit(RunEvent::RunFinished { status }).await;
        info!(
            target: "rf.runner",
            movie = %ctx.movie_id,
            %run_id,
            ?status,
            failed = failed_jobs,
            "run finished"
        );

        let state = shared.state.into_inner();
        Ok(RunResult {
            run_id,
            status,
            revision: plan.revision.clone(),
            jobs: state.reports,
            base_manifest: ctx.base_manifest.clone(),
            input_hashes: shared.input_hashes,
            produced: state.produced,
        })
    }
}

// ---------------------------------------------------------------------------
// Per-job execution
// ---------------------------------------------------------------------------

async fn run_job(job: &JobDescriptor, layer_index: usize, shared: &Shared<'_>) {
    if shared.opts.cancel.is_cancelled() {
        // Cancelled before dispatch: the job stays queued and nothing is
        // recorded.
        push_report(
            shared,
            JobReport {
                job_id: job.job_id.clone(),
                producer: job.producer.clone(),
                status: JobStatus::Queued,
                attempts: 0,
                skip_reason: Some(SkipReason::Cancelled),
                diagnostics: None,
            },
        )
        .await;
        return;
    }

    // Upstream failure check plus the output snapshot for this job's
    // inputs, taken under one lock.
    let (poisoned_input, local_outputs) = {
        let state = shared.state.lock().await;
        let poisoned = job
            .inputs
            .iter()
            .find(|id| state.poisoned.contains(*id))
            .cloned();
        let local: BTreeMap<String, ArtifactOutput> = job
            .inputs
            .iter()
            .filter_map(|id| state.outputs.get(id).map(|o| (id.clone(), o.clone())))
            .collect();
        (poisoned, local)
    };

    if let Some(input) = poisoned_input {
        skip_job(
            shared,
            job,
            SkipReason::UpstreamFailed,
            Diagnostics {
                code: Some(ErrorCode::UpstreamFailed.as_str().to_string()),
                message: format!("upstream artifact {input} was not produced"),
                context: BTreeMap::new(),
            },
            true,
        )
        .await;
        return;
    }

    let prepared = match prepare_job_context(
        job,
        &shared.ctx.resolved_inputs,
        &local_outputs,
        &shared.ctx.storage,
        &shared.ctx.movie_id,
    ) {
        Ok(p) => p,
        Err(e) => {
            fail_job(
                shared,
                job,
                1,
                Diagnostics {
                    code: Some(e.code().as_str().to_string()),
                    message: e.to_string(),
                    context: BTreeMap::new(),
                },
                &local_outputs,
            )
            .await;
            return;
        }
    };

    // Condition evaluation happens before any provider call.
    let mut prepared = prepared;
    for (gated, condition) in &job.context.input_conditions {
        let value = condition_value(&prepared, job, &condition.input);
        if condition.evaluate(value.as_ref()) {
            continue;
        }
        if condition.required {
            debug!(target: "rf.runner", job = %job.job_id, input = %condition.input, "condition false; skipping");
            skip_job(
                shared,
                job,
                SkipReason::ConditionFalse,
                Diagnostics {
                    code: Some(ErrorCode::ConditionFalse.as_str().to_string()),
                    message: format!("condition on '{}' evaluated false", condition.input),
                    context: BTreeMap::new(),
                },
                false,
            )
            .await;
            return;
        }
        prepared.remove(gated);
    }

    dispatch_with_retries(shared, job, layer_index, prepared, &local_outputs).await;
}

/// The value a condition tests. When the tested value is a collection and
/// the job carries exactly one dimension index, the element at that index
/// is tested — that is what per-segment gating means for fan-out jobs.
fn condition_value(
    prepared: &PreparedContext,
    job: &JobDescriptor,
    input: &str,
) -> Option<serde_json::Value> {
    let value = prepared.value(input)?;
    if let serde_json::Value::Array(items) = value {
        if job.context.indices.len() == 1 {
            let index = *job.context.indices.values().next().unwrap_or(&0);
            return items.get(index).cloned();
        }
    }
    Some(value.clone())
}

async fn dispatch_with_retries(
    shared: &Shared<'_>,
    job: &JobDescriptor,
    layer_index: usize,
    prepared: PreparedContext,
    local_outputs: &BTreeMap<String, ArtifactOutput>,
) {
    let inputs_hash = job_inputs_hash(shared, job, local_outputs);
    let deadline = shared.limiter.deadline(&job.rate_key);
    let mut attempt: u32 = 1;

    loop {
        shared
            .emit(RunEvent::JobStarted {
                job_id: job.job_id.clone(),
                attempt,
            })
            .await;

        let request = ProduceRequest {
            movie_id: shared.ctx.movie_id.clone(),
            revision: shared.revision.clone(),
            layer_index,
            attempt,
            job: job.clone(),
            context: prepared.clone(),
        };

        // At most one attempt per job is in flight; the permit spans the
        // provider call only.
        let permit = shared.limiter.acquire(&job.rate_key).await;
        let outcome = match deadline {
            Some(d) => match tokio::time::timeout(d, shared.ctx.produce.produce(request)).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::new(
                    ErrorCode::ProviderTransient,
                    format!("deadline of {d:?} expired"),
                )
                .with_context("rate_key", &job.rate_key)
                .into()),
            },
            None => shared.ctx.produce.produce(request).await,
        };
        drop(permit);

        match outcome {
            Ok(result) => {
                record_result(shared, job, attempt, &inputs_hash, result).await;
                return;
            }
            Err(error) => {
                let code = error
                    .downcast_ref::<EngineError>()
                    .map_or(ErrorCode::ProviderPermanent, |e| e.code);
                let retriable = code.is_retriable()
                    && shared.opts.retry.allows_retry(attempt)
                    && !shared.opts.cancel.is_cancelled();
                warn!(
                    target: "rf.runner",
                    job = %job.job_id,
                    attempt,
                    %code,
                    retriable,
                    error = %error,
                    "produce attempt failed"
                );
                if !retriable {
                    let mut diagnostics = Diagnostics {
                        code: Some(code.as_str().to_string()),
                        message: error.to_string(),
                        context: BTreeMap::new(),
                    };
                    if let Some(engine) = error.downcast_ref::<EngineError>() {
                        diagnostics.context = engine.context.clone();
                    }
                    fail_job(shared, job, attempt, diagnostics, local_outputs).await;
                    return;
                }
                let delay = shared.opts.retry.delay_for(attempt);
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = shared.opts.cancel.cancelled() => {}
                }
                attempt += 1;
            }
        }
    }
}

fn job_inputs_hash(
    shared: &Shared<'_>,
    job: &JobDescriptor,
    local_outputs: &BTreeMap<String, ArtifactOutput>,
) -> String {
    let mut parts: BTreeMap<&str, String> = BTreeMap::new();
    for id in &job.inputs {
        if let Some(hash) = shared.input_hashes.get(id) {
            parts.insert(id, hash.clone());
        } else if let Some(output) = local_outputs.get(id) {
            if let Ok(hash) = hash_artifact_output(output) {
                parts.insert(id, hash);
            }
        }
    }
    hash_payload(&parts).map(|h| h.hash).unwrap_or_default()
}

async fn record_result(
    shared: &Shared<'_>,
    job: &JobDescriptor,
    attempt: u32,
    inputs_hash: &str,
    result: ProduceResult,
) {
    if result.status == ProduceStatus::Failed {
        let diagnostics = result.diagnostics.unwrap_or_else(|| Diagnostics {
            code: Some(ErrorCode::ProviderPermanent.as_str().to_string()),
            message: "provider reported failure".into(),
            context: BTreeMap::new(),
        });
        fail_job_with_hash(shared, job, attempt, diagnostics, inputs_hash).await;
        return;
    }

    // Every declared output must come back succeeded; a missing output
    // field is a permanent provider failure.
    let by_id: BTreeMap<&str, &ProducedArtifact> = result
        .artifacts
        .iter()
        .map(|a| (a.artifact_id.as_str(), a))
        .collect();
    for expected in &job.produces {
        let ok = by_id
            .get(expected.as_str())
            .is_some_and(|a| a.status == ArtifactStatus::Succeeded && a.output.is_some());
        if !ok {
            fail_job_with_hash(
                shared,
                job,
                attempt,
                Diagnostics {
                    code: Some(ErrorCode::ProviderPermanent.as_str().to_string()),
                    message: format!("provider response is missing output {expected}"),
                    context: BTreeMap::new(),
                },
                inputs_hash,
            )
            .await;
            return;
        }
    }

    let now = Utc::now();
    {
        let _guard = shared.log_guard.lock().await;
        for artifact in &result.artifacts {
            let event = ArtifactEvent {
                artifact_id: artifact.artifact_id.clone(),
                revision: shared.revision.clone(),
                inputs_hash: inputs_hash.to_string(),
                output: artifact.output.clone(),
                status: artifact.status,
                skip_reason: None,
                produced_by: job.job_id.clone(),
                created_at: now,
                diagnostics: artifact.diagnostics.clone(),
            };
            if let Err(e) = shared.ctx.event_log.append_artifact(&shared.ctx.movie_id, &event) {
                warn!(target: "rf.runner", job = %job.job_id, error = %e, "failed to record artifact event");
            }
        }
    }

    {
        let mut state = shared.state.lock().await;
        for artifact in &result.artifacts {
            if artifact.status == ArtifactStatus::Succeeded {
                if let Some(output) = &artifact.output {
                    state
                        .outputs
                        .insert(artifact.artifact_id.clone(), output.clone());
                    state.produced.insert(
                        artifact.artifact_id.clone(),
                        (output.clone(), job.job_id.clone()),
                    );
                }
            }
        }
        state.reports.push(JobReport {
            job_id: job.job_id.clone(),
            producer: job.producer.clone(),
            status: JobStatus::Succeeded,
            attempts: attempt,
            skip_reason: None,
            diagnostics: None,
        });
    }
    shared
        .emit(RunEvent::JobFinished {
            job_id: job.job_id.clone(),
            status: JobStatus::Succeeded,
        })
        .await;
}

async fn skip_job(
    shared: &Shared<'_>,
    job: &JobDescriptor,
    reason: SkipReason,
    diagnostics: Diagnostics,
    poison: bool,
) {
    let now = Utc::now();
    {
        let _guard = shared.log_guard.lock().await;
        for artifact_id in &job.produces {
            let event = ArtifactEvent {
                artifact_id: artifact_id.clone(),
                revision: shared.revision.clone(),
                inputs_hash: String::new(),
                output: None,
                status: ArtifactStatus::Skipped,
                skip_reason: Some(reason),
                produced_by: job.job_id.clone(),
                created_at: now,
                diagnostics: Some(diagnostics.clone()),
            };
            if let Err(e) = shared.ctx.event_log.append_artifact(&shared.ctx.movie_id, &event) {
                warn!(target: "rf.runner", job = %job.job_id, error = %e, "failed to record skip event");
            }
        }
    }

    {
        let mut state = shared.state.lock().await;
        if poison {
            for artifact_id in &job.produces {
                state.poisoned.insert(artifact_id.clone());
            }
        }
        state.reports.push(JobReport {
            job_id: job.job_id.clone(),
            producer: job.producer.clone(),
            status: JobStatus::Skipped,
            attempts: 0,
            skip_reason: Some(reason),
            diagnostics: Some(diagnostics),
        });
    }
    shared
        .emit(RunEvent::JobFinished {
            job_id: job.job_id.clone(),
            status: JobStatus::Skipped,
        })
        .await;
}

async fn fail_job(
    shared: &Shared<'_>,
    job: &JobDescriptor,
    attempts: u32,
    diagnostics: Diagnostics,
    local_outputs: &BTreeMap<String, ArtifactOutput>,
) {
    let inputs_hash = job_inputs_hash(shared, job, local_outputs);
    fail_job_with_hash(shared, job, attempts, diagnostics, &inputs_hash).await;
}

async fn fail_job_with_hash(
    shared: &Shared<'_>,
    job: &JobDescriptor,
    attempts: u32,
    diagnostics: Diagnostics,
    inputs_hash: &str,
) {
    let now = Utc::now();
    {
        let _guard = shared.log_guard.lock().await;
        for artifact_id in &job.produces {
            let event = ArtifactEvent {
                artifact_id: artifact_id.clone(),
                revision: shared.revision.clone(),
                inputs_hash: inputs_hash.to_string(),
                output: None,
                status: ArtifactStatus::Failed,
                skip_reason: None,
                produced_by: job.job_id.clone(),
                created_at: now,
                diagnostics: Some(diagnostics.clone()),
            };
            if let Err(e) = shared.ctx.event_log.append_artifact(&shared.ctx.movie_id, &event) {
                warn!(target: "rf.runner", job = %job.job_id, error = %e, "failed to record failure event");
            }
        }
    }

    {
        let mut state = shared.state.lock().await;
        for artifact_id in &job.produces {
            state.poisoned.insert(artifact_id.clone());
        }
        state.failed_jobs += 1;
        state.reports.push(JobReport {
            job_id: job.job_id.clone(),
            producer: job.producer.clone(),
            status: JobStatus::Failed,
            attempts,
            skip_reason: None,
            diagnostics: Some(diagnostics),
        });
    }
    shared
        .emit(RunEvent::JobFinished {
            job_id: job.job_id.clone(),
            status: JobStatus::Failed,
        })
        .await;
}

async fn push_report(shared: &Shared<'_>, report: JobReport) {
    let status = report.status;
    let job_id = report.job_id.clone();
    shared.state.lock().await.reports.push(report);
    shared.emit(RunEvent::JobFinished { job_id, status }).await;
}
