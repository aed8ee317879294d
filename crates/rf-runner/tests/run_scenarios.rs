// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end runner scenarios against an in-process mock producer.

use async_trait::async_trait;
use chrono::Utc;
use rf_blueprint::{
    Blueprint, ConditionDecl, ConditionOpDecl, InputsDocument, ProducerDecl, ResolvedInputs,
};
use rf_core::{
    ArtifactOutput, ArtifactStatus, ExecutionPlan, JobStatus, RevisionId, SkipReason,
};
use rf_error::{EngineError, ErrorCode};
use rf_eventlog::EventLog;
use rf_graph::{GraphBuilder, ProducerGraph};
use rf_manifest::ManifestService;
use rf_runner::{
    CancellationToken, Produce, ProduceRequest, ProduceResult, ProducedArtifact, ResolvedInput,
    RetryPolicy, RunContext, RunOptions, RunStatus, Runner,
};
use rf_storage::{LocalStorage, StorageContext};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// -- harness ----------------------------------------------------------------

struct Invocation {
    job_id: String,
    attempt: u32,
}

#[derive(Default)]
struct MockProduce {
    /// job_id → number of leading attempts that fail transiently.
    transient_failures: BTreeMap<String, u32>,
    /// job ids that always fail permanently.
    permanent_failures: Vec<String>,
    invocations: Mutex<Vec<Invocation>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockProduce {
    fn invocation_count(&self, job_id: &str) -> usize {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.job_id == job_id)
            .count()
    }

    fn invoked_before(&self, first: &str, second: &str) -> bool {
        let invocations = self.invocations.lock().unwrap();
        let a = invocations.iter().position(|i| i.job_id == first);
        let b = invocations.iter().position(|i| i.job_id == second);
        matches!((a, b), (Some(a), Some(b)) if a < b)
    }
}

#[async_trait]
impl Produce for MockProduce {
    async fn produce(&self, request: ProduceRequest) -> anyhow::Result<ProduceResult> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        // Let peers overlap so concurrency bounds are observable.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let attempt = request.attempt;
        self.invocations.lock().unwrap().push(Invocation {
            job_id: request.job.job_id.clone(),
            attempt,
        });

        if self.permanent_failures.contains(&request.job.job_id) {
            return Err(EngineError::new(
                ErrorCode::ProviderPermanent,
                "schema violation",
            )
            .into());
        }
        if let Some(&failures) = self.transient_failures.get(&request.job.job_id) {
            if attempt <= failures {
                return Err(
                    EngineError::new(ErrorCode::ProviderTransient, "upstream 503").into(),
                );
            }
        }

        let artifacts = request
            .job
            .produces
            .iter()
            .map(|artifact_id| ProducedArtifact {
                artifact_id: artifact_id.clone(),
                status: ArtifactStatus::Succeeded,
                output: Some(ArtifactOutput::Inline(json!({
                    "artifact": artifact_id,
                    "attempt": attempt,
                }))),
                diagnostics: None,
            })
            .collect();
        Ok(ProduceResult::succeeded(artifacts))
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    ctx_storage: StorageContext,
    event_log: EventLog,
    manifest_service: ManifestService,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let storage = StorageContext::new(Arc::new(LocalStorage::new(dir.path())), "work");
    let event_log = EventLog::new(storage.clone());
    let manifest_service = ManifestService::new(storage.clone(), event_log.clone());
    Harness {
        _dir: dir,
        ctx_storage: storage,
        event_log,
        manifest_service,
    }
}

fn run_context(h: &Harness, inputs: ResolvedInputs, produce: Arc<dyn Produce>) -> RunContext {
    RunContext {
        movie_id: "movie-1".into(),
        base_manifest: None,
        storage: h.ctx_storage.clone(),
        event_log: h.event_log.clone(),
        manifest_service: h.manifest_service.clone(),
        resolved_inputs: inputs,
        produce,
    }
}

/// Lay the full graph out in topological layers, like the planner does for
/// an initial run.
fn full_plan(graph: &ProducerGraph) -> ExecutionPlan {
    let topo = rf_topo::compute_topology_layers(&graph.job_ids(), &graph.edge_pairs()).unwrap();
    let mut layers = vec![Vec::new(); topo.layer_count];
    let mut ids = graph.job_ids();
    ids.sort();
    for id in ids {
        let layer = topo.layer_of(&id).unwrap();
        layers[layer].push(graph.node(&id).unwrap().clone());
    }
    ExecutionPlan {
        revision: RevisionId::first(),
        manifest_base_hash: String::new(),
        blueprint_layer_count: topo.layer_count,
        layers,
        created_at: Utc::now(),
    }
}

fn story_blueprint() -> Blueprint {
    Blueprint::new("story")
        .required_input("InquiryPrompt")
        .required_input("Segments")
        .producer(
            ProducerDecl::new("ScriptProducer", "openai", "gpt-5")
                .input("InquiryPrompt", "Inputs.InquiryPrompt")
                .output("Script"),
        )
        .producer(
            ProducerDecl::new("AudioProducer", "elevenlabs", "turbo-v2")
                .input("Script", "ScriptProducer.Script")
                .input("Segments", "Inputs.Segments")
                .output("SegmentAudio")
                .loop_over("segment", "Inputs.Segments"),
        )
        .producer(
            ProducerDecl::new("TimelineAssembler", "compose", "timeline-v1")
                .input("Clips", "AudioProducer.SegmentAudio[*] group by segment")
                .output("Timeline"),
        )
}

fn story_setup() -> (Blueprint, ResolvedInputs) {
    let bp = story_blueprint();
    let doc = InputsDocument::from_pairs([
        ("InquiryPrompt", json!("Tell me a story")),
        ("Segments", json!(["intro", "outro"])),
    ]);
    let inputs = ResolvedInputs::from_document(&bp, &doc).unwrap();
    (bp, inputs)
}

// -- scenarios --------------------------------------------------------------

#[tokio::test]
async fn initial_full_run_succeeds_and_builds_a_manifest() {
    let h = harness();
    let (bp, inputs) = story_setup();
    let graph = GraphBuilder::new(&bp, &inputs).build().unwrap();
    let plan = full_plan(&graph);
    assert_eq!(plan.layers.len(), 3);

    let mock = Arc::new(MockProduce::default());
    let ctx = run_context(&h, inputs, mock.clone());
    let result = Runner::new()
        .run(&plan, &ctx, &RunOptions::default())
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(result.jobs.len(), 4);
    assert!(result.jobs.iter().all(|j| j.status == JobStatus::Succeeded));

    // Edges complete before their consumers begin.
    assert!(mock.invoked_before("Producer:ScriptProducer", "Producer:AudioProducer[0]"));
    assert!(mock.invoked_before("Producer:ScriptProducer", "Producer:AudioProducer[1]"));
    assert!(mock.invoked_before("Producer:AudioProducer[1]", "Producer:TimelineAssembler"));

    let manifest = result.build_manifest().unwrap();
    assert_eq!(manifest.artifacts.len(), 4);
    assert!(manifest
        .artifacts
        .contains_key("Artifact:TimelineAssembler.Timeline"));
    // Manifest hashes match the stored outputs (invariant 4).
    for entry in manifest.artifacts.values() {
        assert_eq!(entry.status, ArtifactStatus::Succeeded);
        assert_eq!(entry.hash.len(), 64);
    }

    // The event log recorded one succeeded event per artifact.
    let events = h.event_log.load_artifacts("movie-1", None).unwrap();
    assert_eq!(events.len(), 4);
    assert!(events.iter().all(|e| e.status == ArtifactStatus::Succeeded));
}

#[tokio::test]
async fn transient_failures_are_retried_to_success() {
    let h = harness();
    let (bp, inputs) = story_setup();
    let graph = GraphBuilder::new(&bp, &inputs).build().unwrap();
    let plan = full_plan(&graph);

    let mock = Arc::new(MockProduce {
        transient_failures: BTreeMap::from([("Producer:ScriptProducer".to_string(), 2)]),
        ..MockProduce::default()
    });
    let ctx = run_context(&h, inputs, mock.clone());
    let opts = RunOptions {
        retry: RetryPolicy::builder()
            .max_attempts(3)
            .base_delay(std::time::Duration::from_millis(1))
            .build(),
        ..RunOptions::default()
    };
    let result = Runner::new().run(&plan, &ctx, &opts).await.unwrap();

    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(mock.invocation_count("Producer:ScriptProducer"), 3);
    let script = result
        .jobs
        .iter()
        .find(|j| j.job_id == "Producer:ScriptProducer")
        .unwrap();
    assert_eq!(script.attempts, 3);
}

#[tokio::test]
async fn permanent_failure_skips_descendants_and_yields_partial() {
    let h = harness();
    let (bp, inputs) = story_setup();
    let graph = GraphBuilder::new(&bp, &inputs).build().unwrap();
    let plan = full_plan(&graph);

    let mock = Arc::new(MockProduce {
        permanent_failures: vec!["Producer:ScriptProducer".to_string()],
        ..MockProduce::default()
    });
    let ctx = run_context(&h, inputs, mock.clone());
    let result = Runner::new()
        .run(&plan, &ctx, &RunOptions::default())
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Partial);
    // Permanent failures are not retried.
    assert_eq!(mock.invocation_count("Producer:ScriptProducer"), 1);
    // Audio and timeline never ran.
    assert_eq!(mock.invocation_count("Producer:AudioProducer[0]"), 0);
    assert_eq!(mock.invocation_count("Producer:TimelineAssembler"), 0);

    let by_id: BTreeMap<&str, &rf_runner::JobReport> = result
        .jobs
        .iter()
        .map(|j| (j.job_id.as_str(), j))
        .collect();
    assert_eq!(by_id["Producer:ScriptProducer"].status, JobStatus::Failed);
    for id in [
        "Producer:AudioProducer[0]",
        "Producer:AudioProducer[1]",
        "Producer:TimelineAssembler",
    ] {
        assert_eq!(by_id[id].status, JobStatus::Skipped, "{id}");
        assert_eq!(by_id[id].skip_reason, Some(SkipReason::UpstreamFailed), "{id}");
    }

    // Failed and skipped outputs never enter the manifest.
    let manifest = result.build_manifest().unwrap();
    assert!(manifest.artifacts.is_empty());
}

#[tokio::test]
async fn condition_false_skips_without_calling_the_provider() {
    let h = harness();
    let bp = Blueprint::new("conditional")
        .required_input("Segments")
        .required_input("NarrationTypes")
        .producer(
            ProducerDecl::new("VideoProducer", "runway", "gen4")
                .input("Segments", "Inputs.Segments")
                .input("NarrationType", "Inputs.NarrationTypes")
                .output("Clip")
                .loop_over("segment", "Inputs.Segments")
                .condition(
                    "Segments",
                    ConditionDecl {
                        input: "NarrationType".into(),
                        op: ConditionOpDecl::Eq,
                        value: json!("TalkingHead"),
                        required: true,
                    },
                ),
        )
        .producer(
            ProducerDecl::new("TimelineAssembler", "compose", "timeline-v1")
                .input("Clips", "VideoProducer.Clip[*] group by segment")
                .output("Timeline"),
        );
    let doc = InputsDocument::from_pairs([
        ("Segments", json!(["s0", "s1", "s2", "s3"])),
        (
            "NarrationTypes",
            json!(["ImageNarration", "TalkingHead", "ImageNarration", "TalkingHead"]),
        ),
    ]);
    let inputs = ResolvedInputs::from_document(&bp, &doc).unwrap();
    let graph = GraphBuilder::new(&bp, &inputs).build().unwrap();
    let plan = full_plan(&graph);

    let mock = Arc::new(MockProduce::default());
    let ctx = run_context(&h, inputs, mock.clone());
    let result = Runner::new()
        .run(&plan, &ctx, &RunOptions::default())
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Succeeded);
    // Only the TalkingHead segments (1 and 3) were dispatched.
    assert_eq!(mock.invocation_count("Producer:VideoProducer[0]"), 0);
    assert_eq!(mock.invocation_count("Producer:VideoProducer[1]"), 1);
    assert_eq!(mock.invocation_count("Producer:VideoProducer[2]"), 0);
    assert_eq!(mock.invocation_count("Producer:VideoProducer[3]"), 1);

    let by_id: BTreeMap<&str, &rf_runner::JobReport> = result
        .jobs
        .iter()
        .map(|j| (j.job_id.as_str(), j))
        .collect();
    assert_eq!(by_id["Producer:VideoProducer[0]"].status, JobStatus::Skipped);
    assert_eq!(
        by_id["Producer:VideoProducer[0]"].skip_reason,
        Some(SkipReason::ConditionFalse)
    );

    // Skips are recorded in the event log but not the manifest; the
    // timeline still composes downstream of them.
    assert_eq!(by_id["Producer:TimelineAssembler"].status, JobStatus::Succeeded);
    let manifest = result.build_manifest().unwrap();
    assert!(manifest.artifacts.contains_key("Artifact:VideoProducer.Clip[segment=1]"));
    assert!(!manifest.artifacts.contains_key("Artifact:VideoProducer.Clip[segment=0]"));
    assert!(manifest
        .artifacts
        .contains_key("Artifact:TimelineAssembler.Timeline"));

    let events = h.event_log.load_artifacts("movie-1", None).unwrap();
    let skipped: Vec<_> = events
        .iter()
        .filter(|e| e.status == ArtifactStatus::Skipped)
        .collect();
    assert_eq!(skipped.len(), 2);
    assert!(skipped
        .iter()
        .all(|e| e.skip_reason == Some(SkipReason::ConditionFalse)));
}

#[tokio::test]
async fn layer_concurrency_is_bounded() {
    let h = harness();
    let bp = Blueprint::new("wide")
        .required_input("Segments")
        .producer(
            ProducerDecl::new("ImageProducer", "openai", "gpt-image-1")
                .input("Segments", "Inputs.Segments")
                .output("Frame")
                .loop_over("segment", "Inputs.Segments"),
        );
    let doc = InputsDocument::from_pairs([(
        "Segments",
        json!(["a", "b", "c", "d", "e", "f", "g", "h"]),
    )]);
    let inputs = ResolvedInputs::from_document(&bp, &doc).unwrap();
    let graph = GraphBuilder::new(&bp, &inputs).build().unwrap();
    let plan = full_plan(&graph);

    let mock = Arc::new(MockProduce::default());
    let ctx = run_context(&h, inputs, mock.clone());
    let opts = RunOptions {
        concurrency: 2,
        ..RunOptions::default()
    };
    let result = Runner::new().run(&plan, &ctx, &opts).await.unwrap();

    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(result.jobs.len(), 8);
    assert!(
        mock.peak_in_flight.load(Ordering::SeqCst) <= 2,
        "peak {} exceeded the worker cap",
        mock.peak_in_flight.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn cancellation_before_dispatch_leaves_jobs_queued() {
    let h = harness();
    let (bp, inputs) = story_setup();
    let graph = GraphBuilder::new(&bp, &inputs).build().unwrap();
    let plan = full_plan(&graph);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let mock = Arc::new(MockProduce::default());
    let ctx = run_context(&h, inputs, mock.clone());
    let opts = RunOptions {
        cancel,
        ..RunOptions::default()
    };
    let result = Runner::new().run(&plan, &ctx, &opts).await.unwrap();

    assert!(result.jobs.iter().all(|j| j.status == JobStatus::Queued));
    assert_eq!(mock.invocations.lock().unwrap().len(), 0);
    let manifest = result.build_manifest().unwrap();
    assert!(manifest.artifacts.is_empty());
}

#[tokio::test]
async fn fan_in_context_preserves_grouping() {
    // Capture the timeline job's prepared context through the mock.
    struct Capturing {
        inner: MockProduce,
        captured: Mutex<Option<ProduceRequest>>,
    }

    #[async_trait]
    impl Produce for Capturing {
        async fn produce(&self, request: ProduceRequest) -> anyhow::Result<ProduceResult> {
            if request.job.producer == "TimelineAssembler" {
                *self.captured.lock().unwrap() = Some(request.clone());
            }
            self.inner.produce(request).await
        }
    }

    let h = harness();
    let (bp, inputs) = story_setup();
    let graph = GraphBuilder::new(&bp, &inputs).build().unwrap();
    let plan = full_plan(&graph);

    let mock = Arc::new(Capturing {
        inner: MockProduce::default(),
        captured: Mutex::new(None),
    });
    let ctx = run_context(&h, inputs, mock.clone());
    Runner::new()
        .run(&plan, &ctx, &RunOptions::default())
        .await
        .unwrap();

    let captured = mock.captured.lock().unwrap();
    let request = captured.as_ref().expect("timeline request captured");
    let ResolvedInput::Envelope { group_by, groups, .. } =
        request.context.get("Clips").expect("Clips input")
    else {
        panic!("expected envelope");
    };
    assert_eq!(group_by, "segment");
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].len(), 1);
    assert_eq!(groups[1].len(), 1);
}
