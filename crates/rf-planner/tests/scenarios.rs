// SPDX-License-Identifier: MIT OR Apache-2.0
//! Planning scenarios: initial run, no-op replan, propagation, config
//! locality, surgical regeneration, layer cursors.

use chrono::Utc;
use rf_blueprint::{Blueprint, InputsDocument, ProducerDecl, ResolvedInputs};
use rf_core::{
    hash_artifact_output, ArtifactEvent, ArtifactOutput, ArtifactStatus, InputEvent, Manifest,
    ManifestArtifact, ManifestInput, RevisionId,
};
use rf_eventlog::EventLog;
use rf_graph::{GraphBuilder, ProducerGraph};
use rf_planner::{ArtifactRegeneration, PlanRequest, Planner};
use rf_storage::{LocalStorage, StorageContext};
use serde_json::json;
use std::sync::Arc;

fn rev(s: &str) -> RevisionId {
    RevisionId::parse(s).unwrap()
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

struct Scenario {
    _dir: tempfile::TempDir,
    graph: ProducerGraph,
    inputs: ResolvedInputs,
    event_log: EventLog,
    planner: Planner,
}

fn scenario() -> Scenario {
    let dir = tempfile::tempdir().unwrap();
    let storage = StorageContext::new(Arc::new(LocalStorage::new(dir.path())), "work");
    let event_log = EventLog::new(storage);
    let planner = Planner::new(event_log.clone());

    let bp = story_blueprint();
    let mut doc = InputsDocument::from_pairs([
        ("InquiryPrompt", json!("Tell me a story")),
        ("Segments", json!(["intro", "outro"])),
    ]);
    doc.inputs.insert("AudioProducer.volume".into(), json!(0.5));
    let inputs = ResolvedInputs::from_document(&bp, &doc).unwrap();
    let graph = GraphBuilder::new(&bp, &inputs).build().unwrap();

    Scenario {
        _dir: dir,
        graph,
        inputs,
        event_log,
        planner,
    }
}

/// The manifest a successful full run at `revision` would leave behind.
fn manifest_after_full_run(s: &Scenario, revision: &RevisionId) -> Manifest {
    let now = Utc::now();
    let mut manifest = Manifest::new(revision.clone(), None);
    for (id, hash) in s.inputs.hashes().unwrap() {
        manifest.inputs.insert(
            id,
            ManifestInput {
                payload_digest: hash.chars().take(12).collect(),
                hash,
                created_at: now,
            },
        );
    }
    for node in s.graph.nodes() {
        for artifact_id in &node.produces {
            let output = ArtifactOutput::Inline(json!({ "artifact": artifact_id }));
            manifest.artifacts.insert(
                artifact_id.clone(),
                ManifestArtifact {
                    hash: hash_artifact_output(&output).unwrap(),
                    produced_by: node.job_id.clone(),
                    status: ArtifactStatus::Succeeded,
                    created_at: now,
                },
            );
        }
    }
    manifest
}

fn plan_ids(plan: &rf_core::ExecutionPlan) -> Vec<Vec<String>> {
    plan.layers
        .iter()
        .map(|layer| layer.iter().map(|j| j.job_id.clone()).collect())
        .collect()
}

fn edit(id: &str, value: serde_json::Value, revision: &str) -> InputEvent {
    InputEvent::new(id, rev(revision), value, "tester").unwrap()
}

#[test]
fn s1_initial_full_run_plans_every_job_in_three_layers() {
    let s = scenario();
    let plan = s
        .planner
        .plan(&PlanRequest {
            movie_id: "m",
            graph: &s.graph,
            manifest: None,
            target_revision: rev("rev-0001"),
            pending_edits: &[],
            re_run_from: None,
            up_to_layer: None,
            artifact_regenerations: &[],
        })
        .unwrap();

    assert_eq!(
        plan_ids(&plan),
        vec![
            vec!["Producer:ScriptProducer".to_string()],
            vec![
                "Producer:AudioProducer[0]".to_string(),
                "Producer:AudioProducer[1]".to_string()
            ],
            vec!["Producer:TimelineAssembler".to_string()],
        ]
    );
    assert_eq!(plan.blueprint_layer_count, 3);
    assert_eq!(plan.manifest_base_hash, "");
}

#[test]
fn s2_noop_replan_is_empty() {
    let s = scenario();
    let manifest = manifest_after_full_run(&s, &rev("rev-0001"));
    let plan = s
        .planner
        .plan(&PlanRequest {
            movie_id: "m",
            graph: &s.graph,
            manifest: Some(&manifest),
            target_revision: rev("rev-0002"),
            pending_edits: &[],
            re_run_from: None,
            up_to_layer: None,
            artifact_regenerations: &[],
        })
        .unwrap();

    assert!(plan.is_empty());
    assert_eq!(plan.layers.len(), 0, "empty plan is [], never [[]]");
    assert_eq!(plan.blueprint_layer_count, 3);
    assert!(!plan.manifest_base_hash.is_empty());
}

#[test]
fn s3_upstream_edit_propagates_to_all_descendants() {
    let s = scenario();
    let manifest = manifest_after_full_run(&s, &rev("rev-0001"));
    let edits = [edit("Input:InquiryPrompt", json!("An epic voyage"), "rev-0002")];
    let plan = s
        .planner
        .plan(&PlanRequest {
            movie_id: "m",
            graph: &s.graph,
            manifest: Some(&manifest),
            target_revision: rev("rev-0002"),
            pending_edits: &edits,
            re_run_from: None,
            up_to_layer: None,
            artifact_regenerations: &[],
        })
        .unwrap();

    assert_eq!(
        plan_ids(&plan),
        vec![
            vec!["Producer:ScriptProducer".to_string()],
            vec![
                "Producer:AudioProducer[0]".to_string(),
                "Producer:AudioProducer[1]".to_string()
            ],
            vec!["Producer:TimelineAssembler".to_string()],
        ]
    );
}

#[test]
fn s4_config_edit_stays_local_to_its_producer() {
    let s = scenario();
    let manifest = manifest_after_full_run(&s, &rev("rev-0001"));
    let edits = [edit("Input:AudioProducer.volume", json!(0.7), "rev-0002")];
    let plan = s
        .planner
        .plan(&PlanRequest {
            movie_id: "m",
            graph: &s.graph,
            manifest: Some(&manifest),
            target_revision: rev("rev-0002"),
            pending_edits: &edits,
            re_run_from: None,
            up_to_layer: None,
            artifact_regenerations: &[],
        })
        .unwrap();

    assert_eq!(
        plan_ids(&plan),
        vec![vec![
            "Producer:AudioProducer[0]".to_string(),
            "Producer:AudioProducer[1]".to_string()
        ]]
    );
    assert!(!plan.contains("Producer:ScriptProducer"));
    assert!(!plan.contains("Producer:TimelineAssembler"));
}

#[test]
fn s5_surgical_regeneration_targets_source_and_descendants_only() {
    let s = scenario();
    let manifest = manifest_after_full_run(&s, &rev("rev-0001"));
    let regenerations = [ArtifactRegeneration {
        target_artifact_id: "Artifact:AudioProducer.SegmentAudio[segment=0]".into(),
        source_job_id: "Producer:AudioProducer[0]".into(),
    }];
    // re_run_from must be ignored in surgical mode.
    let plan = s
        .planner
        .plan(&PlanRequest {
            movie_id: "m",
            graph: &s.graph,
            manifest: Some(&manifest),
            target_revision: rev("rev-0002"),
            pending_edits: &[],
            re_run_from: Some(0),
            up_to_layer: None,
            artifact_regenerations: &regenerations,
        })
        .unwrap();

    assert_eq!(
        plan_ids(&plan),
        vec![
            vec!["Producer:AudioProducer[0]".to_string()],
            vec!["Producer:TimelineAssembler".to_string()],
        ]
    );
    assert!(!plan.contains("Producer:AudioProducer[1]"));
    assert!(!plan.contains("Producer:ScriptProducer"));
    assert_eq!(plan.blueprint_layer_count, 3);
}

#[test]
fn re_run_from_layer_floors_the_dirty_set() {
    let s = scenario();
    let manifest = manifest_after_full_run(&s, &rev("rev-0001"));
    let plan = s
        .planner
        .plan(&PlanRequest {
            movie_id: "m",
            graph: &s.graph,
            manifest: Some(&manifest),
            target_revision: rev("rev-0002"),
            pending_edits: &[],
            re_run_from: Some(1),
            up_to_layer: None,
            artifact_regenerations: &[],
        })
        .unwrap();

    assert_eq!(
        plan_ids(&plan),
        vec![
            vec![
                "Producer:AudioProducer[0]".to_string(),
                "Producer:AudioProducer[1]".to_string()
            ],
            vec!["Producer:TimelineAssembler".to_string()],
        ]
    );
}

#[test]
fn up_to_layer_caps_the_plan() {
    let s = scenario();
    let edits = [edit("Input:InquiryPrompt", json!("short"), "rev-0002")];
    let manifest = manifest_after_full_run(&s, &rev("rev-0001"));
    let plan = s
        .planner
        .plan(&PlanRequest {
            movie_id: "m",
            graph: &s.graph,
            manifest: Some(&manifest),
            target_revision: rev("rev-0002"),
            pending_edits: &edits,
            re_run_from: None,
            up_to_layer: Some(1),
            artifact_regenerations: &[],
        })
        .unwrap();

    assert_eq!(
        plan_ids(&plan),
        vec![
            vec!["Producer:ScriptProducer".to_string()],
            vec![
                "Producer:AudioProducer[0]".to_string(),
                "Producer:AudioProducer[1]".to_string()
            ],
        ]
    );
    assert_eq!(plan.blueprint_layer_count, 3, "cap never shrinks the blueprint count");
}

#[test]
fn missing_artifacts_dirty_only_their_producer() {
    let s = scenario();
    let mut manifest = manifest_after_full_run(&s, &rev("rev-0001"));
    manifest
        .artifacts
        .remove("Artifact:TimelineAssembler.Timeline");

    let plan = s
        .planner
        .plan(&PlanRequest {
            movie_id: "m",
            graph: &s.graph,
            manifest: Some(&manifest),
            target_revision: rev("rev-0002"),
            pending_edits: &[],
            re_run_from: None,
            up_to_layer: None,
            artifact_regenerations: &[],
        })
        .unwrap();

    assert_eq!(
        plan_ids(&plan),
        vec![vec!["Producer:TimelineAssembler".to_string()]]
    );
}

#[test]
fn manually_edited_artifact_dirties_consumers_not_its_producer() {
    let s = scenario();
    let manifest = manifest_after_full_run(&s, &rev("rev-0001"));

    // A post-manifest event rewrites the script artifact by hand.
    let edited = ArtifactEvent {
        artifact_id: "Artifact:ScriptProducer.Script".into(),
        revision: rev("rev-0002"),
        inputs_hash: String::new(),
        output: Some(ArtifactOutput::Inline(json!({"text": "hand-edited"}))),
        status: ArtifactStatus::Succeeded,
        skip_reason: None,
        produced_by: "Producer:ScriptProducer".into(),
        created_at: Utc::now(),
        diagnostics: None,
    };
    s.event_log.append_artifact("m", &edited).unwrap();

    let plan = s
        .planner
        .plan(&PlanRequest {
            movie_id: "m",
            graph: &s.graph,
            manifest: Some(&manifest),
            target_revision: rev("rev-0002"),
            pending_edits: &[],
            re_run_from: None,
            up_to_layer: None,
            artifact_regenerations: &[],
        })
        .unwrap();

    // Consumers re-run against the edited content; the producer itself
    // does not.
    assert!(!plan.contains("Producer:ScriptProducer"));
    assert!(plan.contains("Producer:AudioProducer[0]"));
    assert!(plan.contains("Producer:AudioProducer[1]"));
    assert!(plan.contains("Producer:TimelineAssembler"));
}

#[test]
fn plan_respects_topological_order_for_every_edge() {
    let s = scenario();
    let plan = s
        .planner
        .plan(&PlanRequest {
            movie_id: "m",
            graph: &s.graph,
            manifest: None,
            target_revision: rev("rev-0001"),
            pending_edits: &[],
            re_run_from: None,
            up_to_layer: None,
            artifact_regenerations: &[],
        })
        .unwrap();

    for (from, to) in s.graph.edge_pairs() {
        if let (Some(lf), Some(lt)) = (plan.layer_of(&from), plan.layer_of(&to)) {
            assert!(lf < lt, "{from}@{lf} must precede {to}@{lt}");
        }
    }
}
