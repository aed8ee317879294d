// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end expansion tests for the producer-graph builder.

use rf_blueprint::{
    Blueprint, ConditionDecl, ConditionOpDecl, InputsDocument, ProducerDecl, ProducerImport,
    ResolvedInputs,
};
use rf_core::InputBinding;
use rf_graph::{GraphBuilder, GraphError};
use serde_json::json;
use std::collections::BTreeMap;

fn resolved(blueprint: &Blueprint, doc: InputsDocument) -> ResolvedInputs {
    ResolvedInputs::from_document(blueprint, &doc).unwrap()
}

/// Script → Audio[segment] → Timeline, driven by a two-segment input.
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
                .input(
                    "Clips",
                    "AudioProducer.SegmentAudio[*] group by segment",
                )
                .output("Timeline"),
        )
}

fn story_inputs() -> InputsDocument {
    InputsDocument::from_pairs([
        ("InquiryPrompt", json!("Tell me a story")),
        ("Segments", json!(["intro", "outro"])),
    ])
}

#[test]
fn story_graph_has_expected_nodes_and_edges() {
    let bp = story_blueprint();
    let inputs = resolved(&bp, story_inputs());
    let graph = GraphBuilder::new(&bp, &inputs).build().unwrap();

    let mut ids = graph.job_ids();
    ids.sort();
    assert_eq!(
        ids,
        [
            "Producer:AudioProducer[0]",
            "Producer:AudioProducer[1]",
            "Producer:ScriptProducer",
            "Producer:TimelineAssembler",
        ]
    );

    // Script feeds both audio jobs; both audio jobs feed the timeline.
    let mut edges = graph.edge_pairs();
    edges.sort();
    assert_eq!(
        edges,
        [
            (
                "Producer:AudioProducer[0]".to_string(),
                "Producer:TimelineAssembler".to_string()
            ),
            (
                "Producer:AudioProducer[1]".to_string(),
                "Producer:TimelineAssembler".to_string()
            ),
            (
                "Producer:ScriptProducer".to_string(),
                "Producer:AudioProducer[0]".to_string()
            ),
            (
                "Producer:ScriptProducer".to_string(),
                "Producer:AudioProducer[1]".to_string()
            ),
        ]
    );
}

#[test]
fn audio_jobs_carry_segment_indices_and_named_artifacts() {
    let bp = story_blueprint();
    let inputs = resolved(&bp, story_inputs());
    let graph = GraphBuilder::new(&bp, &inputs).build().unwrap();

    let job = graph.node("Producer:AudioProducer[1]").unwrap();
    assert_eq!(job.context.indices.get("segment"), Some(&1));
    assert_eq!(
        job.produces,
        ["Artifact:AudioProducer.SegmentAudio[segment=1]"]
    );
    assert!(job.consumes("Artifact:ScriptProducer.Script"));
    assert_eq!(
        graph.producer_of_artifact("Artifact:AudioProducer.SegmentAudio[segment=1]"),
        Some("Producer:AudioProducer[1]")
    );
}

#[test]
fn timeline_receives_a_fan_in_envelope() {
    let bp = story_blueprint();
    let inputs = resolved(&bp, story_inputs());
    let graph = GraphBuilder::new(&bp, &inputs).build().unwrap();

    let job = graph.node("Producer:TimelineAssembler").unwrap();
    let InputBinding::FanIn(envelope) = &job.context.input_bindings["Clips"] else {
        panic!("expected a fan-in envelope");
    };
    assert_eq!(envelope.group_by, "segment");
    assert_eq!(
        envelope.groups,
        vec![
            vec!["Artifact:AudioProducer.SegmentAudio[segment=0]".to_string()],
            vec!["Artifact:AudioProducer.SegmentAudio[segment=1]".to_string()],
        ]
    );
}

#[test]
fn synthetic_config_selectors_are_attached_as_inputs() {
    let bp = story_blueprint();
    let inputs = resolved(&bp, story_inputs());
    let graph = GraphBuilder::new(&bp, &inputs).build().unwrap();

    let job = graph.node("Producer:ScriptProducer").unwrap();
    assert!(job.consumes("Input:ScriptProducer.model"));
    assert!(job.consumes("Input:ScriptProducer.provider"));
    // Config selectors of other producers are not attached.
    assert!(!job.consumes("Input:AudioProducer.model"));
}

#[test]
fn model_overrides_rewrite_provider_and_model() {
    let bp = story_blueprint();
    let mut doc = story_inputs();
    doc.models.push(rf_blueprint::ModelOverride {
        producer_id: "AudioProducer".into(),
        provider: Some("openai".into()),
        model: Some("tts-hd".into()),
    });
    let inputs = resolved(&bp, doc);
    let graph = GraphBuilder::new(&bp, &inputs).build().unwrap();

    let job = graph.node("Producer:AudioProducer[0]").unwrap();
    assert_eq!(job.provider, "openai");
    assert_eq!(job.provider_model, "tts-hd");
    // Rate key follows the overridden provider when none is declared.
    assert_eq!(job.rate_key, "openai");
}

#[test]
fn dimension_unification_expands_n_not_n_squared() {
    // Image and audio both fan out over `segment`; the video producer
    // consumes both element-wise and must expand to exactly 3 jobs.
    let bp = Blueprint::new("unify")
        .required_input("Segments")
        .producer(
            ProducerDecl::new("ImageProducer", "openai", "gpt-image-1")
                .input("Segments", "Inputs.Segments")
                .output("SegmentImage")
                .loop_over("segment", "Inputs.Segments"),
        )
        .producer(
            ProducerDecl::new("AudioProducer", "elevenlabs", "turbo-v2")
                .input("Segments", "Inputs.Segments")
                .output("SegmentAudio")
                .loop_over("segment", "Inputs.Segments"),
        )
        .producer(
            ProducerDecl::new("VideoProducer", "runway", "gen4")
                .input("Image", "ImageProducer.SegmentImage")
                .input("Audio", "AudioProducer.SegmentAudio")
                .output("SegmentVideo"),
        );
    let doc = InputsDocument::from_pairs([("Segments", json!(["a", "b", "c"]))]);
    let inputs = resolved(&bp, doc);
    let graph = GraphBuilder::new(&bp, &inputs).build().unwrap();

    let video_jobs = graph
        .job_ids()
        .iter()
        .filter(|id| id.starts_with("Producer:VideoProducer"))
        .count();
    assert_eq!(video_jobs, 3, "expansion must unify, not cross");

    let job = graph.node("Producer:VideoProducer[2]").unwrap();
    assert!(job.consumes("Artifact:ImageProducer.SegmentImage[segment=2]"));
    assert!(job.consumes("Artifact:AudioProducer.SegmentAudio[segment=2]"));
}

#[test]
fn conflicting_extents_on_one_dimension_are_rejected() {
    let bp = Blueprint::new("conflict")
        .required_input("Segments")
        .required_input("Voices")
        .producer(
            ProducerDecl::new("A", "openai", "m")
                .output("X")
                .loop_over("segment", "Inputs.Segments"),
        )
        .producer(
            ProducerDecl::new("B", "openai", "m")
                .output("Y")
                .loop_over("segment", "Inputs.Voices"),
        )
        .producer(
            ProducerDecl::new("C", "compose", "m")
                .input("X", "A.X")
                .input("Y", "B.Y")
                .output("Z"),
        );
    let doc = InputsDocument::from_pairs([
        ("Segments", json!(["a", "b"])),
        ("Voices", json!(["x", "y", "z"])),
    ]);
    let inputs = resolved(&bp, doc);
    let err = GraphBuilder::new(&bp, &inputs).build().unwrap_err();
    assert!(
        matches!(err, GraphError::ConflictingDimensions { .. }),
        "{err:?}"
    );
}

#[test]
fn conflicting_order_by_between_fan_in_sources_is_rejected() {
    let bp = Blueprint::new("orderconflict")
        .required_input("Segments")
        .required_input("Takes")
        .producer(
            ProducerDecl::new("Frames", "openai", "m")
                .output("Frame")
                .loop_over("segment", "Inputs.Segments")
                .loop_over("take", "Inputs.Takes"),
        )
        .producer(
            ProducerDecl::new("Mixer", "compose", "m")
                .input_many(
                    "Media",
                    vec![
                        "Frames.Frame[*] group by segment order by take".into(),
                        "Frames.Frame[*] group by segment".into(),
                    ],
                )
                .output("Mix"),
        );
    let doc = InputsDocument::from_pairs([
        ("Segments", json!(["a", "b"])),
        ("Takes", json!([1, 2])),
    ]);
    let inputs = resolved(&bp, doc);
    let err = GraphBuilder::new(&bp, &inputs).build().unwrap_err();
    assert!(
        matches!(err, GraphError::ConflictingDimensions { .. }),
        "{err:?}"
    );
}

#[test]
fn element_binding_selects_one_upstream_instance() {
    let bp = Blueprint::new("element")
        .required_input("Characters")
        .producer(
            ProducerDecl::new("CharacterImageProducer", "openai", "gpt-image-1")
                .input("Characters", "Inputs.Characters")
                .output("GeneratedImage")
                .loop_over("character", "Inputs.Characters"),
        )
        .producer(
            ProducerDecl::new("PosterProducer", "openai", "gpt-image-1")
                .input("ReferenceImages[0]", "CharacterImageProducer.GeneratedImage[0]")
                .input("ReferenceImages[1]", "CharacterImageProducer.GeneratedImage[1]")
                .output("Poster"),
        );
    let doc = InputsDocument::from_pairs([("Characters", json!(["hero", "villain"]))]);
    let inputs = resolved(&bp, doc);
    let graph = GraphBuilder::new(&bp, &inputs).build().unwrap();

    let job = graph.node("Producer:PosterProducer").unwrap();
    assert_eq!(
        job.context.input_bindings["ReferenceImages[0]"],
        InputBinding::Source {
            id: "Artifact:CharacterImageProducer.GeneratedImage[character=0]".into()
        }
    );
    // Element binding collapses the character dimension: one poster job.
    assert_eq!(
        graph
            .job_ids()
            .iter()
            .filter(|id| id.starts_with("Producer:PosterProducer"))
            .count(),
        1
    );
}

#[test]
fn out_of_range_element_index_is_rejected() {
    let bp = Blueprint::new("range")
        .required_input("Characters")
        .producer(
            ProducerDecl::new("CharacterImageProducer", "openai", "gpt-image-1")
                .output("GeneratedImage")
                .loop_over("character", "Inputs.Characters"),
        )
        .producer(
            ProducerDecl::new("PosterProducer", "openai", "gpt-image-1")
                .input("Reference", "CharacterImageProducer.GeneratedImage[5]")
                .output("Poster"),
        );
    let doc = InputsDocument::from_pairs([("Characters", json!(["hero", "villain"]))]);
    let inputs = resolved(&bp, doc);
    let err = GraphBuilder::new(&bp, &inputs).build().unwrap_err();
    let GraphError::UnresolvableElementIndex { index, extent, .. } = err else {
        panic!("expected UnresolvableElementIndex, got {err:?}");
    };
    assert_eq!(index, 5);
    assert_eq!(extent, 2);
}

#[test]
fn unknown_producer_reference_is_rejected() {
    let bp = Blueprint::new("unknown").producer(
        ProducerDecl::new("A", "openai", "m")
            .input("X", "Ghost.Output")
            .output("Y"),
    );
    let inputs = resolved(&bp, InputsDocument::default());
    let err = GraphBuilder::new(&bp, &inputs).build().unwrap_err();
    assert!(matches!(err, GraphError::UnknownProducer { .. }), "{err:?}");
}

#[test]
fn producer_cycles_are_rejected() {
    let bp = Blueprint::new("cycle")
        .producer(
            ProducerDecl::new("A", "openai", "m")
                .input("X", "B.Y")
                .output("X"),
        )
        .producer(
            ProducerDecl::new("B", "openai", "m")
                .input("Y", "A.X")
                .output("Y"),
        );
    let inputs = resolved(&bp, InputsDocument::default());
    let err = GraphBuilder::new(&bp, &inputs).build().unwrap_err();
    assert!(matches!(err, GraphError::CycleDetected { .. }), "{err:?}");
}

#[test]
fn conditions_survive_into_job_context() {
    let bp = Blueprint::new("conditional")
        .required_input("Segments")
        .producer(
            ProducerDecl::new("VideoProducer", "runway", "gen4")
                .input("Segments", "Inputs.Segments")
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
        );
    let doc = InputsDocument::from_pairs([("Segments", json!(["a", "b"]))]);
    let inputs = resolved(&bp, doc);
    let graph = GraphBuilder::new(&bp, &inputs).build().unwrap();
    let job = graph.node("Producer:VideoProducer[0]").unwrap();
    let cond = &job.context.input_conditions["Segments"];
    assert_eq!(cond.input, "NarrationType");
    assert!(cond.required);
}

#[test]
fn nested_imports_embed_namespace_paths_and_prefer_aliases() {
    let nested = Blueprint::new("CharacterPack")
        .required_input("Description")
        .producer(
            ProducerDecl::new("Portrait", "openai", "gpt-image-1")
                .input("Description", "Inputs.Description")
                .output("Image"),
        );
    let mut export_nested = nested;
    export_nested.artifacts.push(rf_blueprint::ArtifactDecl {
        name: "HeroImage".into(),
        source: "Portrait.Image".into(),
    });

    let bp = Blueprint::new("movie")
        .required_input("HeroDescription")
        .import(ProducerImport {
            alias: Some("Hero".into()),
            blueprint: export_nested,
            inputs: BTreeMap::from([(
                "Description".to_string(),
                "Inputs.HeroDescription".to_string(),
            )]),
        })
        .producer(
            ProducerDecl::new("SceneProducer", "runway", "gen4")
                .input("Reference", "Hero.HeroImage")
                .output("Scene"),
        );

    let doc = InputsDocument::from_pairs([("HeroDescription", json!("brave knight"))]);
    let inputs = resolved(&bp, doc);
    let graph = GraphBuilder::new(&bp, &inputs).build().unwrap();

    let mut ids = graph.job_ids();
    ids.sort();
    assert_eq!(ids, ["Producer:Hero.Portrait", "Producer:SceneProducer"]);

    let portrait = graph.node("Producer:Hero.Portrait").unwrap();
    assert_eq!(portrait.context.namespace_path, ["Hero", "Portrait"]);
    assert!(portrait.consumes("Input:HeroDescription"));

    let scene = graph.node("Producer:SceneProducer").unwrap();
    assert!(scene.consumes("Artifact:Hero.Portrait.Image"));
    assert_eq!(
        graph.edge_pairs(),
        [(
            "Producer:Hero.Portrait".to_string(),
            "Producer:SceneProducer".to_string()
        )]
    );
}
