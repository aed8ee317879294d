// SPDX-License-Identifier: MIT OR Apache-2.0
//! rf-planner
//!
//! Computes, given the current manifest and a new revision, the minimal set
//! of jobs to run.
//!
//! Dirtiness has four sources:
//! - **Edited inputs** — the reconstructed input snapshot (manifest inputs
//!   plus pending edits) hashes differently than the manifest.
//! - **Edited artifacts** — an artifact event after the manifest revision
//!   carries a different output hash than the manifest (manual edits).
//! - **Missing artifacts** — an artifact a job is expected to produce is
//!   absent from the manifest and not accounted for by a recorded skip.
//! - **Operator cursors** — `re_run_from` re-runs whole layers; surgical
//!   regeneration replaces the dirty set with chosen sources and their
//!   descendants, ignoring `re_run_from` entirely.
//!
//! Producer-scoped config inputs (`Input:<Alias>.<field>`, including the
//! synthetic `.model`/`.provider` selectors) dirty only that producer's
//! jobs and do not propagate further; content edits propagate forward
//! through the graph.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::Utc;
use rf_core::{
    hash_artifact_output, manifest_hash, CanonicalId, ContractError, ExecutionPlan, InputEvent,
    Manifest, RevisionId,
};
use rf_core::{ArtifactStatus, IdKind};
use rf_error::ErrorCode;
use rf_eventlog::{EventLog, EventLogError};
use rf_graph::ProducerGraph;
use rf_topo::{compute_topology_layers, TopologyError, TopologyLayers};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Errors from planning.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// The job graph could not be layered.
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// The event log failed.
    #[error(transparent)]
    EventLog(#[from] EventLogError),

    /// Serialization failed.
    #[error("failed to serialize: {0}")]
    Contract(#[from] ContractError),
}

impl PlanError {
    /// Map to the stable engine error code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Topology(e) => e.code(),
            Self::EventLog(e) => e.code(),
            Self::Contract(e) => e.code(),
        }
    }
}

/// One surgical regeneration request: re-run the source job and everything
/// downstream of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRegeneration {
    /// Canonical id of the artifact being regenerated.
    pub target_artifact_id: String,
    /// Job that produces it.
    pub source_job_id: String,
}

/// Everything a planning pass consumes.
#[derive(Clone)]
pub struct PlanRequest<'a> {
    /// Movie being planned.
    pub movie_id: &'a str,
    /// The expanded job graph.
    pub graph: &'a ProducerGraph,
    /// The manifest the plan is computed against; `None` for an initial
    /// run.
    pub manifest: Option<&'a Manifest>,
    /// Revision the plan targets.
    pub target_revision: RevisionId,
    /// Input edits not yet reflected in the manifest.
    pub pending_edits: &'a [InputEvent],
    /// Re-run every job at this blueprint layer and later.
    pub re_run_from: Option<usize>,
    /// Drop every job at a blueprint layer later than this.
    pub up_to_layer: Option<usize>,
    /// Surgical regeneration sources; when non-empty, `re_run_from` is
    /// ignored.
    pub artifact_regenerations: &'a [ArtifactRegeneration],
}

/// Plans runs against the event log.
#[derive(Debug, Clone)]
pub struct Planner {
    event_log: EventLog,
}

impl Planner {
    /// Create a planner over the given event log.
    #[must_use]
    pub fn new(event_log: EventLog) -> Self {
        Self { event_log }
    }

    /// Compute an execution plan.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError`] when the graph contains a cycle or the event
    /// log cannot be read.
    pub fn plan(&self, request: &PlanRequest<'_>) -> Result<ExecutionPlan, PlanError> {
        let graph = request.graph;
        let topo = compute_topology_layers(&graph.job_ids(), &graph.edge_pairs())?;

        let dirty = if request.artifact_regenerations.is_empty() {
            let mut dirty = self.dirty_from_changes(request, graph)?;
            if let Some(from) = request.re_run_from {
                for id in graph.job_ids() {
                    if topo.layer_of(&id).unwrap_or(0) >= from {
                        dirty.insert(id);
                    }
                }
            }
            dirty
        } else {
            // Surgical mode: the chosen sources and their downstream
            // closure replace change-driven dirtiness; jobs dirty because
            // of missing artifacts remain included.
            let mut dirty = self.regeneration_jobs(request.artifact_regenerations, graph);
            dirty.extend(self.missing_artifact_jobs(request, graph)?);
            debug!(
                target: "rf.planner",
                movie = request.movie_id,
                sources = request.artifact_regenerations.len(),
                jobs = dirty.len(),
                "surgical regeneration plan"
            );
            dirty
        };

        let dirty = match request.up_to_layer {
            Some(cap) => dirty
                .into_iter()
                .filter(|id| topo.layer_of(id).unwrap_or(0) <= cap)
                .collect(),
            None => dirty,
        };

        let plan = assemble(request, &topo, graph, &dirty)?;
        info!(
            target: "rf.planner",
            movie = request.movie_id,
            revision = %plan.revision,
            jobs = plan.job_count(),
            layers = plan.layers.len(),
            blueprint_layers = plan.blueprint_layer_count,
            "plan assembled"
        );
        Ok(plan)
    }

    /// Dirtiness from edited inputs, edited artifacts, and missing
    /// artifacts (steps 1–5 of the planning algorithm).
    fn dirty_from_changes(
        &self,
        request: &PlanRequest<'_>,
        graph: &ProducerGraph,
    ) -> Result<BTreeSet<String>, PlanError> {
        // Step 1: input snapshot = manifest inputs + pending edits.
        let mut snapshot: BTreeMap<String, String> = request
            .manifest
            .map(|m| {
                m.inputs
                    .iter()
                    .map(|(id, entry)| (id.clone(), entry.hash.clone()))
                    .collect()
            })
            .unwrap_or_default();
        for edit in request.pending_edits {
            snapshot.insert(edit.id.clone(), edit.hash.clone());
        }

        // Step 2: dirty inputs, split into content inputs (which propagate)
        // and producer-scoped config inputs (which do not).
        let mut dirty_content_inputs: BTreeSet<String> = BTreeSet::new();
        let mut dirty_config_scopes: BTreeSet<String> = BTreeSet::new();
        for (id, hash) in &snapshot {
            let unchanged = request
                .manifest
                .and_then(|m| m.input_hash(id))
                .is_some_and(|known| known == hash);
            if unchanged {
                continue;
            }
            match CanonicalId::parse(id) {
                Ok(parsed) if parsed.kind() == IdKind::Input => {
                    match parsed.config_scope() {
                        Some(scope) => {
                            dirty_config_scopes.insert(scope);
                        }
                        None => {
                            dirty_content_inputs.insert(id.clone());
                        }
                    }
                }
                _ => {
                    dirty_content_inputs.insert(id.clone());
                }
            }
        }

        // Step 3: dirty artifacts from post-manifest events.
        let since = request.manifest.map(|m| m.revision.clone());
        let mut latest: BTreeMap<String, Option<String>> = BTreeMap::new();
        for event in self.event_log.load_artifacts(request.movie_id, since.as_ref())? {
            let hash = match &event.output {
                Some(output) => Some(hash_artifact_output(output)?),
                None => None,
            };
            latest.insert(event.artifact_id, hash);
        }
        let mut dirty_artifacts: BTreeSet<String> = BTreeSet::new();
        for (artifact_id, hash) in latest {
            let Some(hash) = hash else { continue };
            let known = request.manifest.and_then(|m| m.artifact_hash(&artifact_id));
            if known != Some(hash.as_str()) {
                dirty_artifacts.insert(artifact_id);
            }
        }

        // Step 4: seed jobs and propagate forward.
        let mut seeds: BTreeSet<String> = BTreeSet::new();
        for node in graph.nodes() {
            let touches_dirty = node
                .inputs
                .iter()
                .any(|id| dirty_content_inputs.contains(id) || dirty_artifacts.contains(id));
            if touches_dirty {
                seeds.insert(node.job_id.clone());
            }
        }
        let mut dirty: BTreeSet<String> = BTreeSet::new();
        for seed in &seeds {
            dirty.insert(seed.clone());
            dirty.extend(graph.descendants_of(seed));
        }

        // Step 5: config-input discipline — scoped inputs reach only their
        // producer, laterally and downstream alike.
        for node in graph.nodes() {
            if dirty_config_scopes.contains(&node.context.namespace_path.join(".")) {
                dirty.insert(node.job_id.clone());
            }
        }

        // Missing artifacts make their producer dirty without propagation.
        dirty.extend(self.missing_artifact_jobs(request, graph)?);

        debug!(
            target: "rf.planner",
            movie = request.movie_id,
            content_inputs = dirty_content_inputs.len(),
            config_scopes = dirty_config_scopes.len(),
            artifacts = dirty_artifacts.len(),
            jobs = dirty.len(),
            "dirty set computed"
        );
        Ok(dirty)
    }

    /// Jobs with an expected output absent from the manifest and not
    /// accounted for by a recorded skip.
    fn missing_artifact_jobs(
        &self,
        request: &PlanRequest<'_>,
        graph: &ProducerGraph,
    ) -> Result<BTreeSet<String>, PlanError> {
        let mut skipped: BTreeSet<String> = BTreeSet::new();
        for event in self.event_log.load_artifacts(request.movie_id, None)? {
            // Append order: the last event per artifact wins.
            if event.status == ArtifactStatus::Skipped {
                skipped.insert(event.artifact_id);
            } else {
                skipped.remove(&event.artifact_id);
            }
        }

        let mut jobs = BTreeSet::new();
        for node in graph.nodes() {
            let missing = node.produces.iter().any(|artifact_id| {
                let in_manifest = request
                    .manifest
                    .is_some_and(|m| m.artifacts.contains_key(artifact_id));
                !in_manifest && !skipped.contains(artifact_id)
            });
            if missing {
                jobs.insert(node.job_id.clone());
            }
        }
        Ok(jobs)
    }

    /// Each source contributes itself and all of its descendants.
    fn regeneration_jobs(
        &self,
        regenerations: &[ArtifactRegeneration],
        graph: &ProducerGraph,
    ) -> BTreeSet<String> {
        let mut jobs = BTreeSet::new();
        for regeneration in regenerations {
            if !graph.contains(&regeneration.source_job_id) {
                continue;
            }
            jobs.insert(regeneration.source_job_id.clone());
            jobs.extend(graph.descendants_of(&regeneration.source_job_id));
        }
        jobs
    }
}

fn assemble(
    request: &PlanRequest<'_>,
    topo: &TopologyLayers,
    graph: &ProducerGraph,
    dirty: &BTreeSet<String>,
) -> Result<ExecutionPlan, PlanError> {
    let mut layers: Vec<Vec<rf_core::JobDescriptor>> = vec![Vec::new(); topo.layer_count];
    // BTreeSet iteration gives job-id order within each layer.
    for job_id in dirty {
        let Some(node) = graph.node(job_id) else {
            continue;
        };
        if let Some(layer) = topo.layer_of(job_id) {
            layers[layer].push(node.clone());
        }
    }
    while layers.last().is_some_and(Vec::is_empty) {
        layers.pop();
    }
    // Interior empty layers collapse away too: the plan's layers are
    // execution waves, not blueprint layers.
    let layers: Vec<Vec<rf_core::JobDescriptor>> =
        layers.into_iter().filter(|l| !l.is_empty()).collect();

    let manifest_base_hash = match request.manifest {
        Some(manifest) => manifest_hash(manifest)?,
        None => String::new(),
    };

    Ok(ExecutionPlan {
        revision: request.target_revision.clone(),
        manifest_base_hash,
        blueprint_layer_count: topo.layer_count,
        layers,
        created_at: Utc::now(),
    })
}
