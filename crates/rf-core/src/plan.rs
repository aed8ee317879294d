// SPDX-License-Identifier: MIT OR Apache-2.0
//! Layered execution plans.

use crate::job::JobDescriptor;
use crate::RevisionId;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The planner's output: the minimal set of jobs to run, grouped into
/// topological layers.
///
/// Invariants:
///
/// 1. For every graph edge `from → to` with both ends in the plan,
///    `layer(from) < layer(to)`.
/// 2. No trailing empty layers; an empty plan is `layers == []`, never
///    `[[]]`.
/// 3. `blueprint_layer_count` reflects the full topology even when the plan
///    is filtered down to a subset of jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionPlan {
    /// Revision this plan targets.
    pub revision: RevisionId,
    /// Content hash of the manifest the plan was computed against; empty
    /// for an initial run.
    pub manifest_base_hash: String,
    /// Layer count of the full blueprint topology.
    pub blueprint_layer_count: usize,
    /// Jobs to run, grouped by topological layer, ordered by `job_id`
    /// within a layer.
    pub layers: Vec<Vec<JobDescriptor>>,
    /// When the plan was assembled.
    pub created_at: DateTime<Utc>,
}

impl ExecutionPlan {
    /// `true` when no jobs survive planning.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Total number of jobs across all layers.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.layers.iter().map(Vec::len).sum()
    }

    /// Iterate all jobs in layer order.
    pub fn jobs(&self) -> impl Iterator<Item = &JobDescriptor> {
        self.layers.iter().flatten()
    }

    /// The plan-relative layer index a job sits in, if present.
    #[must_use]
    pub fn layer_of(&self, job_id: &str) -> Option<usize> {
        self.layers
            .iter()
            .position(|layer| layer.iter().any(|j| j.job_id == job_id))
    }

    /// Whether a job id is present anywhere in the plan.
    #[must_use]
    pub fn contains(&self, job_id: &str) -> bool {
        self.layer_of(job_id).is_some()
    }
}
