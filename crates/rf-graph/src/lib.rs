// SPDX-License-Identifier: MIT OR Apache-2.0
//! rf-graph
//!
//! Expands a blueprint plus resolved root inputs into the concrete job
//! graph: one [`JobDescriptor`] per fully-indexed producer instance, and one
//! edge per artifact consumption.
//!
//! Nodes live in an arena indexed by position; adjacency lists are keyed by
//! those indices with a `job_id → index` map built once. See
//! [`GraphBuilder`](crate::builder::GraphBuilder) for the expansion rules
//! (dimension unification, namespace paths, element bindings, fan-in
//! envelopes, condition edges).

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Blueprint → graph expansion.
pub mod builder;

pub use builder::GraphBuilder;

use rf_core::JobDescriptor;
use rf_error::ErrorCode;
use std::collections::{BTreeSet, HashMap};

/// Errors from producer-graph construction.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A binding expression names a producer that does not exist.
    #[error("unknown producer '{name}' referenced by {referenced_by}")]
    UnknownProducer {
        /// The missing alias.
        name: String,
        /// The producer whose binding referenced it.
        referenced_by: String,
    },

    /// An input could not be resolved to any source.
    #[error("unresolved input '{input}' of {producer}: {reason}")]
    UnresolvedInput {
        /// The logical input (or loop/binding expression).
        input: String,
        /// The producer it belongs to.
        producer: String,
        /// What went wrong.
        reason: String,
    },

    /// Two parents drive one dimension with different extents, or fan-in
    /// sources disagree on grouping/ordering.
    #[error("conflicting dimensions on '{dimension}' in {producer}: {left} vs {right}")]
    ConflictingDimensions {
        /// The contested dimension (or ordering field).
        dimension: String,
        /// One side of the conflict.
        left: String,
        /// The other side.
        right: String,
        /// The producer being expanded.
        producer: String,
    },

    /// An element-level binding indexes past its collection.
    #[error("unresolvable element index {index} for '{expr}' in {producer} (extent {extent})")]
    UnresolvableElementIndex {
        /// The offending expression or binding key.
        expr: String,
        /// The requested index.
        index: usize,
        /// The available extent.
        extent: usize,
        /// The producer being expanded.
        producer: String,
    },

    /// Producer references form a cycle.
    #[error("cycle detected through {from} -> {to}")]
    CycleDetected {
        /// Tail of a cycle edge.
        from: String,
        /// Head of a cycle edge.
        to: String,
    },

    /// A blueprint-level error (bad expression, missing input).
    #[error(transparent)]
    Blueprint(#[from] rf_blueprint::BlueprintError),
}

impl GraphError {
    /// Map to the stable engine error code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownProducer { .. } => ErrorCode::UnknownProducer,
            Self::UnresolvedInput { .. } => ErrorCode::UnresolvedInput,
            Self::ConflictingDimensions { .. } => ErrorCode::ConflictingDimensions,
            Self::UnresolvableElementIndex { .. } => ErrorCode::UnresolvableElementIndex,
            Self::CycleDetected { .. } => ErrorCode::CycleDetected,
            Self::Blueprint(e) => e.code(),
        }
    }
}

/// One dependency edge: `from` produces an artifact that `to` consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    /// Producing job id.
    pub from: String,
    /// Consuming job id.
    pub to: String,
}

/// The expanded job graph.
#[derive(Debug, Clone)]
pub struct ProducerGraph {
    nodes: Vec<JobDescriptor>,
    edges: Vec<GraphEdge>,
    index: HashMap<String, usize>,
    successors: Vec<Vec<usize>>,
    predecessors: Vec<Vec<usize>>,
    artifact_producer: HashMap<String, usize>,
}

impl ProducerGraph {
    /// Assemble a graph from nodes and edges, building the lookup indices.
    ///
    /// Edges referencing unknown job ids are ignored (the builder never
    /// emits them).
    #[must_use]
    pub fn new(nodes: Vec<JobDescriptor>, edges: Vec<GraphEdge>) -> Self {
        let index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.job_id.clone(), i))
            .collect();

        let mut successors = vec![Vec::new(); nodes.len()];
        let mut predecessors = vec![Vec::new(); nodes.len()];
        for edge in &edges {
            if let (Some(&f), Some(&t)) = (index.get(&edge.from), index.get(&edge.to)) {
                successors[f].push(t);
                predecessors[t].push(f);
            }
        }
        for list in successors.iter_mut().chain(predecessors.iter_mut()) {
            list.sort_unstable();
            list.dedup();
        }

        let mut artifact_producer = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            for artifact in &node.produces {
                artifact_producer.insert(artifact.clone(), i);
            }
        }

        Self {
            nodes,
            edges,
            index,
            successors,
            predecessors,
            artifact_producer,
        }
    }

    /// All job descriptors, in expansion order.
    #[must_use]
    pub fn nodes(&self) -> &[JobDescriptor] {
        &self.nodes
    }

    /// All edges.
    #[must_use]
    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    /// Job ids, in expansion order.
    #[must_use]
    pub fn job_ids(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.job_id.clone()).collect()
    }

    /// Edge pairs as `(from, to)` id tuples.
    #[must_use]
    pub fn edge_pairs(&self) -> Vec<(String, String)> {
        self.edges
            .iter()
            .map(|e| (e.from.clone(), e.to.clone()))
            .collect()
    }

    /// Look up a node by job id.
    #[must_use]
    pub fn node(&self, job_id: &str) -> Option<&JobDescriptor> {
        self.index.get(job_id).map(|&i| &self.nodes[i])
    }

    /// Whether a job id is in the graph.
    #[must_use]
    pub fn contains(&self, job_id: &str) -> bool {
        self.index.contains_key(job_id)
    }

    /// Direct successors of a job.
    #[must_use]
    pub fn successors(&self, job_id: &str) -> Vec<&str> {
        self.index
            .get(job_id)
            .map(|&i| {
                self.successors[i]
                    .iter()
                    .map(|&s| self.nodes[s].job_id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Direct predecessors of a job.
    #[must_use]
    pub fn predecessors(&self, job_id: &str) -> Vec<&str> {
        self.index
            .get(job_id)
            .map(|&i| {
                self.predecessors[i]
                    .iter()
                    .map(|&p| self.nodes[p].job_id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every job reachable from `job_id` along edges (excluding itself).
    #[must_use]
    pub fn descendants_of(&self, job_id: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let Some(&start) = self.index.get(job_id) else {
            return out;
        };
        let mut stack = vec![start];
        while let Some(i) = stack.pop() {
            for &s in &self.successors[i] {
                if out.insert(self.nodes[s].job_id.clone()) {
                    stack.push(s);
                }
            }
        }
        out
    }

    /// The job that produces the given artifact id, if any.
    #[must_use]
    pub fn producer_of_artifact(&self, artifact_id: &str) -> Option<&str> {
        self.artifact_producer
            .get(artifact_id)
            .map(|&i| self.nodes[i].job_id.as_str())
    }
}
