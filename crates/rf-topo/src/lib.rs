// SPDX-License-Identifier: MIT OR Apache-2.0
//! rf-topo
//!
//! Cycle detection and layering of the job graph.
//!
//! Layering is Kahn-style longest-path: each node gets the smallest layer
//! index strictly greater than all its predecessors' layers. Nodes are
//! stored in an arena indexed by position; edges are an adjacency list over
//! those indices, with a `job_id → index` map built once per call. Output is
//! deterministic given identical node ordering, with ties broken by
//! `job_id`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use rf_error::ErrorCode;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Errors from topology computation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TopologyError {
    /// The graph contains a cycle; one participating edge is named.
    #[error("cycle detected through edge {from} -> {to}")]
    CycleDetected {
        /// Tail of a cycle edge.
        from: String,
        /// Head of a cycle edge.
        to: String,
    },

    /// An edge references a node that is not in the node set.
    #[error("edge references unknown node: {node}")]
    UnknownNode {
        /// The unknown node id.
        node: String,
    },
}

impl TopologyError {
    /// Map to the stable engine error code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::CycleDetected { .. } => ErrorCode::CycleDetected,
            Self::UnknownNode { .. } => ErrorCode::Internal,
        }
    }
}

/// Layer assignments for a job graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyLayers {
    /// Job id → layer index (0-based).
    pub layer_assignments: BTreeMap<String, usize>,
    /// Total number of layers.
    pub layer_count: usize,
}

impl TopologyLayers {
    /// Layer index for a job, if known.
    #[must_use]
    pub fn layer_of(&self, job_id: &str) -> Option<usize> {
        self.layer_assignments.get(job_id).copied()
    }
}

/// Compute topological layers for the given nodes and edges.
///
/// # Errors
///
/// Returns [`TopologyError::CycleDetected`] naming one edge on a cycle, or
/// [`TopologyError::UnknownNode`] when an edge endpoint is not a node.
///
/// # Examples
///
/// ```
/// let nodes = vec!["a".to_string(), "b".to_string(), "c".to_string()];
/// let edges = vec![("a".to_string(), "b".to_string()), ("b".to_string(), "c".to_string())];
/// let topo = rf_topo::compute_topology_layers(&nodes, &edges).unwrap();
/// assert_eq!(topo.layer_count, 3);
/// assert_eq!(topo.layer_of("a"), Some(0));
/// assert_eq!(topo.layer_of("c"), Some(2));
/// ```
pub fn compute_topology_layers(
    nodes: &[String],
    edges: &[(String, String)],
) -> Result<TopologyLayers, TopologyError> {
    // Sort ids once so iteration order (and with it tie-breaking) does not
    // depend on caller ordering.
    let mut sorted: Vec<&String> = nodes.iter().collect();
    sorted.sort();
    sorted.dedup();

    let index: HashMap<&str, usize> = sorted
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let resolve = |id: &String| -> Result<usize, TopologyError> {
        index
            .get(id.as_str())
            .copied()
            .ok_or_else(|| TopologyError::UnknownNode { node: id.clone() })
    };

    let n = sorted.len();
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut in_degree: Vec<usize> = vec![0; n];
    for (from, to) in edges {
        let f = resolve(from)?;
        let t = resolve(to)?;
        successors[f].push(t);
        in_degree[t] += 1;
    }
    for succ in &mut successors {
        succ.sort_unstable();
    }

    let mut layer: Vec<usize> = vec![0; n];
    let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut processed = 0usize;

    while let Some(i) = queue.pop_front() {
        processed += 1;
        for &s in &successors[i] {
            layer[s] = layer[s].max(layer[i] + 1);
            in_degree[s] -= 1;
            if in_degree[s] == 0 {
                queue.push_back(s);
            }
        }
    }

    if processed < n {
        // Some nodes never drained: walk predecessors among the remainder
        // until a repeat, then name the closing edge.
        return Err(find_cycle_edge(&sorted, &successors, &in_degree));
    }

    let layer_count = layer.iter().map(|&l| l + 1).max().unwrap_or(0);
    let layer_assignments = sorted
        .iter()
        .enumerate()
        .map(|(i, id)| ((*id).clone(), layer[i]))
        .collect();

    Ok(TopologyLayers {
        layer_assignments,
        layer_count,
    })
}

fn find_cycle_edge(
    sorted: &[&String],
    successors: &[Vec<usize>],
    in_degree: &[usize],
) -> TopologyError {
    // Nodes that never drained sit on a cycle or downstream of one. Strip
    // those with no remaining successor until only cycle members are left.
    let mut remaining: Vec<bool> = in_degree.iter().map(|&d| d > 0).collect();
    loop {
        let mut stripped = false;
        for i in 0..remaining.len() {
            if remaining[i] && !successors[i].iter().any(|&s| remaining[s]) {
                remaining[i] = false;
                stripped = true;
            }
        }
        if !stripped {
            break;
        }
    }

    // Every remaining node now has a remaining successor; walking must
    // close a loop within n steps.
    let start = remaining.iter().position(|&c| c).unwrap_or(0);
    let mut seen = vec![false; sorted.len()];
    let mut current = start;
    loop {
        seen[current] = true;
        let next = successors[current]
            .iter()
            .copied()
            .find(|&s| remaining[s])
            .unwrap_or(start);
        if seen[next] {
            return TopologyError::CycleDetected {
                from: sorted[current].clone(),
                to: sorted[next].clone(),
            };
        }
        current = next;
    }
}
