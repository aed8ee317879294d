// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property tests for topological layering.

use proptest::prelude::*;
use rf_topo::compute_topology_layers;

/// Random DAGs: nodes `n0..nk`, edges only from lower to higher index.
fn arb_dag() -> impl Strategy<Value = (Vec<String>, Vec<(String, String)>)> {
    (2usize..12).prop_flat_map(|n| {
        let nodes: Vec<String> = (0..n).map(|i| format!("n{i:02}")).collect();
        let pairs: Vec<(usize, usize)> = (0..n)
            .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
            .collect();
        let edge_subset = prop::collection::vec(any::<bool>(), pairs.len());
        edge_subset.prop_map(move |mask| {
            let edges = pairs
                .iter()
                .zip(&mask)
                .filter(|(_, keep)| **keep)
                .map(|(&(i, j), _)| (format!("n{i:02}"), format!("n{j:02}")))
                .collect();
            (nodes.clone(), edges)
        })
    })
}

proptest! {
    /// Every edge crosses strictly upward in layer index.
    #[test]
    fn edges_cross_layers_upward((nodes, edges) in arb_dag()) {
        let topo = compute_topology_layers(&nodes, &edges).unwrap();
        for (from, to) in &edges {
            let lf = topo.layer_of(from).unwrap();
            let lt = topo.layer_of(to).unwrap();
            prop_assert!(lf < lt, "{from}@{lf} must precede {to}@{lt}");
        }
    }

    /// Layer count is exactly one past the maximum assigned layer.
    #[test]
    fn layer_count_is_tight((nodes, edges) in arb_dag()) {
        let topo = compute_topology_layers(&nodes, &edges).unwrap();
        let max = topo.layer_assignments.values().copied().max().unwrap();
        prop_assert_eq!(topo.layer_count, max + 1);
        // Every node got an assignment.
        prop_assert_eq!(topo.layer_assignments.len(), nodes.len());
    }

    /// Assignments never depend on the order nodes are presented in.
    #[test]
    fn ordering_invariance((nodes, edges) in arb_dag()) {
        let forward = compute_topology_layers(&nodes, &edges).unwrap();
        let mut reversed = nodes.clone();
        reversed.reverse();
        let backward = compute_topology_layers(&reversed, &edges).unwrap();
        prop_assert_eq!(forward, backward);
    }
}
