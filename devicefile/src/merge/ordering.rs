//! Reconciling sibling order across devices.
//!
//! Each device lists its children in some order. The merged tree needs one
//! order from which every device's own order falls out by dropping the
//! nodes it does not have. That is a topological order of the "comes
//! before" relation collected from all devices; a cycle means two devices
//! disagree and nothing can be merged without guessing.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

/// Two items that some devices place in opposite order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderConflict {
    /// Items left over when no further item could be placed; all of them
    /// sit on or behind a cycle.
    pub stuck: Vec<usize>,
}

/// Find an order of `0..count` that respects every sequence in `sequences`
/// and every chain in `chains`.
///
/// Among the items that may come next, the one with the lowest index wins,
/// so items keep their order of first appearance where devices allow it.
pub fn reconcile(
    count: usize,
    sequences: &[Vec<usize>],
    chains: &[Vec<usize>],
) -> Result<Vec<usize>, OrderConflict> {
    let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(count, count);
    let nodes: Vec<NodeIndex> = (0..count).map(|i| graph.add_node(i)).collect();

    for seq in sequences.iter().chain(chains.iter()) {
        for pair in seq.windows(2) {
            graph.update_edge(nodes[pair[0]], nodes[pair[1]], ());
        }
    }

    let mut in_degree: Vec<usize> = nodes
        .iter()
        .map(|&n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(count);
    while let Some(Reverse(item)) = ready.pop() {
        order.push(item);
        for next in graph.neighbors_directed(nodes[item], Direction::Outgoing) {
            let next = graph[next];
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() < count {
        let stuck = (0..count).filter(|i| !order.contains(i)).collect();
        return Err(OrderConflict { stuck });
    }
    Ok(order)
}
