//! Topological analysis of the element-induced connectivity graph.
//!
//! Three questions are answered here, all before any solving happens:
//! segment detection (floating nodes), voltage-level segmentation
//! (connected components ignoring transformer edges), and transformer
//! phase-shift propagation across voltage-level segments. All three are
//! recomputed explicitly by the caller after assembly; nothing is cached.

use crate::{Element, GridError, GridResult, Network, NodeId, Radians};
use petgraph::graph::{NodeIndex, UnGraph};
use std::collections::{HashMap, HashSet, VecDeque};

/// Disagreement tolerance for phase shifts reached over two paths.
const PHASE_SHIFT_TOLERANCE: f64 = 1e-6;

fn build_graph(network: &Network, include_transformers: bool) -> (UnGraph<NodeId, ()>, HashMap<NodeId, NodeIndex>) {
    let mut graph = UnGraph::new_undirected();
    let mut index = HashMap::new();
    for node in network.nodes() {
        index.insert(node.id, graph.add_node(node.id));
    }
    for element in network.elements() {
        if element.is_transformer() && !include_transformers {
            continue;
        }
        let nodes = element.nodes();
        // Multi-terminal elements connect every pair they touch.
        for i in 0..nodes.len() {
            for j in (i + 1)..nodes.len() {
                graph.add_edge(index[&nodes[i]], index[&nodes[j]], ());
            }
        }
    }
    (graph, index)
}

fn components(graph: &UnGraph<NodeId, ()>) -> Vec<Vec<NodeId>> {
    let mut visited: HashSet<NodeIndex> = HashSet::new();
    let mut result = Vec::new();
    for start in graph.node_indices() {
        if visited.contains(&start) {
            continue;
        }
        let mut queue = VecDeque::new();
        queue.push_back(start);
        let mut members = Vec::new();
        while let Some(node) = queue.pop_front() {
            if !visited.insert(node) {
                continue;
            }
            members.push(graph[node]);
            for neighbor in graph.neighbors(node) {
                if !visited.contains(&neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }
        members.sort();
        result.push(members);
    }
    result
}

/// Connected components over all element-induced edges. More than one
/// segment means the network has floating parts.
pub fn segments(network: &Network) -> Vec<Vec<NodeId>> {
    let (graph, _) = build_graph(network, true);
    components(&graph)
}

/// Connected components over non-transformer edges only: the groups of
/// nodes sharing one galvanic voltage level.
pub fn voltage_level_segments(network: &Network) -> Vec<Vec<NodeId>> {
    let (graph, _) = build_graph(network, false);
    components(&graph)
}

/// Propagate transformer nameplate phase shifts across voltage-level
/// segments and return the accumulated shift per node.
///
/// Every segment containing a feed-in seeds the walk at zero shift; each
/// transformer edge adds its signed nameplate shift. Reaching a segment
/// over two paths with disagreeing accumulated shift (beyond 1e-6 rad)
/// means the transformer data contradicts itself, which is fatal.
/// Segments not reachable from any feed-in keep a zero shift.
pub fn phase_shifts(network: &Network) -> GridResult<HashMap<NodeId, Radians>> {
    let levels = voltage_level_segments(network);
    let mut segment_of: HashMap<NodeId, usize> = HashMap::new();
    for (i, segment) in levels.iter().enumerate() {
        for &node in segment {
            segment_of.insert(node, i);
        }
    }

    // Segment-level edges, one per transformer phase-shift pair.
    let mut edges: Vec<(usize, usize, f64)> = Vec::new();
    for element in network.elements() {
        for (from, to, shift) in element.phase_shift_edges() {
            let (Some(&a), Some(&b)) = (segment_of.get(&from), segment_of.get(&to)) else {
                continue;
            };
            edges.push((a, b, shift.value()));
        }
    }

    let mut adjacency: HashMap<usize, Vec<(usize, f64)>> = HashMap::new();
    for &(a, b, shift) in &edges {
        adjacency.entry(a).or_default().push((b, shift));
        adjacency.entry(b).or_default().push((a, -shift));
    }

    // Seed from every feed-in segment.
    let mut accumulated: HashMap<usize, f64> = HashMap::new();
    let mut queue: VecDeque<usize> = VecDeque::new();
    for element in network.elements() {
        if let Element::FeedIn(feed_in) = element {
            if let Some(&segment) = segment_of.get(&feed_in.node) {
                if accumulated.insert(segment, 0.0).is_none() {
                    queue.push_back(segment);
                }
            }
        }
    }

    while let Some(segment) = queue.pop_front() {
        let here = accumulated[&segment];
        let Some(neighbors) = adjacency.get(&segment) else {
            continue;
        };
        for &(next, shift) in neighbors {
            let reached = here + shift;
            match accumulated.get(&next) {
                Some(&existing) => {
                    if (existing - reached).abs() > PHASE_SHIFT_TOLERANCE {
                        return Err(GridError::InconsistentPhaseShifts(format!(
                            "segment containing node {} reached with {existing} rad and {reached} rad",
                            levels[next]
                                .first()
                                .map(|id| id.to_string())
                                .unwrap_or_default()
                        )));
                    }
                }
                None => {
                    accumulated.insert(next, reached);
                    queue.push_back(next);
                }
            }
        }
    }

    let mut result = HashMap::new();
    for (node, &segment) in &segment_of {
        let shift = accumulated.get(&segment).copied().unwrap_or(0.0);
        result.insert(*node, Radians(shift));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NodeId, TransmissionLine, TwoWindingTransformer, Volts, Watts};
    use num_complex::Complex64;

    fn node(n: usize) -> NodeId {
        NodeId::new(n)
    }

    fn line(a: usize, b: usize) -> TransmissionLine {
        TransmissionLine {
            node_one: node(a),
            node_two: node(b),
            series_resistance_per_metre: 1e-4,
            series_inductance_per_metre: 0.0,
            shunt_conductance_per_metre: 0.0,
            shunt_capacitance_per_metre: 0.0,
            length: 1000.0,
            frequency: 50.0,
            transmission_equation_model: false,
        }
    }

    fn transformer(upper: usize, lower: usize, shift: f64) -> TwoWindingTransformer {
        TwoWindingTransformer {
            upper_node: node(upper),
            lower_node: node(lower),
            nominal_power: Watts(1e6),
            relative_short_circuit_voltage: 0.1,
            copper_losses: Watts(1e4),
            iron_losses: Watts(1e3),
            relative_no_load_current: 0.01,
            ratio: 5.0,
            nominal_phase_shift: Radians(shift),
        }
    }

    fn network_with_nodes(voltages: &[(usize, f64)]) -> Network {
        let mut network = Network::new();
        for &(id, v) in voltages {
            network
                .add_node(node(id), Volts(v), &format!("n{id}"))
                .unwrap();
        }
        network
    }

    #[test]
    fn test_segments_split_on_missing_connection() {
        let mut network =
            network_with_nodes(&[(0, 10_000.0), (1, 10_000.0), (2, 10_000.0)]);
        network.add_transmission_line(line(0, 1)).unwrap();
        let segments = segments(&network);
        assert_eq!(segments.len(), 2);
    }

    #[test]
    fn test_transformer_joins_segments_but_not_voltage_levels() {
        let mut network = network_with_nodes(&[(0, 10_000.0), (1, 2_000.0)]);
        network
            .add_two_winding_transformer(transformer(0, 1, 0.0))
            .unwrap();
        assert_eq!(segments(&network).len(), 1);
        assert_eq!(voltage_level_segments(&network).len(), 2);
    }

    #[test]
    fn test_phase_shift_propagates_from_feed_in() {
        let mut network = network_with_nodes(&[(0, 10_000.0), (1, 2_000.0)]);
        network
            .add_feed_in(node(0), Complex64::new(10_000.0, 0.0), Complex64::new(0.0, 0.0))
            .unwrap();
        network
            .add_two_winding_transformer(transformer(0, 1, 0.5))
            .unwrap();
        let shifts = phase_shifts(&network).unwrap();
        assert!((shifts[&node(0)].value() - 0.0).abs() < 1e-12);
        assert!((shifts[&node(1)].value() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_agreeing_parallel_paths_are_consistent() {
        // Two parallel transformers with the same shift between the same
        // two levels: path-independent result.
        let mut network =
            network_with_nodes(&[(0, 10_000.0), (1, 10_000.0), (2, 2_000.0), (3, 2_000.0)]);
        network.add_transmission_line(line(0, 1)).unwrap();
        network.add_transmission_line(line(2, 3)).unwrap();
        network
            .add_feed_in(node(0), Complex64::new(10_000.0, 0.0), Complex64::new(0.0, 0.0))
            .unwrap();
        network
            .add_two_winding_transformer(transformer(0, 2, 0.3))
            .unwrap();
        network
            .add_two_winding_transformer(transformer(1, 3, 0.3))
            .unwrap();
        let shifts = phase_shifts(&network).unwrap();
        assert!((shifts[&node(3)].value() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_disagreeing_parallel_paths_are_fatal() {
        let mut network =
            network_with_nodes(&[(0, 10_000.0), (1, 10_000.0), (2, 2_000.0), (3, 2_000.0)]);
        network.add_transmission_line(line(0, 1)).unwrap();
        network.add_transmission_line(line(2, 3)).unwrap();
        network
            .add_feed_in(node(0), Complex64::new(10_000.0, 0.0), Complex64::new(0.0, 0.0))
            .unwrap();
        network
            .add_two_winding_transformer(transformer(0, 2, 0.3))
            .unwrap();
        network
            .add_two_winding_transformer(transformer(1, 3, 0.4))
            .unwrap();
        let err = phase_shifts(&network).unwrap_err();
        assert!(matches!(err, GridError::InconsistentPhaseShifts(_)));
    }

    #[test]
    fn test_three_winding_triangle_closes() {
        use crate::ThreeWindingTransformer;
        let mut network =
            network_with_nodes(&[(0, 110_000.0), (1, 20_000.0), (2, 10_000.0)]);
        network
            .add_feed_in(node(0), Complex64::new(110_000.0, 0.0), Complex64::new(0.0, 0.0))
            .unwrap();
        network
            .add_three_winding_transformer(ThreeWindingTransformer {
                node_one: node(0),
                node_two: node(1),
                node_three: node(2),
                nominal_powers: (Watts(1e6), Watts(1e6), Watts(1e6)),
                relative_short_circuit_voltages: (0.1, 0.1, 0.1),
                copper_losses: (Watts(1e4), Watts(1e4), Watts(1e4)),
                iron_losses: Watts(0.0),
                relative_no_load_current: 0.01,
                phase_shifts: (Radians(0.2), Radians(0.5)),
            })
            .unwrap();
        // The 2→3 edge is derived as 0.5 − 0.2, so the triangle cannot
        // contradict itself.
        let shifts = phase_shifts(&network).unwrap();
        assert!((shifts[&node(1)].value() - 0.2).abs() < 1e-9);
        assert!((shifts[&node(2)].value() - 0.5).abs() < 1e-9);
    }
}
