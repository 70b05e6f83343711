//! Network assembly: from the element model to the per-unit admittance
//! matrix, node index, and per-node constraints.
//!
//! The full node index holds the external nodes first (zero-impedance
//! groups share one slot), then every element's internal nodes from the
//! same dense arena, then the ground node when any stamp needs it. Each
//! element stamps its own admittance and current contributions, scaled
//! through the `DimensionScaler` of the voltage level it touches.

use crate::admittance::AdmittanceMatrix;
use crate::solve::NodeSpec;
use gridflow_core::{
    DimensionScaler, Element, GridError, GridResult, Network, NodeId, Volts, Watts,
};
use num_complex::Complex64;
use std::collections::HashMap;
use tracing::debug;

/// Everything the orchestrator needs to run a solver and interpret its
/// results.
pub struct Assembly {
    /// Per-unit admittance matrix over the full node index.
    pub matrix: AdmittanceMatrix,
    /// Constraint per matrix index.
    pub specs: Vec<NodeSpec>,
    /// Display name per matrix index.
    pub names: Vec<String>,
    /// External node → matrix slot (coalesced nodes share a slot).
    pub external_index: HashMap<NodeId, usize>,
    /// Members per external slot, sorted by id.
    pub groups: Vec<Vec<NodeId>>,
    /// Scaler per external slot (voltage base of the level, shared power
    /// base).
    pub scalers: Vec<DimensionScaler>,
    /// Network-wide power base: average |load/generation|, or 1.
    pub power_base: f64,
}

/// Minimal union-find for coalescing zero-impedance connections.
struct UnionFind {
    parent: HashMap<NodeId, NodeId>,
}

impl UnionFind {
    fn new(network: &Network) -> Self {
        Self {
            parent: network.nodes().iter().map(|n| (n.id, n.id)).collect(),
        }
    }

    fn find(&mut self, id: NodeId) -> NodeId {
        let parent = self.parent[&id];
        if parent == id {
            return id;
        }
        let root = self.find(parent);
        self.parent.insert(id, root);
        root
    }

    fn union(&mut self, a: NodeId, b: NodeId) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            // Deterministic representative: the smaller id wins.
            let (keep, fold) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent.insert(fold, keep);
        }
    }
}

pub fn assemble(network: &Network) -> GridResult<Assembly> {
    let power_base = network.average_power_magnitude();
    let no_load = network
        .elements()
        .iter()
        .all(|e| !matches!(e, Element::Load(_) | Element::Generator(_)));

    // Zero-impedance lines merge their end nodes into one matrix slot.
    let mut union = UnionFind::new(network);
    for element in network.elements() {
        if let Element::TransmissionLine(line) = element {
            if line.is_direct_connection() {
                union.union(line.node_one, line.node_two);
            }
        }
    }

    // External slots in node insertion order.
    let mut external_index: HashMap<NodeId, usize> = HashMap::new();
    let mut groups: Vec<Vec<NodeId>> = Vec::new();
    let mut slot_of_root: HashMap<NodeId, usize> = HashMap::new();
    for node in network.nodes() {
        let root = union.find(node.id);
        let slot = *slot_of_root.entry(root).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        external_index.insert(node.id, slot);
        groups[slot].push(node.id);
    }
    for group in &mut groups {
        group.sort();
    }

    let mut scalers = Vec::with_capacity(groups.len());
    let mut names = Vec::with_capacity(groups.len());
    for group in &groups {
        let first = group[0];
        let node = network.node(first).ok_or(GridError::UnknownNode(first))?;
        scalers.push(DimensionScaler::new(
            node.nominal_voltage,
            Watts(power_base),
        )?);
        names.push(
            group
                .iter()
                .filter_map(|id| network.node(*id).map(|n| n.name.clone()))
                .collect::<Vec<_>>()
                .join("+"),
        );
    }

    // Internal nodes from the same dense arena, after the externals.
    let mut next_index = groups.len();
    let mut internal_of_element: Vec<Vec<usize>> = Vec::new();
    for element in network.elements() {
        let count = element.internal_node_count(network);
        let indices: Vec<usize> = (next_index..next_index + count).collect();
        for offset in 0..count {
            names.push(format!("{} (internal {})", element.label(), offset + 1));
        }
        next_index += count;
        internal_of_element.push(indices);
    }

    let needs_ground = network.elements().iter().any(|e| e.needs_ground());
    let ground = if needs_ground {
        names.push("ground".to_string());
        let index = next_index;
        next_index += 1;
        Some(index)
    } else {
        None
    };

    let order = next_index;
    let mut matrix = AdmittanceMatrix::new(order);
    let mut specs: Vec<NodeSpec> = vec![
        NodeSpec::Pq {
            power: Complex64::new(0.0, 0.0)
        };
        order
    ];

    debug!(
        externals = groups.len(),
        internals = order - groups.len() - usize::from(needs_ground),
        ground = needs_ground,
        power_base,
        "assembled node index"
    );

    // Stamp every element.
    for (element, internals) in network.elements().iter().zip(&internal_of_element) {
        stamp_element(
            network,
            element,
            internals,
            ground,
            &external_index,
            &scalers,
            power_base,
            no_load,
            &mut matrix,
            &mut specs,
        )?;
    }

    // Classify the external slots.
    for (slot, group) in groups.iter().enumerate() {
        let scaler = &scalers[slot];
        let elements: Vec<&Element> = group
            .iter()
            .flat_map(|id| network.elements_at_node(*id))
            .collect();

        let slack = elements.iter().find(|e| e.enforces_slack());
        let pv = elements.iter().find(|e| e.enforces_pv());

        if let Some(Element::FeedIn(feed_in)) = slack {
            specs[slot] = NodeSpec::Slack {
                voltage: scaler.scale_voltage(feed_in.voltage),
            };
            continue;
        }

        let load_sum: Complex64 = elements
            .iter()
            .filter_map(|e| match e {
                Element::Load(load) => Some(load.power),
                _ => None,
            })
            .sum();

        if let Some(Element::Generator(generator)) = pv {
            specs[slot] = NodeSpec::Pv {
                magnitude: generator.voltage_magnitude.value() / scaler.voltage_base(),
                real_power: (generator.real_power.value() + load_sum.re) / power_base,
            };
        } else {
            specs[slot] = NodeSpec::Pq {
                power: scaler.scale_power(load_sum),
            };
        }
    }

    if let Some(ground) = ground {
        specs[ground] = NodeSpec::Slack {
            voltage: Complex64::new(0.0, 0.0),
        };
    }

    Ok(Assembly {
        matrix,
        specs,
        names,
        external_index,
        groups,
        scalers,
        power_base,
    })
}

#[allow(clippy::too_many_arguments)]
fn stamp_element(
    network: &Network,
    element: &Element,
    internals: &[usize],
    ground: Option<usize>,
    external_index: &HashMap<NodeId, usize>,
    scalers: &[DimensionScaler],
    power_base: f64,
    no_load: bool,
    matrix: &mut AdmittanceMatrix,
    specs: &mut [NodeSpec],
) -> GridResult<()> {
    let slot = |id: NodeId| external_index[&id];
    let require_ground = |ground: Option<usize>| -> GridResult<usize> {
        ground.ok_or_else(|| {
            GridError::Other(format!("{} needs a ground node", element.label()))
        })
    };

    match element {
        Element::Load(_) | Element::Generator(_) => {}

        Element::ImpedanceLoad(load) => {
            let node = slot(load.node);
            let z = scalers[node].scale_impedance(load.impedance);
            let ground = require_ground(ground)?;
            matrix.add_connection(node, ground, z.inv());
        }

        Element::FeedIn(feed_in) => {
            if feed_in.internal_impedance.norm() > 0.0 {
                let node = slot(feed_in.node);
                let internal = internals[0];
                let scaler = &scalers[node];
                let z = scaler.scale_impedance(feed_in.internal_impedance);
                matrix.add_connection(node, internal, z.inv());
                specs[internal] = NodeSpec::Slack {
                    voltage: scaler.scale_voltage(feed_in.voltage),
                };
            }
            // Ideal source: no stamp; the external node is the slack and
            // classification handles it.
        }

        Element::CurrentSource(source) => {
            let node = slot(source.node);
            let internal = internals[0];
            let scaler = &scalers[node];
            let z = scaler.scale_impedance(source.internal_impedance);
            matrix.add_connection(node, internal, z.inv());
            matrix.inject_current(internal, scaler.scale_current(source.current));
            // The internal node already defaults to a zero-power PQ spec.
        }

        Element::TransmissionLine(line) => {
            let one = slot(line.node_one);
            let two = slot(line.node_two);
            let scaler = &scalers[one];
            let (series, shunt_per_end) = line.equivalent_circuit();
            if series.norm() > 0.0 && one != two {
                matrix.add_connection(one, two, scaler.scale_impedance(series).inv());
            }
            if shunt_per_end.norm() > 0.0 {
                let ground = require_ground(ground)?;
                let y = scaler.scale_admittance(shunt_per_end);
                matrix.add_connection(one, ground, y);
                matrix.add_connection(two, ground, y);
            }
        }

        Element::TwoWindingTransformer(transformer) => {
            let upper = slot(transformer.upper_node);
            let lower = slot(transformer.lower_node);
            let ground = require_ground(ground)?;
            let z = transformer.short_circuit_impedance_pu(power_base);
            let magnetizing = transformer.magnetizing_admittance_pu(power_base);
            let nominal_ratio = network.nominal_ratio(transformer);

            if transformer.has_nominal_ratio(nominal_ratio) {
                // π-stamp: series branch plus the magnetizing shunt split
                // across both ends.
                matrix.add_connection(upper, lower, z.inv());
                matrix.add_connection(upper, ground, magnetizing / 2.0);
                matrix.add_connection(lower, ground, magnetizing / 2.0);
            } else {
                // Off-nominal ratio: series branch to an internal node,
                // then an ideal transformer onto the lower side.
                let junction = internals[0];
                let auxiliary = internals[1];
                let relative_ratio = Complex64::from_polar(
                    transformer.ratio / nominal_ratio,
                    transformer.nominal_phase_shift.value(),
                );
                let upper_voltage = network
                    .node(transformer.upper_node)
                    .map(|n| n.nominal_voltage)
                    .unwrap_or(Volts(1.0));
                let weight = if no_load {
                    1.0
                } else {
                    upper_voltage.value() / power_base
                };
                matrix.add_connection(upper, junction, z.inv());
                matrix.add_ideal_transformer(
                    junction,
                    ground,
                    lower,
                    ground,
                    auxiliary,
                    relative_ratio,
                    weight,
                )?;
                matrix.add_connection(upper, ground, magnetizing);
            }
        }

        Element::ThreeWindingTransformer(transformer) => {
            let one = slot(transformer.node_one);
            let two = slot(transformer.node_two);
            let three = slot(transformer.node_three);
            let ground = require_ground(ground)?;
            let star = internals[0];
            let (z1, z2, z3) = transformer.star_leg_impedances_pu(power_base);
            for (node, z) in [(one, z1), (two, z2), (three, z3)] {
                // A star leg can come out (near) zero from the pairwise
                // data; a stiff tie keeps the matrix finite.
                let y = if z.norm() > 1e-10 {
                    z.inv()
                } else {
                    Complex64::new(1e10, 0.0)
                };
                matrix.add_connection(node, star, y);
            }
            matrix.add_connection(one, ground, transformer.magnetizing_admittance_pu(power_base));
        }
    }
    Ok(())
}
