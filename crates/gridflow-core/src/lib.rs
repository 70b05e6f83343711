//! # gridflow-core: Load-Flow Network Modeling Core
//!
//! Provides the data model for AC load-flow analysis across multiple
//! voltage levels: user-addressable nodes, the closed set of network
//! elements (loads, generators, feed-ins, lines, transformers, current
//! sources), unit newtypes with the per-unit conversion layer, and
//! topology analysis over the element-induced connectivity graph.
//!
//! ## Design Philosophy
//!
//! The model is append-only: nodes and elements are registered through the
//! `add_*` builder methods, each of which validates its own numeric
//! preconditions at call time, and the assembled network is immutable
//! afterwards. Solving never mutates the model; results come back as a
//! separate id → result map from `gridflow-solver`.
//!
//! Elements form a **closed variant set** ([`Element`]): each variant
//! declares which nodes it touches, whether it fixes a voltage (slack) or a
//! voltage magnitude (PV), how many auxiliary internal nodes its stamp
//! needs, and whether its stamp requires the ground node. The admittance
//! stamping itself lives in `gridflow-solver`, next to the matrix it
//! writes into.
//!
//! ## Modules
//!
//! - [`units`] - Unit newtypes and the [`DimensionScaler`](units::DimensionScaler)
//! - [`error`] - Unified [`GridError`](error::GridError) type
//! - [`topology`] - Segments, voltage-level segments, phase-shift propagation

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod error;
pub mod topology;
pub mod units;

pub use error::{GridError, GridResult};
pub use topology::{phase_shifts, segments, voltage_level_segments};
pub use units::{
    Amperes, Degrees, DimensionScaler, Ohms, PerUnit, Radians, Volts, Watts, MINIMUM_BASE,
};

/// Relative tolerance for "same nominal voltage" across a direct connection.
pub const VOLTAGE_MATCH_TOLERANCE: f64 = 1e-5;

/// Newtype wrapper for node ids for type safety.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(usize);

impl NodeId {
    #[inline]
    pub fn new(value: usize) -> Self {
        NodeId(value)
    }
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user-addressable node of the network.
///
/// Nominal voltage anchors the per-unit bases for every element connected
/// here; the nominal phase shift is declarative metadata from the network
/// plan (the solved phase shift is an output, not an input).
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub nominal_voltage: Volts,
    pub nominal_phase_shift: Radians,
}

// ---------------------------------------------------------------------------
// Elements
// ---------------------------------------------------------------------------

/// Constant complex power drawn or injected at a node. Stamps nothing into
/// the admittance matrix; contributes only to the node's power target.
/// Consumption is negative by convention.
#[derive(Debug, Clone)]
pub struct Load {
    pub node: NodeId,
    /// Complex power in volt-amperes (negative real part = consumption).
    pub power: Complex64,
}

/// A load modeled as a fixed impedance to ground.
#[derive(Debug, Clone)]
pub struct ImpedanceLoad {
    pub node: NodeId,
    /// Impedance in ohms; must have nonzero magnitude.
    pub impedance: Complex64,
}

/// Voltage-magnitude-controlled machine: fixes |V| and real power at its
/// node (PV enforcement). No admittance stamp.
#[derive(Debug, Clone)]
pub struct Generator {
    pub node: NodeId,
    pub voltage_magnitude: Volts,
    pub real_power: Watts,
}

/// Network feed-in: fixes the complex voltage behind an optional internal
/// impedance. With zero internal impedance the external node itself becomes
/// the slack; otherwise the slack sits on an internal node and the
/// impedance is stamped between the two.
#[derive(Debug, Clone)]
pub struct FeedIn {
    pub node: NodeId,
    /// Fixed complex voltage in volts.
    pub voltage: Complex64,
    /// Internal source impedance in ohms; zero means an ideal source.
    pub internal_impedance: Complex64,
}

/// Transmission line between two nodes on the same voltage level.
///
/// Per-length parameters are SI (Ω/m, H/m, S/m, F/m); the series and shunt
/// elements follow from length and frequency. Three models apply, chosen
/// per the data: a plain series impedance when there is no shunt, the exact
/// hyperbolic transmission-equation model when requested and the series
/// parameters are nonzero, and the simplified π-model otherwise.
#[derive(Debug, Clone)]
pub struct TransmissionLine {
    pub node_one: NodeId,
    pub node_two: NodeId,
    pub series_resistance_per_metre: f64,
    pub series_inductance_per_metre: f64,
    pub shunt_conductance_per_metre: f64,
    pub shunt_capacitance_per_metre: f64,
    /// Line length in metres.
    pub length: f64,
    /// System frequency in hertz.
    pub frequency: f64,
    /// Use the exact transmission-equation (wave) model when possible.
    pub transmission_equation_model: bool,
}

impl TransmissionLine {
    fn angular_frequency(&self) -> f64 {
        2.0 * std::f64::consts::PI * self.frequency
    }

    /// Series impedance per metre, Ω/m.
    pub fn series_impedance_per_metre(&self) -> Complex64 {
        Complex64::new(
            self.series_resistance_per_metre,
            self.angular_frequency() * self.series_inductance_per_metre,
        )
    }

    /// Shunt admittance per metre, S/m.
    pub fn shunt_admittance_per_metre(&self) -> Complex64 {
        Complex64::new(
            self.shunt_conductance_per_metre,
            self.angular_frequency() * self.shunt_capacitance_per_metre,
        )
    }

    /// A line whose total series impedance vanishes acts as a direct
    /// connection; its end nodes can be coalesced.
    pub fn is_direct_connection(&self) -> bool {
        self.series_impedance_per_metre().norm() * self.length == 0.0
    }

    pub fn has_shunt(&self) -> bool {
        self.shunt_admittance_per_metre().norm() * self.length > 0.0
    }

    /// Total series impedance and per-end shunt admittance in physical
    /// units (Ω, S), after model selection.
    ///
    /// Returns `(series, shunt_per_end)`. For the direct-connection case the
    /// series impedance is zero and only the shunt (if any) remains.
    pub fn equivalent_circuit(&self) -> (Complex64, Complex64) {
        let z = self.series_impedance_per_metre() * self.length;
        let y = self.shunt_admittance_per_metre() * self.length;

        if self.is_direct_connection() {
            return (Complex64::new(0.0, 0.0), y / 2.0);
        }
        if !self.has_shunt() {
            return (z, Complex64::new(0.0, 0.0));
        }
        if self.transmission_equation_model {
            // Wave model: Z = Zw·sinh(γl), Y/2 = tanh(γl/2)/Zw with
            // Zw = √(z'/y') and γl = √(z'·y')·l.
            let z_per = self.series_impedance_per_metre();
            let y_per = self.shunt_admittance_per_metre();
            let wave_impedance = (z_per / y_per).sqrt();
            let gamma_length = (z_per * y_per).sqrt() * self.length;
            let series = wave_impedance * gamma_length.sinh();
            let shunt = (gamma_length / 2.0).tanh() / wave_impedance;
            return (series, shunt);
        }
        // Simplified π-model: half the total shunt at each end.
        (z, y / 2.0)
    }
}

/// Two-winding transformer. Nameplate data in physical units; node one is
/// the upper-voltage side.
#[derive(Debug, Clone)]
pub struct TwoWindingTransformer {
    pub upper_node: NodeId,
    pub lower_node: NodeId,
    pub nominal_power: Watts,
    /// Relative short-circuit voltage, in (0, 1].
    pub relative_short_circuit_voltage: f64,
    pub copper_losses: Watts,
    pub iron_losses: Watts,
    /// Relative no-load current, in (0, 1].
    pub relative_no_load_current: f64,
    /// Actual winding ratio (upper voltage / lower voltage).
    pub ratio: f64,
    /// Nameplate phase shift from upper to lower side.
    pub nominal_phase_shift: Radians,
}

impl TwoWindingTransformer {
    /// Short-circuit (series) impedance in per-unit on the given network
    /// power base, assuming the winding nominal voltages equal the node
    /// nominal voltages.
    pub fn short_circuit_impedance_pu(&self, power_base: f64) -> Complex64 {
        let sn = self.nominal_power.value();
        let scale = power_base / sn;
        let r = self.copper_losses.value() / sn * scale;
        let z = self.relative_short_circuit_voltage * scale;
        // Copper losses are bounded by u_k·Sn at construction, so z ≥ r.
        let x = (z * z - r * r).max(0.0).sqrt();
        Complex64::new(r, x)
    }

    /// Magnetizing (shunt) admittance in per-unit on the given network
    /// power base, from iron losses and the relative no-load current.
    pub fn magnetizing_admittance_pu(&self, power_base: f64) -> Complex64 {
        let sn = self.nominal_power.value();
        let magnitude = self.relative_no_load_current * sn / power_base;
        let g = self.iron_losses.value() / power_base;
        let b = (magnitude * magnitude - g * g).max(0.0).sqrt();
        // Inductive magnetizing branch.
        Complex64::new(g, -b)
    }

    /// True when the actual ratio matches the nominal node-voltage ratio
    /// and no phase shift applies, so a plain π-stamp suffices.
    pub fn has_nominal_ratio(&self, nominal_ratio: f64) -> bool {
        (self.ratio - nominal_ratio).abs() <= VOLTAGE_MATCH_TOLERANCE * nominal_ratio
            && self.nominal_phase_shift.value().abs() <= VOLTAGE_MATCH_TOLERANCE
    }
}

/// Three-winding transformer with a star-equivalent stamp around one
/// internal node.
#[derive(Debug, Clone)]
pub struct ThreeWindingTransformer {
    pub node_one: NodeId,
    pub node_two: NodeId,
    pub node_three: NodeId,
    /// Pair nominal powers: (1↔2, 2↔3, 1↔3).
    pub nominal_powers: (Watts, Watts, Watts),
    /// Pair relative short-circuit voltages, each in (0, 1].
    pub relative_short_circuit_voltages: (f64, f64, f64),
    /// Pair copper losses.
    pub copper_losses: (Watts, Watts, Watts),
    pub iron_losses: Watts,
    /// Relative no-load current on the primary, in (0, 1].
    pub relative_no_load_current: f64,
    /// Nameplate phase shifts 1→2 and 1→3; 2→3 follows from triangle
    /// closure: shift(2→3) = shift(1→3) − shift(1→2).
    pub phase_shifts: (Radians, Radians),
}

impl ThreeWindingTransformer {
    fn pair_impedance_pu(
        power_base: f64,
        nominal_power: Watts,
        relative_voltage: f64,
        copper_losses: Watts,
    ) -> Complex64 {
        let sn = nominal_power.value();
        let scale = power_base / sn;
        let r = copper_losses.value() / sn * scale;
        let z = relative_voltage * scale;
        let x = (z * z - r * r).max(0.0).sqrt();
        Complex64::new(r, x)
    }

    /// Star-equivalent leg impedances in per-unit on the network power
    /// base, one per winding. Solved from the three pairwise short-circuit
    /// measurements: each measurement sees the series pair of two legs.
    pub fn star_leg_impedances_pu(&self, power_base: f64) -> (Complex64, Complex64, Complex64) {
        let z12 = Self::pair_impedance_pu(
            power_base,
            self.nominal_powers.0,
            self.relative_short_circuit_voltages.0,
            self.copper_losses.0,
        );
        let z23 = Self::pair_impedance_pu(
            power_base,
            self.nominal_powers.1,
            self.relative_short_circuit_voltages.1,
            self.copper_losses.1,
        );
        let z13 = Self::pair_impedance_pu(
            power_base,
            self.nominal_powers.2,
            self.relative_short_circuit_voltages.2,
            self.copper_losses.2,
        );
        let z1 = (z12 + z13 - z23) / 2.0;
        let z2 = (z12 + z23 - z13) / 2.0;
        let z3 = (z13 + z23 - z12) / 2.0;
        (z1, z2, z3)
    }

    /// Shared magnetizing admittance in per-unit on the network power base.
    pub fn magnetizing_admittance_pu(&self, power_base: f64) -> Complex64 {
        let sn = self.nominal_powers.0.value();
        let magnitude = self.relative_no_load_current * sn / power_base;
        let g = self.iron_losses.value() / power_base;
        let b = (magnitude * magnitude - g * g).max(0.0).sqrt();
        Complex64::new(g, -b)
    }

    /// Phase shift 2→3 from triangle closure.
    pub fn phase_shift_two_to_three(&self) -> Radians {
        Radians(self.phase_shifts.1.value() - self.phase_shifts.0.value())
    }
}

/// Constant current source behind an internal impedance.
#[derive(Debug, Clone)]
pub struct CurrentSource {
    pub node: NodeId,
    /// Injected current in amperes; must have nonzero magnitude.
    pub current: Complex64,
    /// Internal impedance in ohms; must have nonzero magnitude.
    pub internal_impedance: Complex64,
}

/// The closed set of network elements.
#[derive(Debug, Clone)]
pub enum Element {
    Load(Load),
    ImpedanceLoad(ImpedanceLoad),
    Generator(Generator),
    FeedIn(FeedIn),
    TransmissionLine(TransmissionLine),
    TwoWindingTransformer(TwoWindingTransformer),
    ThreeWindingTransformer(ThreeWindingTransformer),
    CurrentSource(CurrentSource),
}

impl Element {
    /// External nodes this element touches.
    pub fn nodes(&self) -> Vec<NodeId> {
        match self {
            Element::Load(e) => vec![e.node],
            Element::ImpedanceLoad(e) => vec![e.node],
            Element::Generator(e) => vec![e.node],
            Element::FeedIn(e) => vec![e.node],
            Element::TransmissionLine(e) => vec![e.node_one, e.node_two],
            Element::TwoWindingTransformer(e) => vec![e.upper_node, e.lower_node],
            Element::ThreeWindingTransformer(e) => vec![e.node_one, e.node_two, e.node_three],
            Element::CurrentSource(e) => vec![e.node],
        }
    }

    /// Whether this element fixes a complex voltage at its external node.
    ///
    /// Only an ideal feed-in (zero internal impedance) enforces slack on
    /// the external node; with internal impedance the fixed voltage moves
    /// onto the element's own internal node.
    pub fn enforces_slack(&self) -> bool {
        matches!(self, Element::FeedIn(f) if f.internal_impedance.norm() == 0.0)
    }

    /// Whether this element fixes a voltage magnitude and real power.
    pub fn enforces_pv(&self) -> bool {
        matches!(self, Element::Generator(_))
    }

    /// Number of auxiliary internal nodes the element's stamp owns.
    ///
    /// The count depends on the data, not just the variant: a feed-in only
    /// needs its internal slack node when it has internal impedance, and a
    /// two-winding transformer only needs its two auxiliary nodes when its
    /// ratio is off-nominal (the ideal-transformer stamp).
    pub fn internal_node_count(&self, network: &Network) -> usize {
        match self {
            Element::FeedIn(f) if f.internal_impedance.norm() > 0.0 => 1,
            Element::CurrentSource(_) => 1,
            Element::ThreeWindingTransformer(_) => 1,
            Element::TwoWindingTransformer(t) if !t.has_nominal_ratio(network.nominal_ratio(t)) => 2,
            _ => 0,
        }
    }

    /// Whether the element's stamp reaches the ground node.
    pub fn needs_ground(&self) -> bool {
        match self {
            Element::ImpedanceLoad(_) => true,
            Element::TransmissionLine(line) => line.has_shunt(),
            Element::TwoWindingTransformer(_) => true,
            Element::ThreeWindingTransformer(_) => true,
            Element::CurrentSource(_) => true,
            _ => false,
        }
    }

    /// Whether this element is a transformer (couples voltage levels).
    pub fn is_transformer(&self) -> bool {
        matches!(
            self,
            Element::TwoWindingTransformer(_) | Element::ThreeWindingTransformer(_)
        )
    }

    /// Signed nameplate phase-shift edges contributed to the segment graph.
    pub fn phase_shift_edges(&self) -> Vec<(NodeId, NodeId, Radians)> {
        match self {
            Element::TwoWindingTransformer(t) => {
                vec![(t.upper_node, t.lower_node, t.nominal_phase_shift)]
            }
            Element::ThreeWindingTransformer(t) => vec![
                (t.node_one, t.node_two, t.phase_shifts.0),
                (t.node_one, t.node_three, t.phase_shifts.1),
                (t.node_two, t.node_three, t.phase_shift_two_to_three()),
            ],
            _ => Vec::new(),
        }
    }

    /// Human-readable label for validation messages.
    pub fn label(&self) -> String {
        match self {
            Element::Load(e) => format!("load at node {}", e.node),
            Element::ImpedanceLoad(e) => format!("impedance load at node {}", e.node),
            Element::Generator(e) => format!("generator at node {}", e.node),
            Element::FeedIn(e) => format!("feed-in at node {}", e.node),
            Element::TransmissionLine(e) => {
                format!("transmission line {}-{}", e.node_one, e.node_two)
            }
            Element::TwoWindingTransformer(e) => {
                format!("two-winding transformer {}-{}", e.upper_node, e.lower_node)
            }
            Element::ThreeWindingTransformer(e) => format!(
                "three-winding transformer {}-{}-{}",
                e.node_one, e.node_two, e.node_three
            ),
            Element::CurrentSource(e) => format!("current source at node {}", e.node),
        }
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// The assembled network: registered nodes plus the elements connected to
/// them. Append-only; the solve reads it without mutation.
#[derive(Debug, Default)]
pub struct Network {
    nodes: Vec<Node>,
    node_index: HashMap<NodeId, usize>,
    elements: Vec<Element>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node with nominal voltage and zero nominal phase shift.
    pub fn add_node(&mut self, id: NodeId, nominal_voltage: Volts, name: &str) -> GridResult<()> {
        self.add_node_with_phase_shift(id, nominal_voltage, Radians::ZERO, name)
    }

    /// Register a node with an explicit nominal phase shift.
    pub fn add_node_with_phase_shift(
        &mut self,
        id: NodeId,
        nominal_voltage: Volts,
        nominal_phase_shift: Radians,
        name: &str,
    ) -> GridResult<()> {
        if self.node_index.contains_key(&id) {
            return Err(GridError::DuplicateNode(id));
        }
        if !(nominal_voltage.value() > 0.0) {
            return Err(GridError::parameter(
                format!("node {id}"),
                "nominal voltage must be positive",
            ));
        }
        self.node_index.insert(id, self.nodes.len());
        self.nodes.push(Node {
            id,
            name: name.to_string(),
            nominal_voltage,
            nominal_phase_shift,
        });
        Ok(())
    }

    fn require_node(&self, id: NodeId) -> GridResult<&Node> {
        self.node_index
            .get(&id)
            .map(|&i| &self.nodes[i])
            .ok_or(GridError::UnknownNode(id))
    }

    pub fn add_load(&mut self, node: NodeId, power: Complex64) -> GridResult<()> {
        self.require_node(node)?;
        if !power.re.is_finite() || !power.im.is_finite() {
            return Err(GridError::parameter(
                format!("load at node {node}"),
                "power must be finite",
            ));
        }
        self.elements.push(Element::Load(Load { node, power }));
        Ok(())
    }

    pub fn add_impedance_load(&mut self, node: NodeId, impedance: Complex64) -> GridResult<()> {
        self.require_node(node)?;
        if !(impedance.norm() > 0.0) {
            return Err(GridError::parameter(
                format!("impedance load at node {node}"),
                "impedance magnitude must be positive",
            ));
        }
        self.elements
            .push(Element::ImpedanceLoad(ImpedanceLoad { node, impedance }));
        Ok(())
    }

    pub fn add_generator(
        &mut self,
        node: NodeId,
        voltage_magnitude: Volts,
        real_power: Watts,
    ) -> GridResult<()> {
        self.require_node(node)?;
        if !(voltage_magnitude.value() > 0.0) {
            return Err(GridError::parameter(
                format!("generator at node {node}"),
                "voltage magnitude must be positive",
            ));
        }
        self.elements.push(Element::Generator(Generator {
            node,
            voltage_magnitude,
            real_power,
        }));
        Ok(())
    }

    pub fn add_feed_in(
        &mut self,
        node: NodeId,
        voltage: Complex64,
        internal_impedance: Complex64,
    ) -> GridResult<()> {
        self.require_node(node)?;
        if !(voltage.norm() > 0.0) {
            return Err(GridError::parameter(
                format!("feed-in at node {node}"),
                "voltage magnitude must be positive",
            ));
        }
        self.elements.push(Element::FeedIn(FeedIn {
            node,
            voltage,
            internal_impedance,
        }));
        Ok(())
    }

    pub fn add_transmission_line(&mut self, line: TransmissionLine) -> GridResult<()> {
        self.require_node(line.node_one)?;
        self.require_node(line.node_two)?;
        let entity = line_label(&line);
        if !(line.length > 0.0) {
            return Err(GridError::parameter(entity, "length must be positive"));
        }
        if !(line.frequency > 0.0) {
            return Err(GridError::parameter(entity, "frequency must be positive"));
        }
        if line.series_resistance_per_metre < 0.0
            || line.series_inductance_per_metre < 0.0
            || line.shunt_conductance_per_metre < 0.0
            || line.shunt_capacitance_per_metre < 0.0
        {
            return Err(GridError::parameter(
                entity,
                "per-length parameters must not be negative",
            ));
        }
        self.elements.push(Element::TransmissionLine(line));
        Ok(())
    }

    pub fn add_two_winding_transformer(
        &mut self,
        transformer: TwoWindingTransformer,
    ) -> GridResult<()> {
        self.require_node(transformer.upper_node)?;
        self.require_node(transformer.lower_node)?;
        let entity = format!(
            "two-winding transformer {}-{}",
            transformer.upper_node, transformer.lower_node
        );
        validate_winding(
            &entity,
            transformer.nominal_power,
            transformer.relative_short_circuit_voltage,
            transformer.copper_losses,
        )?;
        validate_idle_losses(
            &entity,
            transformer.nominal_power,
            transformer.relative_no_load_current,
            transformer.iron_losses,
        )?;
        if !(transformer.ratio > 0.0) {
            return Err(GridError::parameter(entity, "ratio must be positive"));
        }
        self.elements
            .push(Element::TwoWindingTransformer(transformer));
        Ok(())
    }

    pub fn add_three_winding_transformer(
        &mut self,
        transformer: ThreeWindingTransformer,
    ) -> GridResult<()> {
        self.require_node(transformer.node_one)?;
        self.require_node(transformer.node_two)?;
        self.require_node(transformer.node_three)?;
        let entity = format!(
            "three-winding transformer {}-{}-{}",
            transformer.node_one, transformer.node_two, transformer.node_three
        );
        let pairs = [
            (
                transformer.nominal_powers.0,
                transformer.relative_short_circuit_voltages.0,
                transformer.copper_losses.0,
            ),
            (
                transformer.nominal_powers.1,
                transformer.relative_short_circuit_voltages.1,
                transformer.copper_losses.1,
            ),
            (
                transformer.nominal_powers.2,
                transformer.relative_short_circuit_voltages.2,
                transformer.copper_losses.2,
            ),
        ];
        for (power, voltage, losses) in pairs {
            validate_winding(&entity, power, voltage, losses)?;
        }
        validate_idle_losses(
            &entity,
            transformer.nominal_powers.0,
            transformer.relative_no_load_current,
            transformer.iron_losses,
        )?;
        self.elements
            .push(Element::ThreeWindingTransformer(transformer));
        Ok(())
    }

    pub fn add_current_source(
        &mut self,
        node: NodeId,
        current: Complex64,
        internal_impedance: Complex64,
    ) -> GridResult<()> {
        self.require_node(node)?;
        let entity = format!("current source at node {node}");
        if !(current.norm() > 0.0) {
            return Err(GridError::parameter(entity, "current magnitude must be positive"));
        }
        if !(internal_impedance.norm() > 0.0) {
            return Err(GridError::parameter(
                entity,
                "internal impedance magnitude must be positive",
            ));
        }
        self.elements.push(Element::CurrentSource(CurrentSource {
            node,
            current,
            internal_impedance,
        }));
        Ok(())
    }

    // -- accessors ----------------------------------------------------------

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.node_index.get(&id).map(|&i| &self.nodes[i])
    }

    /// Nominal winding ratio of a two-winding transformer, taken from the
    /// nominal voltages of the nodes it joins.
    pub fn nominal_ratio(&self, transformer: &TwoWindingTransformer) -> f64 {
        let upper = self
            .node(transformer.upper_node)
            .map(|n| n.nominal_voltage.value())
            .unwrap_or(1.0);
        let lower = self
            .node(transformer.lower_node)
            .map(|n| n.nominal_voltage.value())
            .unwrap_or(1.0);
        upper / lower
    }

    /// Elements connected to a specific node.
    pub fn elements_at_node(&self, id: NodeId) -> Vec<&Element> {
        self.elements
            .iter()
            .filter(|e| e.nodes().contains(&id))
            .collect()
    }

    /// Average apparent-power magnitude over loads and generators, the
    /// network-wide power base. Falls back to 1 so a no-load network still
    /// has a usable base.
    pub fn average_power_magnitude(&self) -> f64 {
        let mut total = 0.0;
        let mut count = 0usize;
        for element in &self.elements {
            match element {
                Element::Load(load) => {
                    total += load.power.norm();
                    count += 1;
                }
                Element::Generator(generator) => {
                    total += generator.real_power.value().abs();
                    count += 1;
                }
                _ => {}
            }
        }
        if count == 0 || total <= 0.0 {
            1.0
        } else {
            total / count as f64
        }
    }

    /// Compute basic statistics about the network.
    pub fn stats(&self) -> NetworkStats {
        let mut stats = NetworkStats {
            num_nodes: self.nodes.len(),
            ..NetworkStats::default()
        };
        for element in &self.elements {
            match element {
                Element::Load(load) => {
                    stats.num_loads += 1;
                    stats.total_load_va += load.power.norm();
                }
                Element::ImpedanceLoad(_) => stats.num_impedance_loads += 1,
                Element::Generator(generator) => {
                    stats.num_generators += 1;
                    stats.total_generation_w += generator.real_power.value().abs();
                }
                Element::FeedIn(_) => stats.num_feed_ins += 1,
                Element::TransmissionLine(_) => stats.num_lines += 1,
                Element::TwoWindingTransformer(_) | Element::ThreeWindingTransformer(_) => {
                    stats.num_transformers += 1
                }
                Element::CurrentSource(_) => stats.num_current_sources += 1,
            }
        }
        stats
    }

    /// Validate network-level invariants. Any violation is fatal and
    /// blocks solving entirely; the message names the offending node or
    /// element.
    pub fn validate(&self) -> GridResult<()> {
        if self.nodes.is_empty() {
            return Err(GridError::Other("network has no nodes".into()));
        }

        // Connectivity: more than one segment means floating nodes.
        let segments = topology::segments(self);
        if segments.len() > 1 {
            let smallest = segments
                .iter()
                .min_by_key(|s| s.len())
                .map(|s| {
                    s.iter()
                        .map(|id| id.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            return Err(GridError::FloatingNodes(format!(
                "{} segments; smallest contains node(s) {}",
                segments.len(),
                smallest
            )));
        }

        // Directly-joined nodes must agree on nominal voltage.
        for element in &self.elements {
            if let Element::TransmissionLine(line) = element {
                let one = self.require_node(line.node_one)?.nominal_voltage.value();
                let two = self.require_node(line.node_two)?.nominal_voltage.value();
                if (one - two).abs() > VOLTAGE_MATCH_TOLERANCE * one.max(two) {
                    return Err(GridError::VoltageMismatch(format!(
                        "{}: {one} V vs {two} V",
                        element.label()
                    )));
                }
            }
        }

        // Exactly one voltage-fixing element per node. A feed-in with
        // internal impedance fixes its own internal node, not the external
        // one, so it does not count here.
        for node in &self.nodes {
            let enforcers = self
                .elements_at_node(node.id)
                .iter()
                .filter(|e| e.enforces_slack() || e.enforces_pv())
                .count();
            if enforcers > 1 {
                return Err(GridError::Overdetermined(node.id.to_string()));
            }
        }
        let slack_present = self
            .elements
            .iter()
            .any(|e| matches!(e, Element::FeedIn(_)));
        if !slack_present {
            return Err(GridError::Underdetermined);
        }

        // Transformer phase-shift data must be path-independent.
        topology::phase_shifts(self)?;

        tracing::debug!(stats = %self.stats(), "network validated");
        Ok(())
    }
}

fn line_label(line: &TransmissionLine) -> String {
    format!("transmission line {}-{}", line.node_one, line.node_two)
}

fn validate_winding(
    entity: &str,
    nominal_power: Watts,
    relative_short_circuit_voltage: f64,
    copper_losses: Watts,
) -> GridResult<()> {
    if !(nominal_power.value() > 0.0) {
        return Err(GridError::parameter(entity, "nominal power must be positive"));
    }
    if !(relative_short_circuit_voltage > 0.0 && relative_short_circuit_voltage <= 1.0) {
        return Err(GridError::parameter(
            entity,
            "relative short-circuit voltage must be in (0, 1]",
        ));
    }
    if copper_losses.value() < 0.0 {
        return Err(GridError::parameter(entity, "copper losses must not be negative"));
    }
    if copper_losses.value() > relative_short_circuit_voltage * nominal_power.value() {
        return Err(GridError::parameter(
            entity,
            "copper losses exceed the short-circuit voltage budget",
        ));
    }
    Ok(())
}

fn validate_idle_losses(
    entity: &str,
    nominal_power: Watts,
    relative_no_load_current: f64,
    iron_losses: Watts,
) -> GridResult<()> {
    if !(relative_no_load_current > 0.0 && relative_no_load_current <= 1.0) {
        return Err(GridError::parameter(
            entity,
            "relative no-load current must be in (0, 1]",
        ));
    }
    if iron_losses.value() < 0.0 {
        return Err(GridError::parameter(entity, "iron losses must not be negative"));
    }
    if iron_losses.value() > relative_no_load_current * nominal_power.value() {
        return Err(GridError::parameter(
            entity,
            "iron losses exceed the idle-loss budget implied by the no-load current",
        ));
    }
    Ok(())
}

/// Statistics about a network's size and power.
#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub num_nodes: usize,
    pub num_loads: usize,
    pub num_impedance_loads: usize,
    pub num_generators: usize,
    pub num_feed_ins: usize,
    pub num_lines: usize,
    pub num_transformers: usize,
    pub num_current_sources: usize,
    pub total_load_va: f64,
    pub total_generation_w: f64,
}

impl std::fmt::Display for NetworkStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} nodes, {} lines, {} transformers, {} feed-ins, {} loads ({:.0} VA)",
            self.num_nodes,
            self.num_lines,
            self.num_transformers,
            self.num_feed_ins,
            self.num_loads,
            self.total_load_va
        )
    }
}
