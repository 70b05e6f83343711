//! Bus classification types, the `NodeVoltageCalculator` contract, and the
//! shared scaffolding every solver strategy builds on.
//!
//! A calculator receives the assembled per-unit admittance matrix, the
//! nominal per-unit voltage (the guard for divergence checks), and one
//! [`NodeSpec`] per matrix index. It returns either a full result list or
//! the voltage-collapse signal; non-convergence is a checked outcome,
//! never an error.

use crate::admittance::AdmittanceMatrix;
use num_complex::Complex64;
use serde::Serialize;

pub mod current_iteration;
pub mod fast_decoupled;
pub mod helm;
pub mod newton;
pub mod node_potential;

pub use current_iteration::CurrentIteration;
pub use fast_decoupled::FastDecoupled;
pub use helm::HolomorphicEmbedding;
pub use newton::NewtonRaphson;
pub use node_potential::NodePotential;

/// Per-node constraint, derived from the elements connected to the node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeSpec {
    /// Complex voltage fixed (feed-in or ground).
    Slack { voltage: Complex64 },
    /// Voltage magnitude and real power fixed (generator).
    Pv { magnitude: f64, real_power: f64 },
    /// Complex power fixed (everything else).
    Pq { power: Complex64 },
}

impl NodeSpec {
    pub fn is_slack(&self) -> bool {
        matches!(self, NodeSpec::Slack { .. })
    }

    pub fn is_pv(&self) -> bool {
        matches!(self, NodeSpec::Pv { .. })
    }
}

/// Solved state of one node, in the units of the input matrix (per-unit
/// inside the pipeline; physical units after the orchestrator rescales).
#[derive(Debug, Clone, Copy, Serialize)]
pub struct NodeResult {
    pub voltage: Complex64,
    pub power: Complex64,
}

/// Outcome of a voltage calculation. Collapse means the strategy could not
/// reach a solution within its budget, a normal checked result.
#[derive(Debug, Clone)]
pub enum SolveOutcome {
    Converged(Vec<NodeResult>),
    Collapsed,
}

impl SolveOutcome {
    pub fn is_collapsed(&self) -> bool {
        matches!(self, SolveOutcome::Collapsed)
    }

    pub fn into_results(self) -> Option<Vec<NodeResult>> {
        match self {
            SolveOutcome::Converged(results) => Some(results),
            SolveOutcome::Collapsed => None,
        }
    }
}

/// The sole plug point of the pipeline: any conforming strategy is
/// substitutable without orchestrator changes.
pub trait NodeVoltageCalculator {
    fn calculate_node_voltages(
        &self,
        matrix: &AdmittanceMatrix,
        nominal_voltage: f64,
        nodes: &[NodeSpec],
    ) -> SolveOutcome;
}

/// Registry of the built-in calculator strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CalculatorKind {
    #[default]
    NewtonRaphson,
    FastDecoupled,
    NodePotential,
    CurrentIteration,
    HolomorphicEmbedding,
}

impl CalculatorKind {
    pub fn from_str(input: &str) -> anyhow::Result<Self> {
        match input.to_ascii_lowercase().as_str() {
            "newton" | "newton-raphson" | "default" => Ok(CalculatorKind::NewtonRaphson),
            "fast-decoupled" | "fdlf" => Ok(CalculatorKind::FastDecoupled),
            "node-potential" => Ok(CalculatorKind::NodePotential),
            "current-iteration" => Ok(CalculatorKind::CurrentIteration),
            "helm" | "holomorphic-embedding" => Ok(CalculatorKind::HolomorphicEmbedding),
            other => Err(anyhow::anyhow!(
                "unknown calculator '{}'; supported values: {}",
                other,
                Self::available().join(", ")
            )),
        }
    }

    pub fn build(self) -> Box<dyn NodeVoltageCalculator> {
        match self {
            CalculatorKind::NewtonRaphson => Box::new(NewtonRaphson::new()),
            CalculatorKind::FastDecoupled => Box::new(FastDecoupled::new()),
            CalculatorKind::NodePotential => Box::new(NodePotential::new()),
            CalculatorKind::CurrentIteration => Box::new(CurrentIteration::new()),
            CalculatorKind::HolomorphicEmbedding => {
                Box::new(HolomorphicEmbedding::<f64>::new())
            }
        }
    }

    pub fn available() -> Vec<&'static str> {
        vec![
            "newton-raphson",
            "fast-decoupled",
            "node-potential",
            "current-iteration",
            "helm",
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CalculatorKind::NewtonRaphson => "newton-raphson",
            CalculatorKind::FastDecoupled => "fast-decoupled",
            CalculatorKind::NodePotential => "node-potential",
            CalculatorKind::CurrentIteration => "current-iteration",
            CalculatorKind::HolomorphicEmbedding => "helm",
        }
    }
}

// ---------------------------------------------------------------------------
// Shared scaffolding
// ---------------------------------------------------------------------------

/// The known/unknown partition every strategy starts from: slack voltages
/// are eliminated into the reduced system's equivalent currents.
pub(crate) struct ReducedSystem {
    pub reduced: AdmittanceMatrix,
    pub unknown: Vec<usize>,
    pub known: Vec<usize>,
    pub known_voltages: Vec<Complex64>,
    /// Specs of the unknown nodes, aligned with the reduced indices.
    pub specs: Vec<NodeSpec>,
}

pub(crate) fn partition(matrix: &AdmittanceMatrix, nodes: &[NodeSpec]) -> ReducedSystem {
    let mut unknown = Vec::new();
    let mut known = Vec::new();
    let mut known_voltages = Vec::new();
    let mut specs = Vec::new();
    for (index, spec) in nodes.iter().enumerate() {
        match spec {
            NodeSpec::Slack { voltage } => {
                known.push(index);
                known_voltages.push(*voltage);
            }
            other => {
                unknown.push(index);
                specs.push(other.clone());
            }
        }
    }
    let reduced = matrix.create_reduced(&unknown, &known, &known_voltages);
    ReducedSystem {
        reduced,
        unknown,
        known,
        known_voltages,
        specs,
    }
}

impl ReducedSystem {
    /// Power targets of the unknown nodes. PV nodes carry their real-power
    /// target with a zero imaginary placeholder.
    pub fn power_targets(&self) -> Vec<Complex64> {
        self.specs
            .iter()
            .map(|spec| match spec {
                NodeSpec::Pq { power } => *power,
                NodeSpec::Pv { real_power, .. } => Complex64::new(*real_power, 0.0),
                NodeSpec::Slack { .. } => Complex64::new(0.0, 0.0),
            })
            .collect()
    }

    /// Flat-start voltages: nominal magnitude at zero angle, PV setpoints
    /// where fixed.
    pub fn flat_start(&self, nominal_voltage: f64) -> Vec<Complex64> {
        self.specs
            .iter()
            .map(|spec| match spec {
                NodeSpec::Pv { magnitude, .. } => Complex64::new(*magnitude, 0.0),
                _ => Complex64::new(nominal_voltage, 0.0),
            })
            .collect()
    }

    /// Scatter solved unknown voltages back into the full node order and
    /// evaluate per-node powers on the full matrix.
    pub fn finish(
        &self,
        matrix: &AdmittanceMatrix,
        nodes: &[NodeSpec],
        solved: &[Complex64],
    ) -> SolveOutcome {
        let mut voltages = vec![Complex64::new(0.0, 0.0); nodes.len()];
        for (position, &index) in self.unknown.iter().enumerate() {
            voltages[index] = solved[position];
        }
        for (position, &index) in self.known.iter().enumerate() {
            voltages[index] = self.known_voltages[position];
        }
        let powers = matrix.calculate_all_powers(&voltages);
        SolveOutcome::Converged(
            voltages
                .iter()
                .zip(&powers)
                .map(|(&voltage, &power)| NodeResult { voltage, power })
                .collect(),
        )
    }
}

/// Divergence guard: a solve that wanders far outside the nominal voltage
/// band, or produces non-finite values, has collapsed.
pub(crate) fn voltages_plausible(voltages: &[Complex64], nominal_voltage: f64) -> bool {
    voltages.iter().all(|v| {
        v.re.is_finite() && v.im.is_finite() && v.norm() <= 16.0 * nominal_voltage.max(1e-3)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculator_kind_parsing() {
        assert_eq!(
            CalculatorKind::from_str("newton-raphson").unwrap(),
            CalculatorKind::NewtonRaphson
        );
        assert_eq!(
            CalculatorKind::from_str("HELM").unwrap(),
            CalculatorKind::HolomorphicEmbedding
        );
        assert!(CalculatorKind::from_str("simplex").is_err());
    }

    #[test]
    fn test_node_result_serializes() {
        let result = NodeResult {
            voltage: Complex64::new(0.95, -0.02),
            power: Complex64::new(-1.0, -0.25),
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("voltage"));
        assert!(json.contains("power"));
    }

    #[test]
    fn test_partition_splits_slack_from_unknowns() {
        let mut y = AdmittanceMatrix::new(3);
        y.add_connection(0, 1, Complex64::new(5.0, 0.0));
        y.add_connection(1, 2, Complex64::new(5.0, 0.0));
        let nodes = vec![
            NodeSpec::Slack {
                voltage: Complex64::new(1.0, 0.0),
            },
            NodeSpec::Pq {
                power: Complex64::new(-0.5, 0.0),
            },
            NodeSpec::Pv {
                magnitude: 1.02,
                real_power: 0.3,
            },
        ];
        let system = partition(&y, &nodes);
        assert_eq!(system.unknown, vec![1, 2]);
        assert_eq!(system.known, vec![0]);
        assert_eq!(system.reduced.order(), 2);
        // Equivalent current at node 1 from the eliminated slack:
        // −Y[1][0]·V0 = 5.
        assert!(
            (system.reduced.constant_currents()[0] - Complex64::new(5.0, 0.0)).norm() < 1e-12
        );
    }
}
