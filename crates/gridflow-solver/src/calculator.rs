//! Load-flow orchestration: validate → assemble → solve → rescale.
//!
//! The calculator owns the configured solver strategy and runs the whole
//! pipeline against an immutable network. Validation failures surface as
//! errors before anything is stamped; voltage collapse comes back as a
//! non-converged solution with no node results, so callers can tell the
//! two apart and, for example, retry with a different strategy.

use crate::assembly::{assemble, Assembly};
use crate::admittance::AdmittanceMatrix;
use crate::solve::{CalculatorKind, NodeResult, NodeVoltageCalculator, SolveOutcome};
use gridflow_core::{Element, GridResult, Network, NodeId};
use num_complex::Complex64;
use std::collections::HashMap;
use tracing::debug;

/// Result of a load-flow run: solved voltage and power per node id, in
/// physical units. Empty and non-converged after a voltage collapse.
#[derive(Debug, Clone)]
pub struct LoadFlowSolution {
    pub converged: bool,
    pub nodes: HashMap<NodeId, NodeResult>,
}

pub struct LoadFlowCalculator {
    calculator: Box<dyn NodeVoltageCalculator>,
}

impl Default for LoadFlowCalculator {
    fn default() -> Self {
        Self::with_kind(CalculatorKind::default())
    }
}

impl LoadFlowCalculator {
    pub fn new(calculator: Box<dyn NodeVoltageCalculator>) -> Self {
        Self { calculator }
    }

    pub fn with_kind(kind: CalculatorKind) -> Self {
        Self::new(kind.build())
    }

    /// Run the full pipeline and return physical-unit results per node.
    pub fn calculate_node_voltages(&self, network: &Network) -> GridResult<LoadFlowSolution> {
        network.validate()?;
        let assembly = assemble(network)?;

        let outcome = self.calculator.calculate_node_voltages(
            &assembly.matrix,
            1.0,
            &assembly.specs,
        );

        let results = match outcome {
            SolveOutcome::Collapsed => {
                debug!("load flow reported voltage collapse");
                return Ok(LoadFlowSolution {
                    converged: false,
                    nodes: HashMap::new(),
                });
            }
            SolveOutcome::Converged(results) => results,
        };

        Ok(LoadFlowSolution {
            converged: true,
            nodes: unscale_results(network, &assembly, &results),
        })
    }

    /// Assemble and expose the per-unit admittance matrix without solving:
    /// (matrix, ordered node names, power base) for diagnostic callers.
    pub fn calculate_admittance_matrix(
        &self,
        network: &Network,
    ) -> GridResult<(AdmittanceMatrix, Vec<String>, f64)> {
        let assembly = assemble(network)?;
        Ok((assembly.matrix, assembly.names, assembly.power_base))
    }
}

/// Map per-unit slot results back onto the user's node ids in physical
/// units.
///
/// Members of a coalesced zero-impedance group share the slot voltage.
/// The slot's total power goes to the role-enforcing member if the group
/// has one, otherwise to the lowest-id member; every other member reports
/// the power its own loads demanded, so the group total is preserved.
fn unscale_results(
    network: &Network,
    assembly: &Assembly,
    results: &[NodeResult],
) -> HashMap<NodeId, NodeResult> {
    let mut nodes = HashMap::new();
    for (slot, group) in assembly.groups.iter().enumerate() {
        let scaler = &assembly.scalers[slot];
        let voltage = scaler.unscale_voltage(results[slot].voltage);
        let total_power = scaler.unscale_power(results[slot].power);

        if group.len() == 1 {
            nodes.insert(
                group[0],
                NodeResult {
                    voltage,
                    power: total_power,
                },
            );
            continue;
        }

        let absorber = group
            .iter()
            .find(|id| {
                network
                    .elements_at_node(**id)
                    .iter()
                    .any(|e| e.enforces_slack() || e.enforces_pv())
            })
            .copied()
            .unwrap_or(group[0]);

        let mut residual = total_power;
        for &member in group {
            if member == absorber {
                continue;
            }
            let own: Complex64 = network
                .elements_at_node(member)
                .iter()
                .filter_map(|e| match e {
                    Element::Load(load) => Some(load.power),
                    _ => None,
                })
                .sum();
            residual -= own;
            nodes.insert(member, NodeResult { voltage, power: own });
        }
        nodes.insert(
            absorber,
            NodeResult {
                voltage,
                power: residual,
            },
        );
    }
    nodes
}
