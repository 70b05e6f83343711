//! Node-potential method: one closed-form linear solve.
//!
//! Loads are approximated as constant current sources evaluated at nominal
//! voltage, `I ≈ conj(S / V_nom)`, which turns the load flow into a single
//! linear system. The approximation error grows with loading, so this
//! method trades accuracy for speed; its stated tolerance is far looser
//! than the iterative strategies'.
//!
//! Only PQ and slack nodes fit the linearization: a PV constraint cannot
//! be expressed as a constant current, so any PV node makes the method
//! inapplicable and it reports collapse.

use super::{partition, voltages_plausible, NodeSpec, NodeVoltageCalculator, SolveOutcome};
use crate::admittance::AdmittanceMatrix;
use crate::linear::{FaerSolver, LinearSolver};
use num_complex::Complex64;
use tracing::debug;

pub struct NodePotential {
    /// Residual power error beyond which the linearized answer is not
    /// accepted as a solution.
    maximum_power_error: f64,
    linear_solver: Box<dyn LinearSolver>,
}

impl Default for NodePotential {
    fn default() -> Self {
        Self::new()
    }
}

impl NodePotential {
    pub fn new() -> Self {
        Self {
            maximum_power_error: 0.5,
            linear_solver: Box::new(FaerSolver),
        }
    }

    pub fn with_maximum_power_error(mut self, maximum_power_error: f64) -> Self {
        self.maximum_power_error = maximum_power_error;
        self
    }
}

impl NodeVoltageCalculator for NodePotential {
    fn calculate_node_voltages(
        &self,
        matrix: &AdmittanceMatrix,
        nominal_voltage: f64,
        nodes: &[NodeSpec],
    ) -> SolveOutcome {
        let system = partition(matrix, nodes);
        if system.specs.iter().any(|spec| spec.is_pv()) {
            debug!("node-potential method is inapplicable with PV nodes");
            return SolveOutcome::Collapsed;
        }
        let n = system.unknown.len();
        if n == 0 {
            return system.finish(matrix, nodes, &[]);
        }

        let nominal = Complex64::new(nominal_voltage, 0.0);
        let targets = system.power_targets();
        let rhs: Vec<Complex64> = system
            .reduced
            .constant_currents()
            .iter()
            .zip(&targets)
            .map(|(current, target)| current + (target / nominal).conj())
            .collect();
        let values: Vec<Vec<Complex64>> = (0..n)
            .map(|r| (0..n).map(|c| system.reduced.get(r, c)).collect())
            .collect();

        let solution = match self.linear_solver.solve_complex(&values, &rhs) {
            Ok(solution) => solution,
            Err(error) => {
                debug!(%error, "node-potential solve failed");
                return SolveOutcome::Collapsed;
            }
        };
        if !voltages_plausible(&solution, nominal_voltage) {
            return SolveOutcome::Collapsed;
        }

        // The linearization must at least land in the neighborhood of a
        // power-flow solution; far-off residuals mean the operating point
        // does not exist.
        let error = system.reduced.calculate_power_error(&solution, &system.specs);
        if error > self.maximum_power_error {
            debug!(error, "node-potential residual too large");
            return SolveOutcome::Collapsed;
        }

        system.finish(matrix, nodes, &solution)
    }
}
