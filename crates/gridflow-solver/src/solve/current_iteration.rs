//! Current-iteration (fixed-point) load flow.
//!
//! Repeatedly evaluates the load currents at the present voltage estimate
//! and solves the linear network for the next estimate:
//! `V_{k+1} = Y⁻¹ · I(V_k)`. The matrix never changes, only the right-hand
//! side, so each iteration is one back-substitution-grade solve. Linear
//! convergence: slower than Newton-Raphson, but robust and simple.
//!
//! PV nodes are handled inside the fixed point: their reactive power is
//! re-estimated from the present state each round and the solved voltage
//! is rescaled onto the fixed magnitude.

use super::{partition, voltages_plausible, NodeSpec, NodeVoltageCalculator, SolveOutcome};
use crate::admittance::AdmittanceMatrix;
use crate::linear::{FaerSolver, LinearSolver};
use num_complex::Complex64;
use tracing::{debug, trace};

pub struct CurrentIteration {
    tolerance: f64,
    max_iterations: usize,
    linear_solver: Box<dyn LinearSolver>,
}

impl Default for CurrentIteration {
    fn default() -> Self {
        Self::new()
    }
}

impl CurrentIteration {
    pub fn new() -> Self {
        Self {
            tolerance: 1e-8,
            max_iterations: 200,
            linear_solver: Box::new(FaerSolver),
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

impl NodeVoltageCalculator for CurrentIteration {
    fn calculate_node_voltages(
        &self,
        matrix: &AdmittanceMatrix,
        nominal_voltage: f64,
        nodes: &[NodeSpec],
    ) -> SolveOutcome {
        let system = partition(matrix, nodes);
        let n = system.unknown.len();
        if n == 0 {
            return system.finish(matrix, nodes, &[]);
        }

        let targets = system.power_targets();
        let values: Vec<Vec<Complex64>> = (0..n)
            .map(|r| (0..n).map(|c| system.reduced.get(r, c)).collect())
            .collect();
        let constants = system.reduced.constant_currents();

        let mut voltages = system.flat_start(nominal_voltage);

        for iteration in 0..self.max_iterations {
            let powers = system.reduced.calculate_all_powers(&voltages);

            let mut max_mismatch = 0.0f64;
            for (i, spec) in system.specs.iter().enumerate() {
                let mismatch = match spec {
                    NodeSpec::Pq { power } => (power - powers[i]).norm(),
                    NodeSpec::Pv { real_power, .. } => (real_power - powers[i].re).abs(),
                    NodeSpec::Slack { .. } => 0.0,
                };
                max_mismatch = max_mismatch.max(mismatch);
            }
            trace!(iteration, max_mismatch, "current-iteration mismatch");
            if max_mismatch < self.tolerance {
                debug!(iteration, "current-iteration converged");
                return system.finish(matrix, nodes, &voltages);
            }

            // Injection currents at the present voltage estimate. PV nodes
            // use their real-power target with the reactive power the
            // present state implies.
            let rhs: Vec<Complex64> = system
                .specs
                .iter()
                .enumerate()
                .map(|(i, spec)| {
                    let power = match spec {
                        NodeSpec::Pq { power } => *power,
                        NodeSpec::Pv { real_power, .. } => {
                            Complex64::new(*real_power, powers[i].im)
                        }
                        NodeSpec::Slack { .. } => Complex64::new(0.0, 0.0),
                    };
                    constants[i] + (power / voltages[i]).conj()
                })
                .collect();

            voltages = match self.linear_solver.solve_complex(&values, &rhs) {
                Ok(solution) => solution,
                Err(error) => {
                    debug!(iteration, %error, "current-iteration solve failed");
                    return SolveOutcome::Collapsed;
                }
            };

            // Pull PV nodes back onto their magnitude setpoint.
            for (i, spec) in system.specs.iter().enumerate() {
                if let NodeSpec::Pv { magnitude, .. } = spec {
                    let norm = voltages[i].norm();
                    if norm > 1e-12 {
                        voltages[i] *= magnitude / norm;
                    }
                }
            }

            if voltages.iter().any(|v| v.norm() < 1e-9)
                || !voltages_plausible(&voltages, nominal_voltage)
            {
                debug!(iteration, "current-iteration diverged");
                return SolveOutcome::Collapsed;
            }
        }

        debug!(
            max_iterations = self.max_iterations,
            "current-iteration budget exhausted"
        );
        SolveOutcome::Collapsed
    }
}
