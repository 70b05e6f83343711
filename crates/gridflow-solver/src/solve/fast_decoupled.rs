//! Fast-decoupled load flow (Stott-Alsac).
//!
//! Exploits the weak P-|V| and Q-θ coupling of reactance-dominated
//! networks: instead of one full Jacobian, two constant real matrices are
//! factored from the imaginary part of the admittance matrix and reused
//! every iteration: one for the P-θ half step, one for the Q-|V| half
//! step. Cheaper per iteration than Newton-Raphson, more iterations,
//! same convergence test.
//!
//! On a network with no susceptance at all the decoupling assumption
//! inverts: power then couples to magnitude through the conductance, so
//! the half steps swap their matrices. Networks where neither part is
//! usable report collapse through the singular linear solve.

use super::{partition, voltages_plausible, NodeSpec, NodeVoltageCalculator, SolveOutcome};
use crate::admittance::AdmittanceMatrix;
use crate::linear::{FaerSolver, LinearSolver};
use num_complex::Complex64;
use tracing::{debug, trace};

pub struct FastDecoupled {
    tolerance: f64,
    max_iterations: usize,
    linear_solver: Box<dyn LinearSolver>,
}

impl Default for FastDecoupled {
    fn default() -> Self {
        Self::new()
    }
}

impl FastDecoupled {
    pub fn new() -> Self {
        Self {
            tolerance: 1e-8,
            max_iterations: 100,
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

impl NodeVoltageCalculator for FastDecoupled {
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
        let pq: Vec<usize> = (0..n).filter(|&i| !system.specs[i].is_pv()).collect();

        // The decoupled matrices are constant across iterations.
        let reactive = (0..n)
            .any(|i| (0..n).any(|k| system.reduced.get(i, k).im.abs() > 1e-12));
        let angle_matrix: Vec<Vec<f64>> = (0..n)
            .map(|i| {
                (0..n)
                    .map(|k| {
                        let y = system.reduced.get(i, k);
                        if reactive {
                            -y.im
                        } else {
                            y.re
                        }
                    })
                    .collect()
            })
            .collect();
        let magnitude_matrix: Vec<Vec<f64>> = pq
            .iter()
            .map(|&i| {
                pq.iter()
                    .map(|&k| {
                        let y = system.reduced.get(i, k);
                        if reactive {
                            -y.im
                        } else {
                            y.re
                        }
                    })
                    .collect()
            })
            .collect();

        let mut v_mag: Vec<f64> = system
            .specs
            .iter()
            .map(|spec| match spec {
                NodeSpec::Pv { magnitude, .. } => *magnitude,
                _ => nominal_voltage,
            })
            .collect();
        let mut v_ang = vec![0.0f64; n];

        let polar = |v_mag: &[f64], v_ang: &[f64]| -> Vec<Complex64> {
            v_mag
                .iter()
                .zip(v_ang)
                .map(|(&m, &a)| Complex64::from_polar(m, a))
                .collect()
        };

        for iteration in 0..self.max_iterations {
            let voltages = polar(&v_mag, &v_ang);
            let powers = system.reduced.calculate_all_powers(&voltages);

            let mut max_mismatch = 0.0f64;
            for i in 0..n {
                max_mismatch = max_mismatch.max((targets[i].re - powers[i].re).abs());
            }
            for &i in &pq {
                max_mismatch = max_mismatch.max((targets[i].im - powers[i].im).abs());
            }
            trace!(iteration, max_mismatch, "fast-decoupled mismatch");
            if max_mismatch < self.tolerance {
                debug!(iteration, "fast-decoupled converged");
                return system.finish(matrix, nodes, &voltages);
            }

            // P half step.
            let rhs_p: Vec<f64> = (0..n)
                .map(|i| (targets[i].re - powers[i].re) / v_mag[i].max(1e-12))
                .collect();
            let delta_p = match self.linear_solver.solve_real(&angle_matrix, &rhs_p) {
                Ok(delta) => delta,
                Err(error) => {
                    debug!(iteration, %error, "fast-decoupled P-step solve failed");
                    return SolveOutcome::Collapsed;
                }
            };
            if reactive {
                for i in 0..n {
                    v_ang[i] += delta_p[i];
                }
            } else {
                // Conductance fallback drives magnitudes; PV magnitudes
                // stay pinned to their setpoint. Steps are damped so one
                // correction never wipes out a magnitude.
                for i in 0..n {
                    if !system.specs[i].is_pv() {
                        v_mag[i] = (v_mag[i] + delta_p[i]).max(0.05 * v_mag[i]);
                    }
                }
            }

            // Q half step on the refreshed state.
            if !pq.is_empty() {
                let voltages = polar(&v_mag, &v_ang);
                let powers = system.reduced.calculate_all_powers(&voltages);
                let rhs_q: Vec<f64> = pq
                    .iter()
                    .map(|&i| (targets[i].im - powers[i].im) / v_mag[i].max(1e-12))
                    .collect();
                let delta_q = match self.linear_solver.solve_real(&magnitude_matrix, &rhs_q) {
                    Ok(delta) => delta,
                    Err(error) => {
                        debug!(iteration, %error, "fast-decoupled Q-step solve failed");
                        return SolveOutcome::Collapsed;
                    }
                };
                for (slot, &i) in pq.iter().enumerate() {
                    if reactive {
                        v_mag[i] = (v_mag[i] + delta_q[slot]).max(0.05 * v_mag[i]);
                    } else {
                        v_ang[i] += delta_q[slot];
                    }
                }
            }

            let updated = polar(&v_mag, &v_ang);
            if v_mag.iter().any(|&m| !(m > 0.0)) || !voltages_plausible(&updated, nominal_voltage)
            {
                debug!(iteration, "fast-decoupled diverged");
                return SolveOutcome::Collapsed;
            }
        }

        debug!(
            max_iterations = self.max_iterations,
            "fast-decoupled iteration budget exhausted"
        );
        SolveOutcome::Collapsed
    }
}
