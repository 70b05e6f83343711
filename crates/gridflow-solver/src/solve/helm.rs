//! Holomorphic embedding load flow (HELM).
//!
//! The power targets are embedded as `S(t) = t·S_target`, turning the
//! voltages into functions `V(t)` that are holomorphic in the embedding
//! parameter. At `t = 0` the network is unloaded and the equations are
//! linear; that seed is what pins the solution to the stable high-voltage
//! branch, with no initial guess involved. The voltage power series
//! `V(t) = Σ aₙ·tⁿ` follows from a recursive relation against the inverse
//! series `W = 1/V`, and the series is evaluated at `t = 1` through Wynn's
//! epsilon algorithm, which computes diagonal Padé approximants and
//! extends the convergence radius far beyond the raw series.
//!
//! The whole kernel (series recursion, inverse series, epsilon table) is
//! generic over a precision scalar. `f64` is the canonical instantiation;
//! any `Float + FromPrimitive + ToPrimitive` scalar (an extended- or
//! multi-precision type) plugs into the same code path as an accuracy /
//! memory dial. The linear solves inside the kernel use the generic
//! Gaussian elimination, since the external backend only speaks `f64`.
//!
//! A PV constraint has no direct place in the embedding; PV nodes are held
//! at their magnitude by an outer reactive-power adjustment loop around
//! the PQ kernel.
//!
//! The coefficient series of the last run is kept for introspection as
//! request-scoped scratch state, so one instance must not be shared across
//! concurrent calls.

use super::{partition, voltages_plausible, NodeSpec, NodeVoltageCalculator, SolveOutcome};
use crate::admittance::AdmittanceMatrix;
use crate::linear::gauss_elimination;
use num_complex::{Complex, Complex64};
use num_traits::{Float, FloatConst, FromPrimitive, ToPrimitive};
use std::cell::RefCell;
use std::marker::PhantomData;
use tracing::{debug, trace};

/// Precision scalar for the HELM kernel.
pub trait HelmScalar:
    Float + FloatConst + FromPrimitive + ToPrimitive + std::fmt::Debug + Send + Sync + 'static
{
}

impl<T> HelmScalar for T where
    T: Float + FloatConst + FromPrimitive + ToPrimitive + std::fmt::Debug + Send + Sync + 'static
{
}

fn scalar<P: HelmScalar>(value: f64) -> P {
    P::from_f64(value).unwrap_or_else(P::nan)
}

fn widen<P: HelmScalar>(value: Complex64) -> Complex<P> {
    Complex::new(scalar(value.re), scalar(value.im))
}

fn narrow<P: HelmScalar>(value: Complex<P>) -> Complex64 {
    Complex64::new(
        value.re.to_f64().unwrap_or(f64::NAN),
        value.im.to_f64().unwrap_or(f64::NAN),
    )
}

pub struct HolomorphicEmbedding<P: HelmScalar = f64> {
    tolerance: f64,
    coefficient_count: usize,
    pv_iterations: usize,
    coefficients: RefCell<Vec<Vec<Complex64>>>,
    _precision: PhantomData<P>,
}

impl<P: HelmScalar> Default for HolomorphicEmbedding<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: HelmScalar> HolomorphicEmbedding<P> {
    pub fn new() -> Self {
        Self {
            tolerance: 1e-6,
            coefficient_count: 40,
            pv_iterations: 30,
            coefficients: RefCell::new(Vec::new()),
            _precision: PhantomData,
        }
    }

    /// Residual power error accepted at the evaluated series.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Number of series coefficients; memory and runtime scale with it.
    pub fn with_coefficient_count(mut self, coefficient_count: usize) -> Self {
        self.coefficient_count = coefficient_count.max(2);
        self
    }

    /// Budget for the outer PV magnitude-adjustment loop.
    pub fn with_pv_iterations(mut self, pv_iterations: usize) -> Self {
        self.pv_iterations = pv_iterations;
        self
    }

    /// Voltage coefficient series of the last run, `[order][node]`,
    /// narrowed to `f64`. Part of the testing contract.
    pub fn coefficients(&self) -> Vec<Vec<Complex64>> {
        self.coefficients.borrow().clone()
    }

    /// Run the embedding for a pure PQ system and evaluate at `t = 1`.
    fn evaluate_series(
        &self,
        values: &[Vec<Complex<P>>],
        no_load_currents: &[Complex<P>],
        source_currents: &[Complex<P>],
        targets: &[Complex<P>],
    ) -> Option<Vec<Complex64>> {
        let n = targets.len();

        // Order 0: the unloaded network, Y·a₀ = I_eq.
        let a0 = gauss_elimination(values, no_load_currents).ok()?;
        if a0.iter().any(|v| v.norm_sqr() == P::zero()) {
            return None;
        }

        let mut series: Vec<Vec<Complex<P>>> = vec![a0.clone()];
        // Inverse series W = 1/V: b₀ = 1/a₀.
        let mut inverse: Vec<Vec<Complex<P>>> =
            vec![a0.iter().map(|v| v.inv()).collect()];

        for order in 1..self.coefficient_count {
            // Y·aₙ = conj(S)·conj(b_{n−1}), plus the embedded source
            // currents at first order.
            let rhs: Vec<Complex<P>> = (0..n)
                .map(|i| {
                    let mut value = targets[i].conj() * inverse[order - 1][i].conj();
                    if order == 1 {
                        value = value + source_currents[i];
                    }
                    value
                })
                .collect();
            let a_n = gauss_elimination(values, &rhs).ok()?;
            series.push(a_n);

            // Convolution identity Σ aₖ·b_{n−k} = 0 for n ≥ 1 gives
            // bₙ = −(Σ_{k=1..n} aₖ·b_{n−k}) / a₀, per node.
            let b_n: Vec<Complex<P>> = (0..n)
                .map(|i| {
                    let mut acc = Complex::new(P::zero(), P::zero());
                    for k in 1..=order {
                        acc = acc + series[k][i] * inverse[order - k][i];
                    }
                    -acc / series[0][i]
                })
                .collect();
            inverse.push(b_n);
        }

        *self.coefficients.borrow_mut() = series
            .iter()
            .map(|order| order.iter().map(|&v| narrow(v)).collect())
            .collect();

        // Evaluate V(1) per node through the epsilon table.
        let voltages: Vec<Complex64> = (0..n)
            .map(|i| {
                let mut partial = Complex::new(P::zero(), P::zero());
                let partials: Vec<Complex<P>> = series
                    .iter()
                    .map(|order| {
                        partial = partial + order[i];
                        partial
                    })
                    .collect();
                narrow(epsilon_limit(&partials))
            })
            .collect();
        if voltages
            .iter()
            .any(|v| !v.re.is_finite() || !v.im.is_finite())
        {
            return None;
        }
        Some(voltages)
    }
}

/// Wynn's epsilon algorithm: the limit of a sequence of partial sums via
/// diagonal Padé approximants.
fn epsilon_limit<P: HelmScalar>(partials: &[Complex<P>]) -> Complex<P> {
    let tiny = scalar::<P>(1e-30);
    let mut previous: Vec<Complex<P>> = vec![Complex::new(P::zero(), P::zero()); partials.len() + 1];
    let mut current: Vec<Complex<P>> = partials.to_vec();
    let mut best = *partials.last().unwrap_or(&Complex::new(P::zero(), P::zero()));
    let mut even = true;

    while current.len() > 1 {
        let mut next = Vec::with_capacity(current.len() - 1);
        for m in 0..current.len() - 1 {
            let difference = current[m + 1] - current[m];
            if difference.norm_sqr() < tiny {
                return best;
            }
            next.push(previous[m + 1] + difference.inv());
        }
        previous = current;
        current = next;
        even = !even;
        if even {
            if let Some(&candidate) = current.last() {
                best = candidate;
            }
        }
    }
    best
}

impl<P: HelmScalar> NodeVoltageCalculator for HolomorphicEmbedding<P> {
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

        let values: Vec<Vec<Complex<P>>> = (0..n)
            .map(|r| (0..n).map(|c| widen(system.reduced.get(r, c))).collect())
            .collect();
        let no_load: Vec<Complex<P>> = system
            .reduced
            .equivalent_currents()
            .iter()
            .map(|&c| widen(c))
            .collect();
        let sources: Vec<Complex<P>> = system
            .reduced
            .source_currents()
            .iter()
            .map(|&c| widen(c))
            .collect();

        let pv: Vec<usize> = (0..n).filter(|&i| system.specs[i].is_pv()).collect();
        let mut reactive_estimates = vec![0.0f64; n];
        let mut previous: Vec<Option<(f64, f64)>> = vec![None; n];

        // Magnitude sensitivities for the PV adjustment, from the diagonal
        // of Z = Y⁻¹ (f64 is plenty for a step-size estimate).
        let sensitivities: Vec<f64> = if pv.is_empty() {
            Vec::new()
        } else {
            let values_f64: Vec<Vec<Complex64>> = (0..n)
                .map(|r| (0..n).map(|c| system.reduced.get(r, c)).collect())
                .collect();
            (0..n)
                .map(|i| {
                    let mut unit = vec![Complex64::new(0.0, 0.0); n];
                    unit[i] = Complex64::new(1.0, 0.0);
                    gauss_elimination(&values_f64, &unit)
                        .map(|z| z[i].im.abs().max(1e-6))
                        .unwrap_or(1e-2)
                })
                .collect()
        };

        let outer_budget = if pv.is_empty() { 1 } else { self.pv_iterations };
        for outer in 0..outer_budget {
            let targets: Vec<Complex<P>> = system
                .specs
                .iter()
                .enumerate()
                .map(|(i, spec)| match spec {
                    NodeSpec::Pq { power } => widen(*power),
                    NodeSpec::Pv { real_power, .. } => {
                        widen(Complex64::new(*real_power, reactive_estimates[i]))
                    }
                    NodeSpec::Slack { .. } => Complex::new(P::zero(), P::zero()),
                })
                .collect();

            let Some(voltages) = self.evaluate_series(&values, &no_load, &sources, &targets)
            else {
                debug!("holomorphic embedding series evaluation failed");
                return SolveOutcome::Collapsed;
            };
            if !voltages_plausible(&voltages, nominal_voltage) {
                return SolveOutcome::Collapsed;
            }

            // PQ-only: accept or reject on the residual immediately.
            if pv.is_empty() {
                let error = system
                    .reduced
                    .calculate_power_error(&voltages, &system.specs);
                if error > self.tolerance {
                    debug!(error, "holomorphic embedding residual too large");
                    return SolveOutcome::Collapsed;
                }
                return system.finish(matrix, nodes, &voltages);
            }

            // PV adjustment: drive each magnitude onto its setpoint.
            let mut worst = 0.0f64;
            for &i in &pv {
                let NodeSpec::Pv { magnitude, .. } = &system.specs[i] else {
                    continue;
                };
                worst = worst.max((voltages[i].norm() - magnitude).abs());
            }
            trace!(outer, worst, "holomorphic embedding PV deviation");
            if worst < self.tolerance {
                let error = system
                    .reduced
                    .calculate_power_error(&voltages, &system.specs);
                if error > self.tolerance * 10.0 {
                    debug!(error, "holomorphic embedding residual too large");
                    return SolveOutcome::Collapsed;
                }
                return system.finish(matrix, nodes, &voltages);
            }

            for &i in &pv {
                let NodeSpec::Pv { magnitude, .. } = &system.specs[i] else {
                    continue;
                };
                let now = voltages[i].norm();
                let q = reactive_estimates[i];
                let step = match previous[i] {
                    // Secant step once two samples exist.
                    Some((q_prev, v_prev)) if (now - v_prev).abs() > 1e-12 => {
                        (magnitude - now) * (q - q_prev) / (now - v_prev)
                    }
                    _ => (magnitude - now) / sensitivities[i],
                };
                previous[i] = Some((q, now));
                reactive_estimates[i] += step;
            }
        }

        debug!(
            pv_iterations = self.pv_iterations,
            "holomorphic embedding PV adjustment budget exhausted"
        );
        SolveOutcome::Collapsed
    }
}
