//! The nodal admittance matrix and its stamp operations.
//!
//! The matrix is built exclusively through additive stamps: symmetric
//! two-node connections, single-cell unsymmetric entries, controlled
//! sources, and the ideal-transformer stamp with its auxiliary node. Order
//! of stamping never matters. A constant-current vector rides along with
//! the matrix; the current source is the only element that writes to it.
//!
//! Reduction to the unknown-voltage subsystem (`create_reduced`) and the
//! current/power evaluations used by every solver live here too, so a
//! solver strategy only ever needs this type plus a linear backend.

use crate::solve::NodeSpec;
use gridflow_core::{GridError, GridResult};
use num_complex::Complex64;

/// Square complex admittance matrix plus the constant-current vector.
#[derive(Debug, Clone)]
pub struct AdmittanceMatrix {
    values: Vec<Vec<Complex64>>,
    /// Constant current injections from elements (current sources).
    source_currents: Vec<Complex64>,
    /// Equivalent currents from eliminating known-voltage nodes; only
    /// nonzero on matrices produced by [`AdmittanceMatrix::create_reduced`].
    equivalent_currents: Vec<Complex64>,
}

impl AdmittanceMatrix {
    pub fn new(order: usize) -> Self {
        Self {
            values: vec![vec![Complex64::new(0.0, 0.0); order]; order],
            source_currents: vec![Complex64::new(0.0, 0.0); order],
            equivalent_currents: vec![Complex64::new(0.0, 0.0); order],
        }
    }

    #[inline]
    pub fn order(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn get(&self, row: usize, column: usize) -> Complex64 {
        self.values[row][column]
    }

    #[inline]
    fn add(&mut self, row: usize, column: usize, value: Complex64) {
        self.values[row][column] += value;
    }

    /// Total constant current per node: element injections plus the
    /// equivalent currents of any eliminated known-voltage nodes.
    pub fn constant_currents(&self) -> Vec<Complex64> {
        self.source_currents
            .iter()
            .zip(&self.equivalent_currents)
            .map(|(s, e)| s + e)
            .collect()
    }

    pub fn source_currents(&self) -> &[Complex64] {
        &self.source_currents
    }

    pub fn equivalent_currents(&self) -> &[Complex64] {
        &self.equivalent_currents
    }

    /// Symmetric branch stamp: admittance `y` between nodes `a` and `b`.
    pub fn add_connection(&mut self, a: usize, b: usize, y: Complex64) {
        self.add(a, a, y);
        self.add(b, b, y);
        self.add(a, b, -y);
        self.add(b, a, -y);
    }

    /// Single off-diagonal cell, no reciprocal update.
    pub fn add_unsymmetric_admittance(&mut self, row: usize, column: usize, y: Complex64) {
        self.add(row, column, y);
    }

    /// Voltage-controlled current source: current `g·(V_is − V_it)` drawn
    /// from `output_source` and delivered to `output_target`.
    pub fn add_voltage_controlled_current_source(
        &mut self,
        input_source: usize,
        input_target: usize,
        output_source: usize,
        output_target: usize,
        g: Complex64,
    ) {
        self.add(output_source, input_source, g);
        self.add(output_source, input_target, -g);
        self.add(output_target, input_source, -g);
        self.add(output_target, input_target, g);
    }

    /// Gyrator between port (a, b) and port (c, d): the antisymmetric dual
    /// of a transformer, `I_ab = (V_c − V_d)/r`, `I_cd = −(V_a − V_b)/r`.
    pub fn add_gyrator(&mut self, a: usize, b: usize, c: usize, d: usize, r: Complex64) {
        let g = r.inv();
        self.add_voltage_controlled_current_source(c, d, a, b, g);
        self.add_voltage_controlled_current_source(a, b, c, d, -g);
    }

    /// Lossless complex-ratio ideal transformer via one auxiliary node.
    ///
    /// The auxiliary unknown is the weighted primary branch current; its
    /// row enforces the voltage relation `V_in = ratio · V_out` and its
    /// column carries the current relation `I_out = −conj(ratio) · I_in`.
    /// `weight` only conditions the auxiliary equations; any positive
    /// value yields the same solution.
    #[allow(clippy::too_many_arguments)]
    pub fn add_ideal_transformer(
        &mut self,
        input_source: usize,
        input_target: usize,
        output_source: usize,
        output_target: usize,
        internal_node: usize,
        ratio: Complex64,
        weight: f64,
    ) -> GridResult<()> {
        if ratio.norm() == 0.0 {
            return Err(GridError::parameter(
                "ideal transformer",
                "ratio must be nonzero",
            ));
        }
        if !(weight > 0.0) {
            return Err(GridError::parameter(
                "ideal transformer",
                "weight must be positive",
            ));
        }
        let g = Complex64::new(1.0 / weight, 0.0);

        // Current relation (column of the auxiliary node).
        self.add(input_source, internal_node, g);
        self.add(input_target, internal_node, -g);
        self.add(output_source, internal_node, -ratio.conj() * g);
        self.add(output_target, internal_node, ratio.conj() * g);

        // Voltage relation (row of the auxiliary node).
        self.add(internal_node, input_source, g);
        self.add(internal_node, input_target, -g);
        self.add(internal_node, output_source, -ratio * g);
        self.add(internal_node, output_target, ratio * g);
        Ok(())
    }

    /// Add a constant current injection at a node.
    pub fn inject_current(&mut self, node: usize, current: Complex64) {
        self.source_currents[node] += current;
    }

    /// Restrict the system to the unknown-voltage nodes.
    ///
    /// Returns `Y_uu` with the equivalent constant-current vector
    /// `−Y_uk · V_k` folded into its current side, so a solver works with
    /// the reduced system alone: `Y_uu · V_u = I_u − Y_uk · V_k`.
    pub fn create_reduced(
        &self,
        unknown: &[usize],
        known: &[usize],
        known_voltages: &[Complex64],
    ) -> AdmittanceMatrix {
        let n = unknown.len();
        let mut reduced = AdmittanceMatrix::new(n);
        for (r, &i) in unknown.iter().enumerate() {
            for (c, &j) in unknown.iter().enumerate() {
                reduced.values[r][c] = self.values[i][j];
            }
            reduced.source_currents[r] = self.source_currents[i] + self.equivalent_currents[i];
            let mut equivalent = Complex64::new(0.0, 0.0);
            for (k, &j) in known.iter().enumerate() {
                equivalent -= self.values[i][j] * known_voltages[k];
            }
            reduced.equivalent_currents[r] = equivalent;
        }
        reduced
    }

    /// Node currents `Y · V`.
    pub fn calculate_currents(&self, voltages: &[Complex64]) -> Vec<Complex64> {
        self.values
            .iter()
            .map(|row| {
                row.iter()
                    .zip(voltages)
                    .map(|(y, v)| y * v)
                    .sum::<Complex64>()
            })
            .collect()
    }

    /// Total complex power absorbed by the stamped branches, `V* · (Y · V)`.
    pub fn calculate_power_loss(&self, voltages: &[Complex64]) -> Complex64 {
        self.calculate_currents(voltages)
            .iter()
            .zip(voltages)
            .map(|(i, v)| v.conj() * i)
            .sum()
    }

    /// Injected power per node, `V ⊙ conj(Y·V − I_const)`.
    pub fn calculate_all_powers(&self, voltages: &[Complex64]) -> Vec<Complex64> {
        let currents = self.calculate_currents(voltages);
        let constants = self.constant_currents();
        voltages
            .iter()
            .zip(currents.iter().zip(&constants))
            .map(|(v, (i, c))| v * (i - c).conj())
            .collect()
    }

    /// Summed mismatch magnitude over the power-constrained nodes, the
    /// quantity every iterative solver drives toward zero.
    pub fn calculate_power_error(&self, voltages: &[Complex64], specs: &[NodeSpec]) -> f64 {
        let powers = self.calculate_all_powers(voltages);
        specs
            .iter()
            .zip(&powers)
            .map(|(spec, power)| match spec {
                NodeSpec::Pq { power: target } => (target - power).norm(),
                NodeSpec::Pv { real_power, .. } => (real_power - power.re).abs(),
                NodeSpec::Slack { .. } => 0.0,
            })
            .sum()
    }
}
