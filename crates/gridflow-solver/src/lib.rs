//! # gridflow-solver: AC Load-Flow Solving Pipeline
//!
//! Takes an assembled [`gridflow_core::Network`] through the full solve:
//! per-unit admittance construction by delegated element stamping, bus
//! classification, the configured voltage-calculation strategy, and the
//! rescale back to physical units.
//!
//! ## Modules
//!
//! - [`admittance`] - Stamp-built complex admittance matrix and reduction
//! - [`assembly`] - Element stamping, node index, per-node constraints
//! - [`solve`] - The `NodeVoltageCalculator` contract and the five
//!   built-in strategies (Newton-Raphson, fast-decoupled, node-potential,
//!   current-iteration, holomorphic embedding)
//! - [`calculator`] - The orchestrating [`LoadFlowCalculator`]
//! - [`linear`] - Dense real/complex linear-system backends
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gridflow_core::{Network, NodeId, Volts};
//! use gridflow_solver::{CalculatorKind, LoadFlowCalculator};
//! use num_complex::Complex64;
//!
//! let mut network = Network::new();
//! network.add_node(NodeId::new(0), Volts(10_000.0), "feed").unwrap();
//! network.add_node(NodeId::new(1), Volts(10_000.0), "city").unwrap();
//! network
//!     .add_feed_in(NodeId::new(0), Complex64::new(10_000.0, 0.0), Complex64::new(0.0, 0.0))
//!     .unwrap();
//! // ... lines, transformers, loads ...
//!
//! let calculator = LoadFlowCalculator::with_kind(CalculatorKind::NewtonRaphson);
//! let solution = calculator.calculate_node_voltages(&network).unwrap();
//! if solution.converged {
//!     println!("{:?}", solution.nodes[&NodeId::new(1)]);
//! }
//! ```

pub mod admittance;
pub mod assembly;
pub mod calculator;
pub mod linear;
pub mod solve;

pub use admittance::AdmittanceMatrix;
pub use assembly::{assemble, Assembly};
pub use calculator::{LoadFlowCalculator, LoadFlowSolution};
pub use linear::{FaerSolver, GaussSolver, LinearSolver};
pub use solve::{
    CalculatorKind, CurrentIteration, FastDecoupled, HolomorphicEmbedding, NewtonRaphson,
    NodePotential, NodeResult, NodeSpec, NodeVoltageCalculator, SolveOutcome,
};
