//! End-to-end pipeline tests: physical-unit networks through validation,
//! assembly, solving, and rescaling.

use gridflow_core::{
    GridError, Network, NodeId, Radians, ThreeWindingTransformer, TransmissionLine,
    TwoWindingTransformer, Volts, Watts,
};
use gridflow_solver::{CalculatorKind, LoadFlowCalculator};
use num_complex::Complex64;

fn c(re: f64, im: f64) -> Complex64 {
    Complex64::new(re, im)
}

fn node(n: usize) -> NodeId {
    NodeId::new(n)
}

fn resistive_line(a: usize, b: usize, ohms: f64) -> TransmissionLine {
    TransmissionLine {
        node_one: node(a),
        node_two: node(b),
        series_resistance_per_metre: ohms / 1000.0,
        series_inductance_per_metre: 0.0,
        shunt_conductance_per_metre: 0.0,
        shunt_capacitance_per_metre: 0.0,
        length: 1000.0,
        frequency: 50.0,
        transmission_equation_model: false,
    }
}

/// The hand-derivable reference case in physical units: 10 kV feed, 10 Ω
/// line (0.1 pu on the 1 MW base), 1 MW load (−1 pu). The per-unit load
/// voltage solves 10V² − 10V + 1 = 0.
fn reference_network() -> Network {
    let mut network = Network::new();
    network.add_node(node(0), Volts(10_000.0), "feed").unwrap();
    network.add_node(node(1), Volts(10_000.0), "city").unwrap();
    network
        .add_feed_in(node(0), c(10_000.0, 0.0), c(0.0, 0.0))
        .unwrap();
    network
        .add_transmission_line(resistive_line(0, 1, 10.0))
        .unwrap();
    network.add_load(node(1), c(-1_000_000.0, 0.0)).unwrap();
    network
}

#[test]
fn reference_case_matches_hand_solution() {
    let solution = LoadFlowCalculator::default()
        .calculate_node_voltages(&reference_network())
        .unwrap();
    assert!(solution.converged);

    let expected_pu = (10.0 + 60.0f64.sqrt()) / 20.0;
    let city = &solution.nodes[&node(1)];
    assert!((city.voltage.re - expected_pu * 10_000.0).abs() < 1.0);
    assert!(city.voltage.im.abs() < 1e-3);
    assert!((city.power.re - (-1_000_000.0)).abs() < 10.0);

    // The feed covers the load plus the series loss.
    let loss = 10.0 * (1.0 - expected_pu) * (1.0 - expected_pu) * 1_000_000.0;
    let feed = &solution.nodes[&node(0)];
    assert!((feed.power.re - (1_000_000.0 + loss)).abs() < 10.0);
}

#[test]
fn collapse_is_distinguishable_from_validation_failure() {
    // Far beyond the transferable power: the solve collapses, but the
    // network itself is valid, so there is no error, just an empty result.
    let mut network = Network::new();
    network.add_node(node(0), Volts(10_000.0), "feed").unwrap();
    network.add_node(node(1), Volts(10_000.0), "city").unwrap();
    network
        .add_feed_in(node(0), c(10_000.0, 0.0), c(0.0, 0.0))
        .unwrap();
    network
        .add_transmission_line(resistive_line(0, 1, 500.0))
        .unwrap();
    network.add_load(node(1), c(-2_000_000.0, 0.0)).unwrap();

    let solution = LoadFlowCalculator::default()
        .calculate_node_voltages(&network)
        .unwrap();
    assert!(!solution.converged);
    assert!(solution.nodes.is_empty());

    // A floating node, by contrast, is a hard error.
    network.add_node(node(2), Volts(10_000.0), "island").unwrap();
    let error = LoadFlowCalculator::default()
        .calculate_node_voltages(&network)
        .unwrap_err();
    assert!(matches!(error, GridError::FloatingNodes(_)));
}

#[test]
fn feed_in_with_internal_impedance_moves_the_slack_inside() {
    let mut network = Network::new();
    network.add_node(node(0), Volts(10_000.0), "feed").unwrap();
    network.add_node(node(1), Volts(10_000.0), "city").unwrap();
    network
        .add_feed_in(node(0), c(10_000.0, 0.0), c(2.0, 0.0))
        .unwrap();
    network
        .add_transmission_line(resistive_line(0, 1, 10.0))
        .unwrap();
    network.add_load(node(1), c(-1_000_000.0, 0.0)).unwrap();

    let solution = LoadFlowCalculator::default()
        .calculate_node_voltages(&network)
        .unwrap();
    assert!(solution.converged);

    // The external feed node now sags below the source setpoint because
    // the internal impedance carries the full feed current.
    let feed = &solution.nodes[&node(0)];
    assert!(feed.voltage.norm() < 10_000.0);
    assert!(feed.voltage.norm() > 9_500.0);
}

#[test]
fn nominal_ratio_transformer_couples_voltage_levels() {
    let mut network = Network::new();
    network.add_node(node(0), Volts(110_000.0), "hv").unwrap();
    network.add_node(node(1), Volts(20_000.0), "mv").unwrap();
    network
        .add_feed_in(node(0), c(110_000.0, 0.0), c(0.0, 0.0))
        .unwrap();
    network
        .add_two_winding_transformer(TwoWindingTransformer {
            upper_node: node(0),
            lower_node: node(1),
            nominal_power: Watts(10e6),
            relative_short_circuit_voltage: 0.1,
            copper_losses: Watts(100e3),
            iron_losses: Watts(50e3),
            relative_no_load_current: 0.01,
            ratio: 5.5,
            nominal_phase_shift: Radians::ZERO,
        })
        .unwrap();
    network.add_load(node(1), c(-5e6, -1e6)).unwrap();

    let solution = LoadFlowCalculator::default()
        .calculate_node_voltages(&network)
        .unwrap();
    assert!(solution.converged);

    let mv = &solution.nodes[&node(1)];
    assert!(mv.voltage.norm() > 18_000.0 && mv.voltage.norm() < 20_500.0);
    assert!((mv.power.re - (-5e6)).abs() < 1e3);

    // The feed supplies the load plus transformer losses.
    let hv = &solution.nodes[&node(0)];
    assert!(hv.power.re > 5e6);
    assert!(hv.power.re < 5.5e6);
}

#[test]
fn off_nominal_ratio_uses_the_ideal_transformer_stamp() {
    let mut network = Network::new();
    network.add_node(node(0), Volts(110_000.0), "hv").unwrap();
    network.add_node(node(1), Volts(20_000.0), "mv").unwrap();
    network
        .add_feed_in(node(0), c(110_000.0, 0.0), c(0.0, 0.0))
        .unwrap();
    network
        .add_two_winding_transformer(TwoWindingTransformer {
            upper_node: node(0),
            lower_node: node(1),
            nominal_power: Watts(10e6),
            relative_short_circuit_voltage: 0.1,
            copper_losses: Watts(100e3),
            iron_losses: Watts(50e3),
            relative_no_load_current: 0.01,
            ratio: 5.8,
            nominal_phase_shift: Radians::ZERO,
        })
        .unwrap();
    network.add_load(node(1), c(-2e6, -0.5e6)).unwrap();

    let solution = LoadFlowCalculator::default()
        .calculate_node_voltages(&network)
        .unwrap();
    assert!(solution.converged);

    // A ratio above nominal pulls the secondary below its nominal level:
    // roughly 110 kV / 5.8 ≈ 18.97 kV before the load drop.
    let mv = &solution.nodes[&node(1)];
    assert!(mv.voltage.norm() > 17_500.0 && mv.voltage.norm() < 19_500.0);
    assert!((mv.power.re - (-2e6)).abs() < 1e3);
}

#[test]
fn three_winding_transformer_feeds_two_levels() {
    let mut network = Network::new();
    network.add_node(node(0), Volts(110_000.0), "hv").unwrap();
    network.add_node(node(1), Volts(20_000.0), "mv").unwrap();
    network.add_node(node(2), Volts(10_000.0), "lv").unwrap();
    network
        .add_feed_in(node(0), c(110_000.0, 0.0), c(0.0, 0.0))
        .unwrap();
    network
        .add_three_winding_transformer(ThreeWindingTransformer {
            node_one: node(0),
            node_two: node(1),
            node_three: node(2),
            nominal_powers: (Watts(10e6), Watts(10e6), Watts(10e6)),
            relative_short_circuit_voltages: (0.1, 0.1, 0.1),
            copper_losses: (Watts(50e3), Watts(50e3), Watts(50e3)),
            iron_losses: Watts(10e3),
            relative_no_load_current: 0.01,
            phase_shifts: (Radians::ZERO, Radians::ZERO),
        })
        .unwrap();
    network.add_load(node(1), c(-2e6, -0.4e6)).unwrap();
    network.add_load(node(2), c(-1e6, -0.2e6)).unwrap();

    let solution = LoadFlowCalculator::default()
        .calculate_node_voltages(&network)
        .unwrap();
    assert!(solution.converged);

    for (id, nominal) in [(node(1), 20_000.0), (node(2), 10_000.0)] {
        let result = &solution.nodes[&id];
        let magnitude = result.voltage.norm();
        assert!(
            magnitude > 0.85 * nominal && magnitude < 1.05 * nominal,
            "node {id} at {magnitude} V"
        );
    }
    assert!((solution.nodes[&node(1)].power.re - (-2e6)).abs() < 1e3);
    assert!((solution.nodes[&node(2)].power.re - (-1e6)).abs() < 1e3);
}

#[test]
fn generator_holds_its_voltage_setpoint() {
    let mut network = Network::new();
    network.add_node(node(0), Volts(10_000.0), "feed").unwrap();
    network.add_node(node(1), Volts(10_000.0), "plant").unwrap();
    network.add_node(node(2), Volts(10_000.0), "city").unwrap();
    network
        .add_feed_in(node(0), c(10_000.0, 0.0), c(0.0, 0.0))
        .unwrap();
    network
        .add_transmission_line(resistive_line(0, 1, 5.0))
        .unwrap();
    network
        .add_transmission_line(resistive_line(1, 2, 5.0))
        .unwrap();
    network
        .add_generator(node(1), Volts(10_200.0), Watts(400_000.0))
        .unwrap();
    network.add_load(node(2), c(-1_000_000.0, 0.0)).unwrap();

    let solution = LoadFlowCalculator::default()
        .calculate_node_voltages(&network)
        .unwrap();
    assert!(solution.converged);
    assert!((solution.nodes[&node(1)].voltage.norm() - 10_200.0).abs() < 1.0);
    assert!((solution.nodes[&node(1)].power.re - 400_000.0).abs() < 100.0);
}

#[test]
fn zero_impedance_line_coalesces_nodes_and_splits_power_back() {
    let mut network = Network::new();
    network.add_node(node(0), Volts(10_000.0), "feed").unwrap();
    network.add_node(node(1), Volts(10_000.0), "bus-a").unwrap();
    network.add_node(node(2), Volts(10_000.0), "bus-b").unwrap();
    network
        .add_feed_in(node(0), c(10_000.0, 0.0), c(0.0, 0.0))
        .unwrap();
    network
        .add_transmission_line(resistive_line(0, 1, 10.0))
        .unwrap();
    // Busbar link: zero series impedance, a direct connection.
    network
        .add_transmission_line(TransmissionLine {
            series_resistance_per_metre: 0.0,
            ..resistive_line(1, 2, 0.0)
        })
        .unwrap();
    network.add_load(node(1), c(-500_000.0, 0.0)).unwrap();
    network.add_load(node(2), c(-500_000.0, 0.0)).unwrap();

    let solution = LoadFlowCalculator::default()
        .calculate_node_voltages(&network)
        .unwrap();
    assert!(solution.converged);

    let a = &solution.nodes[&node(1)];
    let b = &solution.nodes[&node(2)];
    assert!((a.voltage - b.voltage).norm() < 1e-9, "shared busbar voltage");
    // The non-absorbing member reports its own demand; the lowest-id
    // member absorbs the remainder, and the group total is preserved.
    assert!((b.power.re - (-500_000.0)).abs() < 1.0);
    assert!((a.power.re + b.power.re - (-1_000_000.0)).abs() < 10.0);
}

#[test]
fn current_source_balances_at_its_node() {
    let mut network = Network::new();
    network.add_node(node(0), Volts(10_000.0), "feed").unwrap();
    network.add_node(node(1), Volts(10_000.0), "city").unwrap();
    network
        .add_feed_in(node(0), c(10_000.0, 0.0), c(0.0, 0.0))
        .unwrap();
    network
        .add_transmission_line(resistive_line(0, 1, 10.0))
        .unwrap();
    network.add_load(node(1), c(-100_000.0, 0.0)).unwrap();
    network
        .add_current_source(node(1), c(20.0, 0.0), c(50.0, 0.0))
        .unwrap();

    let solution = LoadFlowCalculator::default()
        .calculate_node_voltages(&network)
        .unwrap();
    assert!(solution.converged);

    // The node's own constraint is still its load; the source's
    // contribution arrives through the matrix and the current vector.
    let city = &solution.nodes[&node(1)];
    assert!((city.power.re - (-100_000.0)).abs() < 10.0);
    assert!(city.voltage.norm() > 9_000.0 && city.voltage.norm() < 11_000.0);
}

#[test]
fn impedance_load_drops_the_voltage() {
    let mut network = Network::new();
    network.add_node(node(0), Volts(10_000.0), "feed").unwrap();
    network.add_node(node(1), Volts(10_000.0), "city").unwrap();
    network
        .add_feed_in(node(0), c(10_000.0, 0.0), c(0.0, 0.0))
        .unwrap();
    network
        .add_transmission_line(resistive_line(0, 1, 10.0))
        .unwrap();
    network.add_load(node(1), c(-10_000.0, 0.0)).unwrap();
    network
        .add_impedance_load(node(1), c(1_000.0, 0.0))
        .unwrap();

    let solution = LoadFlowCalculator::default()
        .calculate_node_voltages(&network)
        .unwrap();
    assert!(solution.converged);

    // ~100 kW drawn through the impedance: a visible but small sag.
    let city = &solution.nodes[&node(1)];
    assert!(city.voltage.norm() < 9_990.0);
    assert!(city.voltage.norm() > 9_800.0);
}

#[test]
fn inconsistent_phase_shifts_block_the_solve() {
    let mut network = Network::new();
    network.add_node(node(0), Volts(110_000.0), "hv-a").unwrap();
    network.add_node(node(1), Volts(110_000.0), "hv-b").unwrap();
    network.add_node(node(2), Volts(20_000.0), "mv-a").unwrap();
    network.add_node(node(3), Volts(20_000.0), "mv-b").unwrap();
    network
        .add_feed_in(node(0), c(110_000.0, 0.0), c(0.0, 0.0))
        .unwrap();
    network
        .add_transmission_line(resistive_line(0, 1, 5.0))
        .unwrap();
    network
        .add_transmission_line(resistive_line(2, 3, 5.0))
        .unwrap();
    for (upper, lower, shift) in [(0, 2, 0.3), (1, 3, 0.4)] {
        network
            .add_two_winding_transformer(TwoWindingTransformer {
                upper_node: node(upper),
                lower_node: node(lower),
                nominal_power: Watts(10e6),
                relative_short_circuit_voltage: 0.1,
                copper_losses: Watts(100e3),
                iron_losses: Watts(50e3),
                relative_no_load_current: 0.01,
                ratio: 5.5,
                nominal_phase_shift: Radians(shift),
            })
            .unwrap();
    }
    network.add_load(node(3), c(-1e6, 0.0)).unwrap();

    let error = LoadFlowCalculator::default()
        .calculate_node_voltages(&network)
        .unwrap_err();
    assert!(matches!(error, GridError::InconsistentPhaseShifts(_)));
}

#[test]
fn admittance_matrix_surface_reports_names_and_base() {
    let calculator = LoadFlowCalculator::with_kind(CalculatorKind::NewtonRaphson);
    let (matrix, names, power_base) = calculator
        .calculate_admittance_matrix(&reference_network())
        .unwrap();

    assert_eq!(names[0], "feed");
    assert_eq!(names[1], "city");
    assert!((power_base - 1_000_000.0).abs() < 1.0);

    // Only symmetric connection stamps in this network.
    for r in 0..matrix.order() {
        for col in 0..matrix.order() {
            assert_eq!(matrix.get(r, col), matrix.get(col, r));
        }
    }
    // 10 Ω on the 100 Ω impedance base: 10 pu series admittance.
    assert!((matrix.get(0, 1).re - (-10.0)).abs() < 1e-9);
}
