//! Unit newtypes and the per-unit conversion layer.
//!
//! Load-flow calculations run in the per-unit system: every electrical
//! quantity is normalized against a base derived from a node's nominal
//! voltage and a network-wide power base. Raw `f64` values make it easy to
//! hand a solver volts where it expects per-unit; the newtypes here catch
//! that at compile time, and [`DimensionScaler`] is the single place where
//! physical units and per-unit values are exchanged.
//!
//! All types use `#[repr(transparent)]` so they have the same memory layout
//! as `f64`.

use crate::error::{GridError, GridResult};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Macro to implement common arithmetic operations for unit types
macro_rules! impl_unit_ops {
    ($type:ty, $unit_name:literal) => {
        impl Add for $type {
            type Output = Self;
            fn add(self, rhs: Self) -> Self::Output {
                Self(self.0 + rhs.0)
            }
        }

        impl Sub for $type {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self::Output {
                Self(self.0 - rhs.0)
            }
        }

        impl Neg for $type {
            type Output = Self;
            fn neg(self) -> Self::Output {
                Self(-self.0)
            }
        }

        impl Mul<f64> for $type {
            type Output = Self;
            fn mul(self, rhs: f64) -> Self::Output {
                Self(self.0 * rhs)
            }
        }

        impl Div<f64> for $type {
            type Output = Self;
            fn div(self, rhs: f64) -> Self::Output {
                Self(self.0 / rhs)
            }
        }

        impl Div<$type> for $type {
            type Output = f64;
            fn div(self, rhs: $type) -> Self::Output {
                self.0 / rhs.0
            }
        }

        impl std::fmt::Display for $type {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{:.4} {}", self.0, $unit_name)
            }
        }

        impl std::iter::Sum for $type {
            fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
                Self(iter.map(|x| x.0).sum())
            }
        }

        impl $type {
            /// Create a new value
            #[inline]
            pub const fn new(value: f64) -> Self {
                Self(value)
            }

            /// Get the raw numeric value
            #[inline]
            pub const fn value(self) -> f64 {
                self.0
            }

            /// Absolute value
            #[inline]
            pub fn abs(self) -> Self {
                Self(self.0.abs())
            }

            /// Check if value is finite
            #[inline]
            pub fn is_finite(self) -> bool {
                self.0.is_finite()
            }
        }
    };
}

/// Voltage magnitude in volts.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Volts(pub f64);

impl_unit_ops!(Volts, "V");

/// Power in watts. Complex powers are carried as `Complex64` volt-amperes
/// with the real part in watts; this newtype covers the scalar cases
/// (nominal power, real-power setpoints).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Watts(pub f64);

impl_unit_ops!(Watts, "W");

/// Current in amperes.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Amperes(pub f64);

impl_unit_ops!(Amperes, "A");

/// Impedance magnitude in ohms.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Ohms(pub f64);

impl_unit_ops!(Ohms, "Ω");

/// Normalized quantity relative to a chosen base.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PerUnit(pub f64);

impl_unit_ops!(PerUnit, "pu");

impl PerUnit {
    /// One per-unit (nominal).
    pub const ONE: Self = Self(1.0);

    /// Zero per-unit.
    pub const ZERO: Self = Self(0.0);
}

/// Angle in radians.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Radians(pub f64);

impl_unit_ops!(Radians, "rad");

/// Angle in degrees.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Degrees(pub f64);

impl_unit_ops!(Degrees, "°");

impl Radians {
    /// Convert to degrees
    #[inline]
    pub fn to_degrees(self) -> Degrees {
        Degrees(self.0.to_degrees())
    }

    /// Sine of the angle
    #[inline]
    pub fn sin(self) -> f64 {
        self.0.sin()
    }

    /// Cosine of the angle
    #[inline]
    pub fn cos(self) -> f64 {
        self.0.cos()
    }

    /// Zero radians
    pub const ZERO: Self = Self(0.0);
}

impl Degrees {
    /// Convert to radians
    #[inline]
    pub fn to_radians(self) -> Radians {
        Radians(self.0.to_radians())
    }
}

/// Smallest voltage or power base the scaler accepts.
pub const MINIMUM_BASE: f64 = 1e-3;

/// Per-unit ⇄ physical-unit conversion for one voltage level.
///
/// Built from a voltage base (a node's nominal voltage) and the
/// network-wide power base. The current and impedance bases follow:
///
/// ```text
/// I_base = S_base / U_base        Z_base = U_base² / S_base
/// ```
///
/// Admittance scales with the inverse of the impedance relation. All
/// conversions are pure; a scaler holds no mutable state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimensionScaler {
    voltage_base: f64,
    power_base: f64,
    current_base: f64,
    impedance_base: f64,
}

impl DimensionScaler {
    /// Create a scaler from a voltage and power base.
    ///
    /// Both bases must exceed [`MINIMUM_BASE`]; anything smaller would blow
    /// up the derived impedance and current bases.
    pub fn new(voltage_base: Volts, power_base: Watts) -> GridResult<Self> {
        let u = voltage_base.value();
        let s = power_base.value();
        if !(u > MINIMUM_BASE) {
            return Err(GridError::parameter(
                "dimension scaler",
                format!("voltage base {u} must exceed {MINIMUM_BASE}"),
            ));
        }
        if !(s > MINIMUM_BASE) {
            return Err(GridError::parameter(
                "dimension scaler",
                format!("power base {s} must exceed {MINIMUM_BASE}"),
            ));
        }
        Ok(Self {
            voltage_base: u,
            power_base: s,
            current_base: s / u,
            impedance_base: u * u / s,
        })
    }

    #[inline]
    pub fn voltage_base(&self) -> f64 {
        self.voltage_base
    }

    #[inline]
    pub fn power_base(&self) -> f64 {
        self.power_base
    }

    #[inline]
    pub fn current_base(&self) -> f64 {
        self.current_base
    }

    #[inline]
    pub fn impedance_base(&self) -> f64 {
        self.impedance_base
    }

    /// Physical volts → per-unit.
    #[inline]
    pub fn scale_voltage(&self, voltage: Complex64) -> Complex64 {
        voltage / self.voltage_base
    }

    /// Per-unit → physical volts.
    #[inline]
    pub fn unscale_voltage(&self, voltage: Complex64) -> Complex64 {
        voltage * self.voltage_base
    }

    /// Physical volt-amperes → per-unit.
    #[inline]
    pub fn scale_power(&self, power: Complex64) -> Complex64 {
        power / self.power_base
    }

    /// Per-unit → physical volt-amperes.
    #[inline]
    pub fn unscale_power(&self, power: Complex64) -> Complex64 {
        power * self.power_base
    }

    /// Physical amperes → per-unit.
    #[inline]
    pub fn scale_current(&self, current: Complex64) -> Complex64 {
        current / self.current_base
    }

    /// Per-unit → physical amperes.
    #[inline]
    pub fn unscale_current(&self, current: Complex64) -> Complex64 {
        current * self.current_base
    }

    /// Physical ohms → per-unit.
    #[inline]
    pub fn scale_impedance(&self, impedance: Complex64) -> Complex64 {
        impedance / self.impedance_base
    }

    /// Per-unit → physical ohms.
    #[inline]
    pub fn unscale_impedance(&self, impedance: Complex64) -> Complex64 {
        impedance * self.impedance_base
    }

    /// Physical siemens → per-unit (inverse of the impedance relation).
    #[inline]
    pub fn scale_admittance(&self, admittance: Complex64) -> Complex64 {
        admittance * self.impedance_base
    }

    /// Per-unit → physical siemens.
    #[inline]
    pub fn unscale_admittance(&self, admittance: Complex64) -> Complex64 {
        admittance / self.impedance_base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scaler() -> DimensionScaler {
        DimensionScaler::new(Volts(10_000.0), Watts(1_000_000.0)).unwrap()
    }

    #[test]
    fn test_derived_bases() {
        let s = scaler();
        assert!((s.current_base() - 100.0).abs() < 1e-9);
        assert!((s.impedance_base() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_scale_unscale_is_identity() {
        let s = scaler();
        let samples = [
            Complex64::new(3.0, -4.0),
            Complex64::new(-123.456, 789.0),
            Complex64::new(0.0, 1e6),
        ];
        for v in samples {
            let round = |a: Complex64, b: Complex64| (a - b).norm() < 1e-9 * (1.0 + b.norm());
            assert!(round(s.unscale_voltage(s.scale_voltage(v)), v));
            assert!(round(s.unscale_power(s.scale_power(v)), v));
            assert!(round(s.unscale_current(s.scale_current(v)), v));
            assert!(round(s.unscale_impedance(s.scale_impedance(v)), v));
            assert!(round(s.unscale_admittance(s.scale_admittance(v)), v));
        }
    }

    #[test]
    fn test_admittance_is_inverse_of_impedance() {
        let s = scaler();
        let z = Complex64::new(2.0, 5.0);
        let y = z.inv();
        let scaled = s.scale_impedance(z) * s.scale_admittance(y);
        assert!((scaled - Complex64::new(1.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn test_tiny_bases_are_rejected() {
        assert!(DimensionScaler::new(Volts(1e-4), Watts(100.0)).is_err());
        assert!(DimensionScaler::new(Volts(100.0), Watts(0.0)).is_err());
        assert!(DimensionScaler::new(Volts(-10.0), Watts(100.0)).is_err());
    }

    #[test]
    fn test_angle_conversions() {
        let deg = Degrees(180.0);
        assert!((deg.to_radians().value() - std::f64::consts::PI).abs() < 1e-12);
        assert!((Radians(std::f64::consts::FRAC_PI_2).to_degrees().value() - 90.0).abs() < 1e-12);
    }
}
