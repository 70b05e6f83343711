//! Unified error types for the gridflow crates.
//!
//! This module provides a common error type [`GridError`] covering every
//! failure the load-flow pipeline can report before solving: element
//! construction errors, id errors, and network-level validation errors.
//! Solver non-convergence is deliberately *not* represented here; voltage
//! collapse is a checked outcome of the solve, not an error.

use crate::NodeId;
use thiserror::Error;

/// Unified error type for all gridflow operations.
///
/// Construction-time variants are raised by the offending `add_*` call;
/// network-level variants are raised once, before solving, and block the
/// solve entirely.
#[derive(Error, Debug)]
pub enum GridError {
    /// A numeric precondition on an element parameter was violated.
    #[error("invalid parameter for {entity}: {message}")]
    InvalidParameter { entity: String, message: String },

    /// A node id was registered twice.
    #[error("node id {0} is already in use")]
    DuplicateNode(NodeId),

    /// An element referenced a node id that was never registered.
    #[error("unknown node id {0}")]
    UnknownNode(NodeId),

    /// The connectivity graph has more than one segment.
    #[error("network has floating nodes: {0}")]
    FloatingNodes(String),

    /// Two directly-joined nodes disagree on nominal voltage.
    #[error("nominal voltage mismatch across direct connection: {0}")]
    VoltageMismatch(String),

    /// More than one element fixes the voltage at a single node.
    #[error("node {0} is overdetermined: more than one element fixes its voltage")]
    Overdetermined(String),

    /// No element anywhere fixes a voltage, so the system has no reference.
    #[error("network is underdetermined: no feed-in fixes a voltage anywhere")]
    Underdetermined,

    /// Two transformer paths imply disagreeing phase shifts between the
    /// same pair of voltage-level segments.
    #[error("inconsistent transformer phase shifts: {0}")]
    InconsistentPhaseShifts(String),

    /// The delegated linear-algebra backend failed (singular system, size
    /// mismatch). Surfaced for diagnostic callers; the solvers themselves
    /// translate this into voltage collapse.
    #[error("linear algebra failure: {0}")]
    Linear(String),

    /// Generic errors (for wrapping external errors).
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using GridError.
pub type GridResult<T> = Result<T, GridError>;

impl GridError {
    /// Shorthand for an [`GridError::InvalidParameter`] with a formatted entity.
    pub fn parameter(entity: impl Into<String>, message: impl Into<String>) -> Self {
        GridError::InvalidParameter {
            entity: entity.into(),
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for GridError {
    fn from(err: anyhow::Error) -> Self {
        GridError::Other(err.to_string())
    }
}

impl From<String> for GridError {
    fn from(s: String) -> Self {
        GridError::Other(s)
    }
}

impl From<&str> for GridError {
    fn from(s: &str) -> Self {
        GridError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_names_entity() {
        let err = GridError::parameter("transmission line 1-2", "length must be positive");
        let text = err.to_string();
        assert!(text.contains("transmission line 1-2"));
        assert!(text.contains("length must be positive"));
    }

    #[test]
    fn test_result_type_alias() {
        fn example_fn() -> GridResult<i32> {
            Ok(42)
        }
        assert_eq!(example_fn().unwrap(), 42);
    }

    #[test]
    fn test_question_mark_operator() {
        fn inner() -> GridResult<()> {
            Err(GridError::Underdetermined)
        }

        fn outer() -> GridResult<()> {
            inner()?;
            Ok(())
        }

        assert!(outer().is_err());
    }
}
