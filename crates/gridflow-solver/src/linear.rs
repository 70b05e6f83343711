//! Dense linear-system backends (Ax = b) for real and complex systems.
//!
//! This is the delegated linear-algebra collaborator: the solvers hand a
//! well-conditioned square matrix over and get the solution back, nothing
//! more. Two engines are provided: a dependency-free Gaussian elimination
//! and faer's LU with partial pivoting.

use anyhow::{anyhow, Result};
use faer::complex_native::c64;
use faer::{prelude::*, solvers::PartialPivLu, Mat};
use num_complex::{Complex64, ComplexFloat};
use num_traits::cast;

/// Trait for solving dense linear systems.
///
/// The Newton-family solvers need real systems (the Jacobian update); all
/// voltage solves are complex. One collaborator serves both.
pub trait LinearSolver: Send + Sync {
    /// Solve the real system Ax = b.
    fn solve_real(&self, matrix: &[Vec<f64>], rhs: &[f64]) -> Result<Vec<f64>>;

    /// Solve the complex system Ax = b.
    fn solve_complex(&self, matrix: &[Vec<Complex64>], rhs: &[Complex64]) -> Result<Vec<Complex64>>;
}

fn check_shape<T>(matrix: &[Vec<T>], rhs_len: usize) -> Result<()> {
    let n = matrix.len();
    if rhs_len != n {
        return Err(anyhow!(
            "rhs length ({rhs_len}) does not match matrix dimension {n}"
        ));
    }
    if matrix.iter().any(|row| row.len() != n) {
        return Err(anyhow!("matrix must be square"));
    }
    Ok(())
}

/// Gaussian elimination with partial pivoting, generic over real and
/// complex scalars (pivot selection by modulus). Also the engine behind
/// the analytic solver's extended-precision path, where faer cannot help.
pub fn gauss_elimination<T>(matrix: &[Vec<T>], rhs: &[T]) -> Result<Vec<T>>
where
    T: ComplexFloat,
{
    let n = matrix.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    check_shape(matrix, rhs.len())?;

    let mut a: Vec<Vec<T>> = matrix.to_vec();
    let mut b: Vec<T> = rhs.to_vec();
    let tiny: T::Real = cast(1e-12).ok_or_else(|| anyhow!("scalar conversion failed"))?;

    for i in 0..n {
        let mut pivot = i;
        for row in i + 1..n {
            if a[row][i].abs() > a[pivot][i].abs() {
                pivot = row;
            }
        }
        if pivot != i {
            a.swap(i, pivot);
            b.swap(i, pivot);
        }

        let diag = a[i][i];
        if !(diag.abs() > tiny) {
            return Err(anyhow!("singular matrix"));
        }

        for value in a[i][i..].iter_mut() {
            *value = *value / diag;
        }
        b[i] = b[i] / diag;

        let pivot_segment = a[i][i..].to_vec();
        let pivot_rhs = b[i];
        for row in 0..n {
            if row == i {
                continue;
            }
            let factor = a[row][i];
            for (target, &pivot_value) in a[row][i..].iter_mut().zip(pivot_segment.iter()) {
                *target = *target - factor * pivot_value;
            }
            b[row] = b[row] - factor * pivot_rhs;
        }
    }

    Ok(b)
}

#[derive(Debug, Clone, Default)]
pub struct GaussSolver;

impl LinearSolver for GaussSolver {
    fn solve_real(&self, matrix: &[Vec<f64>], rhs: &[f64]) -> Result<Vec<f64>> {
        gauss_elimination(matrix, rhs)
    }

    fn solve_complex(&self, matrix: &[Vec<Complex64>], rhs: &[Complex64]) -> Result<Vec<Complex64>> {
        gauss_elimination(matrix, rhs)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FaerSolver;

impl LinearSolver for FaerSolver {
    fn solve_real(&self, matrix: &[Vec<f64>], rhs: &[f64]) -> Result<Vec<f64>> {
        let n = matrix.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        check_shape(matrix, rhs.len())?;

        let mat = Mat::from_fn(n, n, |i, j| matrix[i][j]);
        let rhs_mat = Mat::from_fn(n, 1, |i, _| rhs[i]);
        let lu = PartialPivLu::new(mat.as_ref());
        let sol = lu.solve(&rhs_mat);

        let solution: Vec<f64> = (0..n).map(|i| sol.read(i, 0)).collect();
        if solution.iter().any(|v| !v.is_finite()) {
            return Err(anyhow!("singular matrix"));
        }
        Ok(solution)
    }

    fn solve_complex(&self, matrix: &[Vec<Complex64>], rhs: &[Complex64]) -> Result<Vec<Complex64>> {
        let n = matrix.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        check_shape(matrix, rhs.len())?;

        let mat = Mat::from_fn(n, n, |i, j| c64::new(matrix[i][j].re, matrix[i][j].im));
        let rhs_mat = Mat::from_fn(n, 1, |i, _| c64::new(rhs[i].re, rhs[i].im));
        let lu = PartialPivLu::new(mat.as_ref());
        let sol = lu.solve(&rhs_mat);

        let solution: Vec<Complex64> = (0..n)
            .map(|i| {
                let value = sol.read(i, 0);
                Complex64::new(value.re, value.im)
            })
            .collect();
        if solution.iter().any(|v| !v.re.is_finite() || !v.im.is_finite()) {
            return Err(anyhow!("singular matrix"));
        }
        Ok(solution)
    }
}
