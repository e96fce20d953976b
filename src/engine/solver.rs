//! Linear-solve layer consumed by the orchestrator.
//!
//! The physics code treats this module as a black box: `sparse_solve`
//! takes the assembled coordinate-list matrix and a right-hand side
//! and returns the solution, either through a dense LU factorization
//! or through BiCGStab on the CSR form. `sparse_solve_fixed_point`
//! handles the case where the matrix is a function of the unknown
//! field, re-assembling and re-solving until the field stops moving.
//! Failures are returned to the caller untouched; the system matrix is
//! fixed by the physics, so a retry cannot change the outcome.

use crate::engine::array::{norm, norm_squared, Complex64};
use crate::engine::sparse::CooMatrix;
use crate::error::FdfdError;
use nalgebra::DVector;
use num_complex::Complex;
use num_traits::Zero;
use tracing::{debug, trace};

/// Iterative method selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterativeMethod {
    BiCgStab,
}

/// How to run the linear solve.
#[derive(Debug, Clone, Copy)]
pub struct SolverOptions {
    /// Use the iterative Krylov solver instead of the direct one.
    pub iterative: bool,
    pub method: IterativeMethod,
    /// Iteration cap for the iterative solver.
    pub max_iterations: usize,
    /// Relative residual threshold for the iterative solver.
    pub tolerance: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            iterative: false,
            method: IterativeMethod::BiCgStab,
            max_iterations: 10_000,
            tolerance: 1e-10,
        }
    }
}

/// Configuration for the nonlinear fixed-point loop.
#[derive(Debug, Clone, Copy)]
pub struct FixedPointOptions {
    pub max_iterations: usize,
    /// Relative field-change threshold.
    pub tolerance: f64,
}

impl Default for FixedPointOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-8,
        }
    }
}

/// Solve `A x = b` for a fixed matrix.
pub fn sparse_solve(
    a: &CooMatrix,
    b: &[Complex64],
    options: &SolverOptions,
) -> Result<Vec<Complex64>, FdfdError> {
    assert_eq!(a.nrows, b.len());
    if options.iterative {
        match options.method {
            IterativeMethod::BiCgStab => bicgstab(a, b, options),
        }
    } else {
        solve_direct(a, b)
    }
}

/// Solve with a field-dependent matrix by fixed-point iteration:
/// re-assemble `A(x_k)` and solve `A(x_k) x_{k+1} = b` until the
/// relative change in x drops below tolerance. Returns the converged
/// field and the number of outer iterations taken.
pub fn sparse_solve_fixed_point<F>(
    a_of_field: F,
    b: &[Complex64],
    options: &SolverOptions,
    fixed_point: &FixedPointOptions,
) -> Result<(Vec<Complex64>, usize), FdfdError>
where
    F: Fn(&[Complex64]) -> CooMatrix,
{
    let zero = vec![Complex64::zero(); b.len()];
    let mut x = sparse_solve(&a_of_field(&zero), b, options)?;
    let mut delta = f64::INFINITY;
    for iteration in 1..=fixed_point.max_iterations {
        let x_next = sparse_solve(&a_of_field(&x), b, options)?;
        let diff: f64 = x_next
            .iter()
            .zip(&x)
            .map(|(p, q)| (p - q).norm_sqr())
            .sum::<f64>()
            .sqrt();
        let scale = norm(&x_next).max(f64::MIN_POSITIVE);
        delta = diff / scale;
        trace!(iteration, delta, "fixed-point step");
        x = x_next;
        if delta < fixed_point.tolerance {
            debug!(iteration, delta, "fixed-point converged");
            return Ok((x, iteration));
        }
    }
    Err(FdfdError::FixedPointNotConverged {
        iterations: fixed_point.max_iterations,
        delta,
    })
}

/// Dense LU with partial pivoting.
fn solve_direct(a: &CooMatrix, b: &[Complex64]) -> Result<Vec<Complex64>, FdfdError> {
    debug!(n = a.nrows, nnz = a.nnz(), "direct solve");
    let dense = a.to_dense();
    let rhs = DVector::from_column_slice(b);
    let lu = dense.lu();
    let x = lu.solve(&rhs).ok_or(FdfdError::SingularSystem)?;
    Ok(x.iter().copied().collect())
}

/// Unpreconditioned BiCGStab on the CSR form.
fn bicgstab(
    a: &CooMatrix,
    b: &[Complex64],
    options: &SolverOptions,
) -> Result<Vec<Complex64>, FdfdError> {
    let n = b.len();
    let csr = a.to_csr();
    let b_norm = norm(b);
    // zero source yields the zero field without iterating
    if b_norm < 1e-300 {
        return Ok(vec![Complex64::zero(); n]);
    }

    let mut x = vec![Complex64::zero(); n];
    let mut r = b.to_vec();
    let r_hat = r.clone();
    let mut rho = Complex::new(1.0, 0.0);
    let mut alpha = Complex::new(1.0, 0.0);
    let mut omega = Complex::new(1.0, 0.0);
    let mut v = vec![Complex64::zero(); n];
    let mut p = vec![Complex64::zero(); n];
    let mut t = vec![Complex64::zero(); n];
    let mut s = vec![Complex64::zero(); n];
    let mut residual = 1.0;

    for iteration in 1..=options.max_iterations {
        let rho_next: Complex64 = r_hat.iter().zip(&r).map(|(a, b)| a.conj() * b).sum();
        if rho_next.norm() < 1e-300 {
            return Err(FdfdError::NotConverged {
                iterations: iteration,
                residual,
            });
        }
        let beta = (rho_next / rho) * (alpha / omega);
        rho = rho_next;
        for i in 0..n {
            p[i] = r[i] + beta * (p[i] - omega * v[i]);
        }
        csr.matvec(&p, &mut v);
        let denom: Complex64 = r_hat.iter().zip(&v).map(|(a, b)| a.conj() * b).sum();
        alpha = rho / denom;
        for i in 0..n {
            s[i] = r[i] - alpha * v[i];
        }
        if norm(&s) / b_norm < options.tolerance {
            for i in 0..n {
                x[i] += alpha * p[i];
            }
            debug!(iteration, "bicgstab converged");
            return Ok(x);
        }
        csr.matvec(&s, &mut t);
        let tt = norm_squared(&t);
        if tt < 1e-300 {
            return Err(FdfdError::NotConverged {
                iterations: iteration,
                residual,
            });
        }
        let ts: Complex64 = t.iter().zip(&s).map(|(a, b)| a.conj() * b).sum();
        omega = ts / Complex::new(tt, 0.0);
        for i in 0..n {
            x[i] += alpha * p[i] + omega * s[i];
            r[i] = s[i] - omega * t[i];
        }
        residual = norm(&r) / b_norm;
        if residual < options.tolerance {
            debug!(iteration, residual, "bicgstab converged");
            return Ok(x);
        }
    }
    Err(FdfdError::NotConverged {
        iterations: options.max_iterations,
        residual,
    })
}
