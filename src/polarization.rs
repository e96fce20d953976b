//! System-matrix assembly for the supported polarizations.
//!
//! The polarization is a closed variant: Ez-linear solves the scalar
//! wave equation for Ez, Hz solves the coupled 2N x 2N system for the
//! transverse electric components (Ex, Ey) with face-averaged
//! permittivity on the staggered grid, and Ez-nonlinear re-evaluates
//! the permittivity from the current field estimate each time the
//! matrix is requested.
//!
//! Every assembled matrix is returned in coordinate-list form so the
//! assembly can be traced; conversion to a solver-ready structure
//! happens in the orchestrator right before the solve.

use crate::constants::{EPSILON_0, MU_0};
use crate::engine::array::Complex64;
use crate::engine::sparse::CooMatrix;
use crate::operators::DerivativeOperators;
use num_complex::Complex;
use tracing::debug;

/// The supported formulations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarization {
    /// Scalar Ez with derived (Hx, Hy).
    Ez,
    /// Coupled (Ex, Ey) with derived Hz.
    Hz,
    /// Ez with permittivity as a function of the field.
    EzNonlinear,
}

/// `A = -(1/mu0)(Dxf Dxb + Dyf Dyb) - eps0 omega^2 diag(eps)`.
pub fn make_a_ez(ops: &DerivativeOperators, omega: f64, eps_vec: &[Complex64]) -> CooMatrix {
    let laplacian = ops
        .dxf
        .matmul(&ops.dxb)
        .add(&ops.dyf.matmul(&ops.dyb))
        .scale(Complex::new(-1.0 / MU_0, 0.0));
    let diag: Vec<Complex64> = eps_vec
        .iter()
        .map(|&e| -EPSILON_0 * omega * omega * e)
        .collect();
    let a = laplacian.add(&CooMatrix::from_diagonal(&diag));
    debug!(n = a.nrows, nnz = a.nnz(), "assembled Ez system matrix");
    a
}

/// 2N x 2N block system over (Ex, Ey):
/// `A = [[C11, C12], [C21, C22]] - eps0 omega^2 diag([eps_xx; eps_yy])`
/// with `C11 = -(1/mu0) Dyf Dyb`, `C12 = (1/mu0) Dyf Dxb`,
/// `C21 = (1/mu0) Dxf Dyb`, `C22 = -(1/mu0) Dxf Dxb` and the
/// permittivity face-averaged onto each component's grid line.
pub fn make_a_hz(ops: &DerivativeOperators, omega: f64, eps_vec: &[Complex64]) -> CooMatrix {
    let inv_mu = Complex::new(1.0 / MU_0, 0.0);
    let c11 = ops.dyf.matmul(&ops.dyb).scale(-inv_mu);
    let c12 = ops.dyf.matmul(&ops.dxb).scale(inv_mu);
    let c21 = ops.dxf.matmul(&ops.dyb).scale(inv_mu);
    let c22 = ops.dxf.matmul(&ops.dxb).scale(-inv_mu);
    let c = CooMatrix::block2x2(&c11, &c12, &c21, &c22);

    let eps_xx = grid_average_x(eps_vec, ops.shape);
    let eps_yy = grid_average_y(eps_vec, ops.shape);
    let diag: Vec<Complex64> = eps_xx
        .iter()
        .chain(eps_yy.iter())
        .map(|&e| -EPSILON_0 * omega * omega * e)
        .collect();
    let a = c.add(&CooMatrix::from_diagonal(&diag));
    debug!(n = a.nrows, nnz = a.nnz(), "assembled Hz system matrix");
    a
}

/// Nonlinear Ez: the matrix as a function of the current field
/// estimate. The fixed-point loop that drives it lives in the solver
/// layer.
pub fn make_a_ez_nl<'a, F>(
    ops: &'a DerivativeOperators,
    omega: f64,
    eps_fn: F,
) -> impl Fn(&[Complex64]) -> CooMatrix + 'a
where
    F: Fn(&[Complex64]) -> Vec<Complex64> + 'a,
{
    move |field: &[Complex64]| make_a_ez(ops, omega, &eps_fn(field))
}

/// Face-averaged permittivity for the Ex line: arithmetic mean of a
/// cell and its wraparound neighbor one grid line ahead in x.
pub fn grid_average_x(eps_vec: &[Complex64], shape: (usize, usize)) -> Vec<Complex64> {
    let (nx, ny) = shape;
    let mut out = vec![Complex::new(0.0, 0.0); nx * ny];
    for i in 0..nx {
        for j in 0..ny {
            out[i * ny + j] = 0.5 * (eps_vec[i * ny + j] + eps_vec[((i + 1) % nx) * ny + j]);
        }
    }
    out
}

/// Face-averaged permittivity for the Ey line (neighbor ahead in y).
pub fn grid_average_y(eps_vec: &[Complex64], shape: (usize, usize)) -> Vec<Complex64> {
    let (nx, ny) = shape;
    let mut out = vec![Complex::new(0.0, 0.0); nx * ny];
    for i in 0..nx {
        for j in 0..ny {
            out[i * ny + j] = 0.5 * (eps_vec[i * ny + j] + eps_vec[i * ny + (j + 1) % ny]);
        }
    }
    out
}

/// Transpose of `grid_average_x`: scatters a per-face quantity back to
/// the cells that contributed to each face.
pub fn grid_average_x_transpose(vec: &[Complex64], shape: (usize, usize)) -> Vec<Complex64> {
    let (nx, ny) = shape;
    let mut out = vec![Complex::new(0.0, 0.0); nx * ny];
    for i in 0..nx {
        for j in 0..ny {
            out[i * ny + j] = 0.5 * (vec[i * ny + j] + vec[((i + nx - 1) % nx) * ny + j]);
        }
    }
    out
}

/// Transpose of `grid_average_y`.
pub fn grid_average_y_transpose(vec: &[Complex64], shape: (usize, usize)) -> Vec<Complex64> {
    let (nx, ny) = shape;
    let mut out = vec![Complex::new(0.0, 0.0); nx * ny];
    for i in 0..nx {
        for j in 0..ny {
            out[i * ny + j] = 0.5 * (vec[i * ny + j] + vec[i * ny + (j + ny - 1) % ny]);
        }
    }
    out
}
