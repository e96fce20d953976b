//! Derivative rules for the field solve, consumable by a reverse- or
//! forward-mode differentiation engine.
//!
//! The solve is a primitive with two differentiable input slots, the
//! permittivity vector and the source vector. For each slot the
//! [`SensitivityContext`] supplies a reverse-mode rule (vector-Jacobian
//! product, one transposed solve) and a forward-mode rule
//! (Jacobian-vector product, one same-matrix solve). The context is a
//! per-call bundle of (operator set, permittivity, source, solved
//! field); it re-assembles the system matrix from the retained
//! permittivity on every rule evaluation instead of caching it.
//!
//! Cotangent convention: for a real scalar objective f with cotangent
//! v on the complex output x, `df = Re(v^T dx)` with the plain
//! (unconjugated) transpose; a real objective therefore seeds
//! `v = 2 df/dx` in the Wirtinger sense. Gradients with respect to the
//! permittivity take the real part because permittivity is physically
//! real; forward-mode results stay complex.

use crate::constants::EPSILON_0;
use crate::engine::array::{to_grid, Complex64};
use crate::engine::solver::{sparse_solve, SolverOptions};
use crate::engine::sparse::CooMatrix;
use crate::error::FdfdError;
use crate::fields::{exey_to_hz, exey_to_hz_adjoint, mz_to_j, mz_to_j_adjoint};
use crate::operators::DerivativeOperators;
use crate::polarization::{
    grid_average_x, grid_average_x_transpose, grid_average_y, grid_average_y_transpose, make_a_ez,
    make_a_hz, Polarization,
};
use ndarray::Array2;
use num_complex::Complex;
use tracing::debug;

/// The differentiable inputs of the solve primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSlot {
    Permittivity,
    Source,
}

/// A direction for the forward-mode rules: real for the permittivity
/// slot, complex for the source slot.
#[derive(Debug, Clone, Copy)]
pub enum Direction<'a> {
    Permittivity(&'a [f64]),
    Source(&'a [Complex64]),
}

/// Reverse-mode results: real gradient for the permittivity slot,
/// complex cotangent for the source slot.
#[derive(Debug, Clone)]
pub enum VjpValue {
    Permittivity(Array2<f64>),
    Source(Array2<Complex64>),
}

/// The solved longitudinal field retained for the rules.
#[derive(Debug, Clone)]
pub enum SolvedField {
    Ez(Vec<Complex64>),
    TransverseE { ex: Vec<Complex64>, ey: Vec<Complex64> },
}

/// Per-solve-call sensitivity bundle. Not part of the simulation
/// object's persistent state; it lives only as long as the caller
/// needs the derivative rules of one solve.
#[derive(Debug, Clone)]
pub struct SensitivityContext {
    omega: f64,
    shape: (usize, usize),
    polarization: Polarization,
    operators: DerivativeOperators,
    eps_vec: Vec<Complex64>,
    source_vec: Vec<Complex64>,
    field: SolvedField,
    solver: SolverOptions,
}

impl SensitivityContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        omega: f64,
        shape: (usize, usize),
        polarization: Polarization,
        operators: DerivativeOperators,
        eps_vec: Vec<Complex64>,
        source_vec: Vec<Complex64>,
        field: SolvedField,
        solver: SolverOptions,
    ) -> Self {
        Self {
            omega,
            shape,
            polarization,
            operators,
            eps_vec,
            source_vec,
            field,
            solver,
        }
    }

    /// The permittivity the rules differentiate around (for the
    /// nonlinear polarization: the converged one).
    pub fn permittivity_vec(&self) -> &[Complex64] {
        &self.eps_vec
    }

    pub fn source_vec(&self) -> &[Complex64] {
        &self.source_vec
    }

    pub fn field(&self) -> &SolvedField {
        &self.field
    }

    /// Reverse-mode rule table keyed by input slot.
    pub fn vjp(&self, slot: InputSlot, v: &[Complex64]) -> Result<VjpValue, FdfdError> {
        match slot {
            InputSlot::Permittivity => self.vjp_permittivity(v).map(VjpValue::Permittivity),
            InputSlot::Source => self.vjp_source(v).map(VjpValue::Source),
        }
    }

    /// Forward-mode rule table keyed by input slot.
    pub fn jvp(&self, direction: Direction<'_>) -> Result<Array2<Complex64>, FdfdError> {
        match direction {
            Direction::Permittivity(g) => self.jvp_permittivity(g),
            Direction::Source(g) => self.jvp_source(g),
        }
    }

    /// Reverse-mode rule as a closure, for registration with a tape.
    pub fn vjp_rule(
        &self,
        slot: InputSlot,
    ) -> impl Fn(&[Complex64]) -> Result<VjpValue, FdfdError> + '_ {
        move |v| self.vjp(slot, v)
    }

    /// d(output)/d(permittivity), reverse mode: one transposed solve
    /// `A^T F_adj = -v`, then the diagonal contraction with the
    /// forward field.
    pub fn vjp_permittivity(&self, v: &[Complex64]) -> Result<Array2<f64>, FdfdError> {
        let scale = -EPSILON_0 * self.omega * self.omega;
        match &self.field {
            SolvedField::Ez(ez) => {
                assert_eq!(v.len(), ez.len());
                let a_t = self.assemble().transpose();
                debug!(slot = "permittivity", "adjoint solve");
                let f_adj = sparse_solve(&a_t, &negated(v), &self.solver)?;
                let grad: Vec<f64> = f_adj
                    .iter()
                    .zip(ez)
                    .map(|(adj, fwd)| scale * (adj * fwd).re)
                    .collect();
                Ok(real_grid(&grad, self.shape))
            }
            SolvedField::TransverseE { ex, ey } => {
                assert_eq!(v.len(), ex.len());
                // cotangent on Hz routed to (Ex, Ey) through the
                // transposed converter
                let (v_ex, v_ey) = exey_to_hz_adjoint(&self.operators, v);
                let mut v_e = negated(&v_ex);
                v_e.extend(negated(&v_ey));
                let a_t = self.assemble().transpose();
                debug!(slot = "permittivity", "adjoint solve");
                let e_adj = sparse_solve(&a_t, &v_e, &self.solver)?;
                let n = ex.len();
                let rx: Vec<Complex64> = e_adj[..n]
                    .iter()
                    .zip(ex)
                    .map(|(adj, fwd)| Complex::new((adj * fwd).re, 0.0))
                    .collect();
                let ry: Vec<Complex64> = e_adj[n..]
                    .iter()
                    .zip(ey)
                    .map(|(adj, fwd)| Complex::new((adj * fwd).re, 0.0))
                    .collect();
                // scatter through the transpose of the face averaging
                let sx = grid_average_x_transpose(&rx, self.shape);
                let sy = grid_average_y_transpose(&ry, self.shape);
                let grad: Vec<f64> = sx
                    .iter()
                    .zip(&sy)
                    .map(|(a, b)| scale * (a.re + b.re))
                    .collect();
                Ok(real_grid(&grad, self.shape))
            }
        }
    }

    /// d(output)/d(source), reverse mode: the transposed solve reused.
    pub fn vjp_source(&self, v: &[Complex64]) -> Result<Array2<Complex64>, FdfdError> {
        let a_t = self.assemble().transpose();
        debug!(slot = "source", "adjoint solve");
        match &self.field {
            SolvedField::Ez(_) => {
                let y = sparse_solve(&a_t, v, &self.solver)?;
                let i_omega = Complex::new(0.0, self.omega);
                let out: Vec<Complex64> = y.into_iter().map(|w| i_omega * w).collect();
                Ok(to_grid(&out, self.shape))
            }
            SolvedField::TransverseE { ex, .. } => {
                let (v_ex, v_ey) = exey_to_hz_adjoint(&self.operators, v);
                let mut v_e = v_ex;
                v_e.extend(v_ey);
                let y = sparse_solve(&a_t, &v_e, &self.solver)?;
                let n = ex.len();
                let out = mz_to_j_adjoint(&self.operators, &y[..n], &y[n..]);
                Ok(to_grid(&out, self.shape))
            }
        }
    }

    /// d(output)/d(permittivity) in a real direction g, forward mode:
    /// one same-matrix solve with the field-weighted direction as the
    /// right-hand side.
    pub fn jvp_permittivity(&self, g: &[f64]) -> Result<Array2<Complex64>, FdfdError> {
        let scale = -EPSILON_0 * self.omega * self.omega;
        let a = self.assemble();
        match &self.field {
            SolvedField::Ez(ez) => {
                assert_eq!(g.len(), ez.len());
                let u: Vec<Complex64> = ez.iter().zip(g).map(|(f, &gk)| -(f * gk)).collect();
                debug!(slot = "permittivity", "directional solve");
                let f_dir = sparse_solve(&a, &u, &self.solver)?;
                let out: Vec<Complex64> = f_dir.into_iter().map(|w| scale * w).collect();
                Ok(to_grid(&out, self.shape))
            }
            SolvedField::TransverseE { ex, ey } => {
                assert_eq!(g.len(), ex.len());
                let g_c: Vec<Complex64> = g.iter().map(|&v| Complex::new(v, 0.0)).collect();
                let gx = grid_average_x(&g_c, self.shape);
                let gy = grid_average_y(&g_c, self.shape);
                let mut u: Vec<Complex64> =
                    ex.iter().zip(&gx).map(|(f, gk)| -(f * gk)).collect();
                u.extend(ey.iter().zip(&gy).map(|(f, gk)| -(f * gk)));
                debug!(slot = "permittivity", "directional solve");
                let e_dir = sparse_solve(&a, &u, &self.solver)?;
                let n = ex.len();
                let dx: Vec<Complex64> = e_dir[..n].iter().map(|&w| scale * w).collect();
                let dy: Vec<Complex64> = e_dir[n..].iter().map(|&w| scale * w).collect();
                let dhz = exey_to_hz(&self.operators, &dx, &dy);
                Ok(to_grid(&dhz, self.shape))
            }
        }
    }

    /// d(output)/d(source) in a complex direction g, forward mode.
    pub fn jvp_source(&self, g: &[Complex64]) -> Result<Array2<Complex64>, FdfdError> {
        let a = self.assemble();
        debug!(slot = "source", "directional solve");
        match &self.field {
            SolvedField::Ez(_) => {
                let i_omega = Complex::new(0.0, self.omega);
                let b: Vec<Complex64> = g.iter().map(|&w| i_omega * w).collect();
                let f_dir = sparse_solve(&a, &b, &self.solver)?;
                Ok(to_grid(&f_dir, self.shape))
            }
            SolvedField::TransverseE { ex, .. } => {
                let (jx, jy) = mz_to_j(&self.operators, g);
                let mut b = jx;
                b.extend(jy);
                let e_dir = sparse_solve(&a, &b, &self.solver)?;
                let n = ex.len();
                let dhz = exey_to_hz(&self.operators, &e_dir[..n], &e_dir[n..]);
                Ok(to_grid(&dhz, self.shape))
            }
        }
    }

    /// Re-assemble the system matrix from the retained permittivity.
    fn assemble(&self) -> CooMatrix {
        match self.polarization {
            Polarization::Ez | Polarization::EzNonlinear => {
                make_a_ez(&self.operators, self.omega, &self.eps_vec)
            }
            Polarization::Hz => make_a_hz(&self.operators, self.omega, &self.eps_vec),
        }
    }
}

fn negated(v: &[Complex64]) -> Vec<Complex64> {
    v.iter().map(|&w| -w).collect()
}

fn real_grid(vec: &[f64], shape: (usize, usize)) -> Array2<f64> {
    Array2::from_shape_vec(shape, vec.to_vec()).expect("gradient length matches the grid shape")
}
