//! Top-level FDFD simulation object.
//!
//! An [`Fdfd`] owns the grid parameters, the permittivity and the
//! derivative operators (built once at construction). `solve` flattens
//! the source, assembles the system matrix for the selected
//! polarization, hands it to the linear-solve layer, derives the
//! remaining field components and reshapes everything back to grids.
//!
//! The system matrix is a pure function of (operators, permittivity);
//! it is memoized keyed by a permittivity version counter, never
//! trusted as ambient state. Reassigning the permittivity re-derives
//! the grid shape, revalidates the configuration and invalidates the
//! cache. The nonlinear formulation never caches.

use crate::autodiff::{SensitivityContext, SolvedField};
use crate::engine::array::{flatten, to_grid, Complex64};
use crate::engine::solver::{
    sparse_solve, sparse_solve_fixed_point, FixedPointOptions, SolverOptions,
};
use crate::engine::sparse::CooMatrix;
use crate::error::FdfdError;
use crate::fields::{exey_to_hz, ez_to_hx, ez_to_hy, mz_to_j};
use crate::operators::{compute_derivative_matrices, DerivativeOperators};
use crate::polarization::{make_a_ez, make_a_ez_nl, make_a_hz, Polarization};
use ndarray::Array2;
use num_complex::Complex;
use std::fmt;
use tracing::debug;

/// Permittivity as a function of the Ez field grid (Kerr-type
/// self-action for the nonlinear formulation).
pub type PermittivityFn = Box<dyn Fn(&Array2<Complex64>) -> Array2<Complex64>>;

/// The permittivity distribution: a static grid for the linear
/// formulations, or a field-dependent function for the nonlinear one.
pub enum Permittivity {
    Grid(Array2<Complex64>),
    Function { f: PermittivityFn, shape: (usize, usize) },
}

impl Permittivity {
    fn shape(&self) -> (usize, usize) {
        match self {
            Permittivity::Grid(grid) => grid.dim(),
            Permittivity::Function { shape, .. } => *shape,
        }
    }
}

impl fmt::Debug for Permittivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permittivity::Grid(grid) => f.debug_tuple("Grid").field(&grid.dim()).finish(),
            Permittivity::Function { shape, .. } => {
                f.debug_struct("Function").field("shape", shape).finish()
            }
        }
    }
}

/// The three field grids returned by a solve. For the Ez formulations
/// the triplet is (Hx, Hy, Ez); for Hz it is (Ex, Ey, Hz).
pub type FieldTriplet = (Array2<Complex64>, Array2<Complex64>, Array2<Complex64>);

/// A 2D FDFD simulation at a fixed angular frequency.
#[derive(Debug)]
pub struct Fdfd {
    omega: f64,
    dl: f64,
    npml: [usize; 2],
    bloch: [f64; 2],
    polarization: Polarization,
    permittivity: Permittivity,
    shape: (usize, usize),
    operators: DerivativeOperators,
    solver: SolverOptions,
    fixed_point: FixedPointOptions,
    eps_version: u64,
    cached_matrix: Option<(u64, CooMatrix)>,
}

impl Fdfd {
    /// Linear Ez polarization: source Jz, solved field Ez, derived
    /// (Hx, Hy).
    pub fn ez(
        omega: f64,
        dl: f64,
        eps_r: Array2<Complex64>,
        npml: [usize; 2],
    ) -> Result<Self, FdfdError> {
        Self::new(Polarization::Ez, omega, dl, Permittivity::Grid(eps_r), npml)
    }

    /// Hz polarization: source Mz, solved fields (Ex, Ey), derived Hz.
    pub fn hz(
        omega: f64,
        dl: f64,
        eps_r: Array2<Complex64>,
        npml: [usize; 2],
    ) -> Result<Self, FdfdError> {
        Self::new(Polarization::Hz, omega, dl, Permittivity::Grid(eps_r), npml)
    }

    /// Nonlinear Ez polarization: permittivity as a function of the Ez
    /// field, solved self-consistently by the fixed-point loop of the
    /// solver layer.
    pub fn ez_nonlinear(
        omega: f64,
        dl: f64,
        eps_fn: PermittivityFn,
        shape: (usize, usize),
        npml: [usize; 2],
    ) -> Result<Self, FdfdError> {
        Self::new(
            Polarization::EzNonlinear,
            omega,
            dl,
            Permittivity::Function { f: eps_fn, shape },
            npml,
        )
    }

    fn new(
        polarization: Polarization,
        omega: f64,
        dl: f64,
        permittivity: Permittivity,
        npml: [usize; 2],
    ) -> Result<Self, FdfdError> {
        if omega <= 0.0 {
            return Err(FdfdError::NonPositiveParameter {
                name: "omega",
                value: omega,
            });
        }
        if dl <= 0.0 {
            return Err(FdfdError::NonPositiveParameter {
                name: "dL",
                value: dl,
            });
        }
        check_variant(polarization, &permittivity)?;
        let shape = permittivity.shape();
        let operators = compute_derivative_matrices(omega, shape, npml, dl, [0.0, 0.0])?;
        Ok(Self {
            omega,
            dl,
            npml,
            bloch: [0.0, 0.0],
            polarization,
            permittivity,
            shape,
            operators,
            solver: SolverOptions::default(),
            fixed_point: FixedPointOptions::default(),
            eps_version: 0,
            cached_matrix: None,
        })
    }

    /// Apply a Bloch phase pair across the periodic boundaries,
    /// rebuilding the derivative operators.
    pub fn with_bloch_phases(mut self, bloch: [f64; 2]) -> Result<Self, FdfdError> {
        self.bloch = bloch;
        self.operators =
            compute_derivative_matrices(self.omega, self.shape, self.npml, self.dl, bloch)?;
        self.cached_matrix = None;
        Ok(self)
    }

    /// Select how the linear systems are solved.
    pub fn with_solver_options(mut self, options: SolverOptions) -> Self {
        self.solver = options;
        self
    }

    /// Configure the nonlinear fixed-point loop.
    pub fn with_fixed_point_options(mut self, options: FixedPointOptions) -> Self {
        self.fixed_point = options;
        self
    }

    pub fn omega(&self) -> f64 {
        self.omega
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn permittivity(&self) -> &Permittivity {
        &self.permittivity
    }

    pub fn operators(&self) -> &DerivativeOperators {
        &self.operators
    }

    /// Reassign the permittivity. The grid shape is re-derived (the
    /// derivative operators are rebuilt if it changed), the
    /// configuration is revalidated and the cached system matrix is
    /// invalidated.
    pub fn set_permittivity(&mut self, permittivity: Permittivity) -> Result<(), FdfdError> {
        check_variant(self.polarization, &permittivity)?;
        let shape = permittivity.shape();
        if shape != self.shape {
            self.operators =
                compute_derivative_matrices(self.omega, shape, self.npml, self.dl, self.bloch)?;
            self.shape = shape;
        }
        self.permittivity = permittivity;
        self.eps_version += 1;
        self.cached_matrix = None;
        Ok(())
    }

    /// Solve for the fields driven by the given source grid.
    pub fn solve(&mut self, source: &Array2<Complex64>) -> Result<FieldTriplet, FdfdError> {
        let (triplet, _) = self.solve_impl(source)?;
        Ok(triplet)
    }

    /// Solve and additionally return the per-call sensitivity context
    /// consumed by a differentiation engine.
    ///
    /// For the nonlinear polarization the context holds the converged
    /// permittivity and applies the linear adjoint at the fixed point;
    /// the self-consistent correction through the field dependence of
    /// the permittivity is not included (exact when the nonlinear
    /// susceptibility vanishes).
    pub fn solve_with_sensitivities(
        &mut self,
        source: &Array2<Complex64>,
    ) -> Result<(FieldTriplet, SensitivityContext), FdfdError> {
        self.solve_impl(source)
    }

    fn solve_impl(
        &mut self,
        source: &Array2<Complex64>,
    ) -> Result<(FieldTriplet, SensitivityContext), FdfdError> {
        if source.dim() != self.shape {
            let (got_nx, got_ny) = source.dim();
            return Err(FdfdError::ShapeMismatch {
                got_nx,
                got_ny,
                nx: self.shape.0,
                ny: self.shape.1,
            });
        }
        let source_vec = flatten(source);
        debug!(
            polarization = ?self.polarization,
            nx = self.shape.0,
            ny = self.shape.1,
            "solve"
        );

        match self.polarization {
            Polarization::Ez => {
                let eps_vec = flatten(self.eps_grid());
                self.ensure_matrix(&eps_vec);
                let a = &self.cached_matrix.as_ref().expect("matrix cached above").1;
                let b: Vec<Complex64> = source_vec
                    .iter()
                    .map(|&s| Complex::new(0.0, self.omega) * s)
                    .collect();
                let ez = sparse_solve(a, &b, &self.solver)?;
                self.finish_ez(eps_vec, source_vec, ez)
            }
            Polarization::EzNonlinear => {
                let (eps_fn, shape) = match &self.permittivity {
                    Permittivity::Function { f, shape } => (f, *shape),
                    Permittivity::Grid(_) => unreachable!("variant checked at construction"),
                };
                let eps_of_field =
                    |field: &[Complex64]| flatten(&eps_fn(&to_grid(field, shape)));
                let a_of_field = make_a_ez_nl(&self.operators, self.omega, &eps_of_field);
                let b: Vec<Complex64> = source_vec
                    .iter()
                    .map(|&s| Complex::new(0.0, self.omega) * s)
                    .collect();
                let (ez, iterations) =
                    sparse_solve_fixed_point(a_of_field, &b, &self.solver, &self.fixed_point)?;
                debug!(iterations, "nonlinear solve converged");
                let eps_vec = eps_of_field(&ez);
                self.finish_ez(eps_vec, source_vec, ez)
            }
            Polarization::Hz => {
                let eps_vec = flatten(self.eps_grid());
                self.ensure_matrix(&eps_vec);
                let a = &self.cached_matrix.as_ref().expect("matrix cached above").1;
                let (jx, jy) = mz_to_j(&self.operators, &source_vec);
                let mut b = jx;
                b.extend_from_slice(&jy);
                let e = sparse_solve(a, &b, &self.solver)?;
                let n = self.shape.0 * self.shape.1;
                let ex = e[..n].to_vec();
                let ey = e[n..].to_vec();
                let hz = exey_to_hz(&self.operators, &ex, &ey);
                let triplet = (
                    to_grid(&ex, self.shape),
                    to_grid(&ey, self.shape),
                    to_grid(&hz, self.shape),
                );
                let context = SensitivityContext::new(
                    self.omega,
                    self.shape,
                    self.polarization,
                    self.operators.clone(),
                    eps_vec,
                    source_vec,
                    SolvedField::TransverseE { ex, ey },
                    self.solver,
                );
                Ok((triplet, context))
            }
        }
    }

    /// Derive (Hx, Hy) from a solved Ez and package the results.
    fn finish_ez(
        &self,
        eps_vec: Vec<Complex64>,
        source_vec: Vec<Complex64>,
        ez: Vec<Complex64>,
    ) -> Result<(FieldTriplet, SensitivityContext), FdfdError> {
        let hx = ez_to_hx(&self.operators, &ez, false);
        let hy = ez_to_hy(&self.operators, &ez, false);
        let triplet = (
            to_grid(&hx, self.shape),
            to_grid(&hy, self.shape),
            to_grid(&ez, self.shape),
        );
        let context = SensitivityContext::new(
            self.omega,
            self.shape,
            self.polarization,
            self.operators.clone(),
            eps_vec,
            source_vec,
            SolvedField::Ez(ez),
            self.solver,
        );
        Ok((triplet, context))
    }

    fn eps_grid(&self) -> &Array2<Complex64> {
        match &self.permittivity {
            Permittivity::Grid(grid) => grid,
            Permittivity::Function { .. } => unreachable!("variant checked at construction"),
        }
    }

    /// Re-assemble the system matrix unless the cached one is still
    /// valid for the current permittivity version.
    fn ensure_matrix(&mut self, eps_vec: &[Complex64]) {
        if let Some((version, _)) = &self.cached_matrix {
            if *version == self.eps_version {
                return;
            }
        }
        let a = match self.polarization {
            Polarization::Ez => make_a_ez(&self.operators, self.omega, eps_vec),
            Polarization::Hz => make_a_hz(&self.operators, self.omega, eps_vec),
            Polarization::EzNonlinear => unreachable!("nonlinear matrices are never cached"),
        };
        self.cached_matrix = Some((self.eps_version, a));
    }
}

fn check_variant(polarization: Polarization, permittivity: &Permittivity) -> Result<(), FdfdError> {
    let ok = match polarization {
        Polarization::Ez | Polarization::Hz => matches!(permittivity, Permittivity::Grid(_)),
        Polarization::EzNonlinear => matches!(permittivity, Permittivity::Function { .. }),
    };
    if ok {
        Ok(())
    } else {
        Err(FdfdError::PermittivityVariantMismatch {
            polarization: match polarization {
                Polarization::Ez => "Ez",
                Polarization::Hz => "Hz",
                Polarization::EzNonlinear => "nonlinear Ez",
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_constructor_validation() {
        let eps = Array2::from_elem((4, 4), Complex::new(1.0, 0.0));
        assert!(matches!(
            Fdfd::ez(-1.0, 1e-6, eps.clone(), [0, 0]),
            Err(FdfdError::NonPositiveParameter { .. })
        ));
        assert!(matches!(
            Fdfd::ez(1e15, 0.0, eps.clone(), [0, 0]),
            Err(FdfdError::NonPositiveParameter { .. })
        ));
        assert!(matches!(
            Fdfd::ez(1e15, 1e-6, eps, [4, 0]),
            Err(FdfdError::PmlTooWide { .. })
        ));
    }

    #[test]
    fn test_variant_mismatch_on_assignment() {
        let eps = Array2::from_elem((4, 4), Complex::new(1.0, 0.0));
        let mut sim = Fdfd::ez(1e15, 1e-6, eps, [0, 0]).unwrap();
        let err = sim.set_permittivity(Permittivity::Function {
            f: Box::new(|ez| ez.map(|v| Complex::new(1.0, 0.0) + v.norm_sqr())),
            shape: (4, 4),
        });
        assert!(matches!(
            err,
            Err(FdfdError::PermittivityVariantMismatch { .. })
        ));
    }

    #[test]
    fn test_source_shape_mismatch() {
        let eps = Array2::from_elem((4, 4), Complex::new(1.0, 0.0));
        let mut sim = Fdfd::ez(1e15, 1e-6, eps, [0, 0]).unwrap();
        let source = Array2::from_elem((3, 4), Complex::new(1.0, 0.0));
        assert!(matches!(
            sim.solve(&source),
            Err(FdfdError::ShapeMismatch { .. })
        ));
    }
}
