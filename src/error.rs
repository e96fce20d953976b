//! Error taxonomy for the FDFD solver.
//!
//! Configuration errors fail at construction or assignment time; solver
//! errors are propagated unchanged from the linear-solve layer and are
//! never retried, since the system matrix is fixed by the physics.

use thiserror::Error;

/// All errors surfaced by this crate.
#[derive(Debug, Error)]
pub enum FdfdError {
    /// Grid with fewer than one cell along some axis.
    #[error("invalid grid shape {nx}x{ny}: both dimensions must be at least 1")]
    InvalidShape { nx: usize, ny: usize },

    /// PML layer would cover an entire grid dimension.
    #[error("PML width {npml} must be smaller than the grid dimension {n}")]
    PmlTooWide { npml: usize, n: usize },

    /// Permittivity grid does not match the simulation grid.
    #[error("permittivity shape {got_nx}x{got_ny} does not match grid shape {nx}x{ny}")]
    ShapeMismatch {
        got_nx: usize,
        got_ny: usize,
        nx: usize,
        ny: usize,
    },

    /// A static grid was assigned to the nonlinear formulation, or a
    /// field-dependent function to a linear one.
    #[error("permittivity variant does not match the {polarization} formulation")]
    PermittivityVariantMismatch { polarization: &'static str },

    #[error("{name} must be positive (got {value})")]
    NonPositiveParameter { name: &'static str, value: f64 },

    /// The direct factorization found the system matrix singular.
    #[error("linear system is singular")]
    SingularSystem,

    /// The iterative solver ran out of iterations.
    #[error("iterative solver did not converge after {iterations} iterations (residual {residual:.3e})")]
    NotConverged { iterations: usize, residual: f64 },

    /// The nonlinear fixed-point loop ran out of iterations.
    #[error("fixed-point iteration did not converge after {iterations} iterations (field change {delta:.3e})")]
    FixedPointNotConverged { iterations: usize, delta: f64 },
}
