//! fdfd - a 2D finite-difference frequency-domain Maxwell solver with
//! adjoint sensitivities
//!
//! This library solves the frequency-domain Maxwell equations on a 2D
//! Yee-like grid for the Ez and Hz polarizations (plus a
//! permittivity-nonlinear Ez variant) with perfectly-matched-layer
//! absorbing boundaries and optional Bloch-periodic phase shifts. For
//! gradient-based inverse design it supplies, for every field solve,
//! closed-form reverse-mode (adjoint) and forward-mode derivative
//! rules with respect to the permittivity distribution and the source
//! - the full gradient of a scalar objective costs one extra
//! transposed solve instead of one solve per grid cell.

pub mod autodiff;
pub mod constants;
pub mod engine;
pub mod error;
pub mod fields;
pub mod operators;
pub mod polarization;
pub mod simulation;

// Re-export commonly used types
pub use engine::array::Complex64;
pub use engine::solver::{FixedPointOptions, IterativeMethod, SolverOptions};
pub use error::FdfdError;
pub use simulation::{Fdfd, FieldTriplet, Permittivity, PermittivityFn};

pub mod prelude {
    //! Common imports for using the fdfd library
    pub use crate::autodiff::{Direction, InputSlot, SensitivityContext, VjpValue};
    pub use crate::engine::array::{flatten, to_grid, Complex64};
    pub use crate::engine::solver::{FixedPointOptions, IterativeMethod, SolverOptions};
    pub use crate::error::FdfdError;
    pub use crate::operators::compute_derivative_matrices;
    pub use crate::polarization::Polarization;
    pub use crate::simulation::{Fdfd, FieldTriplet, Permittivity, PermittivityFn};
}
