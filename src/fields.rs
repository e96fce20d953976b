//! Algebraic conversions between longitudinal and transverse fields.
//!
//! Each conversion is a pure linear map on flat vectors; no solve is
//! involved. The `adjoint` variants apply the exact transpose of the
//! forward map: the adjoint of the forward solve must route these
//! conversions through transposed operators, and the two variants are
//! not interchangeable (with PML off the transpose swaps the
//! forward/backward stencils and negates them).

use crate::constants::{EPSILON_0, MU_0};
use crate::engine::array::Complex64;
use crate::operators::DerivativeOperators;
use num_complex::Complex;

/// `Hx = (1/(i mu0)) Dyb Ez`; adjoint applies the transposed operator.
pub fn ez_to_hx(ops: &DerivativeOperators, ez: &[Complex64], adjoint: bool) -> Vec<Complex64> {
    let factor = Complex::new(0.0, -1.0 / MU_0);
    let product = if adjoint {
        ops.dyb.transpose().matvec(ez)
    } else {
        ops.dyb.matvec(ez)
    };
    product.into_iter().map(|v| factor * v).collect()
}

/// `Hy = -(1/(i mu0)) Dxb Ez`; adjoint applies the transposed operator.
pub fn ez_to_hy(ops: &DerivativeOperators, ez: &[Complex64], adjoint: bool) -> Vec<Complex64> {
    let factor = Complex::new(0.0, 1.0 / MU_0);
    let product = if adjoint {
        ops.dxb.transpose().matvec(ez)
    } else {
        ops.dxb.matvec(ez)
    };
    product.into_iter().map(|v| factor * v).collect()
}

/// Inverse relation reconstructing Ez from (Hx, Hy):
/// `Ez = i (Dxf Hy - Dyf Hx) / (eps0 omega^2 eps)`. Exact away from
/// source cells.
pub fn h_to_ez(
    ops: &DerivativeOperators,
    hx: &[Complex64],
    hy: &[Complex64],
    eps_vec: &[Complex64],
    omega: f64,
) -> Vec<Complex64> {
    let curl_x = ops.dxf.matvec(hy);
    let curl_y = ops.dyf.matvec(hx);
    let factor = Complex::new(0.0, 1.0 / (EPSILON_0 * omega * omega));
    curl_x
        .iter()
        .zip(&curl_y)
        .zip(eps_vec)
        .map(|((cx, cy), eps)| factor * (cx - cy) / eps)
        .collect()
}

/// `Ex = Dyf Hz / (i eps0 eps_xx)`; adjoint applies the transpose of
/// the whole map (division first, transposed operator second).
pub fn hz_to_ex(
    ops: &DerivativeOperators,
    hz: &[Complex64],
    eps_xx: &[Complex64],
    adjoint: bool,
) -> Vec<Complex64> {
    let factor = Complex::new(0.0, -1.0 / EPSILON_0);
    if adjoint {
        let scaled: Vec<Complex64> = hz
            .iter()
            .zip(eps_xx)
            .map(|(v, eps)| factor * v / eps)
            .collect();
        ops.dyf.transpose().matvec(&scaled)
    } else {
        ops.dyf
            .matvec(hz)
            .into_iter()
            .zip(eps_xx)
            .map(|(v, eps)| factor * v / eps)
            .collect()
    }
}

/// `Ey = -Dxf Hz / (i eps0 eps_yy)`; adjoint as in [`hz_to_ex`].
pub fn hz_to_ey(
    ops: &DerivativeOperators,
    hz: &[Complex64],
    eps_yy: &[Complex64],
    adjoint: bool,
) -> Vec<Complex64> {
    let factor = Complex::new(0.0, 1.0 / EPSILON_0);
    if adjoint {
        let scaled: Vec<Complex64> = hz
            .iter()
            .zip(eps_yy)
            .map(|(v, eps)| factor * v / eps)
            .collect();
        ops.dxf.transpose().matvec(&scaled)
    } else {
        ops.dxf
            .matvec(hz)
            .into_iter()
            .zip(eps_yy)
            .map(|(v, eps)| factor * v / eps)
            .collect()
    }
}

/// `Hz = (1/(i mu0)) (Dyb Ex - Dxb Ey)`.
pub fn exey_to_hz(ops: &DerivativeOperators, ex: &[Complex64], ey: &[Complex64]) -> Vec<Complex64> {
    let factor = Complex::new(0.0, -1.0 / MU_0);
    let dy_ex = ops.dyb.matvec(ex);
    let dx_ey = ops.dxb.matvec(ey);
    dy_ex
        .iter()
        .zip(&dx_ey)
        .map(|(a, b)| factor * (a - b))
        .collect()
}

/// Transpose of [`exey_to_hz`]: maps a cotangent on Hz to the pair of
/// cotangents on (Ex, Ey).
pub fn exey_to_hz_adjoint(
    ops: &DerivativeOperators,
    v: &[Complex64],
) -> (Vec<Complex64>, Vec<Complex64>) {
    let factor = Complex::new(0.0, -1.0 / MU_0);
    let v_ex: Vec<Complex64> = ops
        .dyb
        .transpose()
        .matvec(v)
        .into_iter()
        .map(|w| factor * w)
        .collect();
    let v_ey: Vec<Complex64> = ops
        .dxb
        .transpose()
        .matvec(v)
        .into_iter()
        .map(|w| -factor * w)
        .collect();
    (v_ex, v_ey)
}

/// Equivalent electric currents of a magnetic current Mz:
/// `Jx = -(1/mu0) Dyf Mz`, `Jy = (1/mu0) Dxf Mz`.
pub fn mz_to_j(ops: &DerivativeOperators, mz: &[Complex64]) -> (Vec<Complex64>, Vec<Complex64>) {
    let inv_mu = 1.0 / MU_0;
    let jx: Vec<Complex64> = ops.dyf.matvec(mz).into_iter().map(|v| -inv_mu * v).collect();
    let jy: Vec<Complex64> = ops.dxf.matvec(mz).into_iter().map(|v| inv_mu * v).collect();
    (jx, jy)
}

/// Transpose of [`mz_to_j`].
pub fn mz_to_j_adjoint(
    ops: &DerivativeOperators,
    yx: &[Complex64],
    yy: &[Complex64],
) -> Vec<Complex64> {
    let inv_mu = 1.0 / MU_0;
    let from_x = ops.dyf.transpose().matvec(yx);
    let from_y = ops.dxf.transpose().matvec(yy);
    from_x
        .iter()
        .zip(&from_y)
        .map(|(a, b)| inv_mu * (b - a))
        .collect()
}
