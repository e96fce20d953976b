//! Tests for the nonlinear fixed-point solve path.

use fdfd::prelude::*;
use ndarray::Array2;
use num_complex::Complex;
use std::f64::consts::PI;

const OMEGA: f64 = 2.0 * PI * 200e12;
const DL: f64 = 1e-6;

fn point_source(shape: (usize, usize), amp: f64) -> Array2<Complex64> {
    let mut source = Array2::zeros(shape);
    source[[shape.0 / 2, shape.1 / 2]] = Complex::new(amp, 0.0);
    source
}

#[test]
fn test_kerr_fixed_point_converges() {
    let shape = (10, 10);
    let eps_lin = Array2::from_elem(shape, Complex::new(2.0, 0.0));
    let source = point_source(shape, 1e3);

    // linear reference solve, also used to calibrate a mild chi3
    let mut linear = Fdfd::ez(OMEGA, DL, eps_lin.clone(), [3, 3]).unwrap();
    let (_, _, ez_lin) = linear.solve(&source).unwrap();
    let peak_sq = ez_lin.iter().map(|c| c.norm_sqr()).fold(0.0f64, f64::max);
    assert!(peak_sq > 0.0);
    let chi3 = 0.05 / (3.0 * peak_sq);

    // eps(Ez) = eps_lin + 3 chi3 |Ez|^2
    let base = eps_lin.clone();
    let eps_fn: PermittivityFn = Box::new(move |ez| {
        let mut out = base.clone();
        out.zip_mut_with(ez, |o, e| *o += 3.0 * chi3 * e.norm_sqr());
        out
    });
    let mut nonlinear = Fdfd::ez_nonlinear(OMEGA, DL, eps_fn, shape, [3, 3]).unwrap();
    let (_, _, ez_nl) = nonlinear.solve(&source).unwrap();

    for v in ez_nl.iter() {
        assert!(v.re.is_finite() && v.im.is_finite());
    }
    let ref_norm: f64 = ez_lin.iter().map(|c| c.norm_sqr()).sum::<f64>().sqrt();
    let diff: f64 = ez_nl
        .iter()
        .zip(ez_lin.iter())
        .map(|(a, b)| (a - b).norm_sqr())
        .sum::<f64>()
        .sqrt();
    // the Kerr term shifts the field, but only mildly at this strength
    assert!(diff > 0.0, "nonlinearity must perturb the field");
    assert!(
        diff < 0.2 * ref_norm,
        "perturbation unexpectedly large: {:.3e} vs {:.3e}",
        diff,
        ref_norm
    );
}

#[test]
fn test_zero_chi_reduces_to_linear_solve() {
    let shape = (8, 8);
    let eps_lin = Array2::from_elem(shape, Complex::new(1.5, 0.0));
    let source = point_source(shape, 1.0);

    let mut linear = Fdfd::ez(OMEGA, DL, eps_lin.clone(), [2, 2]).unwrap();
    let (_, _, ez_lin) = linear.solve(&source).unwrap();

    let base = eps_lin.clone();
    let eps_fn: PermittivityFn = Box::new(move |_| base.clone());
    let mut nonlinear = Fdfd::ez_nonlinear(OMEGA, DL, eps_fn, shape, [2, 2]).unwrap();
    let (_, _, ez_nl) = nonlinear.solve(&source).unwrap();

    let ref_norm: f64 = ez_lin.iter().map(|c| c.norm_sqr()).sum::<f64>().sqrt();
    let diff: f64 = ez_nl
        .iter()
        .zip(ez_lin.iter())
        .map(|(a, b)| (a - b).norm_sqr())
        .sum::<f64>()
        .sqrt();
    assert!(
        diff <= 1e-10 * ref_norm,
        "field-independent permittivity must reproduce the linear solve"
    );
}

#[test]
fn test_fixed_point_iteration_cap_is_surfaced() {
    let shape = (8, 8);
    let eps_lin = Array2::from_elem(shape, Complex::new(1.5, 0.0));
    let base = eps_lin.clone();
    let eps_fn: PermittivityFn = Box::new(move |ez| {
        let mut out = base.clone();
        out.zip_mut_with(ez, |o, e| *o += e.norm_sqr());
        out
    });
    let mut sim = Fdfd::ez_nonlinear(OMEGA, DL, eps_fn, shape, [2, 2])
        .unwrap()
        .with_fixed_point_options(FixedPointOptions {
            max_iterations: 0,
            tolerance: 1e-12,
        });
    let err = sim.solve(&point_source(shape, 1.0));
    assert!(matches!(err, Err(FdfdError::FixedPointNotConverged { .. })));
}
