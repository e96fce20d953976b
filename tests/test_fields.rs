//! Integration tests for the field conversion relations.

use fdfd::fields::h_to_ez;
use fdfd::prelude::*;
use ndarray::Array2;
use num_complex::Complex;
use std::f64::consts::PI;

#[test]
fn test_ez_round_trip_through_transverse_fields() {
    // In a uniform, lossless, PML-free medium the chain
    // Ez -> (Hx, Hy) -> Ez is exact away from the source cell.
    let shape = (12, 12);
    let omega = 2.0 * PI * 150e12;
    let dl = 1e-6;
    let eps = Array2::from_elem(shape, Complex::new(2.25, 0.0));
    let mut sim = Fdfd::ez(omega, dl, eps.clone(), [0, 0]).unwrap();

    let mut source = Array2::zeros(shape);
    source[[6, 6]] = Complex::new(1.0, 0.0);
    let (hx, hy, ez) = sim.solve(&source).unwrap();

    let eps_vec = flatten(&eps);
    let reconstructed = h_to_ez(
        sim.operators(),
        &flatten(&hx),
        &flatten(&hy),
        &eps_vec,
        omega,
    );
    let ez_vec = flatten(&ez);

    let peak = ez_vec.iter().map(|c| c.norm()).fold(0.0f64, f64::max);
    assert!(peak > 0.0);
    for (k, (rec, orig)) in reconstructed.iter().zip(&ez_vec).enumerate() {
        if k == 6 * 12 + 6 {
            continue; // the source cell carries the driving term
        }
        assert!(
            (rec - orig).norm() <= 1e-8 * peak,
            "round trip mismatch at {}: {} vs {}",
            k,
            rec,
            orig
        );
    }
}

#[test]
fn test_zero_source_gives_zero_field() {
    let shape = (8, 8);
    let eps = Array2::from_elem(shape, Complex::new(1.0, 0.0));
    let mut sim = Fdfd::ez(2.0 * PI * 200e12, 1e-6, eps, [2, 2]).unwrap();
    let source = Array2::zeros(shape);
    let (hx, hy, ez) = sim.solve(&source).unwrap();
    for grid in [hx, hy, ez] {
        for v in grid.iter() {
            assert_eq!(*v, Complex::new(0.0, 0.0));
        }
    }
}

#[test]
fn test_hz_zero_source_gives_zero_field() {
    let shape = (8, 8);
    let eps = Array2::from_elem(shape, Complex::new(1.0, 0.0));
    let mut sim = Fdfd::hz(2.0 * PI * 200e12, 1e-6, eps, [2, 2]).unwrap();
    let source = Array2::zeros(shape);
    let (ex, ey, hz) = sim.solve(&source).unwrap();
    for grid in [ex, ey, hz] {
        for v in grid.iter() {
            assert_eq!(*v, Complex::new(0.0, 0.0));
        }
    }
}
