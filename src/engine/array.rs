//! Grid/vector plumbing for 2D field quantities.
//!
//! Every grid-shaped quantity in this crate is an `Array2<Complex64>`
//! of shape (nx, ny); its flat counterpart is a `Vec<Complex64>` of
//! length nx * ny in row-major order, `index = i * ny + j`. These two
//! functions are the single flattening bijection used everywhere.

use ndarray::Array2;
use num_complex::Complex;

/// Type alias for double-precision complex scalars.
pub type Complex64 = Complex<f64>;

/// Flatten a grid into a row-major vector.
pub fn flatten(grid: &Array2<Complex64>) -> Vec<Complex64> {
    grid.iter().copied().collect()
}

/// Reshape a flat row-major vector back into a grid.
pub fn to_grid(vec: &[Complex64], shape: (usize, usize)) -> Array2<Complex64> {
    Array2::from_shape_vec(shape, vec.to_vec())
        .expect("flat vector length matches the grid shape")
}

/// Promote a real grid to a complex one.
pub fn from_real(grid: &Array2<f64>) -> Array2<Complex64> {
    grid.map(|&v| Complex::new(v, 0.0))
}

/// Squared L2 norm of a flat complex vector.
pub fn norm_squared(vec: &[Complex64]) -> f64 {
    vec.iter().map(|c| c.norm_sqr()).sum()
}

/// L2 norm of a flat complex vector.
pub fn norm(vec: &[Complex64]) -> f64 {
    norm_squared(vec).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_flatten_round_trip() {
        let grid = Array2::from_shape_fn((3, 4), |(i, j)| Complex::new(i as f64, j as f64));
        let vec = flatten(&grid);
        assert_eq!(vec.len(), 12);
        // row-major: entry (1, 2) sits at 1 * 4 + 2
        assert_eq!(vec[6], Complex::new(1.0, 2.0));
        let back = to_grid(&vec, (3, 4));
        assert_eq!(back, grid);
    }

    #[test]
    fn test_norm() {
        let v = vec![Complex::new(3.0, 0.0), Complex::new(0.0, 4.0)];
        assert_abs_diff_eq!(norm_squared(&v), 25.0, epsilon = 1e-12);
        assert_abs_diff_eq!(norm(&v), 5.0, epsilon = 1e-12);
    }
}
