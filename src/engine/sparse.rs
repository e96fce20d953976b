//! Sparse matrix kernels for operator and system-matrix assembly.
//!
//! Assembled matrices travel as coordinate-list triplets (parallel
//! `entries` and row/column index arrays) so that a differentiation
//! engine can trace assembly; the solver converts to CSR or dense form
//! immediately before factorizing or iterating.

use crate::engine::array::Complex64;
use nalgebra::DMatrix;
use num_complex::Complex;

/// Sparse matrix in coordinate-list (COO) format. Duplicate index
/// pairs are allowed and are summed implicitly on conversion.
#[derive(Debug, Clone)]
pub struct CooMatrix {
    pub nrows: usize,
    pub ncols: usize,
    pub row_indices: Vec<usize>,
    pub col_indices: Vec<usize>,
    pub entries: Vec<Complex64>,
}

impl CooMatrix {
    /// Create an empty matrix with room for `cap` entries.
    pub fn with_capacity(nrows: usize, ncols: usize, cap: usize) -> Self {
        Self {
            nrows,
            ncols,
            row_indices: Vec::with_capacity(cap),
            col_indices: Vec::with_capacity(cap),
            entries: Vec::with_capacity(cap),
        }
    }

    /// The n x n identity.
    pub fn identity(n: usize) -> Self {
        let mut m = Self::with_capacity(n, n, n);
        for i in 0..n {
            m.push(i, i, Complex::new(1.0, 0.0));
        }
        m
    }

    /// Diagonal matrix from a vector of diagonal values.
    pub fn from_diagonal(diag: &[Complex64]) -> Self {
        let n = diag.len();
        let mut m = Self::with_capacity(n, n, n);
        for (i, &v) in diag.iter().enumerate() {
            m.push(i, i, v);
        }
        m
    }

    /// Append one entry.
    pub fn push(&mut self, row: usize, col: usize, value: Complex64) {
        debug_assert!(row < self.nrows && col < self.ncols);
        self.row_indices.push(row);
        self.col_indices.push(col);
        self.entries.push(value);
    }

    /// Number of stored entries (duplicates included).
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    /// Multiply every entry by a scalar.
    pub fn scale(mut self, factor: Complex64) -> Self {
        for v in &mut self.entries {
            *v *= factor;
        }
        self
    }

    /// Transpose by swapping the index arrays.
    pub fn transpose(&self) -> Self {
        Self {
            nrows: self.ncols,
            ncols: self.nrows,
            row_indices: self.col_indices.clone(),
            col_indices: self.row_indices.clone(),
            entries: self.entries.clone(),
        }
    }

    /// Sum of two matrices of equal shape.
    pub fn add(&self, other: &Self) -> Self {
        assert_eq!((self.nrows, self.ncols), (other.nrows, other.ncols));
        let mut m = Self::with_capacity(self.nrows, self.ncols, self.nnz() + other.nnz());
        for src in [self, other] {
            for k in 0..src.nnz() {
                m.push(src.row_indices[k], src.col_indices[k], src.entries[k]);
            }
        }
        m
    }

    /// Left-multiply by a diagonal matrix: `diag(d) * self`.
    pub fn scale_rows(&self, d: &[Complex64]) -> Self {
        assert_eq!(d.len(), self.nrows);
        let mut m = self.clone();
        for k in 0..m.nnz() {
            m.entries[k] *= d[m.row_indices[k]];
        }
        m
    }

    /// Kronecker product `self (x) other`.
    pub fn kron(&self, other: &Self) -> Self {
        let mut m = Self::with_capacity(
            self.nrows * other.nrows,
            self.ncols * other.ncols,
            self.nnz() * other.nnz(),
        );
        for a in 0..self.nnz() {
            for b in 0..other.nnz() {
                m.push(
                    self.row_indices[a] * other.nrows + other.row_indices[b],
                    self.col_indices[a] * other.ncols + other.col_indices[b],
                    self.entries[a] * other.entries[b],
                );
            }
        }
        m
    }

    /// Sparse product `self * other` computed through CSR row merging.
    pub fn matmul(&self, other: &Self) -> Self {
        assert_eq!(self.ncols, other.nrows);
        let a = self.to_csr();
        let b = other.to_csr();
        let mut out = Self::with_capacity(self.nrows, other.ncols, self.nnz() + other.nnz());

        // dense accumulator per row, reset via the touched-column list
        let mut acc = vec![Complex::new(0.0, 0.0); other.ncols];
        let mut touched: Vec<usize> = Vec::new();
        for i in 0..a.nrows {
            touched.clear();
            for ka in a.indptr[i]..a.indptr[i + 1] {
                let va = a.data[ka];
                let j = a.indices[ka];
                for kb in b.indptr[j]..b.indptr[j + 1] {
                    let col = b.indices[kb];
                    if acc[col] == Complex::new(0.0, 0.0) && !touched.contains(&col) {
                        touched.push(col);
                    }
                    acc[col] += va * b.data[kb];
                }
            }
            for &col in &touched {
                out.push(i, col, acc[col]);
                acc[col] = Complex::new(0.0, 0.0);
            }
        }
        out
    }

    /// Assemble a 2x2 block matrix `[[c11, c12], [c21, c22]]`.
    pub fn block2x2(c11: &Self, c12: &Self, c21: &Self, c22: &Self) -> Self {
        let n = c11.nrows;
        for c in [c11, c12, c21, c22] {
            assert_eq!((c.nrows, c.ncols), (n, n));
        }
        let mut m =
            Self::with_capacity(2 * n, 2 * n, c11.nnz() + c12.nnz() + c21.nnz() + c22.nnz());
        for (block, ro, co) in [(c11, 0, 0), (c12, 0, n), (c21, n, 0), (c22, n, n)] {
            for k in 0..block.nnz() {
                m.push(
                    block.row_indices[k] + ro,
                    block.col_indices[k] + co,
                    block.entries[k],
                );
            }
        }
        m
    }

    /// Matrix-vector product.
    pub fn matvec(&self, x: &[Complex64]) -> Vec<Complex64> {
        assert_eq!(x.len(), self.ncols);
        let mut y = vec![Complex::new(0.0, 0.0); self.nrows];
        for k in 0..self.nnz() {
            y[self.row_indices[k]] += self.entries[k] * x[self.col_indices[k]];
        }
        y
    }

    /// Convert to CSR, summing duplicate entries.
    pub fn to_csr(&self) -> CsrMatrix {
        let mut indptr = vec![0usize; self.nrows + 1];
        for &r in &self.row_indices {
            indptr[r + 1] += 1;
        }
        for i in 0..self.nrows {
            indptr[i + 1] += indptr[i];
        }
        let mut indices = vec![0usize; self.nnz()];
        let mut data = vec![Complex::new(0.0, 0.0); self.nnz()];
        let mut next = indptr.clone();
        for k in 0..self.nnz() {
            let r = self.row_indices[k];
            indices[next[r]] = self.col_indices[k];
            data[next[r]] = self.entries[k];
            next[r] += 1;
        }
        // sort each row by column and merge duplicates in place
        let mut out_indptr = vec![0usize; self.nrows + 1];
        let mut out_indices = Vec::with_capacity(self.nnz());
        let mut out_data = Vec::with_capacity(self.nnz());
        for i in 0..self.nrows {
            let lo = indptr[i];
            let hi = indptr[i + 1];
            let mut row: Vec<(usize, Complex64)> = (lo..hi).map(|k| (indices[k], data[k])).collect();
            row.sort_by_key(|&(c, _)| c);
            for (c, v) in row {
                if out_data.len() > out_indptr[i] && *out_indices.last().unwrap() == c {
                    *out_data.last_mut().unwrap() += v;
                } else {
                    out_indices.push(c);
                    out_data.push(v);
                }
            }
            out_indptr[i + 1] = out_indices.len();
        }
        CsrMatrix {
            nrows: self.nrows,
            ncols: self.ncols,
            indptr: out_indptr,
            indices: out_indices,
            data: out_data,
        }
    }

    /// Densify into a nalgebra matrix (for the direct solver).
    pub fn to_dense(&self) -> DMatrix<Complex64> {
        let mut m = DMatrix::zeros(self.nrows, self.ncols);
        for k in 0..self.nnz() {
            m[(self.row_indices[k], self.col_indices[k])] += self.entries[k];
        }
        m
    }
}

/// Compressed sparse row form, used by the iterative solver.
#[derive(Debug, Clone)]
pub struct CsrMatrix {
    pub nrows: usize,
    pub ncols: usize,
    pub indptr: Vec<usize>,
    pub indices: Vec<usize>,
    pub data: Vec<Complex64>,
}

impl CsrMatrix {
    /// Matrix-vector product `y = A x`.
    pub fn matvec(&self, x: &[Complex64], y: &mut [Complex64]) {
        debug_assert_eq!(x.len(), self.ncols);
        debug_assert_eq!(y.len(), self.nrows);
        for i in 0..self.nrows {
            let mut acc = Complex::new(0.0, 0.0);
            for k in self.indptr[i]..self.indptr[i + 1] {
                acc += self.data[k] * x[self.indices[k]];
            }
            y[i] = acc;
        }
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex::new(re, im)
    }

    #[test]
    fn test_matvec_and_duplicates() {
        // [[1, 2], [0, 3]] with the 3 split across two duplicate entries
        let mut m = CooMatrix::with_capacity(2, 2, 4);
        m.push(0, 0, c(1.0, 0.0));
        m.push(0, 1, c(2.0, 0.0));
        m.push(1, 1, c(1.0, 0.0));
        m.push(1, 1, c(2.0, 0.0));
        let y = m.matvec(&[c(1.0, 0.0), c(1.0, 0.0)]);
        assert_abs_diff_eq!(y[0].re, 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(y[1].re, 3.0, epsilon = 1e-12);

        let csr = m.to_csr();
        assert_eq!(csr.nnz(), 3);
        let mut y2 = vec![c(0.0, 0.0); 2];
        csr.matvec(&[c(1.0, 0.0), c(1.0, 0.0)], &mut y2);
        assert_abs_diff_eq!(y2[1].re, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_matmul_against_dense() {
        let mut a = CooMatrix::with_capacity(2, 3, 4);
        a.push(0, 0, c(1.0, 1.0));
        a.push(0, 2, c(2.0, 0.0));
        a.push(1, 1, c(-1.0, 0.0));
        let mut b = CooMatrix::with_capacity(3, 2, 3);
        b.push(0, 1, c(3.0, 0.0));
        b.push(2, 0, c(1.0, -1.0));
        b.push(1, 0, c(4.0, 0.0));
        let p = a.matmul(&b).to_dense();
        let pd = a.to_dense() * b.to_dense();
        for i in 0..2 {
            for j in 0..2 {
                assert_abs_diff_eq!((p[(i, j)] - pd[(i, j)]).norm(), 0.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_kron_identity() {
        let d = CooMatrix::from_diagonal(&[c(2.0, 0.0), c(3.0, 0.0)]);
        let k = d.kron(&CooMatrix::identity(3));
        assert_eq!((k.nrows, k.ncols), (6, 6));
        let y = k.matvec(&vec![c(1.0, 0.0); 6]);
        assert_abs_diff_eq!(y[0].re, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(y[5].re, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_transpose_pairing() {
        // <v, A x> == <A^T v, x> with the unconjugated bilinear pairing
        let mut a = CooMatrix::with_capacity(3, 3, 4);
        a.push(0, 1, c(1.0, 2.0));
        a.push(2, 0, c(-1.0, 0.5));
        a.push(1, 1, c(0.0, 1.0));
        let x = [c(1.0, -1.0), c(2.0, 0.0), c(0.0, 3.0)];
        let v = [c(0.5, 0.0), c(1.0, 1.0), c(-2.0, 0.0)];
        let ax = a.matvec(&x);
        let atv = a.transpose().matvec(&v);
        let lhs: Complex64 = v.iter().zip(&ax).map(|(p, q)| p * q).sum();
        let rhs: Complex64 = atv.iter().zip(&x).map(|(p, q)| p * q).sum();
        assert_abs_diff_eq!((lhs - rhs).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_block2x2() {
        let i = CooMatrix::identity(2);
        let z = CooMatrix::with_capacity(2, 2, 0);
        let b = CooMatrix::block2x2(&i, &z, &z, &i.clone().scale(c(2.0, 0.0)));
        let d = b.to_dense();
        assert_abs_diff_eq!(d[(0, 0)].re, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(d[(3, 3)].re, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(d[(0, 2)].norm(), 0.0, epsilon = 1e-12);
    }
}
