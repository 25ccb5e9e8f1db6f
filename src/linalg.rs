//! Dense linear algebra helpers.
//!
//! Arrays live in `ndarray` throughout the crate; decompositions are delegated
//! to `nalgebra` and converted back.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn, SymmetricEigen};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut2};

fn to_dmatrix(a: ArrayView2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

/// `m += alpha * v * v^T`
///
/// Entries `(i, j)` and `(j, i)` receive the same value, so a symmetric `m`
/// stays exactly symmetric.
pub fn add_vec2(mut m: ArrayViewMut2<f64>, alpha: f64, v: ArrayView1<f64>) {
    for i in 0..v.len() {
        for j in 0..=i {
            let p = alpha * (v[i] * v[j]);
            m[[i, j]] += p;
            if i != j {
                m[[j, i]] += p;
            }
        }
    }
}

/// `m += x^T * x`, i.e. the sum of outer products of the rows of `x`.
///
/// Only the lower triangle of the product is used, mirrored onto the upper.
pub fn add_rows_outer(mut m: ArrayViewMut2<f64>, x: ArrayView2<f64>) {
    let prod = x.t().dot(&x);
    for i in 0..prod.nrows() {
        for j in 0..=i {
            let p = prod[[i, j]];
            m[[i, j]] += p;
            if i != j {
                m[[j, i]] += p;
            }
        }
    }
}

/// Eigendecomposition of a symmetric matrix.
///
/// Eigenvalues are sorted from largest to smallest, so negative ones go last;
/// column `c` of the returned matrix is the eigenvector of eigenvalue `c`.
/// Only the lower triangle of `a` is read.
pub fn sorted_eigh(a: ArrayView2<f64>) -> (Array1<f64>, Array2<f64>) {
    let n = a.nrows();
    let eigen = SymmetricEigen::new(to_dmatrix(a));
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| eigen.eigenvalues[j].total_cmp(&eigen.eigenvalues[i]));

    let values: Array1<f64> = order.iter().map(|&i| eigen.eigenvalues[i]).collect();
    let vectors = Array2::from_shape_fn((n, n), |(r, c)| eigen.eigenvectors[(r, order[c])]);
    (values, vectors)
}

/// Cholesky factor of a symmetric positive-definite matrix.
#[derive(Clone)]
pub struct SpdFactor {
    chol: Cholesky<f64, Dyn>,
}

impl std::fmt::Debug for SpdFactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpdFactor")
            .field("dim", &self.chol.l_dirty().nrows())
            .finish()
    }
}

impl SpdFactor {
    /// Returns `None` when `a` is not numerically positive definite.
    pub fn new(a: ArrayView2<f64>) -> Option<Self> {
        let n = a.nrows();
        if n == 0 {
            return None;
        }
        let chol = Cholesky::new(to_dmatrix(a))?;

        // Cholesky::new only rejects exact non-positive pivots; reject
        // pivots that are zero up to rounding as well.
        let l = chol.l();
        let diag = l.diagonal();
        let max = diag.iter().fold(0.0f64, |acc, &d| acc.max(d * d));
        let min = diag.iter().fold(f64::INFINITY, |acc, &d| acc.min(d * d));
        if !(min > max * f64::EPSILON * n as f64) {
            return None;
        }
        Some(Self { chol })
    }

    /// Computes `x^T * A^-1 * x`.
    pub fn inv_quad_form(&self, x: ArrayView1<f64>) -> f64 {
        let v = DVector::from_iterator(x.len(), x.iter().copied());
        let y = self.chol.solve(&v);
        v.dot(&y)
    }
}

/// Largest absolute difference between `a` and `a^T`.
#[cfg(test)]
pub fn asymmetry(a: ArrayView2<f64>) -> f64 {
    ndarray::Zip::from(&a)
        .and(&a.t())
        .fold(0.0f64, |acc, &x, &y| acc.max((x - y).abs()))
}
