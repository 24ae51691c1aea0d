#![allow(clippy::needless_range_loop)]
//! Matrix decompositions and solvers.
//!
//! Cholesky factorization (with log-determinant) for the symmetric
//! positive definite systems the REML engine factors every iteration,
//! and an LU solve with partial pivoting for the small, possibly
//! indefinite information-matrix systems of the variance updates.

use crate::dense::DenseMatrix;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LinalgError {
    #[error("Matrix is not positive definite (leading minor {order} failed)")]
    NotPositiveDefinite { order: usize },

    #[error("Singular matrix encountered")]
    SingularMatrix,

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Result of a Cholesky decomposition.
pub struct CholeskyDecomp {
    /// Lower triangular factor L such that A = L * L'.
    pub l: DenseMatrix,
}

impl CholeskyDecomp {
    /// Compute the Cholesky decomposition of a symmetric positive
    /// definite matrix.
    pub fn new(a: &DenseMatrix) -> Result<Self, LinalgError> {
        let n = a.nrows();
        if n != a.ncols() {
            return Err(LinalgError::DimensionMismatch {
                expected: n,
                got: a.ncols(),
            });
        }
        let mut l = DenseMatrix::zeros(n, n);

        for j in 0..n {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l.get(j, k) * l.get(j, k);
            }
            let diag = a.get(j, j) - sum;
            if diag <= 0.0 || !diag.is_finite() {
                return Err(LinalgError::NotPositiveDefinite { order: j + 1 });
            }
            l.set(j, j, diag.sqrt());

            for i in (j + 1)..n {
                let mut sum = 0.0;
                for k in 0..j {
                    sum += l.get(i, k) * l.get(j, k);
                }
                l.set(i, j, (a.get(i, j) - sum) / l.get(j, j));
            }
        }

        Ok(CholeskyDecomp { l })
    }

    /// Solve L * L' * x = b.
    pub fn solve(&self, b: &[f64]) -> Vec<f64> {
        let n = self.l.nrows();
        assert_eq!(b.len(), n);

        // Forward substitution: L * y = b
        let mut y = vec![0.0; n];
        for i in 0..n {
            let mut sum = 0.0;
            for j in 0..i {
                sum += self.l.get(i, j) * y[j];
            }
            y[i] = (b[i] - sum) / self.l.get(i, i);
        }

        // Backward substitution: L' * x = y
        let mut x = vec![0.0; n];
        for i in (0..n).rev() {
            let mut sum = 0.0;
            for j in (i + 1)..n {
                sum += self.l.get(j, i) * x[j];
            }
            x[i] = (y[i] - sum) / self.l.get(i, i);
        }

        x
    }

    /// log|A| = 2 * sum(log(diag(L))).
    pub fn log_det(&self) -> f64 {
        let n = self.l.nrows();
        let mut s = 0.0;
        for i in 0..n {
            s += self.l.get(i, i).ln();
        }
        2.0 * s
    }

    /// Compute A^{-1} column by column.
    pub fn inverse(&self) -> DenseMatrix {
        let n = self.l.nrows();
        let mut inv = DenseMatrix::zeros(n, n);
        for j in 0..n {
            let mut e = vec![0.0; n];
            e[j] = 1.0;
            let col = self.solve(&e);
            inv.set_col(j, &col);
        }
        inv
    }
}

/// Solve a symmetric positive definite system A*x = b.
pub fn solve_spd(a: &DenseMatrix, b: &[f64]) -> Result<Vec<f64>, LinalgError> {
    let chol = CholeskyDecomp::new(a)?;
    Ok(chol.solve(b))
}

/// Compute the inverse of a symmetric positive definite matrix.
pub fn inverse_spd(a: &DenseMatrix) -> Result<DenseMatrix, LinalgError> {
    let chol = CholeskyDecomp::new(a)?;
    Ok(chol.inverse())
}

/// Solve a general square system A*x = b by LU with partial pivoting.
///
/// The information matrices of the Newton-type variance updates are
/// symmetric but not necessarily definite, so Cholesky is not an option.
pub fn solve_general(a: &DenseMatrix, b: &[f64]) -> Result<Vec<f64>, LinalgError> {
    let n = a.nrows();
    if n != a.ncols() {
        return Err(LinalgError::DimensionMismatch {
            expected: n,
            got: a.ncols(),
        });
    }
    assert_eq!(b.len(), n);

    // Working copies in row-major layout.
    let mut m: Vec<Vec<f64>> = (0..n).map(|i| a.row(i)).collect();
    let mut x = b.to_vec();

    for k in 0..n {
        // Partial pivot.
        let mut pivot = k;
        for i in (k + 1)..n {
            if m[i][k].abs() > m[pivot][k].abs() {
                pivot = i;
            }
        }
        if m[pivot][k].abs() < 1e-300 {
            return Err(LinalgError::SingularMatrix);
        }
        if pivot != k {
            m.swap(pivot, k);
            x.swap(pivot, k);
        }

        for i in (k + 1)..n {
            let factor = m[i][k] / m[k][k];
            if factor == 0.0 {
                continue;
            }
            for j in k..n {
                m[i][j] -= factor * m[k][j];
            }
            x[i] -= factor * x[k];
        }
    }

    // Back substitution.
    let mut sol = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += m[i][j] * sol[j];
        }
        sol[i] = (x[i] - sum) / m[i][i];
    }
    Ok(sol)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cholesky_factor() {
        // A = [[4, 2], [2, 3]]
        let a = DenseMatrix::from_row_major(2, 2, &[4.0, 2.0, 2.0, 3.0]);
        let chol = CholeskyDecomp::new(&a).unwrap();
        assert!((chol.l.get(0, 0) - 2.0).abs() < 1e-12);
        assert!((chol.l.get(1, 0) - 1.0).abs() < 1e-12);
        assert!((chol.l.get(1, 1) - 2.0f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_cholesky_solve_and_logdet() {
        let a = DenseMatrix::from_row_major(3, 3, &[4.0, 2.0, 1.0, 2.0, 5.0, 3.0, 1.0, 3.0, 6.0]);
        let b = vec![1.0, 2.0, 3.0];
        let chol = CholeskyDecomp::new(&a).unwrap();
        let x = chol.solve(&b);
        let ax = a.mat_vec(&x);
        for i in 0..3 {
            assert!((ax[i] - b[i]).abs() < 1e-10);
        }
        // det(A) = 4*(30-9) - 2*(12-3) + 1*(6-5) = 67
        assert!((chol.log_det() - 67.0f64.ln()).abs() < 1e-10);
    }

    #[test]
    fn test_cholesky_rejects_indefinite() {
        let a = DenseMatrix::from_row_major(2, 2, &[1.0, 3.0, 3.0, 1.0]);
        assert!(CholeskyDecomp::new(&a).is_err());
    }

    #[test]
    fn test_inverse_spd() {
        let a = DenseMatrix::from_row_major(2, 2, &[4.0, 2.0, 2.0, 3.0]);
        let inv = inverse_spd(&a).unwrap();
        let prod = a.mat_mul(&inv);
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((prod.get(i, j) - expected).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn test_solve_general_indefinite() {
        // Symmetric indefinite system Cholesky would reject.
        let a = DenseMatrix::from_row_major(2, 2, &[0.0, 1.0, 1.0, 0.0]);
        let x = solve_general(&a, &[3.0, 5.0]).unwrap();
        assert!((x[0] - 5.0).abs() < 1e-12);
        assert!((x[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_solve_general_singular() {
        let a = DenseMatrix::from_row_major(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        assert!(solve_general(&a, &[1.0, 2.0]).is_err());
    }
}
