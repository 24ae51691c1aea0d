//! Sparse incidence matrices backed by sprs.
//!
//! The mixed-model code only needs 0/1 incidence maps (observation to
//! genetic individual, observation to grouping level), so this wrapper
//! keeps the row-to-column map alongside the CSR matrix for cheap
//! gather-style products.

use sprs::{CsMatI, TriMat};

/// A sparse matrix wrapper around sprs CSR format.
#[derive(Debug, Clone)]
pub struct SparseMatrix {
    inner: CsMatI<f64, usize>,
    nrows: usize,
    ncols: usize,
}

impl SparseMatrix {
    /// Create a sparse matrix from COO (coordinate) triplets.
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        rows: &[usize],
        cols: &[usize],
        vals: &[f64],
    ) -> Self {
        assert_eq!(rows.len(), cols.len());
        assert_eq!(rows.len(), vals.len());
        let mut tri = TriMat::new((nrows, ncols));
        for i in 0..rows.len() {
            tri.add_triplet(rows[i], cols[i], vals[i]);
        }
        Self {
            inner: tri.to_csr(),
            nrows,
            ncols,
        }
    }

    /// Build a 0/1 incidence matrix: row i carries a single 1 in
    /// column `col_of_row[i]`.
    pub fn incidence(ncols: usize, col_of_row: &[usize]) -> Self {
        let nrows = col_of_row.len();
        let mut tri = TriMat::new((nrows, ncols));
        for (i, &j) in col_of_row.iter().enumerate() {
            assert!(j < ncols, "incidence column {} out of range ({})", j, ncols);
            tri.add_triplet(i, j, 1.0);
        }
        Self {
            inner: tri.to_csr(),
            nrows,
            ncols,
        }
    }

    /// Number of rows.
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Number of columns.
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Number of non-zero entries.
    pub fn nnz(&self) -> usize {
        self.inner.nnz()
    }

    /// Sparse matrix-vector product: self * v.
    pub fn mat_vec(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(v.len(), self.ncols);
        let mut result = vec![0.0; self.nrows];
        for (val, (i, j)) in self.inner.iter() {
            result[i] += val * v[j];
        }
        result
    }

    /// Transposed product: self' * v.
    pub fn t_mat_vec(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(v.len(), self.nrows);
        let mut result = vec![0.0; self.ncols];
        for (val, (i, j)) in self.inner.iter() {
            result[j] += val * v[i];
        }
        result
    }

    /// For a pure incidence matrix, the column index of each row.
    ///
    /// Panics if some row does not have exactly one non-zero.
    pub fn row_map(&self) -> Vec<usize> {
        let mut map = vec![usize::MAX; self.nrows];
        for (_, (i, j)) in self.inner.iter() {
            assert_eq!(map[i], usize::MAX, "row {} has more than one entry", i);
            map[i] = j;
        }
        assert!(
            map.iter().all(|&j| j != usize::MAX),
            "incidence matrix has an empty row"
        );
        map
    }

    /// Dense row for inspection/tests.
    pub fn dense_row(&self, i: usize) -> Vec<f64> {
        let mut row = vec![0.0; self.ncols];
        for (val, (r, j)) in self.inner.iter() {
            if r == i {
                row[j] = *val;
            }
        }
        row
    }
}
