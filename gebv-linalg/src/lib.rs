//! gebv-linalg: Linear algebra layer for the gebv engine
//!
//! Provides the column-major dense matrix type used throughout the
//! estimation code, sparse incidence matrices for observation-to-level
//! maps, and the Cholesky/LU solvers the REML engine is built on.

pub mod dense;
pub mod sparse;
pub mod decomposition;

pub use dense::DenseMatrix;
pub use sparse::SparseMatrix;
pub use decomposition::LinalgError;
