//! Error taxonomy for the estimation engine.
//!
//! Four caller-visible classes: malformed inputs/containers (Format),
//! semantic contract violations (Value), numerical failures at solve
//! time (Runtime), and missing files. Messages name the offending
//! column/id/method and the permitted set where one exists.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    /// Malformed or inconsistent genotype files or persisted containers.
    #[error("Format error: {0}")]
    Format(String),

    /// Semantic contract violation: bad method name, missing column,
    /// empty sample intersection, dimension mismatch.
    #[error("Value error: {0}")]
    Value(String),

    /// Numerical failure inside a solver: singular system, diverging
    /// variance component.
    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Linear algebra error: {0}")]
    Linalg(#[from] gebv_linalg::LinalgError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Propagated decoder/table-reader failure.
    #[error(transparent)]
    Source(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ModelError>;
