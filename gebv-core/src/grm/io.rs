//! GRM persistence.
//!
//! Keyed binary container: magic bytes (GRMB) + version + bincode
//! payload holding the matrix, individual IDs, per-marker frequencies,
//! scale factor, and the method tag. Round-trips exactly.

use std::path::Path;

use serde::{Deserialize, Serialize};

use gebv_linalg::DenseMatrix;

use crate::error::{ModelError, Result};
use crate::grm::build::{Grm, GrmMethod};

/// Magic bytes: "GRMB".
pub const GRM_MAGIC: [u8; 4] = *b"GRMB";
/// Current container version.
pub const GRM_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct GrmContainer {
    magic: [u8; 4],
    version: u32,
    method: String,
    n: usize,
    /// Flat column-major n x n matrix.
    matrix: Vec<f64>,
    individual_ids: Vec<String>,
    p_major: Vec<f64>,
    scale_factor: f64,
}

/// Save a GRM to a binary container.
pub fn save_grm(grm: &Grm, path: &Path) -> Result<()> {
    let container = GrmContainer {
        magic: GRM_MAGIC,
        version: GRM_VERSION,
        method: grm.method.tag().to_string(),
        n: grm.n(),
        matrix: grm.matrix.to_col_major(),
        individual_ids: grm.individual_ids.clone(),
        p_major: grm.p_major.clone(),
        scale_factor: grm.scale_factor,
    };
    let encoded = bincode::serialize(&container)
        .map_err(|e| ModelError::Format(format!("failed to encode GRM container: {}", e)))?;
    std::fs::write(path, encoded)?;
    Ok(())
}

/// Load a GRM from a binary container.
pub fn load_grm(path: &Path) -> Result<Grm> {
    if !path.exists() {
        return Err(ModelError::FileNotFound(path.to_path_buf()));
    }
    let data = std::fs::read(path)?;
    let container: GrmContainer = bincode::deserialize(&data).map_err(|e| {
        ModelError::Format(format!(
            "failed to decode GRM container {}: {}",
            path.display(),
            e
        ))
    })?;

    if container.magic != GRM_MAGIC {
        return Err(ModelError::Format(format!(
            "invalid GRM container {}: expected magic {:?}, got {:?}",
            path.display(),
            GRM_MAGIC,
            container.magic
        )));
    }
    if container.version != GRM_VERSION {
        return Err(ModelError::Format(format!(
            "unsupported GRM container version {} in {}",
            container.version,
            path.display()
        )));
    }
    if container.matrix.len() != container.n * container.n
        || container.individual_ids.len() != container.n
    {
        return Err(ModelError::Format(format!(
            "inconsistent GRM container {}: n={}, matrix length {}, {} ids",
            path.display(),
            container.n,
            container.matrix.len(),
            container.individual_ids.len()
        )));
    }

    let method = GrmMethod::parse(&container.method)
        .map_err(|_| ModelError::Format(format!("unknown method tag '{}'", container.method)))?;

    Ok(Grm {
        method,
        matrix: DenseMatrix::from_col_major(container.n, container.n, container.matrix),
        individual_ids: container.individual_ids,
        p_major: container.p_major,
        scale_factor: container.scale_factor,
    })
}
