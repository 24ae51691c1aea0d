//! Cross-relationship blocks between new and training individuals.
//!
//! Uses the centering state retained by a built GRM (method tag,
//! per-marker frequencies, scale factor) so the test x train block can
//! be streamed chunk-by-chunk from the two BED files without ever
//! materializing a joint GRM.

use std::path::{Path, PathBuf};

use tracing::info;

use gebv_linalg::DenseMatrix;
use gebv_geno::{BedReader, GenotypeSource};

use crate::error::{ModelError, Result};
use crate::grm::build::{center_from_p, Grm, GrmMethod};

/// Streaming cross-GRM state for one genetic term.
#[derive(Debug, Clone)]
pub struct CrossGrm {
    train_prefix: PathBuf,
    method: GrmMethod,
    p_major: Vec<f64>,
    scale_factor: f64,
    /// Training individuals, in the fitted model's order; output
    /// columns follow this order.
    train_ids: Vec<String>,
    chunk_size: usize,
}

impl CrossGrm {
    /// Create from a built (or loaded) GRM and the training BED prefix.
    pub fn new(train_prefix: &Path, grm: &Grm, train_ids: Vec<String>, chunk_size: usize) -> Self {
        Self {
            train_prefix: train_prefix.to_path_buf(),
            method: grm.method,
            p_major: grm.p_major.clone(),
            scale_factor: grm.scale_factor,
            train_ids,
            chunk_size,
        }
    }

    /// Create from raw centering state.
    pub fn from_parts(
        train_prefix: &Path,
        method: GrmMethod,
        p_major: Vec<f64>,
        scale_factor: f64,
        train_ids: Vec<String>,
        chunk_size: usize,
    ) -> Self {
        Self {
            train_prefix: train_prefix.to_path_buf(),
            method,
            p_major,
            scale_factor,
            train_ids,
            chunk_size,
        }
    }

    /// Training individual order (output column order).
    pub fn train_ids(&self) -> &[String] {
        &self.train_ids
    }

    /// Compute the test x train relationship block.
    ///
    /// Returns the block and the test individual IDs (row order).
    pub fn compute(&self, test_prefix: &Path) -> Result<(DenseMatrix, Vec<String>)> {
        let mut train = BedReader::new(&self.train_prefix)?;
        train.keep_samples(&self.train_ids);
        if train.n_samples() != self.train_ids.len() {
            let missing: Vec<&String> = self
                .train_ids
                .iter()
                .filter(|id| !train.sample_ids().contains(*id))
                .collect();
            return Err(ModelError::Value(format!(
                "training individuals missing from {}: {:?}",
                self.train_prefix.display(),
                missing
            )));
        }

        let mut test = BedReader::new(test_prefix)?;

        if train.marker_ids() != test.marker_ids() {
            let mismatch = train
                .marker_ids()
                .iter()
                .zip(test.marker_ids().iter())
                .position(|(a, b)| a != b);
            return Err(ModelError::Format(match mismatch {
                Some(i) => format!(
                    "markers in training and test sets do not match at index {}: '{}' vs '{}'",
                    i,
                    train.marker_ids()[i],
                    test.marker_ids()[i]
                ),
                None => format!(
                    "marker counts differ: training {} vs test {}",
                    train.n_markers(),
                    test.n_markers()
                ),
            }));
        }
        if self.p_major.len() != train.n_markers() {
            return Err(ModelError::Format(format!(
                "stored frequencies cover {} markers, BED files have {}",
                self.p_major.len(),
                train.n_markers()
            )));
        }

        let center = center_from_p(self.method, &self.p_major);
        let chunk = if self.chunk_size == 0 {
            train.n_markers()
        } else {
            self.chunk_size
        };

        info!(
            "Streaming cross-GRM ({}): {} test x {} train individuals, {} markers",
            self.method.tag(),
            test.n_samples(),
            train.n_samples(),
            train.n_markers()
        );

        let mut acc = DenseMatrix::zeros(test.n_samples(), train.n_samples());
        loop {
            let train_block = train.read_chunk(chunk)?;
            let test_block = test.read_chunk(chunk)?;
            match (train_block, test_block) {
                (Some(mut tr), Some(mut te)) => {
                    debug_assert_eq!(tr.first_marker, te.first_marker);
                    let range = tr.first_marker..tr.first_marker + tr.dosages.ncols();
                    encode_block(&mut tr.dosages, self.method, &center[range.clone()]);
                    encode_block(&mut te.dosages, self.method, &center[range]);
                    acc.add_ab_t(&te.dosages, &tr.dosages);
                }
                (None, None) => break,
                _ => {
                    return Err(ModelError::Format(
                        "training and test BED files ran out of markers at different points"
                            .into(),
                    ))
                }
            }
        }

        acc.scale_mut(1.0 / self.scale_factor);
        Ok((acc, test.sample_ids().to_vec()))
    }
}

/// Apply the stored per-marker encoding and centering to a chunk.
fn encode_block(block: &mut DenseMatrix, method: GrmMethod, center: &[f64]) {
    assert_eq!(block.ncols(), center.len());
    for j in 0..block.ncols() {
        let c = center[j];
        let col = block.col(j);
        let encoded: Vec<f64> = col
            .iter()
            .map(|&d| {
                if d.is_nan() {
                    return 0.0;
                }
                match method {
                    GrmMethod::Additive => d - c,
                    GrmMethod::Dominance => {
                        if d == 1.0 {
                            1.0 - c
                        } else {
                            -c
                        }
                    }
                }
            })
            .collect();
        block.set_col(j, &encoded);
    }
}
