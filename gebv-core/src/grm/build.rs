//! Streaming GRM construction.
//!
//! Additive: each marker column is centered by its mean dosage and the
//! matrix is C*C' divided by the summed per-marker dosage variance.
//! Dominance: dosages are recoded to the heterozygote indicator,
//! centered by the expected heterozygosity 2pq, and scaled by
//! sum(2pq * (1 - 2pq)).
//!
//! Accumulation runs marker-chunk by marker-chunk so only one chunk of
//! dosages is resident at a time; per-marker statistics are local to
//! the marker, which makes the result invariant to the chunk size.

use gebv_linalg::DenseMatrix;
use gebv_geno::GenotypeSource;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{ModelError, Result};

/// GRM construction method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrmMethod {
    Additive,
    Dominance,
}

impl GrmMethod {
    /// Short tag used in persisted containers and file names.
    pub fn tag(&self) -> &'static str {
        match self {
            GrmMethod::Additive => "add",
            GrmMethod::Dominance => "dom",
        }
    }

    /// Parse a method tag.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "add" | "additive" => Ok(GrmMethod::Additive),
            "dom" | "dominance" => Ok(GrmMethod::Dominance),
            other => Err(ModelError::Value(format!(
                "unsupported GRM method '{}', expected one of: add, dom",
                other
            ))),
        }
    }
}

/// A genetic relationship matrix with the centering state needed to
/// later relate new individuals to the training set.
#[derive(Debug, Clone)]
pub struct Grm {
    pub method: GrmMethod,
    /// Dense symmetric n x n relationship matrix.
    pub matrix: DenseMatrix,
    /// Individual IDs; order matches matrix rows/columns.
    pub individual_ids: Vec<String>,
    /// Per-marker major-allele frequency (mean dosage / 2).
    pub p_major: Vec<f64>,
    /// Normalization constant the accumulated products were divided by.
    pub scale_factor: f64,
}

impl Grm {
    /// Number of individuals.
    pub fn n(&self) -> usize {
        self.individual_ids.len()
    }

    /// Per-marker centering values implied by the stored frequencies.
    pub fn center(&self) -> Vec<f64> {
        center_from_p(self.method, &self.p_major)
    }
}

/// Centering vector for a method given per-marker frequencies.
pub(crate) fn center_from_p(method: GrmMethod, p_major: &[f64]) -> Vec<f64> {
    match method {
        GrmMethod::Additive => p_major.iter().map(|&p| 2.0 * p).collect(),
        GrmMethod::Dominance => p_major.iter().map(|&p| 2.0 * p * (1.0 - p)).collect(),
    }
}

/// Per-column standardization result.
struct ColumnStats {
    centered: Vec<f64>,
    p: f64,
    scale_contrib: f64,
}

/// Center one marker column in place, imputing missing to the center.
fn standardize_column(col: Vec<f64>, method: GrmMethod) -> ColumnStats {
    let n = col.len();
    let mut sum = 0.0;
    let mut valid = 0usize;
    for &d in &col {
        if !d.is_nan() {
            sum += d;
            valid += 1;
        }
    }
    if valid == 0 {
        return ColumnStats {
            centered: vec![0.0; n],
            p: 0.0,
            scale_contrib: 0.0,
        };
    }
    let mean = sum / valid as f64;
    let p = (mean / 2.0).clamp(0.0, 1.0);

    match method {
        GrmMethod::Additive => {
            let centered: Vec<f64> = col
                .iter()
                .map(|&d| if d.is_nan() { 0.0 } else { d - mean })
                .collect();
            let var = centered.iter().map(|c| c * c).sum::<f64>() / n as f64;
            ColumnStats {
                centered,
                p,
                scale_contrib: var,
            }
        }
        GrmMethod::Dominance => {
            let het_freq = 2.0 * p * (1.0 - p);
            let centered: Vec<f64> = col
                .iter()
                .map(|&d| {
                    if d.is_nan() {
                        0.0
                    } else if d == 1.0 {
                        1.0 - het_freq
                    } else {
                        -het_freq
                    }
                })
                .collect();
            ColumnStats {
                centered,
                p,
                scale_contrib: het_freq * (1.0 - het_freq),
            }
        }
    }
}

/// Standardize a chunk of marker columns in place; returns per-column
/// frequencies and the chunk's contribution to the scale factor.
pub(crate) fn standardize_chunk(chunk: &mut DenseMatrix, method: GrmMethod) -> (Vec<f64>, f64) {
    let m = chunk.ncols();
    let cols: Vec<Vec<f64>> = (0..m).map(|j| chunk.col(j)).collect();
    let stats: Vec<ColumnStats> = cols
        .into_par_iter()
        .map(|col| standardize_column(col, method))
        .collect();

    let mut p_chunk = Vec::with_capacity(m);
    let mut scale = 0.0;
    for (j, s) in stats.iter().enumerate() {
        chunk.set_col(j, &s.centered);
        p_chunk.push(s.p);
        scale += s.scale_contrib;
    }
    (p_chunk, scale)
}

/// Build a GRM from a chunked genotype source.
///
/// `chunk_size = 0` processes the whole matrix in one pass.
pub fn build_grm(
    source: &mut dyn GenotypeSource,
    method: GrmMethod,
    chunk_size: usize,
) -> Result<Grm> {
    let n = source.n_samples();
    let m = source.n_markers();
    if n == 0 || m == 0 {
        return Err(ModelError::Value(format!(
            "cannot build a GRM from {} samples x {} markers",
            n, m
        )));
    }
    let chunk = if chunk_size == 0 { m } else { chunk_size };

    info!(
        "Building {} GRM: {} samples x {} markers (chunk size {})",
        method.tag(),
        n,
        m,
        chunk
    );

    let mut acc = DenseMatrix::zeros(n, n);
    let mut p_major = Vec::with_capacity(m);
    let mut scale_factor = 0.0;

    source.reset();
    while let Some(mut block) = source.read_chunk(chunk)? {
        let (p_chunk, scale) = standardize_chunk(&mut block.dosages, method);
        acc.add_ab_t(&block.dosages, &block.dosages);
        p_major.extend(p_chunk);
        scale_factor += scale;
        debug!(
            "GRM chunk at marker {}: {} markers accumulated",
            block.first_marker,
            block.dosages.ncols()
        );
    }

    if p_major.len() != m {
        return Err(ModelError::Format(format!(
            "genotype source yielded {} markers, manifest declares {}",
            p_major.len(),
            m
        )));
    }
    if scale_factor <= f64::EPSILON {
        return Err(ModelError::Value(
            "all markers are monomorphic; GRM scale factor is zero".into(),
        ));
    }

    acc.scale_mut(1.0 / scale_factor);

    Ok(Grm {
        method,
        matrix: acc,
        individual_ids: source.sample_ids().to_vec(),
        p_major,
        scale_factor,
    })
}
