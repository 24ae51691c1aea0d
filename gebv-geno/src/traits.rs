//! Core trait for chunked genotype access.

use anyhow::Result;
use gebv_linalg::DenseMatrix;

/// One decoded block of markers for all selected samples.
#[derive(Debug, Clone)]
pub struct GenotypeChunk {
    /// Index of the first marker in this chunk.
    pub first_marker: usize,
    /// Column-major samples x markers dosage matrix. Missing entries
    /// are NaN unless the source imputes at decode time.
    pub dosages: DenseMatrix,
}

/// Trait for streaming genotype dosages marker-chunk by marker-chunk.
///
/// Implemented by the PLINK reader and by the in-memory source used
/// in tests. Consumers that need everything at once use `read_dense`.
pub trait GenotypeSource {
    /// Total number of markers.
    fn n_markers(&self) -> usize;

    /// Number of selected samples.
    fn n_samples(&self) -> usize;

    /// Selected sample IDs, in the order rows are decoded.
    fn sample_ids(&self) -> &[String];

    /// Marker IDs (chromosome_position), in file order.
    fn marker_ids(&self) -> &[String];

    /// Rewind to the first marker.
    fn reset(&mut self);

    /// Decode up to `max_markers` markers. Returns None when exhausted.
    fn read_chunk(&mut self, max_markers: usize) -> Result<Option<GenotypeChunk>>;

    /// Decode the whole matrix in one pass.
    fn read_dense(&mut self) -> Result<DenseMatrix> {
        self.reset();
        let n = self.n_samples();
        let m = self.n_markers();
        let mut full = DenseMatrix::zeros(n, m);
        while let Some(chunk) = self.read_chunk(m.max(1))? {
            for j in 0..chunk.dosages.ncols() {
                full.set_col(chunk.first_marker + j, &chunk.dosages.col(j));
            }
        }
        Ok(full)
    }
}

/// An in-memory genotype source. Used by tests and by callers that
/// already hold a decoded dosage matrix.
#[derive(Debug, Clone)]
pub struct MatrixSource {
    sample_ids: Vec<String>,
    marker_ids: Vec<String>,
    dosages: DenseMatrix,
    cursor: usize,
}

impl MatrixSource {
    pub fn new(sample_ids: Vec<String>, marker_ids: Vec<String>, dosages: DenseMatrix) -> Self {
        assert_eq!(sample_ids.len(), dosages.nrows());
        assert_eq!(marker_ids.len(), dosages.ncols());
        Self {
            sample_ids,
            marker_ids,
            dosages,
            cursor: 0,
        }
    }
}

impl GenotypeSource for MatrixSource {
    fn n_markers(&self) -> usize {
        self.marker_ids.len()
    }

    fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    fn marker_ids(&self) -> &[String] {
        &self.marker_ids
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }

    fn read_chunk(&mut self, max_markers: usize) -> Result<Option<GenotypeChunk>> {
        if self.cursor >= self.n_markers() {
            return Ok(None);
        }
        let take = max_markers.max(1).min(self.n_markers() - self.cursor);
        let mut block = DenseMatrix::zeros(self.n_samples(), take);
        for j in 0..take {
            block.set_col(j, &self.dosages.col(self.cursor + j));
        }
        let chunk = GenotypeChunk {
            first_marker: self.cursor,
            dosages: block,
        };
        self.cursor += take;
        Ok(Some(chunk))
    }
}
