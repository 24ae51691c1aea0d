//! PLINK bed/bim/fam reader using memory-mapped files.
//!
//! PLINK binary format consists of three files:
//! - .bed: Binary genotype data (2 bits per genotype, packed)
//! - .bim: Variant information (chrom, id, cm, pos, a1, a2)
//! - .fam: Sample information (fid, iid, father, mother, sex, pheno)
//!
//! Reference: https://www.cog-genomics.org/plink/1.9/formats#bed
//!
//! Markers are decoded in bounded chunks so relationship-matrix
//! construction never holds more than one chunk of dosages in memory.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use memmap2::Mmap;

use gebv_linalg::DenseMatrix;

use crate::traits::{GenotypeChunk, GenotypeSource};

/// How missing genotype codes are materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingPolicy {
    /// Missing dosages become NaN.
    #[default]
    Propagate,
    /// Missing dosages are imputed to the neutral dosage 1.0.
    Neutral,
}

/// PLINK BIM file entry (one per variant).
#[derive(Debug, Clone)]
pub struct BimEntry {
    pub chrom: String,
    pub id: String,
    pub pos: u64,
    pub allele1: String,
    pub allele2: String,
}

/// PLINK FAM file entry (one per sample).
#[derive(Debug, Clone)]
pub struct FamEntry {
    pub fid: String,
    pub iid: String,
}

/// Reader for PLINK bed/bim/fam files.
pub struct BedReader {
    /// Memory-mapped .bed file.
    mmap: Mmap,
    /// Variant information from .bim file.
    bim: Vec<BimEntry>,
    /// Sample information from .fam file.
    fam: Vec<FamEntry>,
    /// Number of samples in the .fam file, before subsetting.
    n_samples_total: usize,
    /// Number of bytes per marker in the bed file.
    bytes_per_marker: usize,
    /// Selected sample IDs (IID), in decode order.
    sample_ids: Vec<String>,
    /// Marker IDs: chromosome_position.
    marker_ids: Vec<String>,
    /// Indices of selected samples (None = all samples, fam order).
    sample_subset: Option<Vec<usize>>,
    /// Missing-value materialization.
    missing: MissingPolicy,
    /// Next marker to decode.
    cursor: usize,
    _base_path: PathBuf,
}

impl BedReader {
    /// Open PLINK files from a base path (without extension).
    /// Will look for .bed, .bim, .fam files.
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self> {
        let base = base_path.as_ref();
        let bed_path = base.with_extension("bed");
        let bim_path = base.with_extension("bim");
        let fam_path = base.with_extension("fam");

        let fam = Self::parse_fam(&fam_path)?;
        let n_samples = fam.len();
        let bim = Self::parse_bim(&bim_path)?;

        let bed_file = std::fs::File::open(&bed_path)
            .with_context(|| format!("Failed to open bed file: {}", bed_path.display()))?;
        let mmap = unsafe { Mmap::map(&bed_file)? };

        // Validate bed file magic number and mode byte.
        if mmap.len() < 3 {
            bail!("Bed file too small: {}", bed_path.display());
        }
        if mmap[0] != 0x6C || mmap[1] != 0x1B {
            bail!("Invalid PLINK bed file magic number: {}", bed_path.display());
        }
        if mmap[2] != 0x01 {
            bail!("Only SNP-major bed files are supported (mode byte = 0x01)");
        }

        let bytes_per_marker = n_samples.div_ceil(4);
        let expected_size = 3 + bytes_per_marker * bim.len();
        if mmap.len() < expected_size {
            bail!(
                "Bed file truncated: expected at least {} bytes for {} samples x {} markers, got {}",
                expected_size,
                n_samples,
                bim.len(),
                mmap.len()
            );
        }

        let sample_ids: Vec<String> = fam.iter().map(|f| f.iid.clone()).collect();
        let marker_ids: Vec<String> = bim
            .iter()
            .map(|b| format!("{}_{}", b.chrom, b.pos))
            .collect();

        tracing::debug!(
            "Opened PLINK triple {}: {} samples, {} markers",
            base.display(),
            n_samples,
            bim.len()
        );

        Ok(Self {
            mmap,
            bim,
            fam,
            n_samples_total: n_samples,
            bytes_per_marker,
            sample_ids,
            marker_ids,
            sample_subset: None,
            missing: MissingPolicy::default(),
            cursor: 0,
            _base_path: base.to_path_buf(),
        })
    }

    /// Parse a .fam file.
    fn parse_fam(path: &Path) -> Result<Vec<FamEntry>> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fam file: {}", path.display()))?;
        let mut entries = Vec::new();
        for (line_num, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 2 {
                bail!("Fam file line {} has fewer than 2 fields", line_num + 1);
            }
            entries.push(FamEntry {
                fid: fields[0].to_string(),
                iid: fields[1].to_string(),
            });
        }
        Ok(entries)
    }

    /// Parse a .bim file.
    fn parse_bim(path: &Path) -> Result<Vec<BimEntry>> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read bim file: {}", path.display()))?;
        let mut entries = Vec::new();
        for (line_num, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 6 {
                bail!("Bim file line {} has fewer than 6 fields", line_num + 1);
            }
            entries.push(BimEntry {
                chrom: fields[0].to_string(),
                id: fields[1].to_string(),
                pos: fields[3].parse().unwrap_or(0),
                allele1: fields[4].to_string(),
                allele2: fields[5].to_string(),
            });
        }
        Ok(entries)
    }

    /// Choose how missing genotypes are materialized.
    pub fn set_missing_policy(&mut self, policy: MissingPolicy) {
        self.missing = policy;
    }

    /// Restrict subsequent reads to the given sample IDs, in the
    /// requested order. IDs absent from the .fam manifest are skipped;
    /// the aligner is responsible for reporting them.
    pub fn keep_samples(&mut self, ids: &[String]) {
        let mut indices = Vec::new();
        let mut new_ids = Vec::new();
        for id in ids {
            if let Some(pos) = self.fam.iter().position(|f| &f.iid == id) {
                indices.push(pos);
                new_ids.push(id.clone());
            }
        }
        self.sample_subset = Some(indices);
        self.sample_ids = new_ids;
    }

    /// Get FAM entries.
    pub fn fam(&self) -> &[FamEntry] {
        &self.fam
    }

    /// Get BIM entries.
    pub fn bim(&self) -> &[BimEntry] {
        &self.bim
    }

    /// Decode a single genotype from a packed bed byte.
    /// Returns dosage of allele1: 0, 1, 2, or NaN for missing.
    #[inline]
    fn decode_genotype(byte: u8, offset: usize) -> f64 {
        let bits = (byte >> (offset * 2)) & 0x03;
        match bits {
            0b00 => 2.0,
            0b01 => f64::NAN,
            0b10 => 1.0,
            0b11 => 0.0,
            _ => unreachable!(),
        }
    }

    /// Decode one marker into the selected-sample dosage vector.
    fn decode_marker(&self, marker_idx: usize) -> Vec<f64> {
        let offset = 3 + marker_idx * self.bytes_per_marker;
        let decode_one = |sample_idx: usize| -> f64 {
            let byte = self.mmap[offset + sample_idx / 4];
            let d = Self::decode_genotype(byte, sample_idx % 4);
            if d.is_nan() && self.missing == MissingPolicy::Neutral {
                1.0
            } else {
                d
            }
        };

        match &self.sample_subset {
            Some(indices) => indices.iter().map(|&i| decode_one(i)).collect(),
            None => (0..self.n_samples_total).map(decode_one).collect(),
        }
    }
}

impl GenotypeSource for BedReader {
    fn n_markers(&self) -> usize {
        self.bim.len()
    }

    fn n_samples(&self) -> usize {
        match &self.sample_subset {
            Some(indices) => indices.len(),
            None => self.n_samples_total,
        }
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
        if self.cursor >= self.bim.len() {
            return Ok(None);
        }
        let take = max_markers.max(1).min(self.bim.len() - self.cursor);
        let n = self.n_samples();
        let mut block = DenseMatrix::zeros(n, take);
        for j in 0..take {
            let dosages = self.decode_marker(self.cursor + j);
            block.set_col(j, &dosages);
        }
        let chunk = GenotypeChunk {
            first_marker: self.cursor,
            dosages: block,
        };
        self.cursor += take;
        Ok(Some(chunk))
    }
}
