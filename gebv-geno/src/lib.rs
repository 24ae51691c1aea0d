//! gebv-geno: Genotype and phenotype I/O for the gebv engine
//!
//! Provides the chunked PLINK bed/bim/fam decoder, an in-memory
//! genotype source for tests and pre-loaded data, and the delimited
//! phenotype table reader.

pub mod phenotype;
pub mod plink;
pub mod traits;

pub use phenotype::PhenoTable;
pub use plink::{BedReader, MissingPolicy};
pub use traits::{GenotypeChunk, GenotypeSource, MatrixSource};
