//! gebv-core: Estimation engine for genomic prediction
//!
//! Implements genetic relationship matrix construction (streamed from
//! chunked genotype sources), sample alignment across phenotype and
//! genetic inputs, mixed-model assembly, REML variance-component
//! estimation with BLUP extraction, the Bayesian-alphabet Gibbs
//! sampler, and prediction for new genotyped individuals.

pub mod align;
pub mod bayes;
pub mod error;
pub mod grm;
pub mod model;
pub mod predict;
pub mod reml;

pub use error::ModelError;
