//! Predict breeding values for new genotyped individuals.
//!
//! gebv predict --model fit.model --train-bed data/train --grm g=train.add.grm \
//!              --bed data/new [--data covariates.tsv] --out predictions.tsv

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use gebv_core::grm::load_grm;
use gebv_core::model::load_params;
use gebv_core::predict::GblupPredictor;
use gebv_geno::PhenoTable;

#[derive(Args)]
pub struct PredictArgs {
    /// Fitted-model parameter snapshot
    #[arg(long)]
    model: PathBuf,

    /// PLINK prefix of the training genotypes
    #[arg(long)]
    train_bed: PathBuf,

    /// Named GRM container used at fit time: name=path (repeatable)
    #[arg(long)]
    grm: Vec<String>,

    /// PLINK prefix of the new individuals
    #[arg(long)]
    bed: PathBuf,

    /// Covariate table for the new individuals (required unless the
    /// fitted fixed-effect formula is intercept-only)
    #[arg(long)]
    data: Option<PathBuf>,

    /// Sample ID column in the covariate table
    #[arg(long, default_value = "id")]
    id_col: String,

    /// Markers per streamed cross-GRM chunk (0 = single pass)
    #[arg(long, default_value = "10000")]
    chunk_size: usize,

    /// Output TSV path
    #[arg(long)]
    out: PathBuf,
}

pub fn run(args: PredictArgs) -> Result<()> {
    let params = load_params(&args.model)?;
    info!(
        "Loaded fitted model for response '{}' ({} training observations, {} terms)",
        params.response_name,
        params.obs_ids.len(),
        params.random_effect_names.len()
    );

    let mut predictor = GblupPredictor::new(params);
    for spec in &args.grm {
        let (name, path) = spec
            .split_once('=')
            .with_context(|| format!("--grm expects name=path, got '{}'", spec))?;
        let grm = load_grm(PathBuf::from(path).as_path())?;
        predictor.add_cross_grm(name, &args.train_bed, &grm, args.chunk_size)?;
    }

    let data = match &args.data {
        Some(path) => Some(PhenoTable::read(path, &args.id_col)?),
        None => None,
    };

    let prediction = predictor.predict(&args.bed, data.as_ref())?;
    std::fs::write(&args.out, prediction.to_tsv())
        .with_context(|| format!("failed to write {}", args.out.display()))?;

    info!(
        "Wrote predictions for {} individuals to {}",
        prediction.ids.len(),
        args.out.display()
    );
    Ok(())
}
