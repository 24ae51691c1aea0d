//! Fit a mixed model.
//!
//! REML/GBLUP path:
//!   gebv fit --pheno ph.tsv --formula "y ~ 1 + age + {g}" --grm g=train.add.grm --out fit.model
//!
//! Bayesian path (marker effects from a BED triple):
//!   gebv fit --pheno ph.tsv --formula "y ~ 1 + {g}" --bed train --engine bayes --method rr --out fit

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::info;

use gebv_core::align::GeneticData;
use gebv_core::bayes::{run_gibbs, BayesConfig, BayesMethod, BayesModel};
use gebv_core::grm::load_grm;
use gebv_core::model::spec::make_model;
use gebv_core::model::{save_params, snapshot};
use gebv_core::reml::{GblupModel, RemlConfig, RemlMethod, RemlStatus};
use gebv_geno::{BedReader, GenotypeSource, PhenoTable};

#[derive(Args)]
pub struct FitArgs {
    /// Phenotype/covariate table (tab or space delimited, header row)
    #[arg(long)]
    pheno: PathBuf,

    /// Sample ID column name
    #[arg(long, default_value = "id")]
    id_col: String,

    /// Model formula, e.g. "y ~ 1 + age + (site) + {g}"
    #[arg(long)]
    formula: String,

    /// Named GRM container: name=path (repeatable; REML engine)
    #[arg(long)]
    grm: Vec<String>,

    /// PLINK prefix supplying marker dosages (Bayesian engine)
    #[arg(long)]
    bed: Option<PathBuf>,

    /// Name the BED-backed genetic source is keyed under
    #[arg(long, default_value = "g")]
    bed_name: String,

    /// Fitting engine: reml or bayes
    #[arg(long, default_value = "reml")]
    engine: String,

    /// Update rule: ai/nr/fisher (REML) or rr/a/b/c (Bayes)
    #[arg(long, default_value = "ai")]
    method: String,

    /// Open the REML iteration with one EM step
    #[arg(long, default_value = "false")]
    em_init: bool,

    /// Maximum REML iterations
    #[arg(long, default_value = "100")]
    max_iter: usize,

    /// REML convergence tolerance
    #[arg(long, default_value = "1e-6")]
    tol: f64,

    /// Gibbs iterations (Bayes engine)
    #[arg(long, default_value = "3000")]
    iterations: usize,

    /// Gibbs burn-in (Bayes engine)
    #[arg(long, default_value = "1000")]
    burn_in: usize,

    /// Random seed (Bayes engine)
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Output path (snapshot for REML, effects-table prefix for Bayes)
    #[arg(long)]
    out: PathBuf,

    /// Also write a JSON sidecar of the fitted parameters
    #[arg(long, default_value = "false")]
    save_json: bool,
}

pub fn run(args: FitArgs) -> Result<()> {
    let pheno = PhenoTable::read(&args.pheno, &args.id_col)?;
    info!(
        "Loaded phenotype table {}: {} rows",
        args.pheno.display(),
        pheno.n_rows()
    );

    match args.engine.to_lowercase().as_str() {
        "reml" => run_reml(&args, &pheno),
        "bayes" => run_bayes(&args, &pheno),
        other => bail!("unknown engine '{}', expected one of: reml, bayes", other),
    }
}

fn grm_sources(specs: &[String]) -> Result<Vec<(String, GeneticData)>> {
    let mut sources = Vec::new();
    for spec in specs {
        let (name, path) = spec
            .split_once('=')
            .with_context(|| format!("--grm expects name=path, got '{}'", spec))?;
        let grm = load_grm(PathBuf::from(path).as_path())?;
        info!(
            "Loaded {} GRM '{}' from {}: {} individuals",
            grm.method.tag(),
            name,
            path,
            grm.n()
        );
        sources.push((name.to_string(), GeneticData::Relationship(grm)));
    }
    Ok(sources)
}

fn run_reml(args: &FitArgs, pheno: &PhenoTable) -> Result<()> {
    if args.grm.is_empty() {
        bail!("the REML engine needs at least one --grm name=path");
    }
    let sources = grm_sources(&args.grm)?;
    let spec = make_model(&args.formula, pheno, sources)?;

    let config = RemlConfig {
        method: RemlMethod::parse(&args.method)?,
        em_init: args.em_init,
        max_iteration: args.max_iter,
        tolerance: args.tol,
    };
    let mut model = GblupModel::new(spec, config);
    let fit = model.fit()?;

    match fit.status {
        RemlStatus::Converged => info!("Converged after {} iterations", fit.iterations),
        RemlStatus::MaxIterReached => info!(
            "Stopped at the iteration cap ({}); estimates are the last iterate",
            fit.iterations
        ),
    }
    for (name, sigma) in fit.sigma_names.iter().zip(fit.sigma.iter()) {
        info!("  sigma[{}] = {:.6}", name, sigma);
    }
    info!("  logL = {:.6}", fit.log_likelihood);

    let params = model.to_params()?;
    save_params(&params, &args.out)?;
    if args.save_json {
        let json_path = args.out.with_extension("model.json");
        snapshot::save_params_json(&params, &json_path)?;
    }
    info!("Saved fitted parameters to {}", args.out.display());
    Ok(())
}

fn run_bayes(args: &FitArgs, pheno: &PhenoTable) -> Result<()> {
    let bed = args
        .bed
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("the Bayes engine needs --bed with marker dosages"))?;

    let mut reader = BedReader::new(bed)?;
    let dosages = reader.read_dense()?;
    let source = GeneticData::Dosages {
        individual_ids: reader.sample_ids().to_vec(),
        marker_ids: reader.marker_ids().to_vec(),
        matrix: dosages,
        p_major: Vec::new(),
    };

    let spec = make_model(&args.formula, pheno, vec![(args.bed_name.clone(), source)])?;

    let method = BayesMethod::parse(&args.method)?;
    let config = BayesConfig {
        iterations: args.iterations,
        burn_in: args.burn_in,
        seed: args.seed,
        ..BayesConfig::default()
    };
    let methods = vec![method; spec.genetic.len()];
    let model = BayesModel::from_spec(&spec, &methods, &config)?;
    let fit = run_gibbs(&model, &config)?;

    info!("  residual variance = {:.6}", fit.residual_variance);
    for term in &fit.terms {
        info!(
            "  term '{}' (Bayes{}): genetic variance {:.6}, pi {:.4}",
            term.name, term.method_tag, term.genetic_variance, term.pi
        );
        let path = args.out.with_extension(format!("{}.effects.tsv", term.name));
        let mut file = std::fs::File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        writeln!(file, "marker\tp_major\tweight\tinclusion")?;
        for j in 0..term.marker_ids.len() {
            writeln!(
                file,
                "{}\t{:.6}\t{:.6}\t{:.4}",
                term.marker_ids[j], term.p_major[j], term.weights[j], term.inclusion[j]
            )?;
        }
        info!("Saved marker effects to {}", path.display());
    }
    Ok(())
}
