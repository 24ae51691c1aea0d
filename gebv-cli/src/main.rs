//! gebv: genomic prediction with mixed models.
//!
//! CLI entry point using clap for argument parsing.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "gebv",
    version,
    about = "Genomic prediction: GRM construction, REML/Bayesian model fitting, GEBV prediction",
    long_about = "Fits linear mixed models for genomic prediction: builds genetic \n\
                  relationship matrices from PLINK BED genotypes, estimates variance \n\
                  components by REML or samples marker effects with the Bayesian \n\
                  alphabet, and predicts breeding values for new individuals."
)]
struct Cli {
    /// Number of threads to use
    #[arg(long, default_value = "1", global = true)]
    threads: usize,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a genetic relationship matrix from a BED file triple
    Grm(commands::grm::GrmArgs),

    /// Fit a mixed model (REML/GBLUP or a Bayesian-alphabet sampler)
    Fit(commands::fit::FitArgs),

    /// Predict breeding values for new genotyped individuals
    Predict(commands::predict::PredictArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    rayon::ThreadPoolBuilder::new()
        .num_threads(cli.threads)
        .build_global()
        .ok();

    tracing::info!("gebv v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Grm(args) => commands::grm::run(args),
        Commands::Fit(args) => commands::fit::run(args),
        Commands::Predict(args) => commands::predict::run(args),
    }
}
