//! Build and persist a genetic relationship matrix.
//!
//! gebv grm --bed data/train --method add --chunk-size 10000 --out train.add.grm

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tracing::info;

use gebv_core::grm::{build_grm, save_grm, GrmMethod};
use gebv_geno::{BedReader, GenotypeSource};

#[derive(Args)]
pub struct GrmArgs {
    /// PLINK file prefix (bed/bim/fam)
    #[arg(long)]
    bed: PathBuf,

    /// GRM method: add (additive) or dom (dominance)
    #[arg(long, default_value = "add")]
    method: String,

    /// Markers per streamed chunk (0 = single pass)
    #[arg(long, default_value = "10000")]
    chunk_size: usize,

    /// Output container path (default: <bed>.<method>.grm)
    #[arg(long)]
    out: Option<PathBuf>,
}

pub fn run(args: GrmArgs) -> Result<()> {
    let method = GrmMethod::parse(&args.method)?;

    let mut reader = BedReader::new(&args.bed)?;
    info!(
        "Loaded PLINK triple {}: {} samples x {} markers",
        args.bed.display(),
        reader.n_samples(),
        reader.n_markers()
    );

    let grm = build_grm(&mut reader, method, args.chunk_size)?;

    let out = args.out.unwrap_or_else(|| {
        let mut path = args.bed.clone();
        path.set_extension(format!("{}.grm", method.tag()));
        path
    });
    save_grm(&grm, &out)?;

    info!(
        "Saved {} GRM ({} individuals, scale factor {:.6}) to {}",
        method.tag(),
        grm.n(),
        grm.scale_factor,
        out.display()
    );
    Ok(())
}
