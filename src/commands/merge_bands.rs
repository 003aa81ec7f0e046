//! # Merge-Bands Command Implementation
//!
//! Merges the source manifest and git-info of another VMR branch into the
//! current one. Each repository keeps the record with the newer package
//! version.

use anyhow::{Context as _, Result};
use clap::Args;
use std::process::ExitCode;

use super::Context;
use vmr_flow::git::LocalGitRepo;
use vmr_flow::output::Marker;
use vmr_flow::sync::bands;

/// Merge the source manifest and git-info of another VMR branch
#[derive(Args, Debug)]
pub struct MergeBandsArgs {
    /// Branch or commit of the band to merge.
    #[arg(value_name = "BAND")]
    pub band: String,

    /// Leave the changes staged.
    #[arg(long)]
    pub no_commit: bool,
}

pub fn execute(args: MergeBandsArgs, ctx: &Context) -> Result<ExitCode> {
    let merge = bands::merge_bands(&ctx.vmr, &args.band)
        .with_context(|| format!("Failed to merge band {}", args.band))?;

    for (label, names) in [
        ("added", &merge.added),
        ("updated", &merge.updated),
        ("kept", &merge.kept),
    ] {
        for name in names {
            ctx.print(Marker::Info, &format!("{}: {}", name, label));
        }
    }
    if !args.no_commit {
        let vmr = LocalGitRepo::new(&ctx.vmr).with_cancellation(ctx.cancel.clone());
        if vmr.has_staged_changes()? {
            vmr.commit(&format!("[VMR] Merge band {}", args.band), false)?;
        }
    }
    ctx.print(
        Marker::Success,
        &format!(
            "Merged {}: {} added, {} updated, {} kept",
            args.band,
            merge.added.len(),
            merge.updated.len(),
            merge.kept.len()
        ),
    );
    Ok(ExitCode::SUCCESS)
}
