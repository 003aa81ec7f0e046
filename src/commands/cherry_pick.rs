//! # Cherry-Pick Command Implementation
//!
//! Applies one commit to its counterpart: a repository commit to the VMR copy
//! of the mapping, or a VMR commit to a local clone of the repository.

use anyhow::{Context as _, Result};
use clap::Args;
use std::path::PathBuf;
use std::process::ExitCode;

use super::Context;
use vmr_flow::output::Marker;
use vmr_flow::path::short_sha;
use vmr_flow::sync::{ApplyMode, CodeFlower};

/// Apply a single commit to the counterpart repository
#[derive(Args, Debug)]
pub struct CherryPickArgs {
    /// Mapping the commit belongs to.
    #[arg(value_name = "MAPPING")]
    pub mapping: String,

    /// Commit to apply.
    #[arg(value_name = "COMMIT")]
    pub commit: String,

    /// Local clone of the repository, as source or target of the commit.
    #[arg(long, value_name = "DIR")]
    pub repo: Option<PathBuf>,

    /// Overwrite diverged files instead of reporting conflicts.
    #[arg(long)]
    pub force: bool,
}

pub fn execute(args: CherryPickArgs, ctx: &Context) -> Result<ExitCode> {
    let sync = ctx.synchronizer()?;
    let mode = if args.force { ApplyMode::Force } else { ApplyMode::Checked };
    let result = CodeFlower::new(&sync)
        .cherry_pick(&args.mapping, &args.commit, args.repo.as_deref(), mode)
        .with_context(|| format!("Failed to cherry-pick {}", short_sha(&args.commit)))?;

    if result.has_conflicts() {
        ctx.print(
            Marker::Conflict,
            &format!(
                "{}: {} did not apply cleanly",
                args.mapping,
                short_sha(&args.commit)
            ),
        );
        for file in &result.conflicted_files {
            println!("    {}", file);
        }
        return Ok(ExitCode::FAILURE);
    }
    if result.had_updates {
        ctx.print(
            Marker::Success,
            &format!("{}: cherry-picked {}", args.mapping, short_sha(&args.commit)),
        );
    } else {
        ctx.print(Marker::Info, &format!("{}: commit changes nothing", args.mapping));
    }
    Ok(ExitCode::SUCCESS)
}
