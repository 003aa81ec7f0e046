//! # Backflow Command Implementation
//!
//! Flows the VMR copy of a mapping back into a local clone of its repository
//! and commits it on a `darc/back/...` branch of that clone.

use anyhow::{Context as _, Result};
use clap::Args;
use std::path::PathBuf;
use std::process::ExitCode;

use super::Context;
use vmr_flow::output::Marker;
use vmr_flow::sync::{CodeFlower, FlowOptions};

/// Flow the VMR copy of a mapping back into a local repository clone
#[derive(Args, Debug)]
pub struct BackflowArgs {
    /// Mapping to flow back.
    #[arg(value_name = "MAPPING")]
    pub mapping: String,

    /// Local clone of the mapping's repository.
    #[arg(value_name = "REPO_PATH")]
    pub repo_path: PathBuf,

    /// Subscription the flow belongs to, recorded with pending conflicts.
    #[arg(long, value_name = "ID")]
    pub subscription: Option<String>,

    /// Branch to commit to instead of the derived one.
    #[arg(long, value_name = "BRANCH")]
    pub branch: Option<String>,

    /// Leave the changes staged.
    #[arg(long)]
    pub no_commit: bool,
}

pub fn execute(args: BackflowArgs, ctx: &Context) -> Result<ExitCode> {
    let sync = ctx.synchronizer()?;
    let mut options = FlowOptions {
        sync: ctx.sync_options(None, false, false),
        commit: !args.no_commit,
        branch: args.branch,
    };
    options.sync.subscription = args.subscription;

    let result = CodeFlower::new(&sync)
        .backflow(&args.mapping, &args.repo_path, &options)
        .with_context(|| {
            format!(
                "Failed to flow {} back into {}",
                args.mapping,
                args.repo_path.display()
            )
        })?;

    if result.has_conflicts() {
        ctx.print(
            Marker::Conflict,
            &format!("{}: {} file(s) in conflict", args.mapping, result.conflicted_files.len()),
        );
        for file in &result.conflicted_files {
            println!("    {}", file);
        }
        ctx.conflict_hint(&args.mapping);
        return Ok(ExitCode::FAILURE);
    }
    if result.had_updates {
        ctx.print(
            Marker::Success,
            &format!("{}: flowed back on {}", args.mapping, result.branch),
        );
    } else {
        ctx.print(Marker::Info, &format!("{}: nothing to flow", args.mapping));
    }
    Ok(ExitCode::SUCCESS)
}
