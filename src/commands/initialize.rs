//! # Initialize Command Implementation
//!
//! Synchronizes repositories into the VMR for the first time. Each argument is
//! `mapping[:revision]` or `mapping:path`; with `--recursive` the repositories
//! referenced from each one's `eng/Version.Details.xml` are brought in too.

use anyhow::{Context as _, Result};
use clap::Args;
use std::process::ExitCode;

use super::{sync_message, Context};
use vmr_flow::config::RepoSpec;

/// Synchronize repositories into the VMR for the first time
#[derive(Args, Debug)]
pub struct InitializeArgs {
    /// Repositories to initialize, as `mapping[:revision]` or `mapping:path`.
    #[arg(value_name = "REPOSITORY", required = true)]
    pub repositories: Vec<RepoSpec>,

    /// Also initialize repositories the given ones depend on.
    #[arg(long)]
    pub recursive: bool,

    /// BAR id of the build the commits come from.
    #[arg(long, value_name = "ID")]
    pub build: Option<u64>,

    /// Leave the changes staged.
    #[arg(long)]
    pub no_commit: bool,
}

pub fn execute(args: InitializeArgs, ctx: &Context) -> Result<ExitCode> {
    let sync = ctx.synchronizer()?;
    let options = ctx.sync_options(ctx.build(args.build)?, args.recursive, false);

    let mut results = Vec::new();
    for spec in &args.repositories {
        let synced = sync
            .initialize(&spec.name, &spec.target, &options)
            .with_context(|| format!("Failed to initialize {}", spec.name))?;
        results.extend(synced);
    }

    if ctx.report(&results) {
        return Ok(ExitCode::FAILURE);
    }
    if !args.no_commit {
        sync.commit(&sync_message("Initialize", &results))?;
    }
    Ok(ExitCode::SUCCESS)
}
