//! # Update Command Implementation
//!
//! Moves repositories already in the VMR to a newer commit. Version files
//! that diverged on both sides are reconciled; any other conflicting file
//! stops the update and is listed for manual resolution.

use anyhow::{Context as _, Result};
use clap::Args;
use std::process::ExitCode;

use super::{sync_message, Context};
use vmr_flow::config::RepoSpec;

/// Synchronize repositories already in the VMR to a newer commit
#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Repositories to update, as `mapping[:revision]` or `mapping:path`.
    #[arg(value_name = "REPOSITORY", required = true)]
    pub repositories: Vec<RepoSpec>,

    /// Also update repositories the given ones depend on.
    #[arg(long)]
    pub recursive: bool,

    /// BAR id of the build the commits come from.
    #[arg(long, value_name = "ID")]
    pub build: Option<u64>,

    /// Update mappings with synchronization disabled.
    #[arg(long)]
    pub force: bool,

    /// Leave the changes staged.
    #[arg(long)]
    pub no_commit: bool,
}

pub fn execute(args: UpdateArgs, ctx: &Context) -> Result<ExitCode> {
    let sync = ctx.synchronizer()?;
    let options = ctx.sync_options(ctx.build(args.build)?, args.recursive, args.force);

    let mut results = Vec::new();
    for spec in &args.repositories {
        let synced = sync
            .update(&spec.name, &spec.target, &options)
            .with_context(|| format!("Failed to update {}", spec.name))?;
        results.extend(synced);
    }

    if ctx.report(&results) {
        for result in results.iter().filter(|r| r.has_conflicts()) {
            ctx.conflict_hint(&result.mapping);
        }
        return Ok(ExitCode::FAILURE);
    }
    if !args.no_commit {
        sync.commit(&sync_message("Update", &results))?;
    }
    Ok(ExitCode::SUCCESS)
}
