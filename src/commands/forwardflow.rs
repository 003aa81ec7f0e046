//! # Forwardflow Command Implementation
//!
//! Flows a repository commit into the VMR. The VMR copy is patched with the
//! repository changes made since the last flow and the result is committed on
//! a `darc/forward/...` branch. Conflicts leave the work tree for `resolve`
//! and exit with code 1.

use anyhow::{Context as _, Result};
use clap::Args;
use std::process::ExitCode;

use super::Context;
use vmr_flow::config::RepoSpec;
use vmr_flow::output::Marker;
use vmr_flow::sync::{CodeFlower, FlowOptions};

/// Flow a repository commit into the VMR on a forward-flow branch
#[derive(Args, Debug)]
pub struct ForwardflowArgs {
    /// Repository to flow, as `mapping[:revision]` or `mapping:path`.
    #[arg(value_name = "REPOSITORY")]
    pub repository: RepoSpec,

    /// BAR id of the build the commit comes from.
    #[arg(long, value_name = "ID")]
    pub build: Option<u64>,

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

pub fn execute(args: ForwardflowArgs, ctx: &Context) -> Result<ExitCode> {
    let sync = ctx.synchronizer()?;
    let mut options = FlowOptions {
        sync: ctx.sync_options(ctx.build(args.build)?, false, false),
        commit: !args.no_commit,
        branch: args.branch,
    };
    options.sync.subscription = args.subscription;

    let name = &args.repository.name;
    let result = CodeFlower::new(&sync)
        .forward_flow(name, &args.repository.target, &options)
        .with_context(|| format!("Failed to flow {} into the VMR", name))?;

    if result.has_conflicts() {
        ctx.print(
            Marker::Conflict,
            &format!("{}: {} file(s) in conflict", name, result.conflicted_files.len()),
        );
        for file in &result.conflicted_files {
            println!("    {}", file);
        }
        ctx.conflict_hint(name);
        return Ok(ExitCode::FAILURE);
    }
    if result.had_updates {
        ctx.print(
            Marker::Success,
            &format!("{}: flowed into the VMR on {}", name, result.branch),
        );
    } else {
        ctx.print(Marker::Info, &format!("{}: nothing to flow", name));
    }
    Ok(ExitCode::SUCCESS)
}
