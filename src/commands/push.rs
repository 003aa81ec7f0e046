//! # Push Command Implementation
//!
//! Pushes the current VMR branch. With `--verify-commits` every commit the
//! source manifest records is first fetched from its public remote, and the
//! push is refused if any of them is missing.

use anyhow::{Context as _, Result};
use clap::Args;
use std::process::ExitCode;

use super::Context;
use vmr_flow::git::LocalGitRepo;
use vmr_flow::output::Marker;
use vmr_flow::sync::publish;

/// Push a VMR branch, optionally verifying synchronized commits are public
#[derive(Args, Debug)]
pub struct PushArgs {
    /// Remote to push to.
    #[arg(long, value_name = "NAME", default_value = "origin")]
    pub remote: String,

    /// Branch to push. Defaults to the current branch.
    #[arg(long, value_name = "BRANCH")]
    pub branch: Option<String>,

    /// Check that every synchronized commit is publicly available first.
    #[arg(long)]
    pub verify_commits: bool,
}

pub fn execute(args: PushArgs, ctx: &Context) -> Result<ExitCode> {
    let branch = match args.branch {
        Some(branch) => branch,
        None => LocalGitRepo::new(&ctx.vmr)
            .current_branch()
            .context("Failed to determine the current branch")?,
    };
    let scratch = ctx.config.tmp_dir();
    let verify = args.verify_commits.then_some(scratch.as_path());

    publish::push(&ctx.vmr, &args.remote, &branch, verify)
        .with_context(|| format!("Failed to push {} to {}", branch, args.remote))?;
    ctx.print(Marker::Success, &format!("Pushed {} to {}", branch, args.remote));
    Ok(ExitCode::SUCCESS)
}
