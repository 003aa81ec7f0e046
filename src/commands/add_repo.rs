//! # Add-Repo Command Implementation
//!
//! Registers a new source mapping in `src/source-mappings.json` and
//! synchronizes it for the first time.

use anyhow::{Context as _, Result};
use clap::Args;
use std::process::ExitCode;

use super::{sync_message, Context};
use vmr_flow::config::RepoSpec;

/// Add a source mapping and synchronize it
#[derive(Args, Debug)]
pub struct AddRepoArgs {
    /// New mapping, as `mapping[:revision]` or `mapping:path`.
    #[arg(value_name = "REPOSITORY")]
    pub repository: RepoSpec,

    /// Remote the mapping is fetched from.
    #[arg(long, value_name = "URI")]
    pub remote: String,

    /// Branch synchronized by default. Defaults to `main`.
    #[arg(long = "ref", value_name = "REF")]
    pub default_ref: Option<String>,

    /// Leave the changes staged.
    #[arg(long)]
    pub no_commit: bool,
}

pub fn execute(args: AddRepoArgs, ctx: &Context) -> Result<ExitCode> {
    let mut sync = ctx.synchronizer()?;
    let options = ctx.sync_options(None, false, false);
    let name = &args.repository.name;

    let results = sync
        .add_repo(
            name,
            &args.remote,
            args.default_ref.as_deref(),
            &args.repository.target,
            &options,
        )
        .with_context(|| format!("Failed to add {}", name))?;

    if ctx.report(&results) {
        return Ok(ExitCode::FAILURE);
    }
    if !args.no_commit {
        sync.commit(&sync_message("Add", &results))?;
    }
    Ok(ExitCode::SUCCESS)
}
