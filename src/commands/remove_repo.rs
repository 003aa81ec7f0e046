//! # Remove-Repo Command Implementation
//!
//! Deletes a mapping's directory, manifest record, git-info file and mapping
//! entry. The removal is staged, not committed.

use anyhow::{Context as _, Result};
use clap::Args;
use std::process::ExitCode;

use super::Context;
use vmr_flow::output::Marker;

/// Remove repositories from the VMR
#[derive(Args, Debug)]
pub struct RemoveRepoArgs {
    /// Mappings to remove.
    #[arg(value_name = "MAPPING", required = true)]
    pub mappings: Vec<String>,
}

pub fn execute(args: RemoveRepoArgs, ctx: &Context) -> Result<ExitCode> {
    let mut sync = ctx.synchronizer()?;
    for name in &args.mappings {
        sync.remove_repo(name)
            .with_context(|| format!("Failed to remove {}", name))?;
        ctx.print(Marker::Success, &format!("{}: removed (staged)", name));
    }
    Ok(ExitCode::SUCCESS)
}
