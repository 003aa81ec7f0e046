//! # Diff Command Implementation
//!
//! This module implements the `diff` subcommand, which shows the differences
//! between the VMR copy of a mapping and its repository at a revision.
//!
//! ## Functionality
//!
//! - **Change Detection**: Compares both trees after applying the mapping's
//!   include and exclude rules
//! - **Change Categories**: Shows files the repository adds, modifies, or
//!   deletes relative to the VMR
//! - **Exit Codes**: Returns 0 if the trees match, 1 if changes exist
//!
//! This command is read-only.

use anyhow::{Context as _, Result};
use clap::Args;
use std::process::ExitCode;

use super::Context;
use vmr_flow::config::RepoSpec;
use vmr_flow::path::short_sha;
use vmr_flow::sync::{ChangeKind, FileChange, TreePatch};

/// Compare a mapping with its repository
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Repository to compare, as `mapping[:revision]` or `mapping:path`.
    #[arg(value_name = "REPOSITORY")]
    pub repository: RepoSpec,

    /// Show only a summary without listing individual files.
    #[arg(long)]
    pub summary: bool,
}

fn of_kind(patch: &TreePatch, kind: ChangeKind) -> Vec<&FileChange> {
    patch.changes.iter().filter(|c| c.kind == kind).collect()
}

/// Execute the `diff` command.
///
/// Returns exit code 0 if the VMR matches the repository, 1 otherwise.
pub fn execute(args: DiffArgs, ctx: &Context) -> Result<ExitCode> {
    let sync = ctx.synchronizer()?;
    let name = &args.repository.name;
    let patch = sync
        .diff(name, &args.repository.target)
        .with_context(|| format!("Failed to compare {} with the VMR", name))?;

    if patch.is_empty() {
        println!(
            "No changes detected: src/{} matches {}.",
            name,
            short_sha(&patch.to_sha)
        );
        return Ok(ExitCode::SUCCESS);
    }

    let added = of_kind(&patch, ChangeKind::Added);
    let modified = of_kind(&patch, ChangeKind::Modified);
    let deleted = of_kind(&patch, ChangeKind::Deleted);

    if args.summary {
        println!("Changes in {} at {}:", name, short_sha(&patch.to_sha));
        if !added.is_empty() {
            println!("  {} file(s) added", added.len());
        }
        if !modified.is_empty() {
            println!("  {} file(s) modified", modified.len());
        }
        if !deleted.is_empty() {
            println!("  {} file(s) deleted", deleted.len());
        }
        println!();
        println!("Total: {} change(s)", patch.changes.len());
    } else {
        for (heading, sign, changes) in [
            ("Added:", '+', &added),
            ("Modified:", '~', &modified),
            ("Deleted:", '-', &deleted),
        ] {
            if changes.is_empty() {
                continue;
            }
            println!("{}", heading);
            for change in changes.iter() {
                println!("  {} {}", sign, change.path);
            }
            println!();
        }
        println!(
            "Summary: {} added, {} modified, {} deleted",
            added.len(),
            modified.len(),
            deleted.len()
        );
    }

    Ok(ExitCode::FAILURE)
}
