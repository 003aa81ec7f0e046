//! # Scan-Binary-Files Command Implementation
//!
//! Lists binary files under `src/` that no glob of the baseline file allows.
//! Exits with code 1 when any are found.

use anyhow::{Context as _, Result};
use clap::Args;
use std::path::PathBuf;
use std::process::ExitCode;

use super::Context;
use vmr_flow::output::{emoji, Marker};
use vmr_flow::sync::scanner;

/// List binary files in the VMR not allowed by a baseline
#[derive(Args, Debug)]
pub struct ScanBinaryFilesArgs {
    /// File of allowed globs, one per line.
    #[arg(long, value_name = "FILE")]
    pub baseline: Option<PathBuf>,
}

pub fn execute(args: ScanBinaryFilesArgs, ctx: &Context) -> Result<ExitCode> {
    let baseline = match &args.baseline {
        Some(path) => scanner::read_baseline(path)
            .with_context(|| format!("Failed to read baseline {}", path.display()))?,
        None => Vec::new(),
    };
    println!(
        "{} Scanning for binary files...",
        emoji(&ctx.output, "🔍", "[SCAN]")
    );
    let found = scanner::scan_binary_files(&ctx.vmr, &baseline)?;
    if found.is_empty() {
        ctx.print(Marker::Success, "No unexpected binary files found");
        return Ok(ExitCode::SUCCESS);
    }
    for path in &found {
        ctx.print(Marker::Warning, path);
    }
    println!();
    println!("Found {} binary file(s)", found.len());
    Ok(ExitCode::FAILURE)
}
