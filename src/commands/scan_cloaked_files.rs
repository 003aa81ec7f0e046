//! # Scan-Cloaked-Files Command Implementation
//!
//! Lists files in the VMR that a source mapping's exclude rules say must not
//! be there. Exits with code 1 when any are found.

use anyhow::Result;
use clap::Args;
use std::process::ExitCode;

use super::Context;
use vmr_flow::output::{emoji, Marker};
use vmr_flow::sync::scanner;

/// List files in the VMR that the source mappings cloak
#[derive(Args, Debug)]
pub struct ScanCloakedFilesArgs {
    /// Scan only this mapping.
    #[arg(long, value_name = "MAPPING")]
    pub mapping: Option<String>,
}

pub fn execute(args: ScanCloakedFilesArgs, ctx: &Context) -> Result<ExitCode> {
    let sync = ctx.synchronizer()?;
    println!(
        "{} Scanning for cloaked files...",
        emoji(&ctx.output, "🔍", "[SCAN]")
    );
    let found = scanner::scan_cloaked_files(&ctx.vmr, sync.mappings(), args.mapping.as_deref())?;
    if found.is_empty() {
        ctx.print(Marker::Success, "No cloaked files found");
        return Ok(ExitCode::SUCCESS);
    }
    for path in &found {
        ctx.print(Marker::Warning, path);
    }
    println!();
    println!("Found {} cloaked file(s)", found.len());
    Ok(ExitCode::FAILURE)
}
