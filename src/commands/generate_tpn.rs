//! # Generate-TPN Command Implementation
//!
//! Regenerates `THIRD-PARTY-NOTICES.txt` at the VMR root from the notices
//! files of every synchronized repository.

use anyhow::{Context as _, Result};
use clap::Args;
use std::process::ExitCode;

use super::Context;
use vmr_flow::output::Marker;
use vmr_flow::sync::notices;

/// Generate THIRD-PARTY-NOTICES.txt from the notices of every repository
#[derive(Args, Debug)]
pub struct GenerateTpnArgs {}

pub fn execute(_args: GenerateTpnArgs, ctx: &Context) -> Result<ExitCode> {
    let sync = ctx.synchronizer()?;
    let path = notices::generate_tpn(&ctx.vmr, sync.mappings())
        .context("Failed to generate third-party notices")?;
    ctx.print(Marker::Success, &format!("Wrote {}", path.display()));
    Ok(ExitCode::SUCCESS)
}
