//! # Resolve Command Implementation
//!
//! Finishes a flow that stopped on conflicts once they have been resolved by
//! hand. Refuses while any conflicted file still contains conflict markers.

use anyhow::{bail, Result};
use clap::Args;
use std::process::ExitCode;

use super::Context;
use vmr_flow::output::Marker;
use vmr_flow::path::short_sha;
use vmr_flow::sync::CodeFlower;

/// Finish a flow whose conflicts were resolved by hand
#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Mapping whose flow to finish.
    #[arg(value_name = "MAPPING", required_unless_present = "subscription")]
    pub mapping: Option<String>,

    /// Subscription whose flow to finish, instead of a mapping.
    #[arg(long, value_name = "ID", conflicts_with = "mapping")]
    pub subscription: Option<String>,
}

pub fn execute(args: ResolveArgs, ctx: &Context) -> Result<ExitCode> {
    let sync = ctx.synchronizer()?;
    let flower = CodeFlower::new(&sync);
    let (label, commit) = match (&args.mapping, &args.subscription) {
        (Some(mapping), _) => (mapping.as_str(), flower.resolve(mapping)?),
        (None, Some(subscription)) => (subscription.as_str(), flower.resolve_subscription(subscription)?),
        (None, None) => bail!("Pass a mapping or --subscription"),
    };

    match commit {
        Some(sha) => ctx.print(
            Marker::Success,
            &format!("{}: resolved in {}", label, short_sha(&sha)),
        ),
        None => ctx.print(Marker::Info, &format!("{}: resolved, nothing to commit", label)),
    }
    Ok(ExitCode::SUCCESS)
}
