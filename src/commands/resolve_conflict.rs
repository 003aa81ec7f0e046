//! # Resolve-Conflict Command Implementation
//!
//! Looks up a subscription and writes its pending conflicts into the work
//! tree with conflict markers, ready to be edited and finished with `resolve`.

use anyhow::{Context as _, Result};
use clap::Args;
use std::process::ExitCode;

use super::Context;
use vmr_flow::output::Marker;
use vmr_flow::remote::BuildRegistry;
use vmr_flow::sync::CodeFlower;

/// Write conflict markers for the pending conflicts of a subscription
#[derive(Args, Debug)]
pub struct ResolveConflictArgs {
    /// Subscription whose conflicts to materialize.
    #[arg(value_name = "SUBSCRIPTION")]
    pub subscription: String,
}

pub fn execute(args: ResolveConflictArgs, ctx: &Context) -> Result<ExitCode> {
    let registry = ctx.registry();
    let subscription = ctx
        .block_on(registry.get_subscription(&args.subscription))?
        .with_context(|| format!("Failed to look up subscription {}", args.subscription))?;

    let sync = ctx.synchronizer()?;
    let files = CodeFlower::new(&sync).resolve_conflict(&subscription)?;
    for file in &files {
        ctx.print(Marker::Conflict, &file.display().to_string());
    }
    if let Some(mapping) = subscription.mapping_name() {
        ctx.conflict_hint(mapping);
    }
    Ok(ExitCode::SUCCESS)
}
