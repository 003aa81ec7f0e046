//! # Reset Command Implementation
//!
//! Forces a mapping to a given commit, overwriting whatever the VMR holds.
//! The target is a commit SHA, `bar:<id>` for the commit of a build, or
//! `channel:<name>` for the newest build of the mapping's repository in a
//! channel. The result is staged only; committing is left to the caller.

use anyhow::{anyhow, bail, Context as _, Result};
use clap::Args;
use std::fmt;
use std::process::ExitCode;
use std::str::FromStr;

use super::Context;
use vmr_flow::config::RepoTarget;
use vmr_flow::flow::Build;
use vmr_flow::output::Marker;
use vmr_flow::path::short_sha;
use vmr_flow::remote::BuildRegistry;

/// Reset a mapping to a commit, a build or the latest build of a channel
#[derive(Args, Debug)]
pub struct ResetArgs {
    /// `mapping:target`, where target is a SHA, `bar:<id>` or `channel:<name>`.
    #[arg(value_name = "MAPPING:TARGET")]
    pub target: ResetSpec,
}

/// Parsed `mapping:target` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetSpec {
    pub mapping: String,
    pub target: ResetTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetTarget {
    Sha(String),
    Build(u64),
    Channel(String),
}

impl FromStr for ResetSpec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (mapping, target) = s
            .split_once(':')
            .filter(|(m, t)| !m.is_empty() && !t.is_empty())
            .ok_or_else(|| format!("expected mapping:target, got '{}'", s))?;
        let target = if let Some(id) = target.strip_prefix("bar:") {
            ResetTarget::Build(
                id.parse()
                    .map_err(|_| format!("invalid BAR id '{}'", id))?,
            )
        } else if let Some(channel) = target.strip_prefix("channel:") {
            if channel.is_empty() {
                return Err("channel name is empty".to_string());
            }
            ResetTarget::Channel(channel.to_string())
        } else {
            ResetTarget::Sha(target.to_string())
        };
        Ok(Self {
            mapping: mapping.to_string(),
            target,
        })
    }
}

impl fmt::Display for ResetTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetTarget::Sha(sha) => write!(f, "{}", sha),
            ResetTarget::Build(id) => write!(f, "bar:{}", id),
            ResetTarget::Channel(channel) => write!(f, "channel:{}", channel),
        }
    }
}

pub fn execute(args: ResetArgs, ctx: &Context) -> Result<ExitCode> {
    let sync = ctx.synchronizer()?;
    let spec = args.target;
    let mapping = sync.mapping(&spec.mapping, true)?;

    let build: Option<Build> = match &spec.target {
        ResetTarget::Sha(_) => None,
        ResetTarget::Build(id) => ctx.build(Some(*id))?,
        ResetTarget::Channel(channel) => {
            let registry = ctx.registry();
            let latest = ctx.block_on(registry.get_latest_build(&mapping.default_remote, channel))??;
            Some(latest.ok_or_else(|| {
                anyhow!(
                    "No build of {} found in channel '{}'",
                    mapping.default_remote,
                    channel
                )
            })?)
        }
    };
    let sha = match (&spec.target, &build) {
        (ResetTarget::Sha(sha), _) => sha.clone(),
        (_, Some(build)) => build.commit.clone(),
        (_, None) => bail!("Nothing to reset {} to", spec.mapping),
    };

    let result = sync
        .reset(&mapping.name, &RepoTarget::Revision(sha), build)
        .with_context(|| format!("Failed to reset {} to {}", mapping.name, spec.target))?;
    ctx.print(
        Marker::Success,
        &format!(
            "{}: reset to {} ({} file(s) staged)",
            result.mapping,
            short_sha(&result.to_sha),
            result.applied.len()
        ),
    );
    Ok(ExitCode::SUCCESS)
}
