//! [`FlowExecutor`] over a local VMR working copy.
//!
//! Forward flows run in the VMR itself. Back flows need a local clone of the
//! target repository, registered per repository URL.

use super::updater::{FlowExecutor, FlowOutcome};
use super::{Build, Subscription};
use crate::codeflow::Direction;
use crate::config::RepoTarget;
use crate::error::{Error, Result};
use crate::git::LocalGitRepo;
use crate::manifest::SourceManifest;
use crate::policy::DependencyUpdateSummary;
use crate::sync::codeflower::read_version_details;
use crate::sync::{CodeFlower, FlowOptions, SyncOptions, VmrSynchronizer};
use async_trait::async_trait;
use log::info;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Runs flows with a [`VmrSynchronizer`]. Git work is blocking, so every
/// flow runs on the blocking pool, one at a time per working copy.
pub struct VmrFlowExecutor {
    sync: Arc<Mutex<VmrSynchronizer>>,
    checkouts: HashMap<String, PathBuf>,
}

impl VmrFlowExecutor {
    pub fn new(sync: VmrSynchronizer) -> Self {
        Self {
            sync: Arc::new(Mutex::new(sync)),
            checkouts: HashMap::new(),
        }
    }

    /// Register the local clone back flows into `repository` use.
    pub fn with_checkout(mut self, repository: &str, path: impl Into<PathBuf>) -> Self {
        self.checkouts
            .insert(repository.trim_end_matches('/').to_lowercase(), path.into());
        self
    }

    fn checkout(&self, repository: &str) -> Result<PathBuf> {
        self.checkouts
            .get(&repository.trim_end_matches('/').to_lowercase())
            .cloned()
            .ok_or_else(|| Error::not_found("local checkout", repository))
    }
}

fn forward(
    sync: &VmrSynchronizer,
    mapping: &str,
    subscription: &Subscription,
    build: &Build,
    head_branch: Option<&str>,
) -> Result<FlowOutcome> {
    let vmr = sync.vmr_repo();
    if let Some(branch) = head_branch {
        vmr.checkout_existing(branch)?;
    }
    let before = SourceManifest::load(sync.vmr_path())?
        .get_version(mapping)
        .and_then(|v| v.package_version);

    let options = FlowOptions {
        sync: SyncOptions {
            build: Some(build.clone()),
            subscription: Some(subscription.id.clone()),
            ..SyncOptions::default()
        },
        commit: true,
        branch: head_branch.map(str::to_string),
    };
    let result = CodeFlower::new(sync).forward_flow(mapping, &RepoTarget::Revision(build.commit.clone()), &options)?;

    let after = build.package_version().map(str::to_string);
    let required_updates = if before != after {
        vec![DependencyUpdateSummary {
            name: mapping.to_string(),
            from_version: before,
            to_version: after,
        }]
    } else {
        Vec::new()
    };
    let had_updates = result.had_updates || result.has_conflicts();
    Ok(FlowOutcome {
        branch: result.branch,
        head_sha: vmr.head_sha()?,
        had_updates,
        conflicted_files: result.conflicted_files,
        required_updates,
    })
}

fn back(
    sync: &VmrSynchronizer,
    mapping: &str,
    repo_path: &Path,
    subscription: &Subscription,
    build: &Build,
    head_branch: Option<&str>,
) -> Result<FlowOutcome> {
    let repo = LocalGitRepo::new(repo_path).with_cancellation(sync.cancellation().clone());
    if let Some(branch) = head_branch {
        repo.checkout_existing(branch)?;
    }
    let before = read_version_details(repo_path)?;

    let options = FlowOptions {
        sync: SyncOptions {
            build: Some(build.clone()),
            subscription: Some(subscription.id.clone()),
            ..SyncOptions::default()
        },
        commit: true,
        branch: head_branch.map(str::to_string),
    };
    let result = CodeFlower::new(sync).backflow(mapping, repo_path, &options)?;

    let after = read_version_details(repo_path)?;
    let required_updates = after
        .dependencies
        .iter()
        .filter(|dep| !subscription.is_asset_excluded(&dep.name))
        .filter_map(|dep| {
            let from = before.get(&dep.name).map(|d| d.version.clone());
            (from.as_deref() != Some(dep.version.as_str())).then(|| DependencyUpdateSummary {
                name: dep.name.clone(),
                from_version: from,
                to_version: Some(dep.version.clone()),
            })
        })
        .collect();
    let had_updates = result.had_updates || result.has_conflicts();
    Ok(FlowOutcome {
        branch: result.branch,
        head_sha: repo.head_sha()?,
        had_updates,
        conflicted_files: result.conflicted_files,
        required_updates,
    })
}

#[async_trait]
impl FlowExecutor for VmrFlowExecutor {
    async fn flow(&self, subscription: &Subscription, build: &Build, head_branch: Option<&str>) -> Result<FlowOutcome> {
        let mapping = subscription
            .mapping_name()
            .ok_or_else(|| Error::Mapping {
                name: subscription.id.clone(),
                message: "subscription does not flow code".to_string(),
            })?
            .to_string();
        let repo_path = match subscription.direction() {
            Some(Direction::Back) => Some(self.checkout(&subscription.target_repository)?),
            _ => None,
        };
        info!(
            "Flowing build {} of {} into {}@{}",
            build.id, build.repository, subscription.target_repository, subscription.target_branch
        );

        let sync = Arc::clone(&self.sync);
        let subscription = subscription.clone();
        let build = build.clone();
        let head_branch = head_branch.map(str::to_string);
        tokio::task::spawn_blocking(move || {
            let sync = sync.lock().map_err(|_| Error::LockPoisoned {
                message: "VMR working copy lock poisoned".to_string(),
            })?;
            match repo_path {
                Some(path) => back(&sync, &mapping, &path, &subscription, &build, head_branch.as_deref()),
                None => forward(&sync, &mapping, &subscription, &build, head_branch.as_deref()),
            }
        })
        .await
        .map_err(|e| Error::Queue {
            message: format!("flow task failed: {}", e),
        })?
    }
}
