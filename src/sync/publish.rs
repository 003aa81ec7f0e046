//! Pushing VMR branches.

use crate::error::{Error, Result};
use crate::git::{self, LocalGitRepo};
use crate::manifest::SourceManifest;
use crate::path::short_sha;
use log::{debug, info, warn};
use std::fs;
use std::path::Path;

/// Check that every commit recorded in the manifest can be fetched from its
/// public remote. `scratch_dir` holds a throwaway bare repository.
pub fn verify_commits(manifest: &SourceManifest, scratch_dir: &Path) -> Result<()> {
    let scratch = scratch_dir.join("verify-commits");
    if scratch.exists() {
        fs::remove_dir_all(&scratch)?;
    }
    let repo = git::init_bare(&scratch)?;

    let mut missing = Vec::new();
    for record in manifest.repositories() {
        debug!("Verifying {}@{}", record.remote_uri, short_sha(&record.commit_sha));
        if let Err(e) = repo.fetch_commit(&record.remote_uri, &record.commit_sha) {
            warn!("{} is not available: {}", record.path, e);
            missing.push(format!("{}@{}", record.remote_uri, record.commit_sha));
        }
    }
    for record in manifest.submodules() {
        if let Err(e) = repo.fetch_commit(&record.remote_uri, &record.commit_sha) {
            warn!("{} is not available: {}", record.path, e);
            missing.push(format!("{}@{}", record.remote_uri, record.commit_sha));
        }
    }
    fs::remove_dir_all(&scratch)?;

    if missing.is_empty() {
        info!("All synchronized commits are publicly available");
        Ok(())
    } else {
        Err(Error::Remote {
            url: missing.join(", "),
            message: format!("{} commit(s) are not available on their remotes", missing.len()),
            transient: false,
        })
    }
}

/// Push HEAD of the VMR to `branch` on `remote`, optionally verifying the
/// synchronized commits first.
pub fn push(vmr_path: &Path, remote: &str, branch: &str, verify: Option<&Path>) -> Result<()> {
    if let Some(scratch_dir) = verify {
        verify_commits(&SourceManifest::load(vmr_path)?, scratch_dir)?;
    }
    LocalGitRepo::new(vmr_path).push(remote, branch)?;
    info!("Pushed to {} {}", remote, branch);
    Ok(())
}
