//! # Repository Clone Management
//!
//! This module provides the `RepositoryManager`, which keeps one local clone
//! per mapping under `<tmp>/clones/` and brings it up to date before a
//! synchronization reads from it.
//!
//! ## Design
//!
//! The git side is behind the **`GitOperations`** trait so tests can
//! simulate clones, fetches and missing commits without running `git`. In
//! the application `DefaultGitOperations` is used, which wraps the
//! subprocess helpers in [`crate::git`].
//!
//! A clone is only ever used by one synchronization at a time:
//! [`RepositoryManager::with_clone`] holds a per-clone lock for the duration
//! of the closure it runs. Different clones proceed independently.

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::git::LocalGitRepo;
use crate::path::encode_url_path;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Trait for git operations - allows mocking in tests
pub trait GitOperations: Send + Sync {
    /// Create a clone of `url` at `target_dir`.
    fn clone_repository(&self, url: &str, target_dir: &Path) -> Result<()>;

    /// Fetch `url` into an existing clone.
    fn fetch(&self, repo_dir: &Path, url: &str) -> Result<()>;

    /// Resolve `rev` in the clone, trying remote-tracking refs of `remotes`.
    fn resolve(&self, repo_dir: &Path, rev: &str, remotes: &[String]) -> Result<String>;

    /// Whether the clone already has `sha`.
    fn has_commit(&self, repo_dir: &Path, sha: &str) -> bool;
}

/// The default implementation of `GitOperations`, which uses the system's
/// `git` command to perform real Git operations.
pub struct DefaultGitOperations {
    cancel: CancellationToken,
}

impl DefaultGitOperations {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    fn repo(&self, dir: &Path) -> LocalGitRepo {
        LocalGitRepo::new(dir).with_cancellation(self.cancel.clone())
    }
}

impl GitOperations for DefaultGitOperations {
    fn clone_repository(&self, url: &str, target_dir: &Path) -> Result<()> {
        self.cancel.check("git clone")?;
        crate::git::clone_no_checkout(url, target_dir)
    }

    fn fetch(&self, repo_dir: &Path, url: &str) -> Result<()> {
        self.repo(repo_dir).fetch(url).map(|_| ())
    }

    fn resolve(&self, repo_dir: &Path, rev: &str, remotes: &[String]) -> Result<String> {
        let repo = self.repo(repo_dir);
        // Remote-tracking refs first; local branches of a cached clone go stale.
        for remote in remotes {
            let tracking = format!("{}/{}", encode_url_path(remote), rev);
            if let Ok(sha) = repo.rev_parse(&tracking) {
                return Ok(sha);
            }
        }
        if let Ok(sha) = repo.rev_parse(&format!("origin/{}", rev)) {
            return Ok(sha);
        }
        repo.rev_parse(rev)
    }

    fn has_commit(&self, repo_dir: &Path, sha: &str) -> bool {
        self.repo(repo_dir).commit_exists(sha)
    }
}

/// Whether `rev` is a full commit SHA rather than a ref name.
pub fn is_commit_sha(rev: &str) -> bool {
    rev.len() == 40 && rev.chars().all(|c| c.is_ascii_hexdigit())
}

/// Keeps mapping clones under a root directory.
pub struct RepositoryManager {
    git_ops: Box<dyn GitOperations>,
    clones_root: PathBuf,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl RepositoryManager {
    /// Creates a manager cloning into `<tmp>/clones`.
    pub fn new(tmp_dir: &Path, cancel: CancellationToken) -> Self {
        Self {
            git_ops: Box::new(DefaultGitOperations::new(cancel)),
            clones_root: tmp_dir.join("clones"),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a `RepositoryManager` with a custom `GitOperations`.
    ///
    /// This is primarily used for testing to inject mock operations.
    #[cfg(test)]
    pub fn with_operations(git_ops: Box<dyn GitOperations>, clones_root: PathBuf) -> Self {
        Self {
            git_ops,
            clones_root,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn clone_path(&self, name: &str) -> PathBuf {
        self.clones_root.join(name)
    }

    fn lock_for(&self, path: &Path) -> Result<Arc<Mutex<()>>> {
        let mut locks = self.locks.lock().map_err(|e| Error::LockPoisoned {
            message: e.to_string(),
        })?;
        Ok(locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    /// Make sure the clone for `name` exists and contains `rev`, trying
    /// `remotes` in order. Returns the clone path and the resolved SHA.
    pub fn prepare_clone(&self, name: &str, remotes: &[String], rev: &str) -> Result<(PathBuf, String)> {
        let path = self.clone_path(name);
        let first = remotes.first().ok_or_else(|| Error::Mapping {
            name: name.to_string(),
            message: "no remote to clone from".to_string(),
        })?;

        if !path.join(".git").exists() && !path.join("HEAD").exists() {
            let mut last_error = None;
            for remote in remotes {
                info!("Cloning {} into {}", remote, path.display());
                match self.git_ops.clone_repository(remote, &path) {
                    Ok(()) => {
                        last_error = None;
                        break;
                    }
                    Err(e) => {
                        warn!("Failed to clone {}: {}", remote, e);
                        last_error = Some(e);
                    }
                }
            }
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        if is_commit_sha(rev) && self.git_ops.has_commit(&path, rev) {
            debug!("{} already contains {}", path.display(), rev);
            return Ok((path.clone(), self.git_ops.resolve(&path, rev, remotes)?));
        }

        for remote in remotes {
            if let Err(e) = self.git_ops.fetch(&path, remote) {
                warn!("Failed to fetch {}: {}", remote, e);
                continue;
            }
            if let Ok(sha) = self.git_ops.resolve(&path, rev, remotes) {
                return Ok((path, sha));
            }
        }

        Err(Error::GitClone {
            url: first.clone(),
            r#ref: rev.to_string(),
            message: format!("revision not found in any of {} remote(s)", remotes.len()),
            hint: Some("pass --additional-remotes mapping:uri if the commit lives in a fork".to_string()),
        })
    }

    /// Run `f` against the prepared clone while holding its lock.
    pub fn with_clone<T>(
        &self,
        name: &str,
        remotes: &[String],
        rev: &str,
        f: impl FnOnce(&Path, &str) -> Result<T>,
    ) -> Result<T> {
        let lock = self.lock_for(&self.clone_path(name))?;
        let _guard = lock.lock().map_err(|e| Error::LockPoisoned {
            message: e.to_string(),
        })?;
        let (path, sha) = self.prepare_clone(name, remotes, rev)?;
        f(&path, &sha)
    }
}
