//! File-level patches between two trees.
//!
//! A [`TreePatch`] records, for every path that differs, the content it had
//! before (`base`) and the content it should have after. Applying it to a
//! directory checks each file against `base`; a file that matches neither
//! `base` nor the new content has diverged and is reported as a conflict
//! instead of being overwritten.

use crate::error::{Error, Result};
use crate::filesystem::MemoryFS;
use crate::path::short_sha;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    pub path: String,
    pub kind: ChangeKind,
    /// Content before the change, `None` when the file did not exist.
    pub base: Option<Vec<u8>>,
    /// Content after the change, `None` when the file is deleted.
    pub content: Option<Vec<u8>>,
    #[serde(default)]
    pub executable: bool,
}

/// A file that could not be patched because the target diverged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub path: String,
    pub base: Option<Vec<u8>>,
    /// What the target currently holds.
    pub ours: Option<Vec<u8>>,
    /// What the patch wanted to write.
    pub theirs: Option<Vec<u8>>,
}

/// How strictly to apply a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Report diverged files as conflicts.
    Checked,
    /// Overwrite whatever is in the target.
    Force,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub applied: Vec<String>,
    pub conflicts: Vec<Conflict>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreePatch {
    pub mapping: String,
    pub from_sha: Option<String>,
    pub to_sha: String,
    pub changes: Vec<FileChange>,
}

impl TreePatch {
    /// Changes turning `old` into `new`.
    pub fn between(
        mapping: &str,
        from_sha: Option<&str>,
        to_sha: &str,
        old: &MemoryFS,
        new: &MemoryFS,
    ) -> Self {
        let paths: BTreeSet<&String> = old
            .files()
            .map(|(p, _)| p)
            .chain(new.files().map(|(p, _)| p))
            .collect();

        let changes = paths
            .into_iter()
            .filter_map(|path| {
                let before = old.get_file(path);
                let after = new.get_file(path);
                let kind = match (before, after) {
                    (None, Some(_)) => ChangeKind::Added,
                    (Some(_), None) => ChangeKind::Deleted,
                    (Some(b), Some(a)) if b != a => ChangeKind::Modified,
                    _ => return None,
                };
                Some(FileChange {
                    path: path.clone(),
                    kind,
                    base: before.map(|f| f.content.clone()),
                    content: after.map(|f| f.content.clone()),
                    executable: after.is_some_and(|f| f.executable),
                })
            })
            .collect();

        Self {
            mapping: mapping.to_string(),
            from_sha: from_sha.map(str::to_string),
            to_sha: to_sha.to_string(),
            changes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.changes.iter().map(|c| c.path.as_str()).collect()
    }

    /// Keep only the changes whose path satisfies `keep`.
    pub fn retain(&mut self, keep: impl Fn(&str) -> bool) {
        self.changes.retain(|c| keep(&c.path));
    }

    /// Write the patch under `dir` for later inspection. Returns its path.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let name = format!(
            "{}-{}-{}.patch.json",
            self.mapping,
            self.from_sha.as_deref().map(short_sha).unwrap_or("init"),
            short_sha(&self.to_sha)
        );
        let path = dir.join(name);
        fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        debug!("Patch for {} kept at {}", self.mapping, path.display());
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }

    /// Apply the patch to files under `target_dir`.
    ///
    /// An I/O failure part way through is reported as [`Error::PatchApply`]
    /// naming how many changes were written; nothing is rolled back.
    pub fn apply(&self, target_dir: &Path, mode: ApplyMode) -> Result<ApplyOutcome> {
        let mut outcome = ApplyOutcome::default();
        let total = self.changes.len();

        for change in &self.changes {
            let target = target_dir.join(&change.path);
            let current = if target.is_file() {
                Some(fs::read(&target).map_err(|e| partial(target_dir, &outcome, total, e))?)
            } else {
                None
            };

            if current == change.content {
                continue;
            }
            if mode == ApplyMode::Checked && current != change.base {
                outcome.conflicts.push(Conflict {
                    path: change.path.clone(),
                    base: change.base.clone(),
                    ours: current,
                    theirs: change.content.clone(),
                });
                continue;
            }

            write_change(target_dir, &target, change.content.as_deref(), change.executable)
                .map_err(|e| partial(target_dir, &outcome, total, e))?;
            outcome.applied.push(change.path.clone());
        }

        info!(
            "Applied {} of {} change(s) for {} ({} conflict(s))",
            outcome.applied.len(),
            total,
            self.mapping,
            outcome.conflicts.len()
        );
        Ok(outcome)
    }
}

fn partial(target: &Path, outcome: &ApplyOutcome, total: usize, error: impl ToString) -> Error {
    Error::PatchApply {
        target: target.display().to_string(),
        message: format!(
            "{} of {} change(s) written before failure: {}",
            outcome.applied.len(),
            total,
            error.to_string()
        ),
    }
}

/// Write (or delete, for `None`) a single file below `root`.
pub(crate) fn write_change(
    root: &Path,
    target: &Path,
    content: Option<&[u8]>,
    executable: bool,
) -> std::io::Result<()> {
    match content {
        Some(bytes) => {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(target, bytes)?;
            set_executable(target, executable)?;
        }
        None => {
            if target.exists() {
                fs::remove_file(target)?;
                remove_empty_parents(root, target);
            }
        }
    }
    Ok(())
}

/// Prune directories emptied by a deletion, never `root` or anything above it.
fn remove_empty_parents(root: &Path, path: &Path) {
    let mut dir = path.parent();
    while let Some(d) = dir {
        if d == root || !d.starts_with(root) || fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
}

#[cfg(unix)]
fn set_executable(path: &Path, executable: bool) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = fs::metadata(path)?.permissions();
    let mode = permissions.mode();
    let wanted = if executable { mode | 0o111 } else { mode & !0o111 };
    if wanted != mode {
        permissions.set_mode(wanted);
        fs::set_permissions(path, permissions)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path, _executable: bool) -> std::io::Result<()> {
    Ok(())
}
