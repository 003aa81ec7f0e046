//! Pending conflicts awaiting manual resolution.
//!
//! When a flow leaves conflicted files behind, the flow is not finished: the
//! manifest (or the `<Source>` element, for back flow) is only updated once
//! a human has resolved the files. Everything needed to finish the flow is
//! kept in a [`ConflictRecord`] under `<tmp>/conflicts/<mapping>.json`.

use super::patch::Conflict;
use crate::codeflow::Direction;
use crate::error::{Error, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// The manifest or `<Source>` update a flow will make once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUpdate {
    pub remote_uri: String,
    pub commit_sha: String,
    #[serde(default)]
    pub package_version: Option<String>,
    #[serde(default)]
    pub bar_id: Option<u64>,
    #[serde(default)]
    pub build_number: Option<String>,
    /// Commit message for the resolving commit.
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub mapping: String,
    pub direction: Direction,
    /// Working tree the flow was applied to.
    pub target: PathBuf,
    /// Directory of the mapping's files inside `target` (empty for a repository).
    pub target_dir: String,
    pub source_repository: String,
    #[serde(default)]
    pub subscription: Option<String>,
    pub conflicts: Vec<Conflict>,
    pub pending: PendingUpdate,
}

impl ConflictRecord {
    /// Absolute path of a conflicted file.
    pub fn file_path(&self, conflict: &Conflict) -> PathBuf {
        if self.target_dir.is_empty() {
            self.target.join(&conflict.path)
        } else {
            self.target.join(&self.target_dir).join(&conflict.path)
        }
    }

    /// Paths relative to `target`.
    pub fn relative_paths(&self) -> Vec<String> {
        self.conflicts
            .iter()
            .map(|c| {
                if self.target_dir.is_empty() {
                    c.path.clone()
                } else {
                    format!("{}/{}", self.target_dir, c.path)
                }
            })
            .collect()
    }
}

/// Stores conflict records as JSON files.
#[derive(Debug, Clone)]
pub struct ConflictStore {
    dir: PathBuf,
}

impl ConflictStore {
    pub fn new(tmp_dir: &Path) -> Self {
        Self {
            dir: tmp_dir.join("conflicts"),
        }
    }

    fn path_for(&self, mapping: &str) -> PathBuf {
        self.dir.join(format!("{}.json", mapping.to_lowercase()))
    }

    pub fn save(&self, record: &ConflictRecord) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&record.mapping);
        fs::write(&path, serde_json::to_vec_pretty(record)?)?;
        debug!("Recorded {} conflict(s) at {}", record.conflicts.len(), path.display());
        Ok(path)
    }

    pub fn load(&self, mapping: &str) -> Result<Option<ConflictRecord>> {
        let path = self.path_for(mapping);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&fs::read(path)?)?))
    }

    pub fn remove(&self, mapping: &str) -> Result<()> {
        let path = self.path_for(mapping);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<ConflictRecord>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                records.push(serde_json::from_slice(&fs::read(&path)?)?);
            }
        }
        Ok(records)
    }

    /// The pending record of a subscription.
    pub fn find_by_subscription(&self, subscription: &str) -> Result<ConflictRecord> {
        self.list()?
            .into_iter()
            .find(|r| r.subscription.as_deref() == Some(subscription))
            .ok_or_else(|| Error::not_found("pending conflict for subscription", subscription))
    }
}

const OURS: &str = "<<<<<<< ";
const SEPARATOR: &str = "=======";
const THEIRS: &str = ">>>>>>> ";

/// Content of a conflicted file with both sides framed by conflict markers.
pub fn with_markers(conflict: &Conflict, ours_label: &str, theirs_label: &str) -> String {
    let side = |bytes: &Option<Vec<u8>>| {
        let mut text = bytes
            .as_deref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text
    };
    format!(
        "{OURS}{ours_label}\n{}{SEPARATOR}\n{}{THEIRS}{theirs_label}\n",
        side(&conflict.ours),
        side(&conflict.theirs)
    )
}

/// Whether `content` still contains conflict markers.
pub fn has_markers(content: &str) -> bool {
    content
        .lines()
        .any(|l| l.starts_with(OURS) || l.starts_with(THEIRS) || l == SEPARATOR)
}
