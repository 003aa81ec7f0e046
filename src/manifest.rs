//! # Source Manifest
//!
//! The source manifest (`src/source-manifest.json` inside the VMR) is the
//! ledger of everything synchronized into the VMR. Every full repository and
//! every nested submodule has one record keyed by its path inside `src/`.
//!
//! The manifest is loaded once per synchronization, mutated in memory and
//! written back as the very last step, so a failed synchronization never
//! leaves a half-updated ledger behind.
//!
//! Serialization is deterministic: records are kept sorted by path and the
//! JSON layout is fixed, so an unchanged manifest serializes to identical
//! bytes every time.

use crate::error::{Error, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// A fully synchronized repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryRecord {
    pub path: String,
    pub remote_uri: String,
    pub commit_sha: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bar_id: Option<u64>,
}

/// A git submodule nested inside a synchronized repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmoduleRecord {
    pub path: String,
    pub remote_uri: String,
    pub commit_sha: String,
}

/// Borrowed view over either kind of record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceComponent<'a> {
    Repository(&'a RepositoryRecord),
    Submodule(&'a SubmoduleRecord),
}

impl SourceComponent<'_> {
    pub fn path(&self) -> &str {
        match self {
            SourceComponent::Repository(r) => &r.path,
            SourceComponent::Submodule(s) => &s.path,
        }
    }

    pub fn remote_uri(&self) -> &str {
        match self {
            SourceComponent::Repository(r) => &r.remote_uri,
            SourceComponent::Submodule(s) => &s.remote_uri,
        }
    }

    pub fn commit_sha(&self) -> &str {
        match self {
            SourceComponent::Repository(r) => &r.commit_sha,
            SourceComponent::Submodule(s) => &s.commit_sha,
        }
    }
}

/// The commit and package version currently recorded for a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmrVersion {
    pub commit_sha: String,
    pub package_version: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ManifestDocument {
    #[serde(default)]
    repositories: Vec<RepositoryRecord>,
    #[serde(default)]
    submodules: Vec<SubmoduleRecord>,
}

/// In-memory source manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceManifest {
    repositories: Vec<RepositoryRecord>,
    submodules: Vec<SubmoduleRecord>,
    location: Option<PathBuf>,
}

impl SourceManifest {
    /// Relative location of the manifest inside a VMR.
    pub const RELATIVE_PATH: &'static str = "src/source-manifest.json";

    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a manifest from its JSON form.
    pub fn from_json(json: &str) -> Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::new());
        }
        let document: ManifestDocument =
            serde_json::from_str(json).map_err(|e| Error::Manifest {
                message: format!("invalid source manifest: {}", e),
            })?;

        let mut manifest = Self {
            repositories: document.repositories,
            submodules: document.submodules,
            location: None,
        };
        manifest.sort();
        manifest.check_unique_paths()?;
        Ok(manifest)
    }

    /// Load the manifest of the VMR rooted at `vmr_path`. A missing file
    /// yields an empty manifest bound to that location.
    pub fn load(vmr_path: &Path) -> Result<Self> {
        let location = vmr_path.join(Self::RELATIVE_PATH);
        let mut manifest = if location.exists() {
            Self::from_json(&fs::read_to_string(&location)?)?
        } else {
            debug!("No source manifest at {}, starting empty", location.display());
            Self::new()
        };
        manifest.location = Some(location);
        Ok(manifest)
    }

    /// Re-read the manifest from the location it was loaded from.
    pub fn refresh(&mut self) -> Result<()> {
        let location = self.location.clone().ok_or_else(|| Error::Manifest {
            message: "manifest was not loaded from disk".to_string(),
        })?;
        let reloaded = if location.exists() {
            Self::from_json(&fs::read_to_string(&location)?)?
        } else {
            Self::new()
        };
        self.repositories = reloaded.repositories;
        self.submodules = reloaded.submodules;
        Ok(())
    }

    /// Write the manifest back to the location it was loaded from.
    pub fn save(&self) -> Result<()> {
        let location = self.location.as_ref().ok_or_else(|| Error::Manifest {
            message: "manifest was not loaded from disk".to_string(),
        })?;
        if let Some(parent) = location.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(location, self.to_json()?)?;
        Ok(())
    }

    /// Canonical JSON form, two-space indented with a trailing newline.
    pub fn to_json(&self) -> Result<String> {
        let document = ManifestDocument {
            repositories: self.repositories.clone(),
            submodules: self.submodules.clone(),
        };
        let mut json = serde_json::to_string_pretty(&document)?;
        json.push('\n');
        Ok(json)
    }

    pub fn repositories(&self) -> &[RepositoryRecord] {
        &self.repositories
    }

    pub fn submodules(&self) -> &[SubmoduleRecord] {
        &self.submodules
    }

    /// Upsert a repository record. `package_version` and `bar_id` are only
    /// overwritten when a value is supplied.
    pub fn update_version(
        &mut self,
        path: &str,
        remote_uri: &str,
        commit_sha: &str,
        package_version: Option<&str>,
        bar_id: Option<u64>,
    ) {
        match self.repositories.iter_mut().find(|r| r.path == path) {
            Some(record) => {
                record.remote_uri = remote_uri.to_string();
                record.commit_sha = commit_sha.to_string();
                if let Some(version) = package_version {
                    record.package_version = Some(version.to_string());
                }
                if bar_id.is_some() {
                    record.bar_id = bar_id;
                }
            }
            None => {
                self.repositories.push(RepositoryRecord {
                    path: path.to_string(),
                    remote_uri: remote_uri.to_string(),
                    commit_sha: commit_sha.to_string(),
                    package_version: package_version.map(str::to_string),
                    bar_id,
                });
                self.sort();
            }
        }
    }

    /// Remove a repository and every submodule nested below it.
    pub fn remove_repository(&mut self, path: &str) {
        let prefix = format!("{}/", path);
        self.repositories.retain(|r| r.path != path);
        self.submodules.retain(|s| !s.path.starts_with(&prefix));
    }

    pub fn update_submodule(&mut self, path: &str, remote_uri: &str, commit_sha: &str) {
        match self.submodules.iter_mut().find(|s| s.path == path) {
            Some(record) => {
                record.remote_uri = remote_uri.to_string();
                record.commit_sha = commit_sha.to_string();
            }
            None => {
                self.submodules.push(SubmoduleRecord {
                    path: path.to_string(),
                    remote_uri: remote_uri.to_string(),
                    commit_sha: commit_sha.to_string(),
                });
                self.sort();
            }
        }
    }

    pub fn remove_submodule(&mut self, path: &str) {
        self.submodules.retain(|s| s.path != path);
    }

    pub fn get_version(&self, path: &str) -> Option<VmrVersion> {
        self.repositories
            .iter()
            .find(|r| r.path == path)
            .map(|r| VmrVersion {
                commit_sha: r.commit_sha.clone(),
                package_version: r.package_version.clone(),
            })
    }

    pub fn get_repository(&self, path: &str) -> Option<&RepositoryRecord> {
        self.repositories.iter().find(|r| r.path == path)
    }

    /// Case-insensitive lookup across repositories and submodules.
    pub fn try_get_component(&self, path: &str) -> Option<SourceComponent<'_>> {
        self.repositories
            .iter()
            .find(|r| r.path.eq_ignore_ascii_case(path))
            .map(SourceComponent::Repository)
            .or_else(|| {
                self.submodules
                    .iter()
                    .find(|s| s.path.eq_ignore_ascii_case(path))
                    .map(SourceComponent::Submodule)
            })
    }

    fn sort(&mut self) {
        self.repositories.sort_by(|a, b| a.path.cmp(&b.path));
        self.submodules.sort_by(|a, b| a.path.cmp(&b.path));
    }

    fn check_unique_paths(&self) -> Result<()> {
        let mut seen = std::collections::BTreeSet::new();
        let paths = self
            .repositories
            .iter()
            .map(|r| r.path.as_str())
            .chain(self.submodules.iter().map(|s| s.path.as_str()));
        for path in paths {
            if !seen.insert(path) {
                return Err(Error::Manifest {
                    message: format!("duplicate component path '{}'", path),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> SourceManifest {
        let mut manifest = SourceManifest::new();
        manifest.update_version(
            "runtime",
            "https://github.com/dotnet/runtime",
            "abc1234",
            Some("9.0.0-preview.1"),
            Some(1234),
        );
        manifest.update_version("arcade", "https://github.com/dotnet/arcade", "def5678", None, None);
        manifest.update_submodule(
            "runtime/src/native/external/zlib",
            "https://github.com/madler/zlib",
            "0011223",
        );
        manifest
    }

    #[test]
    fn test_update_then_get_version() {
        let manifest = sample();
        assert_eq!(
            manifest.get_version("runtime"),
            Some(VmrVersion {
                commit_sha: "abc1234".to_string(),
                package_version: Some("9.0.0-preview.1".to_string()),
            })
        );
        assert_eq!(manifest.get_version("missing"), None);
    }

    #[test]
    fn test_partial_update_keeps_package_version_and_bar_id() {
        let mut manifest = sample();
        manifest.update_version(
            "runtime",
            "https://github.com/dotnet/runtime",
            "fff0000",
            None,
            None,
        );
        let record = manifest.get_repository("runtime").unwrap();
        assert_eq!(record.commit_sha, "fff0000");
        assert_eq!(record.package_version.as_deref(), Some("9.0.0-preview.1"));
        assert_eq!(record.bar_id, Some(1234));
    }

    #[test]
    fn test_remove_repository_cascades_to_nested_submodules_only() {
        let mut manifest = sample();
        manifest.update_version("a", "https://x/a", "1", None, None);
        manifest.update_submodule("a/sub", "https://x/sub", "2");
        manifest.update_submodule("ab/sub", "https://x/ab-sub", "3");

        manifest.remove_repository("a");

        assert!(manifest.get_repository("a").is_none());
        assert!(manifest.try_get_component("a/sub").is_none());
        assert!(manifest.try_get_component("ab/sub").is_some());
        assert!(manifest.try_get_component("runtime/src/native/external/zlib").is_some());
    }

    #[test]
    fn test_remove_submodule_does_not_cascade() {
        let mut manifest = sample();
        manifest.update_submodule("runtime/src/native/external/zlib/inner", "u", "9");
        manifest.remove_submodule("runtime/src/native/external/zlib");
        assert!(manifest
            .try_get_component("runtime/src/native/external/zlib/inner")
            .is_some());
    }

    #[test]
    fn test_try_get_component_is_case_insensitive() {
        let manifest = sample();
        let component = manifest.try_get_component("RUNTIME").unwrap();
        assert!(matches!(component, SourceComponent::Repository(_)));
        assert_eq!(component.commit_sha(), "abc1234");

        let component = manifest
            .try_get_component("Runtime/src/native/external/ZLIB")
            .unwrap();
        assert!(matches!(component, SourceComponent::Submodule(_)));
    }

    #[test]
    fn test_json_is_camel_case_and_sorted() {
        let json = sample().to_json().unwrap();
        assert!(json.contains("\"remoteUri\""));
        assert!(json.contains("\"commitSha\""));
        assert!(json.contains("\"barId\": 1234"));
        assert!(!json.contains("\"packageVersion\": null"));
        let arcade = json.find("\"arcade\"").unwrap();
        let runtime = json.find("\"runtime\"").unwrap();
        assert!(arcade < runtime);
    }

    #[test]
    fn test_serialization_is_byte_identical() {
        let manifest = sample();
        let first = manifest.to_json().unwrap();
        let reparsed = SourceManifest::from_json(&first).unwrap();
        assert_eq!(first, reparsed.to_json().unwrap());
    }

    #[test]
    fn test_duplicate_paths_are_rejected() {
        let json = r#"{
            "repositories": [
                {"path": "a", "remoteUri": "u", "commitSha": "1"}
            ],
            "submodules": [
                {"path": "a", "remoteUri": "u", "commitSha": "2"}
            ]
        }"#;
        assert!(matches!(
            SourceManifest::from_json(json),
            Err(Error::Manifest { .. })
        ));
    }

    #[test]
    fn test_load_save_refresh() {
        let temp = tempfile::tempdir().unwrap();
        let mut manifest = SourceManifest::load(temp.path()).unwrap();
        assert!(manifest.repositories().is_empty());

        manifest.update_version("runtime", "u", "1", None, None);
        manifest.save().unwrap();

        let mut other = SourceManifest::load(temp.path()).unwrap();
        assert_eq!(other.get_version("runtime").unwrap().commit_sha, "1");

        manifest.update_version("runtime", "u", "2", None, None);
        manifest.save().unwrap();
        other.refresh().unwrap();
        assert_eq!(other.get_version("runtime").unwrap().commit_sha, "2");
    }

    fn record_strategy() -> impl Strategy<Value = (String, String, Option<String>, Option<u64>)> {
        (
            "[a-z][a-z0-9-]{0,8}",
            "[0-9a-f]{7,40}",
            proptest::option::of("[0-9]\\.[0-9]\\.[0-9]"),
            proptest::option::of(0u64..100_000),
        )
    }

    proptest! {
        #[test]
        fn prop_json_roundtrip(records in proptest::collection::vec(record_strategy(), 0..8)) {
            let mut manifest = SourceManifest::new();
            for (path, sha, version, bar_id) in &records {
                manifest.update_version(path, "https://example.com/repo", sha, version.as_deref(), *bar_id);
            }
            let json = manifest.to_json().unwrap();
            let parsed = SourceManifest::from_json(&json).unwrap();
            prop_assert_eq!(&parsed, &manifest);
            prop_assert_eq!(parsed.to_json().unwrap(), json);
        }
    }
}
