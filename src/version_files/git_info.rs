//! Per-component git-info files (`prereqs/git-info/<name>.props`).

use super::properties::{PropertyBag, PropertyValue};
use super::{render_props, PropsFile, GIT_INFO_DIR};
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Build metadata recorded for one synchronized component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitInfoFile {
    pub git_commit_hash: String,
    pub official_build_id: Option<String>,
    pub output_package_version: Option<String>,
    pub pre_release_version_label: Option<String>,
    pub is_stable: bool,
    pub git_commit_count: Option<u64>,
}

impl GitInfoFile {
    /// Derive the git-info of a component from its commit and package version.
    pub fn new(
        commit_sha: &str,
        package_version: Option<&str>,
        official_build_id: Option<&str>,
    ) -> Self {
        let pre_release = package_version
            .and_then(|v| semver::Version::parse(v).ok())
            .map(|v| v.pre.as_str().to_string());

        let label = pre_release
            .as_deref()
            .and_then(|pre| pre.split('.').next())
            .filter(|l| !l.is_empty())
            .map(str::to_string);

        Self {
            git_commit_hash: commit_sha.to_string(),
            official_build_id: official_build_id.map(str::to_string),
            output_package_version: package_version.map(str::to_string),
            is_stable: matches!(pre_release.as_deref(), Some("")),
            pre_release_version_label: label,
            git_commit_count: None,
        }
    }

    /// Location of the git-info file for `name` inside a VMR.
    pub fn path_for(vmr_path: &Path, name: &str) -> PathBuf {
        vmr_path.join(GIT_INFO_DIR).join(format!("{}.props", name))
    }

    pub fn to_properties(&self) -> PropertyBag {
        let mut bag = PropertyBag::new();
        bag.insert(
            "GitCommitHash".to_string(),
            PropertyValue::String(self.git_commit_hash.clone()),
        );
        if let Some(id) = &self.official_build_id {
            bag.insert(
                "OfficialBuildId".to_string(),
                PropertyValue::String(id.clone()),
            );
        }
        if let Some(version) = &self.output_package_version {
            bag.insert(
                "OutputPackageVersion".to_string(),
                PropertyValue::String(version.clone()),
            );
        }
        if let Some(label) = &self.pre_release_version_label {
            bag.insert(
                "PreReleaseVersionLabel".to_string(),
                PropertyValue::String(label.clone()),
            );
        }
        bag.insert("IsStable".to_string(), PropertyValue::Bool(self.is_stable));
        if let Some(count) = self.git_commit_count {
            bag.insert(
                "GitCommitCount".to_string(),
                PropertyValue::Integer(count as i64),
            );
        }
        bag
    }

    pub fn from_properties(file: &str, bag: &PropertyBag) -> Result<Self> {
        let text = |name: &str| bag.get(name).map(|v| v.to_string());
        let git_commit_hash = text("GitCommitHash").ok_or_else(|| Error::VersionFile {
            file: file.to_string(),
            message: "missing GitCommitHash".to_string(),
        })?;
        Ok(Self {
            git_commit_hash,
            official_build_id: text("OfficialBuildId"),
            output_package_version: text("OutputPackageVersion"),
            pre_release_version_label: text("PreReleaseVersionLabel"),
            is_stable: matches!(bag.get("IsStable"), Some(PropertyValue::Bool(true))),
            git_commit_count: match bag.get("GitCommitCount") {
                Some(PropertyValue::Integer(n)) if *n >= 0 => Some(*n as u64),
                _ => None,
            },
        })
    }

    pub fn parse(file: &str, text: &str) -> Result<Self> {
        Self::from_properties(file, &PropsFile::parse(file, text)?.properties)
    }

    pub fn render(&self) -> String {
        render_props(&self.to_properties())
    }

    pub fn write(&self, vmr_path: &Path, name: &str) -> Result<PathBuf> {
        let path = Self::path_for(vmr_path, name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, self.render())?;
        Ok(path)
    }
}
