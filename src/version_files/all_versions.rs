//! The aggregate `AllRepoVersions.props` file listing every synchronized
//! repository's commit and package version.

use super::properties::{PropertyBag, PropertyValue};
use super::{render_props, GIT_INFO_DIR};
use crate::error::Result;
use crate::manifest::SourceManifest;
use crate::path::sanitize_property_name;
use std::fs;
use std::path::{Path, PathBuf};

pub const FILE_NAME: &str = "AllRepoVersions.props";

/// Build the aggregate property bag from the manifest's repository records.
pub fn from_manifest(manifest: &SourceManifest) -> PropertyBag {
    let mut bag = PropertyBag::new();
    for repo in manifest.repositories() {
        let prefix = sanitize_property_name(&repo.path);
        bag.insert(
            format!("{}GitCommitHash", prefix),
            PropertyValue::String(repo.commit_sha.clone()),
        );
        if let Some(version) = &repo.package_version {
            bag.insert(
                format!("{}OutputPackageVersion", prefix),
                PropertyValue::String(version.clone()),
            );
        }
    }
    bag
}

pub fn path_for(vmr_path: &Path) -> PathBuf {
    vmr_path.join(GIT_INFO_DIR).join(FILE_NAME)
}

/// Regenerate the aggregate file. Returns its path.
pub fn write(vmr_path: &Path, manifest: &SourceManifest) -> Result<PathBuf> {
    let path = path_for(vmr_path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, render_props(&from_manifest(manifest)))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version_files::PropsFile;

    #[test]
    fn test_property_names_are_sanitized() {
        let mut manifest = SourceManifest::new();
        manifest.update_version("source-build.reference-packages", "u", "abc", Some("1.0.0"), None);
        manifest.update_version("runtime", "u", "def", None, None);
        let bag = from_manifest(&manifest);

        assert!(bag.contains_key("sourcebuildreferencepackagesGitCommitHash"));
        assert!(bag.contains_key("sourcebuildreferencepackagesOutputPackageVersion"));
        assert!(bag.contains_key("runtimeGitCommitHash"));
        assert!(!bag.contains_key("runtimeOutputPackageVersion"));
    }

    #[test]
    fn test_write_round_trips() {
        let temp = tempfile::tempdir().unwrap();
        let mut manifest = SourceManifest::new();
        manifest.update_version("arcade", "u", "abc", Some("9.0.0-beta.1"), None);
        let path = write(temp.path(), &manifest).unwrap();
        let parsed = PropsFile::parse(FILE_NAME, &fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed.properties, from_manifest(&manifest));
    }
}
