//! Merging the provenance of another VMR band into the current branch.
//!
//! A band is a release branch of the VMR. When bands are merged, the file
//! contents merge through git as usual, but the manifest and the git-info
//! files must be reconciled per repository: the record with the newer
//! package version wins.

use crate::error::{Error, Result};
use crate::git::LocalGitRepo;
use crate::manifest::{RepositoryRecord, SourceManifest};
use crate::version_files::git_info::GitInfoFile;
use crate::version_files::{all_versions, GIT_INFO_DIR};
use log::{debug, info};
use std::cmp::Ordering;
use std::fs;
use std::path::Path;

/// Which repositories took the band's record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BandMerge {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub kept: Vec<String>,
}

/// Compare the package versions of two records. Missing or unparsable
/// versions, and equal precedence, compare as equal.
fn compare_versions(ours: &RepositoryRecord, theirs: &RepositoryRecord) -> Ordering {
    let parse = |r: &RepositoryRecord| {
        r.package_version
            .as_deref()
            .and_then(|v| semver::Version::parse(v).ok())
    };
    match (parse(ours), parse(theirs)) {
        (Some(ours), Some(theirs)) => ours.cmp_precedence(&theirs),
        _ => Ordering::Equal,
    }
}

/// Merge `theirs` into `ours`. Ties keep `ours`.
pub fn merge_manifests(ours: &mut SourceManifest, theirs: &SourceManifest) -> BandMerge {
    let mut result = BandMerge::default();
    for record in theirs.repositories() {
        let take = match ours.get_repository(&record.path) {
            None => {
                result.added.push(record.path.clone());
                true
            }
            Some(current) if compare_versions(current, record) == Ordering::Less => {
                result.updated.push(record.path.clone());
                true
            }
            Some(_) => {
                result.kept.push(record.path.clone());
                false
            }
        };
        if !take {
            continue;
        }

        ours.remove_repository(&record.path);
        ours.update_version(
            &record.path,
            &record.remote_uri,
            &record.commit_sha,
            record.package_version.as_deref(),
            record.bar_id,
        );
        let prefix = format!("{}/", record.path);
        for submodule in theirs.submodules().iter().filter(|s| s.path.starts_with(&prefix)) {
            ours.update_submodule(&submodule.path, &submodule.remote_uri, &submodule.commit_sha);
        }
    }

    // Submodules outside any repository record.
    for submodule in theirs.submodules() {
        if ours.try_get_component(&submodule.path).is_none()
            && !ours
                .repositories()
                .iter()
                .any(|r| submodule.path.starts_with(&format!("{}/", r.path)))
        {
            ours.update_submodule(&submodule.path, &submodule.remote_uri, &submodule.commit_sha);
        }
    }
    result
}

/// Merge the manifest and git-info of the VMR at `band_ref` into the work
/// tree of the VMR at `vmr_path`, and stage the result.
pub fn merge_bands(vmr_path: &Path, band_ref: &str) -> Result<BandMerge> {
    let vmr = LocalGitRepo::new(vmr_path);
    let band_sha = vmr.rev_parse(band_ref)?;
    let text = vmr
        .show_file(&band_sha, SourceManifest::RELATIVE_PATH)?
        .ok_or_else(|| Error::not_found("source manifest at", band_ref))?;
    let theirs = SourceManifest::from_json(&text)?;
    let mut ours = SourceManifest::load(vmr_path)?;

    let result = merge_manifests(&mut ours, &theirs);
    for path in result.added.iter().chain(&result.updated) {
        let git_info = GitInfoFile::path_for(vmr_path, path);
        let band_file = format!("{}/{}.props", GIT_INFO_DIR, path);
        let content = match vmr.show_file(&band_sha, &band_file)? {
            Some(content) => content,
            None => {
                debug!("{} has no git-info in {}, regenerating", path, band_ref);
                let record = ours.get_repository(path).ok_or_else(|| Error::Manifest {
                    message: format!("{} vanished while merging bands", path),
                })?;
                GitInfoFile::new(&record.commit_sha, record.package_version.as_deref(), None).render()
            }
        };
        if let Some(parent) = git_info.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(git_info, content)?;
    }
    all_versions::write(vmr_path, &ours)?;
    ours.save()?;

    vmr.stage(&[SourceManifest::RELATIVE_PATH, GIT_INFO_DIR])?;
    info!(
        "Merged {}: {} added, {} updated, {} kept",
        band_ref,
        result.added.len(),
        result.updated.len(),
        result.kept.len()
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newer_package_version_wins() {
        let mut ours = SourceManifest::new();
        ours.update_version("runtime", "u", "ours-rt", Some("9.0.1"), Some(1));
        ours.update_version("sdk", "u", "ours-sdk", Some("9.0.200"), Some(2));
        ours.update_version("arcade", "u", "ours-arcade", Some("9.0.0"), None);
        ours.update_submodule("runtime/external/zlib", "z", "old-zlib");

        let mut theirs = SourceManifest::new();
        theirs.update_version("runtime", "u", "theirs-rt", Some("9.0.2"), Some(3));
        theirs.update_version("sdk", "u", "theirs-sdk", Some("9.0.100"), Some(4));
        theirs.update_version("arcade", "u", "theirs-arcade", Some("9.0.0+build"), None);
        theirs.update_version("msbuild", "u", "theirs-msbuild", None, None);
        theirs.update_submodule("runtime/external/zlib", "z", "new-zlib");

        let result = merge_manifests(&mut ours, &theirs);
        assert_eq!(result.added, vec!["msbuild"]);
        assert_eq!(result.updated, vec!["runtime"]);
        assert_eq!(result.kept, vec!["arcade", "sdk"]);

        assert_eq!(ours.get_version("runtime").unwrap().commit_sha, "theirs-rt");
        assert_eq!(ours.get_repository("runtime").unwrap().bar_id, Some(3));
        assert_eq!(ours.get_version("sdk").unwrap().commit_sha, "ours-sdk");
        assert_eq!(ours.get_version("arcade").unwrap().commit_sha, "ours-arcade");
        assert_eq!(ours.submodules()[0].commit_sha, "new-zlib");
    }

    #[test]
    fn test_unparsable_versions_keep_ours() {
        let mut ours = SourceManifest::new();
        ours.update_version("runtime", "u", "ours", Some("not-a-version"), None);
        let mut theirs = SourceManifest::new();
        theirs.update_version("runtime", "u", "theirs", Some("10.0.0"), None);

        let result = merge_manifests(&mut ours, &theirs);
        assert_eq!(result.kept, vec!["runtime"]);
        assert_eq!(ours.get_version("runtime").unwrap().commit_sha, "ours");
    }
}
