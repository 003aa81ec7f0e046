//! # Code Flow
//!
//! Forward flow, back flow and cherry-picks between a repository and the
//! VMR, plus finishing flows that stopped on conflicts.
//!
//! Both directions share the same pipeline: build a [`TreePatch`] between two
//! filtered trees, apply it to the target working tree, reconcile version
//! files, then record provenance and commit on a `darc/<direction>/...`
//! branch. Only what is compared, and where provenance is recorded, differs:
//!
//! | Direction | Patch                                   | Provenance                       |
//! |-----------|-----------------------------------------|----------------------------------|
//! | forward   | repository tree, last synced → new      | source manifest, git-info        |
//! | back      | `src/<mapping>` of the VMR, last → HEAD | `<Source>` in Version.Details.xml |

use super::conflicts::{has_markers, with_markers, ConflictRecord, PendingUpdate};
use super::patch::{ApplyMode, TreePatch};
use super::synchronizer::{apply_with_reconciliation, SyncOptions, VmrSynchronizer};
use crate::codeflow::{Codeflow, Direction};
use crate::config::RepoTarget;
use crate::error::{Error, Result};
use crate::filesystem::MemoryFS;
use crate::flow::{Asset, Subscription};
use crate::git::LocalGitRepo;
use crate::manifest::SourceManifest;
use crate::mapping::SourceMapping;
use crate::path::{short_sha, FileFilter};
use crate::version_files::version_details::{SourceDependency, VersionDetails};
use crate::version_files::{VERSION_DETAILS_PROPS, VERSION_DETAILS_XML};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// Outcome of one flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeFlowResult {
    pub codeflow: Codeflow,
    /// Branch the flow was committed to.
    pub branch: String,
    pub had_updates: bool,
    /// Files left for manual resolution, relative to the target work tree.
    pub conflicted_files: Vec<String>,
}

impl CodeFlowResult {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicted_files.is_empty()
    }
}

/// Options specific to flows on top of [`SyncOptions`].
#[derive(Debug, Clone, Default)]
pub struct FlowOptions {
    pub sync: SyncOptions,
    /// Commit on the flow branch instead of leaving changes staged.
    pub commit: bool,
    /// Branch to commit to instead of the derived `darc/...` name, e.g. the
    /// head branch of an open pull request.
    pub branch: Option<String>,
}

pub struct CodeFlower<'a> {
    sync: &'a VmrSynchronizer,
}

fn stage_and_commit(
    repo: &LocalGitRepo,
    paths: &[&str],
    branch: Option<&str>,
    message: &str,
    commit: bool,
) -> Result<bool> {
    if !paths.is_empty() {
        repo.stage(paths)?;
    }
    let had_updates = repo.has_staged_changes()?;
    if had_updates && commit {
        if let Some(branch) = branch {
            repo.checkout_new_branch(branch)?;
        }
        let sha = repo.commit(message, false)?;
        info!("Committed {} ({})", short_sha(&sha), message);
    }
    Ok(had_updates)
}

fn load_filtered(repo: &LocalGitRepo, rev: &str, prefix: Option<&str>, filter: &FileFilter) -> Result<MemoryFS> {
    Ok(repo.load_tree(rev, prefix)?.filtered(filter))
}

impl<'a> CodeFlower<'a> {
    pub fn new(sync: &'a VmrSynchronizer) -> Self {
        Self { sync }
    }

    fn vmr_uri(&self) -> String {
        self.sync
            .vmr_repo()
            .remote_url("origin")
            .unwrap_or_else(|_| self.sync.vmr_path().display().to_string())
    }

    /// Flow a repository commit into the VMR and commit it on
    /// `darc/forward/<repo>-<vmr>`.
    pub fn forward_flow(&self, name: &str, target: &RepoTarget, options: &FlowOptions) -> Result<CodeFlowResult> {
        let vmr = self.sync.vmr_repo();
        let vmr_sha = vmr.head_sha()?;

        let sync_options = SyncOptions {
            recursive: false,
            stage: true,
            ..options.sync.clone()
        };
        let result = self
            .sync
            .update(name, target, &sync_options)?
            .pop()
            .ok_or_else(|| Error::Mapping {
                name: name.to_string(),
                message: "nothing was synchronized".to_string(),
            })?;

        let codeflow = Codeflow::forward(&result.to_sha, &vmr_sha);
        let branch = options.branch.clone().unwrap_or_else(|| codeflow.branch_name());
        if result.has_conflicts() {
            return Ok(CodeFlowResult {
                codeflow,
                branch,
                had_updates: result.has_changes(),
                conflicted_files: result.conflicted_files,
            });
        }

        let message = format!(
            "[{}] Update {} to {}",
            Direction::Forward,
            result.mapping,
            short_sha(&result.to_sha)
        );
        let had_updates = stage_and_commit(&vmr, &[], Some(&branch), &message, options.commit)?;
        if !had_updates {
            info!("{} is already up to date in the VMR", result.mapping);
        }
        Ok(CodeFlowResult {
            codeflow,
            branch,
            had_updates,
            conflicted_files: Vec::new(),
        })
    }

    /// Tree of `src/<mapping>` the repository was last synchronized with.
    fn last_flowed_tree(
        &self,
        mapping: &SourceMapping,
        details: &VersionDetails,
        repo: &LocalGitRepo,
        filter: &FileFilter,
    ) -> Result<(Option<String>, MemoryFS)> {
        let vmr = self.sync.vmr_repo();
        if let Some(source) = details
            .source
            .as_ref()
            .filter(|s| s.mapping.eq_ignore_ascii_case(&mapping.name) && vmr.commit_exists(&s.sha))
        {
            let tree = load_filtered(&vmr, &source.sha, Some(&mapping.vmr_dir()), filter)?;
            return Ok((Some(source.sha.clone()), tree));
        }

        let manifest = SourceManifest::load(self.sync.vmr_path())?;
        match manifest.get_version(&mapping.name) {
            Some(version) if repo.commit_exists(&version.commit_sha) => {
                let tree = load_filtered(repo, &version.commit_sha, None, filter)?;
                Ok((None, tree))
            }
            _ => {
                warn!("No common ancestor with the VMR, comparing against the working tree");
                Ok((None, MemoryFS::load_dir(repo.path())?.filtered(filter)))
            }
        }
    }

    /// Flow the VMR's copy of a mapping back into a local clone of its
    /// repository and commit it on `darc/back/<vmr>-<repo>`.
    pub fn backflow(&self, name: &str, repo_path: &Path, options: &FlowOptions) -> Result<CodeFlowResult> {
        let mapping = self.sync.mapping(name, options.sync.force)?;
        let filter = mapping.filter()?;
        let vmr = self.sync.vmr_repo();
        let repo = LocalGitRepo::new(repo_path).with_cancellation(self.sync.cancellation().clone());
        let vmr_sha = vmr.head_sha()?;
        let repo_sha = repo.head_sha()?;
        let codeflow = Codeflow::backflow(&vmr_sha, &repo_sha);
        let branch = options.branch.clone().unwrap_or_else(|| codeflow.branch_name());

        let details = read_version_details(repo_path)?;
        let (base_sha, old_tree) = self.last_flowed_tree(&mapping, &details, &repo, &filter)?;
        let new_tree = load_filtered(&vmr, &vmr_sha, Some(&mapping.vmr_dir()), &filter)?;

        let patch = TreePatch::between(&mapping.name, base_sha.as_deref(), &vmr_sha, &old_tree, &new_tree);
        if self.sync.config().keep_patches && !patch.is_empty() {
            patch.save(&self.sync.patches_dir())?;
        }
        let assets = options.sync.assets();
        let (_, remaining) = apply_with_reconciliation(&patch, repo_path, options.sync.mode, &assets)?;

        let pending = options.sync.pending(
            &self.vmr_uri(),
            &vmr_sha,
            format!(
                "[{}] Update {} from the VMR at {}",
                Direction::Back,
                mapping.name,
                short_sha(&vmr_sha)
            ),
        );

        if !remaining.is_empty() {
            let record = ConflictRecord {
                mapping: mapping.name.clone(),
                direction: Direction::Back,
                target: repo_path.to_path_buf(),
                target_dir: String::new(),
                source_repository: pending.remote_uri.clone(),
                subscription: options.sync.subscription.clone(),
                conflicts: remaining,
                pending,
            };
            self.sync.conflict_store().save(&record)?;
            return Ok(CodeFlowResult {
                codeflow,
                branch,
                had_updates: true,
                conflicted_files: record.relative_paths(),
            });
        }

        record_backflow(repo_path, &mapping.name, &pending, &assets)?;
        let had_updates = stage_and_commit(&repo, &["."], Some(&branch), &pending.message, options.commit)?;
        Ok(CodeFlowResult {
            codeflow,
            branch,
            had_updates,
            conflicted_files: Vec::new(),
        })
    }

    /// Apply a single commit to the counterpart.
    ///
    /// A VMR commit is applied to the repository at `repo_path`; any other
    /// commit is looked up in `repo_path` (or the mapping's remotes) and
    /// applied to the VMR.
    pub fn cherry_pick(
        &self,
        name: &str,
        commit: &str,
        repo_path: Option<&Path>,
        mode: ApplyMode,
    ) -> Result<CodeFlowResult> {
        let mapping = self.sync.mapping(name, true)?;
        let filter = mapping.filter()?;
        let vmr = self.sync.vmr_repo();

        if vmr.commit_exists(commit) {
            let repo_path = repo_path.ok_or_else(|| Error::Mapping {
                name: mapping.name.clone(),
                message: format!(
                    "{} is a VMR commit, pass the repository to apply it to",
                    short_sha(commit)
                ),
            })?;
            let repo = LocalGitRepo::new(repo_path).with_cancellation(self.sync.cancellation().clone());
            let prefix = mapping.vmr_dir();
            let old = match vmr.parent_of(commit)? {
                Some(parent) => load_filtered(&vmr, &parent, Some(&prefix), &filter)?,
                None => MemoryFS::new(),
            };
            let new = load_filtered(&vmr, commit, Some(&prefix), &filter)?;
            let patch = TreePatch::between(&mapping.name, None, commit, &old, &new);
            let (_, remaining) = apply_with_reconciliation(&patch, repo_path, mode, &[])?;

            let codeflow = Codeflow::backflow(commit, &repo.head_sha()?);
            let conflicted_files: Vec<String> = remaining.into_iter().map(|c| c.path).collect();
            let message = format!(
                "Cherry-pick {} from the VMR: {}",
                short_sha(commit),
                vmr.commit_subject(commit)?
            );
            let had_updates = conflicted_files.is_empty()
                && stage_and_commit(&repo, &["."], None, &message, true)?;
            return Ok(CodeFlowResult {
                branch: codeflow.branch_name(),
                codeflow,
                had_updates,
                conflicted_files,
            });
        }

        let target = match repo_path {
            Some(path) => RepoTarget::Path(path.to_path_buf()),
            None => RepoTarget::Revision(commit.to_string()),
        };
        let target_dir = self.sync.vmr_path().join(mapping.vmr_dir());
        let (subject, remaining) = self.sync.with_source(&mapping, &target, |repo, _| {
            let old = match repo.parent_of(commit)? {
                Some(parent) => load_filtered(repo, &parent, None, &filter)?,
                None => MemoryFS::new(),
            };
            let new = load_filtered(repo, commit, None, &filter)?;
            let patch = TreePatch::between(&mapping.name, None, commit, &old, &new);
            let (_, remaining) = apply_with_reconciliation(&patch, &target_dir, mode, &[])?;
            Ok((repo.commit_subject(commit)?, remaining))
        })?;

        let codeflow = Codeflow::forward(commit, &vmr.head_sha()?);
        let conflicted_files: Vec<String> = remaining
            .into_iter()
            .map(|c| format!("{}/{}", mapping.vmr_dir(), c.path))
            .collect();
        let message = format!("Cherry-pick {} from {}: {}", short_sha(commit), mapping.name, subject);
        let dir = mapping.vmr_dir();
        let had_updates = conflicted_files.is_empty()
            && stage_and_commit(&vmr, &[dir.as_str()], None, &message, true)?;
        Ok(CodeFlowResult {
            branch: codeflow.branch_name(),
            codeflow,
            had_updates,
            conflicted_files,
        })
    }

    /// Write both sides of every pending conflict of `subscription` into the
    /// conflicted files, framed by conflict markers. Returns the files.
    pub fn resolve_conflict(&self, subscription: &Subscription) -> Result<Vec<PathBuf>> {
        let record = self.pending_record(subscription)?;
        let ours = match record.direction {
            Direction::Forward => "vmr".to_string(),
            Direction::Back => record.mapping.clone(),
        };
        let mut files = Vec::new();
        for conflict in &record.conflicts {
            let path = record.file_path(conflict);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, with_markers(conflict, &ours, &subscription.source_repository))?;
            files.push(path);
        }
        info!(
            "Wrote conflict markers into {} file(s) for subscription {}",
            files.len(),
            subscription.id
        );
        Ok(files)
    }

    fn pending_record(&self, subscription: &Subscription) -> Result<ConflictRecord> {
        let store = self.sync.conflict_store();
        match store.find_by_subscription(&subscription.id) {
            Ok(record) => Ok(record),
            Err(Error::NotFound { .. }) => subscription
                .mapping_name()
                .map(|name| store.load(name))
                .transpose()?
                .flatten()
                .ok_or_else(|| Error::not_found("pending conflict for subscription", &subscription.id)),
            Err(e) => Err(e),
        }
    }

    /// Finish the flow of `mapping` once its conflicts have been resolved by
    /// hand: record provenance, stage and commit. Returns the commit.
    pub fn resolve(&self, mapping: &str) -> Result<Option<String>> {
        let record = self
            .sync
            .conflict_store()
            .load(mapping)?
            .ok_or_else(|| Error::not_found("pending conflict for mapping", mapping))?;
        self.finish(record)
    }

    /// [`CodeFlower::resolve`] for the record of a subscription.
    pub fn resolve_subscription(&self, subscription: &str) -> Result<Option<String>> {
        let record = self.sync.conflict_store().find_by_subscription(subscription)?;
        self.finish(record)
    }

    fn finish(&self, record: ConflictRecord) -> Result<Option<String>> {
        for conflict in &record.conflicts {
            let path = record.file_path(conflict);
            if path.is_file() && has_markers(&String::from_utf8_lossy(&fs::read(&path)?)) {
                return Err(Error::Mapping {
                    name: record.mapping.clone(),
                    message: format!("{} still contains conflict markers", path.display()),
                });
            }
        }

        let resolved = record.relative_paths();
        let message = format!(
            "{}\n\nResolved conflicts in:\n{}",
            record.pending.message,
            resolved
                .iter()
                .map(|p| format!("- {}", p))
                .collect::<Vec<_>>()
                .join("\n")
        );

        let commit = match record.direction {
            Direction::Forward => {
                let mapping = self.sync.mapping(&record.mapping, true)?;
                let mut manifest = SourceManifest::load(self.sync.vmr_path())?;
                self.sync.record_sync(&mut manifest, &mapping, &record.pending, None)?;
                self.sync.stage_mapping(&mapping.name)?;
                self.sync.commit(&message)?
            }
            Direction::Back => {
                record_backflow(&record.target, &record.mapping, &record.pending, &[])?;
                let repo = LocalGitRepo::new(&record.target)
                    .with_cancellation(self.sync.cancellation().clone());
                repo.stage(&["."])?;
                if repo.has_staged_changes()? {
                    Some(repo.commit(&message, false)?)
                } else {
                    None
                }
            }
        };

        self.sync.conflict_store().remove(&record.mapping)?;
        info!("Resolved {} conflicted file(s) of {}", resolved.len(), record.mapping);
        Ok(commit)
    }
}

pub(crate) fn read_version_details(repo_path: &Path) -> Result<VersionDetails> {
    let path = repo_path.join(VERSION_DETAILS_XML);
    if !path.exists() {
        return Ok(VersionDetails::default());
    }
    VersionDetails::parse(VERSION_DETAILS_XML, &fs::read_to_string(path)?)
}

/// Record a back flow in the repository's `eng/Version.Details.xml`: the
/// `<Source>` element and the versions of dependencies the build produced.
/// `eng/Version.Details.props` is regenerated when the repository has one.
pub(crate) fn record_backflow(
    repo_path: &Path,
    mapping: &str,
    pending: &PendingUpdate,
    assets: &[Asset],
) -> Result<()> {
    let mut details = read_version_details(repo_path)?;
    details.source = Some(SourceDependency {
        uri: pending.remote_uri.clone(),
        mapping: mapping.to_string(),
        sha: pending.commit_sha.clone(),
        bar_id: pending.bar_id,
    });
    for dependency in details.dependencies.iter_mut().filter(|d| !d.pinned) {
        if let Some(asset) = assets.iter().find(|a| a.name == dependency.name) {
            dependency.version = asset.version.clone();
            dependency.sha = pending.commit_sha.clone();
        }
    }

    let xml = repo_path.join(VERSION_DETAILS_XML);
    if let Some(parent) = xml.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&xml, details.render())?;

    let props = repo_path.join(VERSION_DETAILS_PROPS);
    if props.exists() {
        fs::write(&props, details.render_props())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> PendingUpdate {
        PendingUpdate {
            remote_uri: "https://github.com/dotnet/dotnet".to_string(),
            commit_sha: "f00dbabe".to_string(),
            package_version: None,
            bar_id: Some(99),
            build_number: None,
            message: "backflow".to_string(),
        }
    }

    #[test]
    fn test_record_backflow_creates_source_element() {
        let temp = tempfile::tempdir().unwrap();
        record_backflow(temp.path(), "runtime", &pending(), &[]).unwrap();

        let details = read_version_details(temp.path()).unwrap();
        let source = details.source.unwrap();
        assert_eq!(source.mapping, "runtime");
        assert_eq!(source.sha, "f00dbabe");
        assert_eq!(source.bar_id, Some(99));
        assert!(!temp.path().join(VERSION_DETAILS_PROPS).exists());
    }

    #[test]
    fn test_record_backflow_updates_unpinned_assets_and_props() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir_all(temp.path().join("eng")).unwrap();
        fs::write(
            temp.path().join(VERSION_DETAILS_XML),
            r#"<Dependencies>
  <ProductDependencies>
    <Dependency Name="Foo" Version="1.0.0"><Uri>https://github.com/dotnet/dotnet</Uri><Sha>old</Sha></Dependency>
    <Dependency Name="Bar" Version="1.0.0" Pinned="true"><Uri>https://github.com/dotnet/dotnet</Uri><Sha>old</Sha></Dependency>
  </ProductDependencies>
</Dependencies>"#,
        )
        .unwrap();
        fs::write(temp.path().join(VERSION_DETAILS_PROPS), "<Project />").unwrap();

        let assets = vec![
            Asset {
                name: "Foo".to_string(),
                version: "2.0.0".to_string(),
            },
            Asset {
                name: "Bar".to_string(),
                version: "2.0.0".to_string(),
            },
        ];
        record_backflow(temp.path(), "runtime", &pending(), &assets).unwrap();

        let details = read_version_details(temp.path()).unwrap();
        assert_eq!(details.get("Foo").unwrap().version, "2.0.0");
        assert_eq!(details.get("Foo").unwrap().sha, "f00dbabe");
        assert_eq!(details.get("Bar").unwrap().version, "1.0.0");

        let props = fs::read_to_string(temp.path().join(VERSION_DETAILS_PROPS)).unwrap();
        assert!(props.contains("<FooPackageVersion>2.0.0</FooPackageVersion>"));
    }
}
