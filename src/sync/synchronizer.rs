//! # VMR Synchronization
//!
//! [`VmrSynchronizer`] brings `src/<mapping>/` of a VMR working tree in line
//! with a commit of the mapping's repository.
//!
//! ## Process
//!
//! 1. **Resolve** the target commit, either from a local clone passed on the
//!    command line or from the cached clone of the mapping's remotes.
//! 2. **Diff** the filtered repository tree at the commit last recorded in
//!    the source manifest against the filtered tree at the target commit.
//! 3. **Apply** the resulting [`TreePatch`] to the VMR. Version-file
//!    conflicts are reconciled; anything else is recorded for `resolve`.
//! 4. **Record** the new commit in the manifest, regenerate git-info files
//!    and save the manifest last.
//! 5. **Stage** the touched paths. Committing is left to the caller.

use super::conflicts::{ConflictRecord, ConflictStore, PendingUpdate};
use super::patch::{write_change, ApplyMode, Conflict, TreePatch};
use super::reconcile::reconcile;
use super::submodules::{resolve_submodules, SubmoduleInfo};
use crate::cancel::CancellationToken;
use crate::codeflow::Direction;
use crate::config::{RepoTarget, VmrConfig};
use crate::error::{Error, Result};
use crate::filesystem::MemoryFS;
use crate::flow::{Asset, Build};
use crate::git::LocalGitRepo;
use crate::manifest::SourceManifest;
use crate::mapping::{self, SourceMapping, SourceMappings};
use crate::path::short_sha;
use crate::repository::RepositoryManager;
use crate::version_files::git_info::GitInfoFile;
use crate::version_files::version_details::VersionDetails;
use crate::version_files::{all_versions, GIT_INFO_DIR, VERSION_DETAILS_XML};
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// How a synchronization is carried out.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Build the target commit comes from; supplies package version, BAR id
    /// and the assets that win version-file reconciliation.
    pub build: Option<Build>,
    /// Also update mappings referenced from `eng/Version.Details.xml`.
    pub recursive: bool,
    pub mode: ApplyMode,
    /// Synchronize even if the mapping has synchronization disabled.
    pub force: bool,
    pub stage: bool,
    /// Subscription on whose behalf the flow runs, for conflict resolution.
    pub subscription: Option<String>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            build: None,
            recursive: false,
            mode: ApplyMode::Checked,
            force: false,
            stage: true,
            subscription: None,
        }
    }
}

impl SyncOptions {
    pub(crate) fn assets(&self) -> Vec<Asset> {
        self.build
            .as_ref()
            .map(|b| b.assets.clone())
            .unwrap_or_default()
    }

    pub(crate) fn pending(&self, remote_uri: &str, commit_sha: &str, message: String) -> PendingUpdate {
        PendingUpdate {
            remote_uri: remote_uri.to_string(),
            commit_sha: commit_sha.to_string(),
            package_version: self
                .build
                .as_ref()
                .and_then(|b| b.package_version())
                .map(str::to_string),
            bar_id: self.build.as_ref().map(|b| b.id),
            build_number: self.build.as_ref().and_then(|b| b.number.clone()),
            message,
        }
    }
}

/// Outcome of synchronizing one mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
    pub mapping: String,
    pub from_sha: Option<String>,
    pub to_sha: String,
    /// Files written, relative to the mapping directory.
    pub applied: Vec<String>,
    /// Files left for manual resolution, relative to the VMR root.
    pub conflicted_files: Vec<String>,
    pub patch_file: Option<PathBuf>,
}

impl SyncResult {
    pub fn has_changes(&self) -> bool {
        !self.applied.is_empty()
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicted_files.is_empty()
    }
}

/// Apply `patch` to `target_dir`, reconciling conflicted version files.
/// Returns the written paths and the conflicts left for a human.
pub(crate) fn apply_with_reconciliation(
    patch: &TreePatch,
    target_dir: &Path,
    mode: ApplyMode,
    assets: &[Asset],
) -> Result<(Vec<String>, Vec<Conflict>)> {
    let outcome = patch.apply(target_dir, mode)?;
    let mut applied = outcome.applied;
    let mut remaining = Vec::new();
    for conflict in outcome.conflicts {
        match reconcile(&conflict, assets)? {
            Some(merged) => {
                write_change(target_dir, &target_dir.join(&conflict.path), Some(&merged), false)?;
                applied.push(conflict.path);
            }
            None => remaining.push(conflict),
        }
    }
    Ok((applied, remaining))
}

pub struct VmrSynchronizer {
    vmr_path: PathBuf,
    mappings: SourceMappings,
    config: VmrConfig,
    repos: RepositoryManager,
    conflicts: ConflictStore,
    cancel: CancellationToken,
}

impl VmrSynchronizer {
    pub fn new(vmr_path: &Path, config: VmrConfig, cancel: CancellationToken) -> Result<Self> {
        let mappings = SourceMappings::load(vmr_path)?;
        let tmp = config.tmp_dir();
        Ok(Self {
            vmr_path: vmr_path.to_path_buf(),
            mappings,
            repos: RepositoryManager::new(&tmp, cancel.clone()),
            conflicts: ConflictStore::new(&tmp),
            config,
            cancel,
        })
    }

    pub fn vmr_path(&self) -> &Path {
        &self.vmr_path
    }

    pub fn mappings(&self) -> &SourceMappings {
        &self.mappings
    }

    pub fn config(&self) -> &VmrConfig {
        &self.config
    }

    pub fn conflict_store(&self) -> &ConflictStore {
        &self.conflicts
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn vmr_repo(&self) -> LocalGitRepo {
        LocalGitRepo::new(&self.vmr_path).with_cancellation(self.cancel.clone())
    }

    pub(crate) fn patches_dir(&self) -> PathBuf {
        self.config.tmp_dir().join("patches")
    }

    /// The mapping called `name`, refusing disabled ones unless `force`.
    pub fn mapping(&self, name: &str, force: bool) -> Result<SourceMapping> {
        let mapping = self.mappings.get(name)?;
        if mapping.disable_synchronization && !force {
            return Err(Error::Mapping {
                name: mapping.name.clone(),
                message: "synchronization is disabled for this mapping".to_string(),
            });
        }
        Ok(mapping.clone())
    }

    /// Run `f` against the repository holding `target` and the commit SHA it
    /// resolves to.
    pub(crate) fn with_source<T>(
        &self,
        mapping: &SourceMapping,
        target: &RepoTarget,
        f: impl FnOnce(&LocalGitRepo, &str) -> Result<T>,
    ) -> Result<T> {
        let rev = match target {
            RepoTarget::Path(path) => {
                let repo = LocalGitRepo::new(path).with_cancellation(self.cancel.clone());
                let sha = repo.head_sha()?;
                debug!("Using local clone {} at {}", path.display(), short_sha(&sha));
                return f(&repo, &sha);
            }
            RepoTarget::Revision(rev) => rev.as_str(),
            RepoTarget::Default => mapping.default_ref.as_str(),
        };
        let remotes = self.config.remotes_for(&mapping.name, &mapping.default_remote);
        self.repos.with_clone(&mapping.name, &remotes, rev, |dir, sha| {
            f(&LocalGitRepo::new(dir).with_cancellation(self.cancel.clone()), sha)
        })
    }

    /// First synchronization of a mapping.
    pub fn initialize(&self, name: &str, target: &RepoTarget, options: &SyncOptions) -> Result<Vec<SyncResult>> {
        let manifest = SourceManifest::load(&self.vmr_path)?;
        if manifest.get_repository(&self.mappings.get(name)?.name).is_some() {
            return Err(Error::Mapping {
                name: name.to_string(),
                message: "already present in the VMR, use update instead".to_string(),
            });
        }
        self.update(name, target, options)
    }

    /// Synchronize `name` (and with `recursive`, its dependencies) to `target`.
    pub fn update(&self, name: &str, target: &RepoTarget, options: &SyncOptions) -> Result<Vec<SyncResult>> {
        let mut visited = BTreeSet::new();
        let mut results = Vec::new();
        self.update_recursive(name, target.clone(), options, &mut visited, &mut results)?;
        Ok(results)
    }

    fn update_recursive(
        &self,
        name: &str,
        target: RepoTarget,
        options: &SyncOptions,
        visited: &mut BTreeSet<String>,
        results: &mut Vec<SyncResult>,
    ) -> Result<()> {
        if !visited.insert(name.to_lowercase()) {
            return Ok(());
        }
        let mapping = self.mapping(name, options.force)?;
        let result = self.sync_mapping(&mapping, &target, options)?;
        let conflicted = result.has_conflicts();
        results.push(result);

        if options.recursive && !conflicted {
            let nested = SyncOptions {
                build: None,
                ..options.clone()
            };
            for (dependency, sha) in self.dependencies_of(&mapping)? {
                info!("Following dependency {} at {}", dependency, short_sha(&sha));
                self.update_recursive(&dependency, RepoTarget::Revision(sha), &nested, visited, results)?;
            }
        }
        Ok(())
    }

    /// Mappings referenced from the synchronized `eng/Version.Details.xml`
    /// of `mapping`, with the commit each is referenced at.
    fn dependencies_of(&self, mapping: &SourceMapping) -> Result<Vec<(String, String)>> {
        let file = self
            .vmr_path
            .join(mapping.vmr_dir())
            .join(VERSION_DETAILS_XML);
        if !file.exists() {
            return Ok(Vec::new());
        }
        let details = VersionDetails::parse(VERSION_DETAILS_XML, &fs::read_to_string(&file)?)?;

        let mut found: Vec<(String, String)> = Vec::new();
        for dependency in &details.dependencies {
            let Some(target) = self.mappings.find_by_remote(&dependency.uri) else {
                continue;
            };
            if target.name == mapping.name
                || dependency.sha.is_empty()
                || found.iter().any(|(name, _)| *name == target.name)
            {
                continue;
            }
            found.push((target.name.clone(), dependency.sha.clone()));
        }
        Ok(found)
    }

    fn sync_mapping(
        &self,
        mapping: &SourceMapping,
        target: &RepoTarget,
        options: &SyncOptions,
    ) -> Result<SyncResult> {
        self.cancel.check("synchronization")?;
        let filter = mapping.filter()?;
        let mut manifest = SourceManifest::load(&self.vmr_path)?;
        let previous = manifest.get_version(&mapping.name).map(|v| v.commit_sha);
        let target_dir = self.vmr_path.join(mapping.vmr_dir());

        self.with_source(mapping, target, |repo, sha| {
            info!(
                "Synchronizing {} from {} to {}",
                mapping.name,
                previous.as_deref().map(short_sha).unwrap_or("nothing"),
                short_sha(sha)
            );
            let new_tree = repo.load_tree(sha, None)?.filtered(&filter);
            let old_tree = match &previous {
                Some(old) if repo.commit_exists(old) => repo.load_tree(old, None)?.filtered(&filter),
                Some(old) => {
                    warn!(
                        "{} is not available in the repository, comparing against the VMR copy",
                        short_sha(old)
                    );
                    MemoryFS::load_dir(&target_dir)?.filtered(&filter)
                }
                None => MemoryFS::new(),
            };

            let patch = TreePatch::between(&mapping.name, previous.as_deref(), sha, &old_tree, &new_tree);
            let patch_file = if self.config.keep_patches && !patch.is_empty() {
                Some(patch.save(&self.patches_dir())?)
            } else {
                None
            };

            let (applied, remaining) =
                apply_with_reconciliation(&patch, &target_dir, options.mode, &options.assets())?;
            let pending = options.pending(
                &mapping.default_remote,
                sha,
                format!("[{}] Update {} to {}", Direction::Forward, mapping.name, short_sha(sha)),
            );

            let mut result = SyncResult {
                mapping: mapping.name.clone(),
                from_sha: previous.clone(),
                to_sha: sha.to_string(),
                applied,
                conflicted_files: Vec::new(),
                patch_file,
            };

            if !remaining.is_empty() {
                let record = ConflictRecord {
                    mapping: mapping.name.clone(),
                    direction: Direction::Forward,
                    target: self.vmr_path.clone(),
                    target_dir: mapping.vmr_dir(),
                    source_repository: mapping.default_remote.clone(),
                    subscription: options.subscription.clone(),
                    conflicts: remaining,
                    pending,
                };
                result.conflicted_files = record.relative_paths();
                self.conflicts.save(&record)?;
                warn!(
                    "{} file(s) of {} need manual resolution",
                    result.conflicted_files.len(),
                    mapping.name
                );
                return Ok(result);
            }

            let gitmodules = repo.show_file(sha, ".gitmodules")?.unwrap_or_default();
            let submodules: Vec<SubmoduleInfo> = resolve_submodules(&repo.list_tree(sha, None)?, &gitmodules)
                .into_iter()
                .filter(|s| filter.matches(&s.path))
                .collect();
            self.record_sync(&mut manifest, mapping, &pending, Some(&submodules))?;

            if options.stage {
                self.stage_mapping(&mapping.name)?;
            }
            Ok(result)
        })
    }

    /// Write the synchronized commit to the manifest and regenerate the
    /// git-info files. The manifest is saved last.
    pub(crate) fn record_sync(
        &self,
        manifest: &mut SourceManifest,
        mapping: &SourceMapping,
        pending: &PendingUpdate,
        submodules: Option<&[SubmoduleInfo]>,
    ) -> Result<()> {
        manifest.update_version(
            &mapping.name,
            &pending.remote_uri,
            &pending.commit_sha,
            pending.package_version.as_deref(),
            pending.bar_id,
        );

        if let Some(submodules) = submodules {
            let prefix = format!("{}/", mapping.name);
            let stale: Vec<String> = manifest
                .submodules()
                .iter()
                .filter(|s| s.path.starts_with(&prefix))
                .map(|s| s.path.clone())
                .collect();
            for path in stale {
                manifest.remove_submodule(&path);
            }
            for submodule in submodules {
                manifest.update_submodule(
                    &format!("{}{}", prefix, submodule.path),
                    &submodule.url,
                    &submodule.commit,
                );
            }
        }

        let package_version = manifest
            .get_repository(&mapping.name)
            .and_then(|r| r.package_version.clone());
        GitInfoFile::new(
            &pending.commit_sha,
            package_version.as_deref(),
            pending.build_number.as_deref(),
        )
        .write(&self.vmr_path, &mapping.name)?;
        all_versions::write(&self.vmr_path, manifest)?;
        manifest.save()
    }

    /// Stage the paths a synchronization of `name` touches.
    pub(crate) fn stage_mapping(&self, name: &str) -> Result<()> {
        self.stage(&[
            format!("src/{}", name),
            GIT_INFO_DIR.to_string(),
            SourceManifest::RELATIVE_PATH.to_string(),
            mapping::RELATIVE_PATH.to_string(),
        ])
    }

    /// Stage `paths` (relative to the VMR) if the VMR is a git work tree.
    /// Paths that neither exist nor are tracked are skipped.
    pub(crate) fn stage(&self, paths: &[String]) -> Result<()> {
        if !LocalGitRepo::is_repository(&self.vmr_path) {
            debug!("{} is not a git repository, nothing staged", self.vmr_path.display());
            return Ok(());
        }
        let repo = self.vmr_repo();
        for path in paths {
            match repo.stage(&[path.as_str()]) {
                Ok(()) => {}
                Err(Error::GitCommand { .. }) if !self.vmr_path.join(path).exists() => {
                    debug!("Skipping {}, it is not tracked", path);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Commit whatever is staged in the VMR. Returns the new commit, or
    /// `None` when nothing was staged.
    pub fn commit(&self, message: &str) -> Result<Option<String>> {
        let repo = self.vmr_repo();
        if !repo.has_staged_changes()? {
            info!("Nothing to commit");
            return Ok(None);
        }
        let sha = repo.commit(message, false)?;
        info!("Committed {}", short_sha(&sha));
        Ok(Some(sha))
    }

    /// Add a mapping to the mappings file and synchronize it for the first time.
    pub fn add_repo(
        &mut self,
        name: &str,
        remote: &str,
        default_ref: Option<&str>,
        target: &RepoTarget,
        options: &SyncOptions,
    ) -> Result<Vec<SyncResult>> {
        mapping::add_mapping_entry(&self.vmr_path, name, remote, default_ref)?;
        self.mappings = SourceMappings::load(&self.vmr_path)?;
        self.initialize(name, target, options)
    }

    /// Remove a mapping, its files, its manifest records and its git-info.
    pub fn remove_repo(&mut self, name: &str) -> Result<()> {
        let mapping = self.mappings.get(name)?.clone();
        let dir = self.vmr_path.join(mapping.vmr_dir());
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }

        let mut manifest = SourceManifest::load(&self.vmr_path)?;
        manifest.remove_repository(&mapping.name);
        let git_info = GitInfoFile::path_for(&self.vmr_path, &mapping.name);
        if git_info.exists() {
            fs::remove_file(git_info)?;
        }
        all_versions::write(&self.vmr_path, &manifest)?;
        manifest.save()?;

        mapping::remove_mapping_entry(&self.vmr_path, &mapping.name)?;
        self.mappings = SourceMappings::load(&self.vmr_path)?;
        self.conflicts.remove(&mapping.name)?;
        info!("Removed {} from the VMR", mapping.name);
        self.stage_mapping(&mapping.name)
    }

    /// Force the mapping to `target`, overwriting local changes. Stages but
    /// does not commit.
    pub fn reset(&self, name: &str, target: &RepoTarget, build: Option<Build>) -> Result<SyncResult> {
        let options = SyncOptions {
            build,
            mode: ApplyMode::Force,
            force: true,
            ..SyncOptions::default()
        };
        let mut results = self.update(name, target, &options)?;
        results.pop().ok_or_else(|| Error::Mapping {
            name: name.to_string(),
            message: "nothing was synchronized".to_string(),
        })
    }

    /// Differences between the VMR copy of a mapping and its repository at
    /// `target`. The VMR side is the base.
    pub fn diff(&self, name: &str, target: &RepoTarget) -> Result<TreePatch> {
        let mapping = self.mappings.get(name)?.clone();
        let filter = mapping.filter()?;
        let current = MemoryFS::load_dir(&self.vmr_path.join(mapping.vmr_dir()))?.filtered(&filter);
        self.with_source(&mapping, target, |repo, sha| {
            let tree = repo.load_tree(sha, None)?.filtered(&filter);
            Ok(TreePatch::between(&mapping.name, None, sha, &current, &tree))
        })
    }
}
