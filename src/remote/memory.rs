//! In-memory [`Remote`] and [`BuildRegistry`].
//!
//! [`MemoryRegistry`] is what the CLI runs against, seeded from the
//! configuration file. [`MemoryRemote`] stands in for a repository host and
//! lets callers inject failures per file.

use super::{BuildRegistry, CheckStatus, NewPullRequest, PrCheck, PrStatus, PullRequest, Remote, ReviewState};
use crate::config::VmrConfig;
use crate::error::{Error, Result};
use crate::flow::{Build, DefaultChannel, Subscription};
use crate::path::normalize_remote;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex.lock().map_err(|_| Error::LockPoisoned {
        message: format!("{} lock poisoned", what),
    })
}

/// Registry over the builds, subscriptions and default channels of a
/// [`VmrConfig`].
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    builds: Mutex<BTreeMap<u64, Build>>,
    subscriptions: Mutex<Vec<Subscription>>,
    default_channels: Vec<DefaultChannel>,
    last_applied: Mutex<HashMap<String, u64>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &VmrConfig) -> Self {
        Self {
            builds: Mutex::new(config.builds.iter().map(|b| (b.id, b.clone())).collect()),
            subscriptions: Mutex::new(config.subscriptions.clone()),
            default_channels: config.default_channels.clone(),
            last_applied: Mutex::new(HashMap::new()),
        }
    }

    pub fn add_build(&self, build: Build) -> Result<()> {
        lock(&self.builds, "builds")?.insert(build.id, build);
        Ok(())
    }

    pub fn add_subscription(&self, subscription: Subscription) -> Result<()> {
        lock(&self.subscriptions, "subscriptions")?.push(subscription);
        Ok(())
    }

    pub fn last_applied_build(&self, subscription_id: &str) -> Result<Option<u64>> {
        Ok(lock(&self.last_applied, "last applied")?.get(subscription_id).copied())
    }
}

fn same_repo(a: &str, b: &str) -> bool {
    normalize_remote(a) == normalize_remote(b)
}

#[async_trait]
impl BuildRegistry for MemoryRegistry {
    async fn get_build(&self, id: u64) -> Result<Build> {
        lock(&self.builds, "builds")?
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("build", id))
    }

    async fn get_subscription(&self, id: &str) -> Result<Subscription> {
        lock(&self.subscriptions, "subscriptions")?
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found("subscription", id))
    }

    async fn get_latest_build(&self, repository: &str, channel: &str) -> Result<Option<Build>> {
        Ok(lock(&self.builds, "builds")?
            .values()
            .rev()
            .find(|b| same_repo(&b.repository, repository) && b.channels.iter().any(|c| c == channel))
            .cloned())
    }

    async fn get_subscriptions(&self, repository: &str, channel: &str) -> Result<Vec<Subscription>> {
        Ok(lock(&self.subscriptions, "subscriptions")?
            .iter()
            .filter(|s| s.enabled && s.channel == channel && same_repo(&s.source_repository, repository))
            .cloned()
            .collect())
    }

    async fn get_default_channels(&self, repository: &str, branch: &str) -> Result<Vec<DefaultChannel>> {
        let branch = branch.trim_start_matches("refs/heads/");
        Ok(self
            .default_channels
            .iter()
            .filter(|d| d.enabled && same_repo(&d.repository, repository) && d.branch == branch)
            .cloned()
            .collect())
    }

    async fn assign_build_to_channel(&self, build_id: u64, channel: &str) -> Result<()> {
        let mut builds = lock(&self.builds, "builds")?;
        let build = builds
            .get_mut(&build_id)
            .ok_or_else(|| Error::not_found("build", build_id))?;
        if !build.channels.iter().any(|c| c == channel) {
            build.channels.push(channel.to_string());
        }
        Ok(())
    }

    async fn set_last_applied_build(&self, subscription_id: &str, build_id: u64) -> Result<()> {
        lock(&self.last_applied, "last applied")?.insert(subscription_id.to_string(), build_id);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RemoteState {
    /// `(repo, branch, path)` → content
    files: HashMap<(String, String, String), String>,
    /// `(repo, branch)` that fail every file query
    failing: HashSet<(String, String)>,
    commits: HashMap<(String, String), String>,
    pulls: BTreeMap<String, PullRequest>,
    checks: HashMap<String, Vec<PrCheck>>,
    reviews: HashMap<String, Vec<ReviewState>>,
    unmergeable: HashSet<String>,
}

/// Repository host kept in memory.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, RemoteState>> {
        lock(&self.state, "remote")
    }

    pub fn set_file(&self, repo: &str, branch: &str, path: &str, content: &str) -> Result<()> {
        self.state()?.files.insert(
            (repo.to_string(), branch.to_string(), path.to_string()),
            content.to_string(),
        );
        Ok(())
    }

    /// Make every file query against `repo`@`branch` fail transiently.
    pub fn fail_branch(&self, repo: &str, branch: &str) -> Result<()> {
        self.state()?
            .failing
            .insert((repo.to_string(), branch.to_string()));
        Ok(())
    }

    pub fn set_commit(&self, repo: &str, branch: &str, sha: &str) -> Result<()> {
        self.state()?
            .commits
            .insert((repo.to_string(), branch.to_string()), sha.to_string());
        Ok(())
    }

    pub fn set_checks(&self, pr_url: &str, checks: Vec<PrCheck>) -> Result<()> {
        self.state()?.checks.insert(pr_url.to_string(), checks);
        Ok(())
    }

    pub fn set_reviews(&self, pr_url: &str, reviews: Vec<ReviewState>) -> Result<()> {
        self.state()?.reviews.insert(pr_url.to_string(), reviews);
        Ok(())
    }

    pub fn set_status(&self, pr_url: &str, status: PrStatus) -> Result<()> {
        let mut state = self.state()?;
        let pr = state
            .pulls
            .get_mut(pr_url)
            .ok_or_else(|| Error::not_found("pull request", pr_url))?;
        pr.status = status;
        Ok(())
    }

    /// Make merging `pr_url` fail.
    pub fn block_merge(&self, pr_url: &str) -> Result<()> {
        self.state()?.unmergeable.insert(pr_url.to_string());
        Ok(())
    }

    pub fn pull_requests(&self) -> Result<Vec<PullRequest>> {
        Ok(self.state()?.pulls.values().cloned().collect())
    }
}

#[async_trait]
impl Remote for MemoryRemote {
    async fn get_file_contents(&self, path: &str, repo_url: &str, branch: &str) -> Result<String> {
        let state = self.state()?;
        if state.failing.contains(&(repo_url.to_string(), branch.to_string())) {
            return Err(Error::remote(repo_url, format!("failed to read {} at {}", path, branch)));
        }
        state
            .files
            .get(&(repo_url.to_string(), branch.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| Error::not_found("file", format!("{}@{}:{}", repo_url, branch, path)))
    }

    async fn get_latest_commit(&self, repo_url: &str, branch: &str) -> Result<String> {
        self.state()?
            .commits
            .get(&(repo_url.to_string(), branch.to_string()))
            .cloned()
            .ok_or_else(|| Error::not_found("branch", format!("{}@{}", repo_url, branch)))
    }

    async fn create_pull_request(&self, repo_url: &str, pr: &NewPullRequest) -> Result<String> {
        let mut state = self.state()?;
        let url = format!("{}/pull/{}", repo_url.trim_end_matches('/'), state.pulls.len() + 1);
        state.pulls.insert(
            url.clone(),
            PullRequest {
                url: url.clone(),
                title: pr.title.clone(),
                description: pr.description.clone(),
                head_branch: pr.head_branch.clone(),
                base_branch: pr.base_branch.clone(),
                status: PrStatus::Open,
                target_branch_commit_sha: None,
            },
        );
        Ok(url)
    }

    async fn update_pull_request(&self, pr_url: &str, title: &str, description: &str) -> Result<()> {
        let mut state = self.state()?;
        let pr = state
            .pulls
            .get_mut(pr_url)
            .ok_or_else(|| Error::not_found("pull request", pr_url))?;
        pr.title = title.to_string();
        pr.description = description.to_string();
        Ok(())
    }

    async fn get_pull_request(&self, pr_url: &str) -> Result<PullRequest> {
        self.state()?
            .pulls
            .get(pr_url)
            .cloned()
            .ok_or_else(|| Error::not_found("pull request", pr_url))
    }

    async fn get_pull_request_checks(&self, pr_url: &str) -> Result<Vec<PrCheck>> {
        Ok(self.state()?.checks.get(pr_url).cloned().unwrap_or_default())
    }

    async fn get_pull_request_reviews(&self, pr_url: &str) -> Result<Vec<ReviewState>> {
        Ok(self.state()?.reviews.get(pr_url).cloned().unwrap_or_default())
    }

    async fn merge_pull_request(&self, pr_url: &str) -> Result<()> {
        let mut state = self.state()?;
        if state.unmergeable.contains(pr_url) {
            return Err(Error::remote(pr_url, "pull request is not mergeable"));
        }
        let pending = state
            .checks
            .get(pr_url)
            .is_some_and(|checks| checks.iter().any(|c| c.status == CheckStatus::Pending && !c.is_merge_policy));
        if pending {
            return Err(Error::remote(pr_url, "checks are still running"));
        }
        let pr = state
            .pulls
            .get_mut(pr_url)
            .ok_or_else(|| Error::not_found("pull request", pr_url))?;
        pr.status = PrStatus::Merged;
        Ok(())
    }
}
