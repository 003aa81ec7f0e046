//! # Remote Collaborators
//!
//! Interfaces to the services code flow depends on but does not implement:
//!
//! - [`Remote`]: a repository host (file contents, pull requests)
//! - [`BuildRegistry`]: builds, channels and subscriptions
//!
//! Both are async and backend-agnostic. In-memory implementations live in
//! [`memory`]; the CLI uses the registry built from its configuration file.

pub mod memory;

use crate::error::Result;
use crate::flow::{Build, DefaultChannel, Subscription};
use crate::manifest::SourceManifest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use memory::{MemoryRegistry, MemoryRemote};

/// State of a pull request on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrStatus {
    Open,
    Merged,
    Closed,
}

/// A pull request as the host reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub url: String,
    pub title: String,
    pub description: String,
    pub head_branch: String,
    pub base_branch: String,
    pub status: PrStatus,
    /// Tip of the base branch the checks ran against.
    #[serde(default)]
    pub target_branch_commit_sha: Option<String>,
}

/// Fields of a pull request to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPullRequest {
    pub title: String,
    pub description: String,
    pub head_branch: String,
    pub base_branch: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckStatus {
    Pending,
    Succeeded,
    Failed,
}

/// A status check reported on a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrCheck {
    pub name: String,
    pub status: CheckStatus,
    /// Checks published by the merge policies themselves are not gated on.
    #[serde(default)]
    pub is_merge_policy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Rejected,
}

/// A repository host.
#[async_trait]
pub trait Remote: Send + Sync {
    /// Content of `path` in `repo_url` at `branch`. A missing file is
    /// [`crate::error::Error::NotFound`].
    async fn get_file_contents(&self, path: &str, repo_url: &str, branch: &str) -> Result<String>;

    /// The source manifest of a VMR branch.
    async fn get_source_manifest(&self, repo_url: &str, branch: &str) -> Result<SourceManifest> {
        let json = self
            .get_file_contents(SourceManifest::RELATIVE_PATH, repo_url, branch)
            .await?;
        SourceManifest::from_json(&json)
    }

    async fn get_latest_commit(&self, repo_url: &str, branch: &str) -> Result<String>;

    /// Open a pull request. Returns its URL.
    async fn create_pull_request(&self, repo_url: &str, pr: &NewPullRequest) -> Result<String>;

    async fn update_pull_request(&self, pr_url: &str, title: &str, description: &str) -> Result<()>;

    async fn get_pull_request(&self, pr_url: &str) -> Result<PullRequest>;

    async fn get_pull_request_checks(&self, pr_url: &str) -> Result<Vec<PrCheck>>;

    async fn get_pull_request_reviews(&self, pr_url: &str) -> Result<Vec<ReviewState>>;

    async fn merge_pull_request(&self, pr_url: &str) -> Result<()>;
}

/// Builds, channels and subscriptions.
#[async_trait]
pub trait BuildRegistry: Send + Sync {
    async fn get_build(&self, id: u64) -> Result<Build>;

    async fn get_subscription(&self, id: &str) -> Result<Subscription>;

    /// Newest build of `repository` published to `channel`.
    async fn get_latest_build(&self, repository: &str, channel: &str) -> Result<Option<Build>>;

    /// Enabled subscriptions of `channel` whose source is `repository`.
    async fn get_subscriptions(&self, repository: &str, channel: &str) -> Result<Vec<Subscription>>;

    /// Default channels matching a repository branch.
    async fn get_default_channels(&self, repository: &str, branch: &str) -> Result<Vec<DefaultChannel>>;

    /// Publish a build to a channel. Publishing twice is a no-op.
    async fn assign_build_to_channel(&self, build_id: u64, channel: &str) -> Result<()>;

    /// Remember the last build a subscription's merged PR applied.
    async fn set_last_applied_build(&self, subscription_id: &str, build_id: u64) -> Result<()>;
}
