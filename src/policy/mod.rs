//! # Merge Policies
//!
//! Checks gating the merge of a dependency or code-flow pull request.
//!
//! Every policy configured on a subscription runs on every evaluation, in
//! the configured order. A policy never aborts the evaluation: its own
//! failures become a [`Status::TransientFailure`] result scoped to it, and
//! the queue re-delivers the check later.
//!
//! | Name                      | Policy                                  |
//! |---------------------------|-----------------------------------------|
//! | `AllChecksSuccessful`     | [`checks::AllChecksSuccessful`]         |
//! | `NoRequestedChanges`      | [`checks::NoRequestedChanges`]          |
//! | `DontAutomergeDowngrades` | [`checks::DontAutomergeDowngrades`]     |
//! | `Standard`                | the three above                         |
//! | `CodeFlowCheck`           | [`forward_flow::ForwardFlowPolicy`]     |
//! | `VersionDetailsProps`     | [`version_details_props::VersionDetailsPropsPolicy`] |

pub mod checks;
pub mod evaluator;
pub mod forward_flow;
pub mod version_details_props;

use crate::codeflow::Direction;
use crate::error::Result;
use crate::remote::Remote;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use evaluator::MergePolicyEvaluator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Pending,
    DecisiveSuccess,
    DecisiveFailure,
    /// Failed for a reason that may go away, such as a flaky remote call.
    TransientFailure,
}

impl Status {
    pub fn is_failure(&self) -> bool {
        matches!(self, Status::DecisiveFailure | Status::TransientFailure)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergePolicyEvaluationResult {
    pub status: Status,
    pub title: String,
    pub message: String,
    pub policy_name: String,
    pub policy_display_name: String,
}

/// Outcome of one evaluation, one result per policy that ran.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergePolicyEvaluationResults {
    pub results: Vec<MergePolicyEvaluationResult>,
    /// Tip of the target branch the policies were evaluated against.
    #[serde(default)]
    pub target_commit_sha: Option<String>,
}

impl MergePolicyEvaluationResults {
    pub fn new(results: Vec<MergePolicyEvaluationResult>, target_commit_sha: Option<String>) -> Self {
        Self {
            results,
            target_commit_sha,
        }
    }

    /// The aggregate decision: no failure and at least one decisive success.
    pub fn succeeded(&self) -> bool {
        !self.failed() && self.results.iter().any(|r| r.status == Status::DecisiveSuccess)
    }

    pub fn failed(&self) -> bool {
        self.results.iter().any(|r| r.status.is_failure())
    }

    pub fn pending(&self) -> bool {
        self.results.iter().any(|r| r.status == Status::Pending)
    }

    /// Results that block the merge.
    pub fn blocking(&self) -> impl Iterator<Item = &MergePolicyEvaluationResult> {
        self.results
            .iter()
            .filter(|r| r.status != Status::DecisiveSuccess)
    }
}

impl fmt::Display for MergePolicyEvaluationResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for result in &self.results {
            let mark = match result.status {
                Status::DecisiveSuccess => "✔",
                Status::Pending => "…",
                Status::DecisiveFailure | Status::TransientFailure => "✘",
            };
            writeln!(f, "{} {}: {}", mark, result.policy_display_name, result.title)?;
            if !result.message.is_empty() && result.status != Status::DecisiveSuccess {
                for line in result.message.lines() {
                    writeln!(f, "    {}", line)?;
                }
            }
        }
        Ok(())
    }
}

/// A build flowed by the pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionUpdateSummary {
    pub subscription_id: String,
    pub build_id: u64,
    pub source_repo: String,
    pub commit_sha: String,
}

/// A dependency version change made by the pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyUpdateSummary {
    pub name: String,
    #[serde(default)]
    pub from_version: Option<String>,
    #[serde(default)]
    pub to_version: Option<String>,
}

/// What the policies know about the pull request under evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestUpdateSummary {
    pub url: String,
    pub target_repo_url: String,
    pub head_branch: String,
    #[serde(default)]
    pub target_branch: Option<String>,
    #[serde(default)]
    pub contained_updates: Vec<SubscriptionUpdateSummary>,
    #[serde(default)]
    pub required_updates: Vec<DependencyUpdateSummary>,
    /// `None` for a plain dependency-flow pull request.
    #[serde(default)]
    pub direction: Option<Direction>,
}

/// One merge check.
#[async_trait]
pub trait MergePolicy: Send + Sync {
    /// Name used in subscription configuration.
    fn name(&self) -> &str;

    fn display_name(&self) -> String {
        self.name().to_string()
    }

    async fn evaluate(&self, pr: &PullRequestUpdateSummary, remote: &dyn Remote) -> Result<MergePolicyEvaluationResult>;

    fn result(&self, status: Status, title: impl Into<String>, message: impl Into<String>) -> MergePolicyEvaluationResult
    where
        Self: Sized,
    {
        MergePolicyEvaluationResult {
            status,
            title: title.into(),
            message: message.into(),
            policy_name: self.name().to_string(),
            policy_display_name: self.display_name(),
        }
    }

    fn succeed(&self, title: impl Into<String>) -> MergePolicyEvaluationResult
    where
        Self: Sized,
    {
        self.result(Status::DecisiveSuccess, title, "")
    }

    fn fail(&self, title: impl Into<String>, message: impl Into<String>) -> MergePolicyEvaluationResult
    where
        Self: Sized,
    {
        self.result(Status::DecisiveFailure, title, message)
    }

    fn fail_transiently(&self, title: impl Into<String>, message: impl Into<String>) -> MergePolicyEvaluationResult
    where
        Self: Sized,
    {
        self.result(Status::TransientFailure, title, message)
    }

    fn pending(&self, title: impl Into<String>) -> MergePolicyEvaluationResult
    where
        Self: Sized,
    {
        self.result(Status::Pending, title, "")
    }
}
