//! General-purpose merge policies over pull-request state.

use super::{MergePolicy, MergePolicyEvaluationResult, PullRequestUpdateSummary};
use crate::error::Result;
use crate::remote::{CheckStatus, Remote, ReviewState};
use async_trait::async_trait;
use std::collections::BTreeSet;

pub const ALL_CHECKS_SUCCESSFUL: &str = "AllChecksSuccessful";
pub const NO_REQUESTED_CHANGES: &str = "NoRequestedChanges";
pub const DONT_AUTOMERGE_DOWNGRADES: &str = "DontAutomergeDowngrades";
pub const STANDARD: &str = "Standard";

/// Every status check of the PR succeeded, except those in `ignore_checks`.
#[derive(Debug, Default)]
pub struct AllChecksSuccessful {
    pub ignore_checks: BTreeSet<String>,
}

#[async_trait]
impl MergePolicy for AllChecksSuccessful {
    fn name(&self) -> &str {
        ALL_CHECKS_SUCCESSFUL
    }

    fn display_name(&self) -> String {
        "All Checks Successful".to_string()
    }

    async fn evaluate(&self, pr: &PullRequestUpdateSummary, remote: &dyn Remote) -> Result<MergePolicyEvaluationResult> {
        let checks: Vec<_> = remote
            .get_pull_request_checks(&pr.url)
            .await?
            .into_iter()
            .filter(|c| !c.is_merge_policy && !self.ignore_checks.contains(&c.name))
            .collect();
        if checks.is_empty() {
            return Ok(self.pending("Waiting for checks."));
        }

        let failed: Vec<&str> = checks
            .iter()
            .filter(|c| c.status == CheckStatus::Failed)
            .map(|c| c.name.as_str())
            .collect();
        if !failed.is_empty() {
            let message = failed
                .iter()
                .map(|name| format!("- {}", name))
                .collect::<Vec<_>>()
                .join("\n");
            return Ok(self.fail(format!("Unsuccessful checks: {}", failed.len()), message));
        }
        let pending = checks.iter().filter(|c| c.status == CheckStatus::Pending).count();
        if pending > 0 {
            return Ok(self.pending(format!("{} check(s) still running", pending)));
        }
        Ok(self.succeed(format!("Successful checks: {}", checks.len())))
    }
}

/// No reviewer requested changes.
#[derive(Debug, Default)]
pub struct NoRequestedChanges;

#[async_trait]
impl MergePolicy for NoRequestedChanges {
    fn name(&self) -> &str {
        NO_REQUESTED_CHANGES
    }

    fn display_name(&self) -> String {
        "No Requested Changes".to_string()
    }

    async fn evaluate(&self, pr: &PullRequestUpdateSummary, remote: &dyn Remote) -> Result<MergePolicyEvaluationResult> {
        let reviews = remote.get_pull_request_reviews(&pr.url).await?;
        if reviews
            .iter()
            .any(|r| matches!(r, ReviewState::ChangesRequested | ReviewState::Rejected))
        {
            return Ok(self.fail("Changes requested", "A reviewer requested changes to this pull request."));
        }
        Ok(self.succeed("No changes requested"))
    }
}

/// No dependency of the PR moves to a lower version.
#[derive(Debug, Default)]
pub struct DontAutomergeDowngrades;

#[async_trait]
impl MergePolicy for DontAutomergeDowngrades {
    fn name(&self) -> &str {
        DONT_AUTOMERGE_DOWNGRADES
    }

    fn display_name(&self) -> String {
        "Do not automerge downgrades".to_string()
    }

    async fn evaluate(&self, pr: &PullRequestUpdateSummary, _remote: &dyn Remote) -> Result<MergePolicyEvaluationResult> {
        let downgrades: Vec<String> = pr
            .required_updates
            .iter()
            .filter_map(|update| {
                let from = semver::Version::parse(update.from_version.as_deref()?).ok()?;
                let to = semver::Version::parse(update.to_version.as_deref()?).ok()?;
                (to.cmp_precedence(&from).is_lt()).then(|| format!("- {} from {} to {}", update.name, from, to))
            })
            .collect();
        if downgrades.is_empty() {
            Ok(self.succeed("No version downgrade detected"))
        } else {
            Ok(self.fail(
                "Version downgrade detected",
                format!(
                    "This pull request downgrades the following dependencies and must be merged by hand:\n{}",
                    downgrades.join("\n")
                ),
            ))
        }
    }
}
