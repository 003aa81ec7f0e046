//! Consistency of the source manifest in forward-flow pull requests.
//!
//! A forward flow may only move the records of the repositories it flows.
//! The policy compares the source manifest of the PR head with the claims of
//! the PR (commit and BAR id per flowed build) and with the manifest of the
//! target branch.

use super::{MergePolicy, MergePolicyEvaluationResult, PullRequestUpdateSummary};
use crate::codeflow::Direction;
use crate::error::Result;
use crate::manifest::{RepositoryRecord, SourceManifest};
use crate::remote::Remote;
use async_trait::async_trait;
use log::warn;

pub const NAME: &str = "CodeFlowCheck";

#[derive(Debug, Default)]
pub struct ForwardFlowPolicy;

fn find<'a>(manifest: &'a SourceManifest, remote_uri: &str) -> Option<&'a RepositoryRecord> {
    manifest
        .repositories()
        .iter()
        .find(|r| r.remote_uri.eq_ignore_ascii_case(remote_uri))
}

fn check_claims(pr: &PullRequestUpdateSummary, head: &SourceManifest) -> Vec<String> {
    let mut errors = Vec::new();
    for update in &pr.contained_updates {
        let Some(record) = find(head, &update.source_repo) else {
            errors.push(format!(
                "The source manifest has no entry for `{}`, which this pull request updates.",
                update.source_repo
            ));
            continue;
        };
        if record.commit_sha != update.commit_sha {
            errors.push(format!(
                "Commit SHA `{}` of `{}` in the source manifest does not match the flowed commit `{}`.",
                record.commit_sha, update.source_repo, update.commit_sha
            ));
        }
        if record.bar_id != Some(update.build_id) {
            errors.push(format!(
                "BAR ID `{}` of `{}` in the source manifest does not match the flowed build `{}`.",
                record
                    .bar_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "none".to_string()),
                update.source_repo,
                update.build_id
            ));
        }
    }
    errors
}

fn check_untouched(pr: &PullRequestUpdateSummary, head: &SourceManifest, target: &SourceManifest) -> Vec<String> {
    let updated: Vec<&str> = pr
        .contained_updates
        .iter()
        .map(|u| u.source_repo.as_str())
        .collect();
    let is_updated = |uri: &str| updated.iter().any(|u| u.eq_ignore_ascii_case(uri));
    let flowed = updated
        .iter()
        .map(|u| format!("`{}`", u))
        .collect::<Vec<_>>()
        .join(", ");

    let mut errors = Vec::new();
    for record in head.repositories() {
        if is_updated(&record.remote_uri) {
            continue;
        }
        match find(target, &record.remote_uri) {
            None => errors.push(format!(
                "The source manifest contains a new entry for `{}`.",
                record.remote_uri
            )),
            Some(base) if base != record => {
                errors.push(format!(
                    "The entry of `{}` changed. Only changes to the entries of {} are expected.",
                    record.remote_uri, flowed
                ))
            }
            Some(_) => {}
        }
    }
    for record in target.repositories() {
        if find(head, &record.remote_uri).is_none() {
            errors.push(format!(
                "The source manifest is missing the entry for `{}`; removal of entries is not expected.",
                record.remote_uri
            ));
        }
    }
    errors
}

#[async_trait]
impl MergePolicy for ForwardFlowPolicy {
    fn name(&self) -> &str {
        NAME
    }

    fn display_name(&self) -> String {
        "Forward Flow Merge Policy".to_string()
    }

    async fn evaluate(&self, pr: &PullRequestUpdateSummary, remote: &dyn Remote) -> Result<MergePolicyEvaluationResult> {
        if pr.direction != Some(Direction::Forward) {
            return Ok(self.succeed("Forward flow checks do not apply to this pull request"));
        }

        let head = match remote.get_source_manifest(&pr.target_repo_url, &pr.head_branch).await {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("Failed to read the source manifest of {}: {}", pr.head_branch, e);
                return Ok(self.fail_transiently(
                    "Error while retrieving head branch source manifest",
                    e.to_string(),
                ));
            }
        };

        let mut errors = check_claims(pr, &head);

        if let Some(target_branch) = &pr.target_branch {
            let target = match remote.get_source_manifest(&pr.target_repo_url, target_branch).await {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!("Failed to read the source manifest of {}: {}", target_branch, e);
                    return Ok(self.fail_transiently(
                        "Error while retrieving target branch source manifest",
                        e.to_string(),
                    ));
                }
            };
            errors.extend(check_untouched(pr, &head, &target));
        }

        if errors.is_empty() {
            Ok(self.succeed("Forward flow checks succeeded"))
        } else {
            let message = errors
                .iter()
                .map(|e| format!("- {}", e))
                .collect::<Vec<_>>()
                .join("\n");
            Ok(self.fail("Forward flow checks failed", message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Status, SubscriptionUpdateSummary};
    use crate::remote::MemoryRemote;

    const VMR: &str = "https://github.com/test/vmr";
    const REPO1: &str = "https://github.com/test/repo1";
    const REPO2: &str = "https://github.com/test/repo2";
    const REPO3: &str = "https://github.com/test/repo3";

    fn summary(target_branch: Option<&str>) -> PullRequestUpdateSummary {
        PullRequestUpdateSummary {
            url: format!("{}/pull/123", VMR),
            target_repo_url: VMR.to_string(),
            head_branch: "pr-branch".to_string(),
            target_branch: target_branch.map(str::to_string),
            contained_updates: vec![SubscriptionUpdateSummary {
                subscription_id: "sub".to_string(),
                build_id: 101,
                source_repo: REPO1.to_string(),
                commit_sha: "updated123".to_string(),
            }],
            required_updates: Vec::new(),
            direction: Some(Direction::Forward),
        }
    }

    fn manifest(repos: &[(&str, &str, u64)]) -> String {
        let mut manifest = SourceManifest::new();
        for (i, (uri, sha, bar)) in repos.iter().enumerate() {
            manifest.update_version(&format!("repo{}", i), uri, sha, None, Some(*bar));
        }
        manifest.to_json().unwrap()
    }

    fn remote(head: Option<String>, target: Option<String>) -> MemoryRemote {
        let remote = MemoryRemote::new();
        match head {
            Some(json) => remote.set_file(VMR, "pr-branch", SourceManifest::RELATIVE_PATH, &json).unwrap(),
            None => remote.fail_branch(VMR, "pr-branch").unwrap(),
        }
        match target {
            Some(json) => remote.set_file(VMR, "main", SourceManifest::RELATIVE_PATH, &json).unwrap(),
            None => remote.fail_branch(VMR, "main").unwrap(),
        }
        remote
    }

    async fn evaluate(pr: &PullRequestUpdateSummary, remote: &MemoryRemote) -> MergePolicyEvaluationResult {
        ForwardFlowPolicy.evaluate(pr, remote).await.unwrap()
    }

    #[tokio::test]
    async fn test_all_checks_pass() {
        let remote = remote(
            Some(manifest(&[(REPO1, "updated123", 101), (REPO2, "def456", 200)])),
            Some(manifest(&[(REPO1, "abc123", 100), (REPO2, "def456", 200)])),
        );
        let result = evaluate(&summary(Some("main")), &remote).await;
        assert_eq!(result.status, Status::DecisiveSuccess);
        assert!(result.title.contains("Forward flow checks succeeded"));
        assert_eq!(result.policy_name, NAME);
    }

    #[tokio::test]
    async fn test_bar_id_mismatch() {
        let head = manifest(&[(REPO1, "updated123", 100), (REPO2, "def456", 200)]);
        let remote = remote(Some(head.clone()), Some(head));
        let result = evaluate(&summary(Some("main")), &remote).await;
        assert_eq!(result.status, Status::DecisiveFailure);
        assert!(result.message.contains("BAR ID"));
        assert!(result.message.contains("does not match"));
    }

    #[tokio::test]
    async fn test_commit_sha_mismatch() {
        let head = manifest(&[(REPO1, "abc123", 101), (REPO2, "def456", 200)]);
        let remote = remote(Some(head.clone()), Some(head));
        let result = evaluate(&summary(Some("main")), &remote).await;
        assert_eq!(result.status, Status::DecisiveFailure);
        assert!(result.message.contains("Commit SHA"));
        assert!(result.message.contains("does not match"));
    }

    #[tokio::test]
    async fn test_unrelated_repo_changed() {
        let remote = remote(
            Some(manifest(&[(REPO1, "updated123", 101), (REPO2, "changed-sha", 200)])),
            Some(manifest(&[(REPO1, "abc123", 100), (REPO2, "def456", 200)])),
        );
        let result = evaluate(&summary(Some("main")), &remote).await;
        assert_eq!(result.status, Status::DecisiveFailure);
        assert!(result.message.contains(REPO2));
        assert!(result.message.contains("Only changes to the"));
    }

    #[tokio::test]
    async fn test_unrelated_repo_package_version_or_path_changed() {
        let with_repo2 = |path: &str, version: &str| {
            let mut manifest = SourceManifest::new();
            manifest.update_version("repo1", REPO1, "updated123", None, Some(101));
            manifest.update_version(path, REPO2, "def456", Some(version), Some(200));
            manifest.to_json().unwrap()
        };
        let target = with_repo2("repo2", "1.0.0");

        for head in [with_repo2("repo2", "9.9.9"), with_repo2("moved/repo2", "1.0.0")] {
            let remote = remote(Some(head), Some(target.clone()));
            let result = evaluate(&summary(Some("main")), &remote).await;
            assert_eq!(result.status, Status::DecisiveFailure);
            assert!(result.message.contains(REPO2), "{}", result.message);
            assert!(result.message.contains("Only changes to the"));
        }

        let remote = remote(Some(target.clone()), Some(target));
        assert_eq!(evaluate(&summary(Some("main")), &remote).await.status, Status::DecisiveSuccess);
    }

    #[tokio::test]
    async fn test_new_repo_added() {
        let remote = remote(
            Some(manifest(&[
                (REPO1, "updated123", 101),
                (REPO2, "def456", 200),
                (REPO3, "ghi789", 300),
            ])),
            Some(manifest(&[(REPO1, "abc123", 100), (REPO2, "def456", 200)])),
        );
        let result = evaluate(&summary(Some("main")), &remote).await;
        assert_eq!(result.status, Status::DecisiveFailure);
        assert!(result.message.contains(REPO3));
        assert!(result.message.contains("new entry"));
    }

    #[tokio::test]
    async fn test_repo_removed() {
        let remote = remote(
            Some(manifest(&[(REPO1, "updated123", 101)])),
            Some(manifest(&[(REPO1, "abc123", 100), (REPO2, "def456", 200)])),
        );
        let result = evaluate(&summary(Some("main")), &remote).await;
        assert_eq!(result.status, Status::DecisiveFailure);
        assert!(result.message.contains(REPO2));
        assert!(result.message.contains("removal"));
    }

    #[tokio::test]
    async fn test_head_manifest_failure_is_transient() {
        let remote = remote(None, Some(manifest(&[])));
        let result = evaluate(&summary(Some("main")), &remote).await;
        assert_eq!(result.status, Status::TransientFailure);
        assert!(result.title.contains("Error while retrieving head branch source manifest"));
    }

    #[tokio::test]
    async fn test_target_manifest_failure_is_transient() {
        let remote = remote(
            Some(manifest(&[(REPO1, "updated123", 101), (REPO2, "def456", 200)])),
            None,
        );
        let result = evaluate(&summary(Some("main")), &remote).await;
        assert_eq!(result.status, Status::TransientFailure);
        assert!(result.title.contains("Error while retrieving target branch source manifest"));
    }

    #[tokio::test]
    async fn test_no_target_branch_skips_comparison() {
        // The target branch fails, so reaching it would not be a success.
        let remote = remote(
            Some(manifest(&[(REPO1, "updated123", 101), (REPO2, "def456", 200)])),
            None,
        );
        let result = evaluate(&summary(None), &remote).await;
        assert_eq!(result.status, Status::DecisiveSuccess);
    }
}
