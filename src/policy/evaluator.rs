//! Building merge policies from subscription configuration and running them.

use super::checks::{
    AllChecksSuccessful, DontAutomergeDowngrades, NoRequestedChanges, ALL_CHECKS_SUCCESSFUL,
    DONT_AUTOMERGE_DOWNGRADES, NO_REQUESTED_CHANGES, STANDARD,
};
use super::forward_flow::{self, ForwardFlowPolicy};
use super::version_details_props::{self, VersionDetailsPropsPolicy};
use super::{MergePolicy, MergePolicyEvaluationResult, MergePolicyEvaluationResults, PullRequestUpdateSummary, Status};
use crate::error::{Error, Result};
use crate::flow::MergePolicyDefinition;
use crate::remote::Remote;
use log::{debug, warn};

/// Property of `AllChecksSuccessful` listing checks to ignore.
pub const IGNORE_CHECKS: &str = "ignoreChecks";

/// Alternative configuration name of the forward-flow policy.
const FORWARD_FLOW_ALIAS: &str = "ForwardFlow";

fn ignore_checks(definition: &MergePolicyDefinition) -> Result<AllChecksSuccessful> {
    let ignore_checks = match definition.properties.get(IGNORE_CHECKS) {
        None => Default::default(),
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| Error::Policy {
            policy: definition.name.clone(),
            message: format!("'{}' must be a list of check names: {}", IGNORE_CHECKS, e),
        })?,
    };
    Ok(AllChecksSuccessful { ignore_checks })
}

/// Instantiate the policies of `definitions`, expanding `Standard`.
pub fn build_policies(definitions: &[MergePolicyDefinition]) -> Result<Vec<Box<dyn MergePolicy>>> {
    let mut policies: Vec<Box<dyn MergePolicy>> = Vec::new();
    for definition in definitions {
        match definition.name.as_str() {
            ALL_CHECKS_SUCCESSFUL => policies.push(Box::new(ignore_checks(definition)?)),
            NO_REQUESTED_CHANGES => policies.push(Box::new(NoRequestedChanges)),
            DONT_AUTOMERGE_DOWNGRADES => policies.push(Box::new(DontAutomergeDowngrades)),
            STANDARD => {
                policies.push(Box::new(ignore_checks(definition)?));
                policies.push(Box::new(NoRequestedChanges));
                policies.push(Box::new(DontAutomergeDowngrades));
            }
            forward_flow::NAME | FORWARD_FLOW_ALIAS => policies.push(Box::new(ForwardFlowPolicy)),
            version_details_props::NAME => policies.push(Box::new(VersionDetailsPropsPolicy)),
            other => {
                return Err(Error::Policy {
                    policy: other.to_string(),
                    message: "unknown merge policy".to_string(),
                })
            }
        }
    }
    Ok(policies)
}

/// Runs every configured policy against a pull request.
pub struct MergePolicyEvaluator {
    policies: Vec<Box<dyn MergePolicy>>,
}

impl MergePolicyEvaluator {
    pub fn new(policies: Vec<Box<dyn MergePolicy>>) -> Self {
        Self { policies }
    }

    pub fn from_definitions(definitions: &[MergePolicyDefinition]) -> Result<Self> {
        Ok(Self::new(build_policies(definitions)?))
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Evaluate every policy in order. A policy that errors yields a
    /// transient failure and the remaining policies still run.
    pub async fn evaluate(
        &self,
        pr: &PullRequestUpdateSummary,
        remote: &dyn Remote,
        target_commit_sha: Option<String>,
    ) -> MergePolicyEvaluationResults {
        let mut results = Vec::with_capacity(self.policies.len());
        for policy in &self.policies {
            let result = match policy.evaluate(pr, remote).await {
                Ok(result) => result,
                Err(e) => {
                    warn!("Merge policy {} failed on {}: {}", policy.name(), pr.url, e);
                    MergePolicyEvaluationResult {
                        status: Status::TransientFailure,
                        title: format!("Failed to evaluate {}", policy.display_name()),
                        message: e.to_string(),
                        policy_name: policy.name().to_string(),
                        policy_display_name: policy.display_name(),
                    }
                }
            };
            debug!("{} → {:?}", result.policy_name, result.status);
            results.push(result);
        }
        MergePolicyEvaluationResults::new(results, target_commit_sha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;

    fn summary() -> PullRequestUpdateSummary {
        PullRequestUpdateSummary {
            url: "https://github.com/test/repo/pull/1".to_string(),
            target_repo_url: "https://github.com/test/repo".to_string(),
            head_branch: "head".to_string(),
            target_branch: Some("main".to_string()),
            contained_updates: Vec::new(),
            required_updates: Vec::new(),
            direction: None,
        }
    }

    #[test]
    fn test_standard_expands() {
        let policies = build_policies(&[MergePolicyDefinition::new("Standard")]).unwrap();
        let names: Vec<&str> = policies.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec![ALL_CHECKS_SUCCESSFUL, NO_REQUESTED_CHANGES, DONT_AUTOMERGE_DOWNGRADES]);
    }

    #[test]
    fn test_unknown_policy_is_an_error() {
        assert!(matches!(
            build_policies(&[MergePolicyDefinition::new("Nope")]),
            Err(Error::Policy { .. })
        ));
    }

    #[test]
    fn test_ignore_checks_must_be_a_list() {
        let mut definition = MergePolicyDefinition::new(ALL_CHECKS_SUCCESSFUL);
        definition
            .properties
            .insert(IGNORE_CHECKS.to_string(), serde_json::json!("license/cla"));
        assert!(build_policies(&[definition]).is_err());
    }

    #[tokio::test]
    async fn test_policy_errors_become_transient_failures() {
        // Reviews are fine, but reading the props file fails.
        let pr = PullRequestUpdateSummary {
            direction: Some(crate::codeflow::Direction::Back),
            ..summary()
        };
        let remote = MemoryRemote::new();
        remote.fail_branch(&pr.target_repo_url, &pr.head_branch).unwrap();
        let evaluator = MergePolicyEvaluator::from_definitions(&[
            MergePolicyDefinition::new(version_details_props::NAME),
            MergePolicyDefinition::new(NO_REQUESTED_CHANGES),
        ])
        .unwrap();

        let results = evaluator.evaluate(&pr, &remote, None).await;
        assert_eq!(results.results.len(), 2);
        assert_eq!(results.results[0].status, Status::TransientFailure);
        assert_eq!(results.results[1].status, Status::DecisiveSuccess);
        assert!(results.failed());
        assert!(!results.succeeded());
    }

    struct Broken;

    #[async_trait::async_trait]
    impl MergePolicy for Broken {
        fn name(&self) -> &str {
            "Broken"
        }

        async fn evaluate(&self, _pr: &PullRequestUpdateSummary, _remote: &dyn Remote) -> Result<MergePolicyEvaluationResult> {
            Err(Error::remote("https://github.com/test/repo", "timed out"))
        }
    }

    #[tokio::test]
    async fn test_erroring_policy_does_not_stop_evaluation() {
        let evaluator = MergePolicyEvaluator::new(vec![Box::new(Broken), Box::new(NoRequestedChanges)]);
        let results = evaluator.evaluate(&summary(), &MemoryRemote::new(), Some("abc".to_string())).await;
        assert_eq!(results.results[0].policy_name, "Broken");
        assert_eq!(results.results[0].status, Status::TransientFailure);
        assert!(results.results[0].message.contains("timed out"));
        assert_eq!(results.results[1].status, Status::DecisiveSuccess);
        assert_eq!(results.target_commit_sha.as_deref(), Some("abc"));
    }
}
