//! Pull-request updater: one state machine per subscription or batch.
//!
//! ```text
//!                 new build, no PR
//!  NoPendingUpdate ───────────────▶ InProgress(pr)
//!        ▲                            │   ▲
//!        │ merged / closed            │   │ flowed into the open PR
//!        └────────────────────────────┘   │
//!                                     PendingUpdate(build)
//!                                     (PR not updatable; retried later)
//! ```
//!
//! An open PR is updatable unless its merge policies are still pending or it
//! is in conflict and nobody pushed to its head branch since. `force`
//! bypasses the check. Handlers are idempotent: re-delivering an update that
//! the PR already contains is a no-op.

use crate::codeflow::Direction;
use crate::error::{Error, Result};
use crate::flow::{Build, MergePolicyDefinition, Subscription, UpdaterId};
use crate::path::short_sha;
use crate::policy::{
    DependencyUpdateSummary, MergePolicyEvaluationResults, MergePolicyEvaluator, PullRequestUpdateSummary,
    SubscriptionUpdateSummary,
};
use crate::remote::{BuildRegistry, NewPullRequest, PrStatus, PullRequest, Remote};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Whether the last flow into the PR left conflicts behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeState {
    Mergeable,
    Conflict,
}

/// A pull request opened and tracked by an updater.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InProgressPullRequest {
    pub url: String,
    pub head_branch: String,
    /// Head of the PR branch after our last push.
    pub head_sha: String,
    pub contained_updates: Vec<SubscriptionUpdateSummary>,
    pub required_updates: Vec<DependencyUpdateSummary>,
    pub direction: Option<Direction>,
    pub merge_state: MergeState,
    #[serde(default)]
    pub merge_policy_result: Option<MergePolicyEvaluationResults>,
}

impl InProgressPullRequest {
    fn contains(&self, subscription_id: &str, build_id: u64) -> bool {
        self.contained_updates
            .iter()
            .any(|u| u.subscription_id == subscription_id && u.build_id >= build_id)
    }

    fn summary(&self, target_repo_url: &str, target_branch: &str) -> PullRequestUpdateSummary {
        PullRequestUpdateSummary {
            url: self.url.clone(),
            target_repo_url: target_repo_url.to_string(),
            head_branch: self.head_branch.clone(),
            target_branch: Some(target_branch.to_string()),
            contained_updates: self.contained_updates.clone(),
            required_updates: self.required_updates.clone(),
            direction: self.direction,
        }
    }
}

/// A build waiting for its PR to become updatable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingBuild {
    pub build_id: u64,
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdaterState {
    NoPendingUpdate,
    PendingUpdate {
        subscription_id: String,
        build: PendingBuild,
        /// The PR that blocked the update, if any.
        pull_request: Option<InProgressPullRequest>,
    },
    InProgress(InProgressPullRequest),
}

impl UpdaterState {
    pub fn pull_request(&self) -> Option<&InProgressPullRequest> {
        match self {
            UpdaterState::NoPendingUpdate => None,
            UpdaterState::PendingUpdate { pull_request, .. } => pull_request.as_ref(),
            UpdaterState::InProgress(pr) => Some(pr),
        }
    }
}

/// What a flow into a head branch produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowOutcome {
    pub branch: String,
    pub head_sha: String,
    pub had_updates: bool,
    pub conflicted_files: Vec<String>,
    pub required_updates: Vec<DependencyUpdateSummary>,
}

/// Performs the code or dependency flow of a build into a branch.
#[async_trait]
pub trait FlowExecutor: Send + Sync {
    /// Flow `build` for `subscription`. `head_branch` is the branch of the
    /// open PR to update, or `None` when a new PR will be opened.
    async fn flow(&self, subscription: &Subscription, build: &Build, head_branch: Option<&str>) -> Result<FlowOutcome>;
}

/// Status of a tracked PR after checking it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullRequestStatus {
    /// Merged or closed; the updater no longer tracks it.
    Completed,
    InProgressCanUpdate,
    InProgressCannotUpdate,
}

/// Outcome of processing one update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Created(String),
    Updated(String),
    /// The PR is not updatable; the build is remembered for later.
    Deferred(String),
    /// The flow produced no changes.
    NoChanges,
    /// The update was already applied or a newer one is tracked.
    Skipped,
}

/// Outcome of checking the tracked PR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub status: Option<PullRequestStatus>,
    /// A deferred update that can now be retried.
    pub retry: Option<(String, PendingBuild)>,
}

fn pr_title(direction: Option<Direction>, target_branch: &str, updates: &[SubscriptionUpdateSummary]) -> String {
    let sources = {
        let mut repos: Vec<&str> = updates.iter().map(|u| u.source_repo.as_str()).collect();
        repos.dedup();
        match repos.as_slice() {
            [one] => one.trim_end_matches('/').rsplit('/').next().unwrap_or(one).to_string(),
            _ => "multiple repositories".to_string(),
        }
    };
    match direction {
        Some(_) => format!("[{}] Source code updates from {}", target_branch, sources),
        None => format!("[{}] Update dependencies from {}", target_branch, sources),
    }
}

fn pr_description(pr_updates: &[SubscriptionUpdateSummary], required: &[DependencyUpdateSummary]) -> String {
    let mut text = String::from("This pull request is created and updated automatically.\n\n");
    for update in pr_updates {
        text.push_str(&format!(
            "- Subscription {}: build {} of {} ({})\n",
            update.subscription_id,
            update.build_id,
            update.source_repo,
            short_sha(&update.commit_sha)
        ));
    }
    if !required.is_empty() {
        text.push_str("\nUpdated dependencies:\n");
        for dep in required {
            text.push_str(&format!(
                "- {}: {} → {}\n",
                dep.name,
                dep.from_version.as_deref().unwrap_or("(none)"),
                dep.to_version.as_deref().unwrap_or("(none)")
            ));
        }
    }
    text
}

fn merge_required(existing: &mut Vec<DependencyUpdateSummary>, updates: Vec<DependencyUpdateSummary>) {
    for update in updates {
        match existing.iter_mut().find(|d| d.name == update.name) {
            // Keep the original starting version across several flows.
            Some(d) => d.to_version = update.to_version,
            None => existing.push(update),
        }
    }
}

/// Drives the PRs of every subscription and batch.
pub struct PullRequestUpdater {
    registry: Arc<dyn BuildRegistry>,
    remote: Arc<dyn Remote>,
    executor: Arc<dyn FlowExecutor>,
    states: Mutex<HashMap<UpdaterId, UpdaterState>>,
}

impl PullRequestUpdater {
    pub fn new(registry: Arc<dyn BuildRegistry>, remote: Arc<dyn Remote>, executor: Arc<dyn FlowExecutor>) -> Self {
        Self {
            registry,
            remote,
            executor,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<dyn BuildRegistry> {
        &self.registry
    }

    fn states(&self) -> Result<MutexGuard<'_, HashMap<UpdaterId, UpdaterState>>> {
        self.states.lock().map_err(|_| Error::LockPoisoned {
            message: "updater state lock poisoned".to_string(),
        })
    }

    pub fn state(&self, id: &UpdaterId) -> Result<UpdaterState> {
        Ok(self
            .states()?
            .get(id)
            .cloned()
            .unwrap_or(UpdaterState::NoPendingUpdate))
    }

    fn set_state(&self, id: &UpdaterId, state: UpdaterState) -> Result<()> {
        debug!("{} → {:?}", id, state);
        let mut states = self.states()?;
        if state == UpdaterState::NoPendingUpdate {
            states.remove(id);
        } else {
            states.insert(id.clone(), state);
        }
        Ok(())
    }

    /// Flow the newest build of the subscription's channel, or `build_id`.
    pub async fn trigger(&self, subscription_id: &str, build_id: Option<u64>, force: bool) -> Result<UpdateOutcome> {
        let build_id = match build_id {
            Some(id) => id,
            None => {
                let subscription = self.registry.get_subscription(subscription_id).await?;
                match self
                    .registry
                    .get_latest_build(&subscription.source_repository, &subscription.channel)
                    .await?
                {
                    Some(build) => build.id,
                    None => {
                        info!(
                            "No build of {} in channel '{}' to flow",
                            subscription.source_repository, subscription.channel
                        );
                        return Ok(UpdateOutcome::Skipped);
                    }
                }
            }
        };
        self.process_update(subscription_id, build_id, force).await
    }

    /// Apply a build to the subscription's PR, opening one when needed.
    pub async fn process_update(&self, subscription_id: &str, build_id: u64, force: bool) -> Result<UpdateOutcome> {
        let subscription = self.registry.get_subscription(subscription_id).await?;
        if !subscription.enabled && !force {
            info!("Subscription {} is disabled, skipping build {}", subscription_id, build_id);
            return Ok(UpdateOutcome::Skipped);
        }
        let build = self.registry.get_build(build_id).await?;
        let id = subscription.updater_id();
        info!("Processing build {} for {}", build_id, id);

        let mut tracked = self.state(&id)?.pull_request().cloned();
        if let Some(pr) = &tracked {
            if pr.contains(subscription_id, build_id) {
                info!("{} already contains build {} (or newer)", pr.url, build_id);
                return Ok(UpdateOutcome::Skipped);
            }
            match self.check_tracked(&id, pr, true).await? {
                PullRequestStatus::Completed => tracked = None,
                PullRequestStatus::InProgressCanUpdate => {}
                PullRequestStatus::InProgressCannotUpdate if force => {
                    info!("{} cannot be updated normally, forcing the update", pr.url);
                }
                PullRequestStatus::InProgressCannotUpdate => {
                    info!("{} cannot be updated now, deferring build {}", pr.url, build_id);
                    // Checking may have refreshed the tracked PR.
                    let pull_request = self.state(&id)?.pull_request().cloned();
                    let url = pr.url.clone();
                    self.set_state(
                        &id,
                        UpdaterState::PendingUpdate {
                            subscription_id: subscription_id.to_string(),
                            build: PendingBuild { build_id, force },
                            pull_request,
                        },
                    )?;
                    return Ok(UpdateOutcome::Deferred(url));
                }
            }
        }

        let update = SubscriptionUpdateSummary {
            subscription_id: subscription.id.clone(),
            build_id: build.id,
            source_repo: build.repository.clone(),
            commit_sha: build.commit.clone(),
        };
        match tracked {
            Some(pr) => self.update_pull_request(&id, &subscription, &build, pr, update).await,
            None => self.create_pull_request(&id, &subscription, &build, update).await,
        }
    }

    async fn create_pull_request(
        &self,
        id: &UpdaterId,
        subscription: &Subscription,
        build: &Build,
        update: SubscriptionUpdateSummary,
    ) -> Result<UpdateOutcome> {
        let outcome = self.executor.flow(subscription, build, None).await?;
        if !outcome.had_updates {
            info!("No changes required for {}, no pull request created", id);
            self.set_state(id, UpdaterState::NoPendingUpdate)?;
            self.registry
                .set_last_applied_build(&subscription.id, build.id)
                .await?;
            return Ok(UpdateOutcome::NoChanges);
        }

        let contained = vec![update];
        let direction = subscription.direction();
        let new_pr = NewPullRequest {
            title: pr_title(direction, &subscription.target_branch, &contained),
            description: pr_description(&contained, &outcome.required_updates),
            head_branch: outcome.branch.clone(),
            base_branch: subscription.target_branch.clone(),
        };
        let url = self
            .remote
            .create_pull_request(&subscription.target_repository, &new_pr)
            .await?;
        info!("Pull request {} for {} created", url, id);

        self.set_state(
            id,
            UpdaterState::InProgress(InProgressPullRequest {
                url: url.clone(),
                head_branch: outcome.branch,
                head_sha: outcome.head_sha,
                contained_updates: contained,
                required_updates: outcome.required_updates,
                direction,
                merge_state: if outcome.conflicted_files.is_empty() {
                    MergeState::Mergeable
                } else {
                    MergeState::Conflict
                },
                merge_policy_result: None,
            }),
        )?;
        Ok(UpdateOutcome::Created(url))
    }

    async fn update_pull_request(
        &self,
        id: &UpdaterId,
        subscription: &Subscription,
        build: &Build,
        mut pr: InProgressPullRequest,
        update: SubscriptionUpdateSummary,
    ) -> Result<UpdateOutcome> {
        let outcome = self
            .executor
            .flow(subscription, build, Some(&pr.head_branch))
            .await?;

        pr.contained_updates
            .retain(|u| u.subscription_id != update.subscription_id);
        pr.contained_updates.push(update);
        merge_required(&mut pr.required_updates, outcome.required_updates);
        pr.head_sha = outcome.head_sha;
        pr.merge_state = if outcome.conflicted_files.is_empty() {
            MergeState::Mergeable
        } else {
            warn!(
                "Flow of build {} into {} has conflicts: {}",
                build.id,
                pr.url,
                outcome.conflicted_files.join(", ")
            );
            MergeState::Conflict
        };
        pr.merge_policy_result = None;

        self.remote
            .update_pull_request(
                &pr.url,
                &pr_title(pr.direction, &subscription.target_branch, &pr.contained_updates),
                &pr_description(&pr.contained_updates, &pr.required_updates),
            )
            .await?;
        info!("Pull request {} updated with build {}", pr.url, build.id);

        let url = pr.url.clone();
        self.set_state(id, UpdaterState::InProgress(pr))?;
        Ok(UpdateOutcome::Updated(url))
    }

    /// Re-evaluate the tracked PR of `id`: merge it when its policies pass,
    /// forget it once merged or closed.
    pub async fn check_pull_request(&self, id: &UpdaterId) -> Result<CheckOutcome> {
        let state = self.state(id)?;
        let Some(pr) = state.pull_request().cloned() else {
            debug!("{} tracks no pull request", id);
            let retry = match state {
                UpdaterState::PendingUpdate {
                    subscription_id, build, ..
                } => Some((subscription_id, build)),
                _ => None,
            };
            return Ok(CheckOutcome { status: None, retry });
        };

        let status = self.check_tracked(id, &pr, false).await?;
        let retry = match (&state, status) {
            (_, PullRequestStatus::InProgressCannotUpdate) => None,
            (
                UpdaterState::PendingUpdate {
                    subscription_id, build, ..
                },
                _,
            ) => Some((subscription_id.clone(), *build)),
            _ => None,
        };
        Ok(CheckOutcome {
            status: Some(status),
            retry,
        })
    }

    async fn check_tracked(&self, id: &UpdaterId, pr: &InProgressPullRequest, trying_to_update: bool) -> Result<PullRequestStatus> {
        let info = self.remote.get_pull_request(&pr.url).await?;
        debug!("Pull request {} is {:?}", pr.url, info.status);
        match info.status {
            PrStatus::Open => self.check_open(id, pr, &info, trying_to_update).await,
            PrStatus::Merged | PrStatus::Closed => {
                if info.status == PrStatus::Merged {
                    self.record_merged(pr).await?;
                }
                info!("{} has been manually {:?}, no longer tracking it", pr.url, info.status);
                self.forget(id)?;
                Ok(PullRequestStatus::Completed)
            }
        }
    }

    async fn check_open(
        &self,
        id: &UpdaterId,
        pr: &InProgressPullRequest,
        info: &PullRequest,
        trying_to_update: bool,
    ) -> Result<PullRequestStatus> {
        let first = pr
            .contained_updates
            .first()
            .ok_or_else(|| Error::Queue {
                message: format!("{} tracks {} without any update", id, pr.url),
            })?;
        let subscription = self.registry.get_subscription(&first.subscription_id).await?;
        let definitions = self.policy_definitions(pr, &subscription).await?;
        let evaluator = MergePolicyEvaluator::from_definitions(&definitions)?;

        if !evaluator.is_empty() {
            let summary = pr.summary(&subscription.target_repository, &subscription.target_branch);
            let results = evaluator
                .evaluate(&summary, self.remote.as_ref(), info.target_branch_commit_sha.clone())
                .await;
            debug!("Policies of {}:\n{}", pr.url, results);
            let mut refreshed = pr.clone();
            refreshed.merge_policy_result = Some(results.clone());
            self.refresh(id, refreshed)?;

            if results.failed() {
                info!("Merge policies of {} failed", pr.url);
            } else if results.pending() {
                info!("Merge policies of {} pending (not updatable at the moment)", pr.url);
                return Ok(PullRequestStatus::InProgressCannotUpdate);
            } else if results.succeeded() {
                match self.remote.merge_pull_request(&pr.url).await {
                    Ok(()) => {
                        info!("Merged {}", pr.url);
                        self.record_merged(pr).await?;
                        self.forget(id)?;
                        return Ok(PullRequestStatus::Completed);
                    }
                    Err(e) => warn!("Failed to merge {}: {}", pr.url, e),
                }
            }
        }

        if pr.merge_state == MergeState::Conflict {
            let latest = self
                .remote
                .get_latest_commit(&subscription.target_repository, &pr.head_branch)
                .await?;
            if latest == pr.head_sha {
                debug!("{} still in conflict at {}", pr.url, short_sha(&latest));
                return Ok(PullRequestStatus::InProgressCannotUpdate);
            }
        }
        if !trying_to_update {
            debug!("{} still active (updatable)", pr.url);
        }
        Ok(PullRequestStatus::InProgressCanUpdate)
    }

    /// Policies of every subscription in the PR, first occurrence wins.
    async fn policy_definitions(
        &self,
        pr: &InProgressPullRequest,
        first: &Subscription,
    ) -> Result<Vec<MergePolicyDefinition>> {
        let mut definitions = first.merge_policies.clone();
        for update in pr.contained_updates.iter().skip(1) {
            if update.subscription_id == first.id {
                continue;
            }
            let subscription = self.registry.get_subscription(&update.subscription_id).await?;
            for definition in subscription.merge_policies {
                if !definitions.iter().any(|d| d.name == definition.name) {
                    definitions.push(definition);
                }
            }
        }
        Ok(definitions)
    }

    async fn record_merged(&self, pr: &InProgressPullRequest) -> Result<()> {
        for update in &pr.contained_updates {
            self.registry
                .set_last_applied_build(&update.subscription_id, update.build_id)
                .await?;
        }
        Ok(())
    }

    /// Stop tracking the PR, keeping a deferred update if there is one.
    fn forget(&self, id: &UpdaterId) -> Result<()> {
        let next = match self.state(id)? {
            UpdaterState::PendingUpdate {
                subscription_id, build, ..
            } => UpdaterState::PendingUpdate {
                subscription_id,
                build,
                pull_request: None,
            },
            _ => UpdaterState::NoPendingUpdate,
        };
        self.set_state(id, next)
    }

    fn refresh(&self, id: &UpdaterId, pr: InProgressPullRequest) -> Result<()> {
        let next = match self.state(id)? {
            UpdaterState::PendingUpdate {
                subscription_id, build, ..
            } => UpdaterState::PendingUpdate {
                subscription_id,
                build,
                pull_request: Some(pr),
            },
            _ => UpdaterState::InProgress(pr),
        };
        self.set_state(id, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::Asset;
    use crate::policy::checks::ALL_CHECKS_SUCCESSFUL;
    use crate::remote::{CheckStatus, MemoryRegistry, MemoryRemote, PrCheck};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SOURCE: &str = "https://github.com/test/runtime";
    const TARGET: &str = "https://github.com/test/vmr";

    struct FakeExecutor {
        flows: AtomicUsize,
        had_updates: bool,
        conflicts: bool,
    }

    impl FakeExecutor {
        fn new() -> Self {
            Self {
                flows: AtomicUsize::new(0),
                had_updates: true,
                conflicts: false,
            }
        }
    }

    #[async_trait]
    impl FlowExecutor for FakeExecutor {
        async fn flow(&self, _subscription: &Subscription, build: &Build, head_branch: Option<&str>) -> Result<FlowOutcome> {
            let n = self.flows.fetch_add(1, Ordering::SeqCst);
            Ok(FlowOutcome {
                branch: head_branch
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("darc/forward/{}", short_sha(&build.commit))),
                head_sha: format!("head{}", n),
                had_updates: self.had_updates,
                conflicted_files: if self.conflicts {
                    vec!["src/a.txt".to_string()]
                } else {
                    Vec::new()
                },
                required_updates: vec![DependencyUpdateSummary {
                    name: "runtime".to_string(),
                    from_version: Some("1.0.0".to_string()),
                    to_version: build.package_version().map(str::to_string),
                }],
            })
        }
    }

    fn build(id: u64, version: &str) -> Build {
        Build {
            id,
            repository: SOURCE.to_string(),
            branch: "main".to_string(),
            commit: format!("{:040}", id),
            number: None,
            assets: vec![Asset {
                name: "Microsoft.NETCore.App.Ref".to_string(),
                version: version.to_string(),
            }],
            channels: vec![".NET 10".to_string()],
        }
    }

    fn subscription(policies: &[&str]) -> Subscription {
        Subscription {
            id: "sub1".to_string(),
            source_repository: SOURCE.to_string(),
            target_repository: TARGET.to_string(),
            target_branch: "main".to_string(),
            channel: ".NET 10".to_string(),
            enabled: true,
            batchable: false,
            merge_policies: policies.iter().map(|p| MergePolicyDefinition::new(p)).collect(),
            excluded_assets: Vec::new(),
            source_directory: None,
            target_directory: Some("runtime".to_string()),
        }
    }

    struct Fixture {
        registry: Arc<MemoryRegistry>,
        remote: Arc<MemoryRemote>,
        executor: Arc<FakeExecutor>,
        updater: PullRequestUpdater,
    }

    fn fixture(policies: &[&str], executor: FakeExecutor) -> Fixture {
        let registry = Arc::new(MemoryRegistry::new());
        registry.add_subscription(subscription(policies)).unwrap();
        registry.add_build(build(1, "1.1.0")).unwrap();
        registry.add_build(build(2, "1.2.0")).unwrap();
        let remote = Arc::new(MemoryRemote::new());
        let executor = Arc::new(executor);
        let updater = PullRequestUpdater::new(registry.clone(), remote.clone(), executor.clone());
        Fixture {
            registry,
            remote,
            executor,
            updater,
        }
    }

    fn id() -> UpdaterId {
        UpdaterId::Subscription("sub1".to_string())
    }

    #[tokio::test]
    async fn test_first_build_opens_pull_request() {
        let f = fixture(&[], FakeExecutor::new());
        let outcome = f.updater.process_update("sub1", 1, false).await.unwrap();
        let UpdateOutcome::Created(url) = outcome else {
            panic!("expected a new PR, got {:?}", outcome);
        };
        let prs = f.remote.pull_requests().unwrap();
        assert_eq!(prs.len(), 1);
        assert_eq!(prs[0].url, url);
        assert_eq!(prs[0].base_branch, "main");
        assert_eq!(prs[0].title, "[main] Source code updates from runtime");

        let state = f.updater.state(&id()).unwrap();
        let pr = state.pull_request().unwrap();
        assert_eq!(pr.direction, Some(Direction::Forward));
        assert_eq!(pr.contained_updates[0].build_id, 1);
    }

    #[tokio::test]
    async fn test_redelivered_update_is_a_noop() {
        let f = fixture(&[], FakeExecutor::new());
        f.updater.process_update("sub1", 1, false).await.unwrap();
        let again = f.updater.process_update("sub1", 1, false).await.unwrap();
        assert_eq!(again, UpdateOutcome::Skipped);
        assert_eq!(f.executor.flows.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_newer_build_flows_into_open_pr() {
        let f = fixture(&[], FakeExecutor::new());
        let UpdateOutcome::Created(url) = f.updater.process_update("sub1", 1, false).await.unwrap() else {
            panic!("expected a new PR");
        };
        let outcome = f.updater.process_update("sub1", 2, false).await.unwrap();
        assert_eq!(outcome, UpdateOutcome::Updated(url));
        assert_eq!(f.remote.pull_requests().unwrap().len(), 1);

        let state = f.updater.state(&id()).unwrap();
        let pr = state.pull_request().unwrap();
        assert_eq!(pr.contained_updates.len(), 1);
        assert_eq!(pr.contained_updates[0].build_id, 2);
        assert_eq!(pr.required_updates[0].from_version.as_deref(), Some("1.0.0"));
        assert_eq!(pr.required_updates[0].to_version.as_deref(), Some("1.2.0"));
    }

    #[tokio::test]
    async fn test_pending_policies_defer_update_unless_forced() {
        let f = fixture(&[ALL_CHECKS_SUCCESSFUL], FakeExecutor::new());
        let UpdateOutcome::Created(url) = f.updater.process_update("sub1", 1, false).await.unwrap() else {
            panic!("expected a new PR");
        };
        f.remote
            .set_checks(
                &url,
                vec![PrCheck {
                    name: "build".to_string(),
                    status: CheckStatus::Pending,
                    is_merge_policy: false,
                }],
            )
            .unwrap();

        let outcome = f.updater.process_update("sub1", 2, false).await.unwrap();
        assert_eq!(outcome, UpdateOutcome::Deferred(url.clone()));
        assert!(matches!(
            f.updater.state(&id()).unwrap(),
            UpdaterState::PendingUpdate { build: PendingBuild { build_id: 2, .. }, .. }
        ));

        let forced = f.updater.process_update("sub1", 2, true).await.unwrap();
        assert_eq!(forced, UpdateOutcome::Updated(url));
    }

    #[tokio::test]
    async fn test_check_merges_when_policies_pass() {
        let f = fixture(&["Standard"], FakeExecutor::new());
        let UpdateOutcome::Created(url) = f.updater.process_update("sub1", 1, false).await.unwrap() else {
            panic!("expected a new PR");
        };
        f.remote
            .set_checks(
                &url,
                vec![PrCheck {
                    name: "build".to_string(),
                    status: CheckStatus::Succeeded,
                    is_merge_policy: false,
                }],
            )
            .unwrap();

        let outcome = f.updater.check_pull_request(&id()).await.unwrap();
        assert_eq!(outcome.status, Some(PullRequestStatus::Completed));
        assert_eq!(f.remote.get_pull_request(&url).await.unwrap().status, PrStatus::Merged);
        assert_eq!(f.registry.last_applied_build("sub1").unwrap(), Some(1));
        assert_eq!(f.updater.state(&id()).unwrap(), UpdaterState::NoPendingUpdate);
    }

    #[tokio::test]
    async fn test_failed_policies_keep_pr_updatable() {
        let f = fixture(&[ALL_CHECKS_SUCCESSFUL], FakeExecutor::new());
        let UpdateOutcome::Created(url) = f.updater.process_update("sub1", 1, false).await.unwrap() else {
            panic!("expected a new PR");
        };
        f.remote
            .set_checks(
                &url,
                vec![PrCheck {
                    name: "build".to_string(),
                    status: CheckStatus::Failed,
                    is_merge_policy: false,
                }],
            )
            .unwrap();

        let outcome = f.updater.check_pull_request(&id()).await.unwrap();
        assert_eq!(outcome.status, Some(PullRequestStatus::InProgressCanUpdate));
        let state = f.updater.state(&id()).unwrap();
        let results = state.pull_request().unwrap().merge_policy_result.as_ref().unwrap();
        assert!(results.failed());
    }

    #[tokio::test]
    async fn test_manually_closed_pr_is_forgotten_and_deferred_update_retried() {
        let f = fixture(&[ALL_CHECKS_SUCCESSFUL], FakeExecutor::new());
        let UpdateOutcome::Created(url) = f.updater.process_update("sub1", 1, false).await.unwrap() else {
            panic!("expected a new PR");
        };
        assert_eq!(
            f.updater.process_update("sub1", 2, false).await.unwrap(),
            UpdateOutcome::Deferred(url.clone())
        );

        f.remote.set_status(&url, PrStatus::Closed).unwrap();
        let outcome = f.updater.check_pull_request(&id()).await.unwrap();
        assert_eq!(outcome.status, Some(PullRequestStatus::Completed));
        assert_eq!(
            outcome.retry,
            Some((
                "sub1".to_string(),
                PendingBuild {
                    build_id: 2,
                    force: false
                }
            ))
        );
        assert_eq!(f.registry.last_applied_build("sub1").unwrap(), None);

        let UpdateOutcome::Created(second) = f.updater.process_update("sub1", 2, false).await.unwrap() else {
            panic!("expected a new PR");
        };
        assert_ne!(second, url);
    }

    #[tokio::test]
    async fn test_conflicted_pr_waits_for_a_push() {
        let executor = FakeExecutor {
            conflicts: true,
            ..FakeExecutor::new()
        };
        let f = fixture(&[], executor);
        let UpdateOutcome::Created(url) = f.updater.process_update("sub1", 1, false).await.unwrap() else {
            panic!("expected a new PR");
        };
        let head = f.updater.state(&id()).unwrap().pull_request().unwrap().clone();
        f.remote.set_commit(TARGET, &head.head_branch, &head.head_sha).unwrap();
        assert_eq!(
            f.updater.process_update("sub1", 2, false).await.unwrap(),
            UpdateOutcome::Deferred(url.clone())
        );

        // Somebody resolved the conflict on the PR branch.
        f.remote.set_commit(TARGET, &head.head_branch, "resolved").unwrap();
        assert_eq!(
            f.updater.process_update("sub1", 2, false).await.unwrap(),
            UpdateOutcome::Updated(url)
        );
    }

    #[tokio::test]
    async fn test_no_changes_opens_nothing() {
        let executor = FakeExecutor {
            had_updates: false,
            ..FakeExecutor::new()
        };
        let f = fixture(&[], executor);
        assert_eq!(
            f.updater.process_update("sub1", 1, false).await.unwrap(),
            UpdateOutcome::NoChanges
        );
        assert!(f.remote.pull_requests().unwrap().is_empty());
        assert_eq!(f.registry.last_applied_build("sub1").unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_trigger_uses_latest_build_of_channel() {
        let f = fixture(&[], FakeExecutor::new());
        f.updater.trigger("sub1", None, false).await.unwrap();
        let state = f.updater.state(&id()).unwrap();
        assert_eq!(state.pull_request().unwrap().contained_updates[0].build_id, 2);
    }

    #[test]
    fn test_pr_title_for_batches() {
        let update = |repo: &str| SubscriptionUpdateSummary {
            subscription_id: "s".to_string(),
            build_id: 1,
            source_repo: repo.to_string(),
            commit_sha: "abc".to_string(),
        };
        assert_eq!(
            pr_title(None, "main", &[update("https://github.com/a/arcade")]),
            "[main] Update dependencies from arcade"
        );
        assert_eq!(
            pr_title(None, "main", &[update("https://github.com/a/x"), update("https://github.com/a/y")]),
            "[main] Update dependencies from multiple repositories"
        );
    }
}
