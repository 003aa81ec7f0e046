//! Dispatches work items to the pull-request updater and build events.
//!
//! Every pull request the updater creates, updates or defers gets a
//! [`WorkItem::PullRequestCheck`] reminder, renewed for as long as the PR
//! stays open. The check merges the PR once its policies pass and re-triggers
//! a deferred build once the PR can take it.

use super::{WorkItem, WorkItemHandler, WorkItemQueue};
use crate::defaults::PR_CHECK_INTERVAL;
use crate::error::Result;
use crate::flow::events::BuildEvents;
use crate::flow::updater::{PullRequestStatus, PullRequestUpdater, UpdateOutcome};
use crate::flow::UpdaterId;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

pub struct FlowWorkItemHandler {
    updater: Arc<PullRequestUpdater>,
    events: Arc<BuildEvents>,
    queue: Arc<dyn WorkItemQueue>,
    check_interval: Duration,
}

impl FlowWorkItemHandler {
    pub fn new(updater: Arc<PullRequestUpdater>, events: Arc<BuildEvents>, queue: Arc<dyn WorkItemQueue>) -> Self {
        Self {
            updater,
            events,
            queue,
            check_interval: PR_CHECK_INTERVAL,
        }
    }

    /// Delay between checks of an open pull request.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    async fn remind_check(&self, updater_id: &UpdaterId) -> Result<()> {
        debug!("Checking {} again in {:?}", updater_id, self.check_interval);
        self.queue
            .set_reminder(
                &format!("pull-request-check:{}", updater_id),
                WorkItem::PullRequestCheck {
                    updater_id: updater_id.clone(),
                },
                self.check_interval,
            )
            .await
    }
}

#[async_trait]
impl WorkItemHandler for FlowWorkItemHandler {
    async fn handle(&self, item: &WorkItem) -> Result<()> {
        match item {
            WorkItem::SubscriptionTrigger {
                subscription_id,
                build_id,
                target_branch,
                force,
            } => {
                let subscription = self.updater.registry().get_subscription(subscription_id).await?;
                if &subscription.target_branch != target_branch {
                    warn!(
                        "Subscription {} now targets '{}', dropping update for '{}'",
                        subscription_id, subscription.target_branch, target_branch
                    );
                    return Ok(());
                }
                let outcome = self
                    .updater
                    .process_update(subscription_id, *build_id, *force)
                    .await?;
                match outcome {
                    UpdateOutcome::Created(url) | UpdateOutcome::Updated(url) => {
                        info!("{}: flowed into {}", item, url);
                        self.remind_check(&subscription.updater_id()).await?;
                    }
                    UpdateOutcome::Deferred(url) => {
                        info!("{}: deferred, {} is not updatable", item, url);
                        self.remind_check(&subscription.updater_id()).await?;
                    }
                    UpdateOutcome::NoChanges | UpdateOutcome::Skipped => info!("{}: nothing to do", item),
                }
                Ok(())
            }
            WorkItem::PullRequestCheck { updater_id } => {
                let outcome = self.updater.check_pull_request(updater_id).await?;
                if matches!(
                    outcome.status,
                    Some(PullRequestStatus::InProgressCanUpdate | PullRequestStatus::InProgressCannotUpdate)
                ) {
                    self.remind_check(updater_id).await?;
                }
                if let Some((subscription_id, pending)) = outcome.retry {
                    let subscription = self.updater.registry().get_subscription(&subscription_id).await?;
                    info!("Retrying deferred build {} for {}", pending.build_id, subscription_id);
                    self.queue
                        .enqueue(WorkItem::SubscriptionTrigger {
                            subscription_id,
                            build_id: pending.build_id,
                            target_branch: subscription.target_branch,
                            force: pending.force,
                        })
                        .await?;
                }
                Ok(())
            }
            WorkItem::BuildInserted { build_id } => {
                let build = self.updater.registry().get_build(*build_id).await?;
                self.events.build_inserted(&build).await
            }
        }
    }

    async fn lock_key(&self, item: &WorkItem) -> Result<Option<String>> {
        match item {
            WorkItem::SubscriptionTrigger { subscription_id, .. } => {
                let subscription = self.updater.registry().get_subscription(subscription_id).await?;
                Ok(Some(subscription.updater_id().to_string()))
            }
            WorkItem::PullRequestCheck { updater_id } => Ok(Some(updater_id.to_string())),
            WorkItem::BuildInserted { .. } => Ok(None),
        }
    }
}
