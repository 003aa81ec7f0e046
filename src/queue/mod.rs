//! # Work-Item Queue
//!
//! Background work (flowing builds, re-checking pull requests, reacting to
//! new builds) travels as [`WorkItem`]s through a [`WorkItemQueue`] and is
//! executed by a [`processor::QueueProcessor`].
//!
//! Delivery is at-least-once: an item is only removed once its handler
//! succeeded. Reminders schedule an item for later delivery; the updater
//! uses them to re-check open pull requests. Failed items are re-delivered with their attempt count
//! increased until `max_attempts`, then moved to the dead-letter list.
//! Handlers must therefore be idempotent.

pub mod handler;
pub mod memory;
pub mod processor;

use crate::error::Result;
use crate::flow::UpdaterId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub use handler::FlowWorkItemHandler;
pub use memory::MemoryQueue;
pub use processor::{ProcessorState, QueueProcessor};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkItem {
    /// Flow a build into the pull request of a subscription.
    #[serde(rename_all = "camelCase")]
    SubscriptionTrigger {
        subscription_id: String,
        build_id: u64,
        target_branch: String,
        #[serde(default)]
        force: bool,
    },
    /// Re-evaluate the pull request tracked by an updater.
    #[serde(rename_all = "camelCase")]
    PullRequestCheck { updater_id: UpdaterId },
    /// Run the build-inserted event subscriptions.
    #[serde(rename_all = "camelCase")]
    BuildInserted { build_id: u64 },
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkItem::SubscriptionTrigger {
                subscription_id,
                build_id,
                ..
            } => write!(f, "trigger of {} with build {}", subscription_id, build_id),
            WorkItem::PullRequestCheck { updater_id } => write!(f, "pull request check of {}", updater_id),
            WorkItem::BuildInserted { build_id } => write!(f, "build {} inserted", build_id),
        }
    }
}

/// A delivered work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub id: u64,
    /// Deliveries so far, this one included.
    pub attempts: u32,
    pub item: WorkItem,
}

/// A work item that exhausted its attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub envelope: Envelope,
    pub error: String,
}

#[async_trait]
pub trait WorkItemQueue: Send + Sync {
    async fn enqueue(&self, item: WorkItem) -> Result<()>;

    /// Enqueue `item` once `delay` has passed. Setting a reminder replaces
    /// the one with the same key. Reminders not yet due are not outstanding.
    async fn set_reminder(&self, key: &str, item: WorkItem, delay: Duration) -> Result<()>;

    /// Next item, or `None` when the queue is empty. The item stays
    /// in flight until completed or failed.
    async fn dequeue(&self) -> Result<Option<Envelope>>;

    async fn complete(&self, envelope: &Envelope) -> Result<()>;

    /// Re-deliver the item later, or dead-letter it when `retry` is false
    /// or its attempts are exhausted.
    async fn fail(&self, envelope: Envelope, error: String, retry: bool) -> Result<()>;

    /// Queued plus in-flight items.
    async fn outstanding(&self) -> Result<usize>;

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>>;
}

/// Executes work items.
#[async_trait]
pub trait WorkItemHandler: Send + Sync {
    async fn handle(&self, item: &WorkItem) -> Result<()>;

    /// Items with the same key never run concurrently.
    async fn lock_key(&self, _item: &WorkItem) -> Result<Option<String>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_item_message_shape() {
        let item = WorkItem::SubscriptionTrigger {
            subscription_id: "sub1".to_string(),
            build_id: 42,
            target_branch: "main".to_string(),
            force: false,
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "subscriptionTrigger",
                "subscriptionId": "sub1",
                "buildId": 42,
                "targetBranch": "main",
                "force": false
            })
        );
        let parsed: WorkItem = serde_json::from_str(
            r#"{"type":"subscriptionTrigger","subscriptionId":"sub1","buildId":42,"targetBranch":"main"}"#,
        )
        .unwrap();
        assert_eq!(parsed, item);
    }
}
