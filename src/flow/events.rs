//! Reactions to a newly registered build.
//!
//! Handlers are registered explicitly with [`BuildEvents::subscribe`] at
//! start-up. [`DefaultChannelPromoter`] is the standard one: it publishes
//! the build to the default channels of its branch and triggers every
//! subscription of those channels.

use super::Build;
use crate::error::Result;
use crate::queue::{WorkItem, WorkItemQueue};
use crate::remote::BuildRegistry;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;

#[async_trait]
pub trait BuildInsertedHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn on_build_inserted(&self, build: &Build) -> Result<()>;
}

/// The registered build-inserted handlers.
#[derive(Default)]
pub struct BuildEvents {
    handlers: Vec<Arc<dyn BuildInsertedHandler>>,
}

impl BuildEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, handler: Arc<dyn BuildInsertedHandler>) {
        debug!("Subscribed {} to inserted builds", handler.name());
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run every handler. All handlers run even if one fails; the first
    /// error is returned.
    pub async fn build_inserted(&self, build: &Build) -> Result<()> {
        let mut first_error = None;
        for handler in &self.handlers {
            if let Err(e) = handler.on_build_inserted(build).await {
                warn!("{} failed for build {}: {}", handler.name(), build.id, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Publishes builds to the default channels of their branch, then queues a
/// trigger for every enabled subscription of each channel.
pub struct DefaultChannelPromoter {
    registry: Arc<dyn BuildRegistry>,
    queue: Arc<dyn WorkItemQueue>,
}

impl DefaultChannelPromoter {
    pub fn new(registry: Arc<dyn BuildRegistry>, queue: Arc<dyn WorkItemQueue>) -> Self {
        Self { registry, queue }
    }
}

#[async_trait]
impl BuildInsertedHandler for DefaultChannelPromoter {
    fn name(&self) -> &str {
        "default channel promotion"
    }

    async fn on_build_inserted(&self, build: &Build) -> Result<()> {
        let channels = self
            .registry
            .get_default_channels(&build.repository, &build.branch)
            .await?;
        if channels.is_empty() {
            debug!("No default channel for {}@{}", build.repository, build.branch);
        }
        for default_channel in channels {
            self.registry
                .assign_build_to_channel(build.id, &default_channel.channel)
                .await?;
            info!("Build {} published to '{}'", build.id, default_channel.channel);

            for subscription in self
                .registry
                .get_subscriptions(&build.repository, &default_channel.channel)
                .await?
            {
                self.queue
                    .enqueue(WorkItem::SubscriptionTrigger {
                        subscription_id: subscription.id,
                        build_id: build.id,
                        target_branch: subscription.target_branch,
                        force: false,
                    })
                    .await?;
            }
        }
        Ok(())
    }
}
