//! In-memory [`WorkItemQueue`].

use super::{DeadLetter, Envelope, WorkItem, WorkItemQueue};
use crate::error::{Error, Result};
use async_trait::async_trait;
use log::{debug, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct QueueState {
    next_id: u64,
    queued: VecDeque<Envelope>,
    in_flight: HashMap<u64, Envelope>,
    dead: Vec<DeadLetter>,
    reminders: HashMap<String, (Instant, WorkItem)>,
}

impl QueueState {
    fn push(&mut self, item: WorkItem) {
        self.next_id += 1;
        let envelope = Envelope {
            id: self.next_id,
            attempts: 0,
            item,
        };
        debug!("Enqueued #{}: {}", envelope.id, envelope.item);
        self.queued.push_back(envelope);
    }

    /// Move due reminders to the queue, earliest first.
    fn promote_due(&mut self, now: Instant) {
        let mut due: Vec<(Instant, String)> = self
            .reminders
            .iter()
            .filter(|(_, (at, _))| *at <= now)
            .map(|(key, (at, _))| (*at, key.clone()))
            .collect();
        due.sort();
        for (_, key) in due {
            if let Some((_, item)) = self.reminders.remove(&key) {
                debug!("Reminder {} is due", key);
                self.push(item);
            }
        }
    }
}

#[derive(Debug)]
pub struct MemoryQueue {
    max_attempts: u32,
    state: Mutex<QueueState>,
}

impl MemoryQueue {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Items of the reminders not yet due.
    pub fn reminders(&self) -> Result<Vec<WorkItem>> {
        Ok(self.state()?.reminders.values().map(|(_, item)| item.clone()).collect())
    }

    fn state(&self) -> Result<MutexGuard<'_, QueueState>> {
        self.state.lock().map_err(|_| Error::LockPoisoned {
            message: "queue lock poisoned".to_string(),
        })
    }
}

#[async_trait]
impl WorkItemQueue for MemoryQueue {
    async fn enqueue(&self, item: WorkItem) -> Result<()> {
        self.state()?.push(item);
        Ok(())
    }

    async fn set_reminder(&self, key: &str, item: WorkItem, delay: Duration) -> Result<()> {
        debug!("Reminder {} set in {:?}: {}", key, delay, item);
        self.state()?
            .reminders
            .insert(key.to_string(), (Instant::now() + delay, item));
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Envelope>> {
        let mut state = self.state()?;
        state.promote_due(Instant::now());
        let Some(mut envelope) = state.queued.pop_front() else {
            return Ok(None);
        };
        envelope.attempts += 1;
        state.in_flight.insert(envelope.id, envelope.clone());
        Ok(Some(envelope))
    }

    async fn complete(&self, envelope: &Envelope) -> Result<()> {
        self.state()?.in_flight.remove(&envelope.id);
        Ok(())
    }

    async fn fail(&self, envelope: Envelope, error: String, retry: bool) -> Result<()> {
        let mut state = self.state()?;
        state.in_flight.remove(&envelope.id);
        if retry && envelope.attempts < self.max_attempts {
            debug!("Re-delivering #{} (attempt {} failed)", envelope.id, envelope.attempts);
            state.queued.push_back(envelope);
        } else {
            warn!(
                "Giving up on #{} ({}) after {} attempt(s): {}",
                envelope.id, envelope.item, envelope.attempts, error
            );
            state.dead.push(DeadLetter { envelope, error });
        }
        Ok(())
    }

    async fn outstanding(&self) -> Result<usize> {
        let mut state = self.state()?;
        state.promote_due(Instant::now());
        Ok(state.queued.len() + state.in_flight.len())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        Ok(self.state()?.dead.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(build_id: u64) -> WorkItem {
        WorkItem::BuildInserted { build_id }
    }

    #[tokio::test]
    async fn test_fifo_and_completion() {
        let queue = MemoryQueue::new(3);
        queue.enqueue(item(1)).await.unwrap();
        queue.enqueue(item(2)).await.unwrap();

        let first = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(first.item, item(1));
        assert_eq!(first.attempts, 1);
        assert_eq!(queue.outstanding().await.unwrap(), 2);

        queue.complete(&first).await.unwrap();
        assert_eq!(queue.outstanding().await.unwrap(), 1);
        assert_eq!(queue.dequeue().await.unwrap().unwrap().item, item(2));
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_redelivery_until_dead_letter() {
        let queue = MemoryQueue::new(2);
        queue.enqueue(item(7)).await.unwrap();

        let first = queue.dequeue().await.unwrap().unwrap();
        queue.fail(first, "flaky".to_string(), true).await.unwrap();
        let second = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(second.attempts, 2);
        queue.fail(second, "flaky".to_string(), true).await.unwrap();

        assert!(queue.dequeue().await.unwrap().is_none());
        let dead = queue.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].envelope.item, item(7));
        assert_eq!(dead[0].error, "flaky");
        assert_eq!(queue.outstanding().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reminder_is_delivered_once_due() {
        let queue = MemoryQueue::new(1);
        queue
            .set_reminder("check", item(1), Duration::from_millis(50))
            .await
            .unwrap();
        queue
            .set_reminder("check", item(2), Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(queue.reminders().unwrap(), vec![item(2)]);
        assert!(queue.dequeue().await.unwrap().is_none());
        assert_eq!(queue.outstanding().await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(80)).await;
        let envelope = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(envelope.item, item(2));
        assert!(queue.reminders().unwrap().is_empty());
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_decisive_failure_is_not_retried() {
        let queue = MemoryQueue::new(5);
        queue.enqueue(item(1)).await.unwrap();
        let envelope = queue.dequeue().await.unwrap().unwrap();
        queue.fail(envelope, "no such build".to_string(), false).await.unwrap();
        assert_eq!(queue.dead_letters().await.unwrap().len(), 1);
        assert!(queue.dequeue().await.unwrap().is_none());
    }
}
