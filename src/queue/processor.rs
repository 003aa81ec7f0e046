//! Worker pool draining a [`WorkItemQueue`].
//!
//! `worker_count` workers poll the queue. Items sharing a lock key (the
//! updater id of a subscription or batch) run one at a time: the worker that
//! claims a free key owns it until its mailbox is empty, and items dequeued
//! for a busy key are parked in that mailbox. A worker never waits on a busy
//! key, so distinct keys run in parallel.

use super::{Envelope, WorkItemHandler, WorkItemQueue};
use crate::error::{Error, Result};
use log::{debug, error, info, warn};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Working,
    /// Finishing in-flight items, taking no new ones.
    Stopping,
    Stopped,
}

impl ProcessorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ProcessorState::Working,
            1 => ProcessorState::Stopping,
            _ => ProcessorState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ProcessorState::Working => 0,
            ProcessorState::Stopping => 1,
            ProcessorState::Stopped => 2,
        }
    }
}

impl fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessorState::Working => "working",
            ProcessorState::Stopping => "stopping",
            ProcessorState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Items waiting for a busy key. A key is busy while it has an entry.
#[derive(Debug, Default)]
struct Mailboxes {
    busy: Mutex<HashMap<String, VecDeque<Envelope>>>,
}

impl Mailboxes {
    fn busy(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, VecDeque<Envelope>>>> {
        self.busy.lock().map_err(|_| Error::LockPoisoned {
            message: "processor mailboxes poisoned".to_string(),
        })
    }

    /// Take ownership of `key` and hand the envelope back, or park the
    /// envelope behind the current owner.
    fn claim(&self, key: &str, envelope: Envelope) -> Result<Option<Envelope>> {
        let mut busy = self.busy()?;
        match busy.get_mut(key) {
            Some(waiting) => {
                debug!("{} is busy, parking #{}", key, envelope.id);
                waiting.push_back(envelope);
                Ok(None)
            }
            None => {
                busy.insert(key.to_string(), VecDeque::new());
                Ok(Some(envelope))
            }
        }
    }

    /// Next parked envelope of `key`; releases the key once there is none.
    fn next(&self, key: &str) -> Result<Option<Envelope>> {
        let mut busy = self.busy()?;
        match busy.get_mut(key).and_then(VecDeque::pop_front) {
            Some(envelope) => Ok(Some(envelope)),
            None => {
                busy.remove(key);
                Ok(None)
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.busy.lock().map(|busy| busy.len()).unwrap_or_default()
    }
}

struct Shared {
    queue: Arc<dyn WorkItemQueue>,
    handler: Arc<dyn WorkItemHandler>,
    state: AtomicU8,
    mailboxes: Mailboxes,
    poll_interval: Duration,
}

impl Shared {
    fn state(&self) -> ProcessorState {
        ProcessorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    async fn process(&self, envelope: Envelope) -> Result<()> {
        let key = match self.handler.lock_key(&envelope.item).await {
            Ok(Some(key)) => key,
            Ok(None) => {
                let outcome = self.handler.handle(&envelope.item).await;
                return self.settle(envelope, outcome).await;
            }
            Err(e) => return self.settle(envelope, Err(e)).await,
        };

        let mut next = self.mailboxes.claim(&key, envelope)?;
        while let Some(envelope) = next {
            let outcome = self.handler.handle(&envelope.item).await;
            if let Err(e) = self.settle(envelope, outcome).await {
                error!("Failed to settle a work item of {}: {}", key, e);
            }
            next = self.mailboxes.next(&key)?;
        }
        Ok(())
    }

    async fn settle(&self, envelope: Envelope, outcome: Result<()>) -> Result<()> {
        match outcome {
            Ok(()) => {
                debug!("Completed #{}: {}", envelope.id, envelope.item);
                self.queue.complete(&envelope).await
            }
            Err(e) => {
                let retry = e.is_transient();
                warn!("Attempt {} of #{} ({}) failed: {}", envelope.attempts, envelope.id, envelope.item, e);
                self.queue.fail(envelope, e.to_string(), retry).await
            }
        }
    }

    async fn run(self: Arc<Self>, worker: usize) {
        debug!("Worker {} started", worker);
        while self.state() == ProcessorState::Working {
            match self.queue.dequeue().await {
                Ok(Some(envelope)) => {
                    if let Err(e) = self.process(envelope).await {
                        error!("Worker {} failed to settle a work item: {}", worker, e);
                    }
                }
                Ok(None) => tokio::time::sleep(self.poll_interval).await,
                Err(e) => {
                    error!("Worker {} failed to read the queue: {}", worker, e);
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
        debug!("Worker {} stopped", worker);
    }
}

pub struct QueueProcessor {
    shared: Arc<Shared>,
    worker_count: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl QueueProcessor {
    pub fn new(queue: Arc<dyn WorkItemQueue>, handler: Arc<dyn WorkItemHandler>, worker_count: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue,
                handler,
                state: AtomicU8::new(ProcessorState::Stopped.as_u8()),
                mailboxes: Mailboxes::default(),
                poll_interval: Duration::from_millis(50),
            }),
            worker_count: worker_count.max(1),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> ProcessorState {
        self.shared.state()
    }

    fn workers(&self) -> Result<std::sync::MutexGuard<'_, Vec<JoinHandle<()>>>> {
        self.workers.lock().map_err(|_| Error::LockPoisoned {
            message: "processor workers lock poisoned".to_string(),
        })
    }

    /// Spawn the workers. Starting a working processor is a no-op; one that
    /// is still stopping is an error.
    pub fn start(&self) -> Result<()> {
        match self.state() {
            ProcessorState::Working => return Ok(()),
            ProcessorState::Stopping => {
                return Err(Error::Queue {
                    message: "processor is still stopping".to_string(),
                })
            }
            ProcessorState::Stopped => {}
        }
        self.shared
            .state
            .store(ProcessorState::Working.as_u8(), Ordering::SeqCst);
        let mut workers = self.workers()?;
        for worker in 0..self.worker_count {
            workers.push(tokio::spawn(Arc::clone(&self.shared).run(worker)));
        }
        info!("Queue processor started with {} worker(s)", self.worker_count);
        Ok(())
    }

    /// Stop taking new items and wait for the in-flight ones.
    pub async fn stop(&self) -> Result<()> {
        if self.state() == ProcessorState::Stopped {
            return Ok(());
        }
        self.shared
            .state
            .store(ProcessorState::Stopping.as_u8(), Ordering::SeqCst);
        let workers: Vec<JoinHandle<()>> = self.workers()?.drain(..).collect();
        for outcome in futures::future::join_all(workers).await {
            if let Err(e) = outcome {
                error!("Queue worker panicked: {}", e);
            }
        }
        self.shared
            .state
            .store(ProcessorState::Stopped.as_u8(), Ordering::SeqCst);
        info!("Queue processor stopped");
        Ok(())
    }

    /// Wait until the queue has no queued or in-flight items.
    pub async fn wait_idle(&self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.shared.queue.outstanding().await? > 0 {
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Queue {
                    message: format!("queue still busy after {:?}", timeout),
                });
            }
            tokio::time::sleep(self.shared.poll_interval).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{MemoryQueue, WorkItem};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Recorder {
        handled: Mutex<Vec<u64>>,
        running: AtomicUsize,
        max_running: AtomicUsize,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl WorkItemHandler for Recorder {
        async fn handle(&self, item: &WorkItem) -> Result<()> {
            let WorkItem::BuildInserted { build_id } = item else {
                return Ok(());
            };
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            if *build_id == 99 {
                return Err(Error::not_found("build", 99));
            }
            if *build_id == 13
                && self
                    .failures_left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(Error::remote("https://example.com", "flaky"));
            }
            self.handled.lock().unwrap().push(*build_id);
            Ok(())
        }

        async fn lock_key(&self, _item: &WorkItem) -> Result<Option<String>> {
            Ok(Some("same-batch".to_string()))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_lifecycle_and_serialization_per_key() {
        let queue = Arc::new(MemoryQueue::new(3));
        let handler = Arc::new(Recorder {
            failures_left: AtomicUsize::new(1),
            ..Recorder::default()
        });
        let processor = QueueProcessor::new(queue.clone(), handler.clone(), 4);
        assert_eq!(processor.state(), ProcessorState::Stopped);

        for build_id in [1, 2, 13, 99] {
            queue.enqueue(WorkItem::BuildInserted { build_id }).await.unwrap();
        }
        processor.start().unwrap();
        assert_eq!(processor.state(), ProcessorState::Working);
        processor.wait_idle(Duration::from_secs(10)).await.unwrap();
        processor.stop().await.unwrap();
        assert_eq!(processor.state(), ProcessorState::Stopped);

        let mut handled = handler.handled.lock().unwrap().clone();
        handled.sort();
        assert_eq!(handled, vec![1, 2, 13]);
        assert_eq!(handler.max_running.load(Ordering::SeqCst), 1);

        let dead = queue.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].envelope.item, WorkItem::BuildInserted { build_id: 99 });
        assert_eq!(dead[0].envelope.attempts, 1);
    }

    /// Builds 1 and 2 share key `a` and take a while; build 3 has key `b`.
    #[derive(Default)]
    struct SlowKeyA {
        finished: Mutex<Vec<(u64, Duration)>>,
        started: Mutex<Option<tokio::time::Instant>>,
    }

    #[async_trait]
    impl WorkItemHandler for SlowKeyA {
        async fn handle(&self, item: &WorkItem) -> Result<()> {
            let WorkItem::BuildInserted { build_id } = item else {
                return Ok(());
            };
            if *build_id != 3 {
                tokio::time::sleep(Duration::from_millis(400)).await;
            }
            let started = self.started.lock().unwrap().unwrap();
            self.finished.lock().unwrap().push((*build_id, started.elapsed()));
            Ok(())
        }

        async fn lock_key(&self, item: &WorkItem) -> Result<Option<String>> {
            match item {
                WorkItem::BuildInserted { build_id: 3 } => Ok(Some("b".to_string())),
                _ => Ok(Some("a".to_string())),
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_busy_key_does_not_hold_up_other_keys() {
        let queue = Arc::new(MemoryQueue::new(1));
        let handler = Arc::new(SlowKeyA::default());
        let processor = QueueProcessor::new(queue.clone(), handler.clone(), 2);

        for build_id in [1, 2, 3] {
            queue.enqueue(WorkItem::BuildInserted { build_id }).await.unwrap();
        }
        *handler.started.lock().unwrap() = Some(tokio::time::Instant::now());
        processor.start().unwrap();
        processor.wait_idle(Duration::from_secs(10)).await.unwrap();
        processor.stop().await.unwrap();

        let finished = handler.finished.lock().unwrap().clone();
        let order: Vec<u64> = finished.iter().map(|(id, _)| *id).collect();
        assert_eq!(order, vec![3, 1, 2]);
        assert!(finished[0].1 < Duration::from_millis(300), "{:?}", finished);
        assert!(finished[2].1 >= Duration::from_millis(800), "{:?}", finished);
        assert_eq!(processor.shared.mailboxes.len(), 0);
    }

    #[test]
    fn test_mailbox_releases_key_once_drained() {
        let mailboxes = Mailboxes::default();
        let envelope = |id| Envelope {
            id,
            attempts: 1,
            item: WorkItem::BuildInserted { build_id: id },
        };

        assert_eq!(mailboxes.claim("a", envelope(1)).unwrap(), Some(envelope(1)));
        assert_eq!(mailboxes.claim("a", envelope(2)).unwrap(), None);
        assert_eq!(mailboxes.claim("b", envelope(3)).unwrap(), Some(envelope(3)));
        assert_eq!(mailboxes.len(), 2);

        assert_eq!(mailboxes.next("a").unwrap(), Some(envelope(2)));
        assert_eq!(mailboxes.next("a").unwrap(), None);
        assert_eq!(mailboxes.next("b").unwrap(), None);
        assert_eq!(mailboxes.len(), 0);
        assert_eq!(mailboxes.claim("a", envelope(4)).unwrap(), Some(envelope(4)));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let queue = Arc::new(MemoryQueue::new(1));
        let processor = QueueProcessor::new(queue, Arc::new(Recorder::default()), 1);
        processor.stop().await.unwrap();
        processor.start().unwrap();
        processor.start().unwrap();
        processor.stop().await.unwrap();
        assert_eq!(processor.state(), ProcessorState::Stopped);
    }
}
