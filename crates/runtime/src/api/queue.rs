//! Per-key FIFO serialization of asynchronous work.
//!
//! [`ActionQueue`] guarantees that units submitted under the same key run one
//! at a time, in submission order, while units under different keys run
//! concurrently. Each unit is spawned as its own task and its worker waits
//! for it to settle, so a panicking unit is reported only to its caller and
//! later units still run.
//!
//! A released worker keeps draining in the background. A worker spawned
//! later for the same key waits for it before taking jobs.
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error};

use super::errors::QueueError;
use crate::runtime::QueueConfig;
use crate::workers::{Job, KeyWorker};

struct WorkerSlot {
    job_tx: mpsc::Sender<Job>,
    handle: JoinHandle<()>,
}

struct QueueState<K> {
    workers: HashMap<K, WorkerSlot>,
    /// Released workers that may still be running queued units.
    draining: HashMap<K, JoinHandle<()>>,
    closed: bool,
}

/// Cloneable handle to a set of per-key workers.
pub struct ActionQueue<K = String> {
    state: Arc<Mutex<QueueState<K>>>,
    config: QueueConfig,
}

impl<K> Clone for ActionQueue<K> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            config: self.config.clone(),
        }
    }
}

impl<K> ActionQueue<K>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    pub fn new(config: QueueConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                workers: HashMap::new(),
                draining: HashMap::new(),
                closed: false,
            })),
            config,
        }
    }

    /// Runs `work` after every unit previously enqueued under `key` has
    /// settled, and returns its output.
    ///
    /// The worker for `key` is spawned on first use.
    pub async fn enqueue<F, Fut, T>(&self, key: K, work: F) -> Result<T, QueueError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let job_tx = self.sender_for(&key)?;
        let (reply_tx, reply_rx) = oneshot::channel();

        let job: Job = Box::pin(async move {
            let outcome = tokio::spawn(async move { work().await })
                .await
                .map_err(|err| unit_failure(&key, err));
            if reply_tx.send(outcome).is_err() {
                debug!(key = ?key, "enqueue reply channel closed (caller dropped)");
            }
        });

        job_tx
            .send(job)
            .await
            .map_err(|_| QueueError::CommandChannelClosed)?;
        drop(job_tx);

        reply_rx.await.map_err(QueueError::ReplyChannelClosed)?
    }

    /// Stops accepting work for `key`. Units already queued still run; the
    /// worker exits after them, and later work under `key` starts only once
    /// it has. Returns whether a worker existed.
    pub fn release(&self, key: &K) -> bool {
        let mut state = self.lock();
        state.draining.retain(|_, handle| !handle.is_finished());

        let Some(slot) = state.workers.remove(key) else {
            return false;
        };
        let WorkerSlot { job_tx, handle } = slot;
        drop(job_tx);
        state.draining.insert(key.clone(), handle);
        debug!(key = ?key, "released key worker");
        true
    }

    /// Keys that currently have a worker.
    pub fn active_keys(&self) -> Vec<K> {
        self.lock().workers.keys().cloned().collect()
    }

    /// Closes every worker, waits for queued units to drain and rejects
    /// further work.
    pub async fn shutdown(&self) -> Result<(), QueueError> {
        let (slots, draining): (Vec<WorkerSlot>, Vec<JoinHandle<()>>) = {
            let mut state = self.lock();
            state.closed = true;
            (
                state.workers.drain().map(|(_, slot)| slot).collect(),
                state.draining.drain().map(|(_, handle)| handle).collect(),
            )
        };

        debug!(
            workers = slots.len(),
            draining = draining.len(),
            "shutting down action queue"
        );
        let mut handles = draining;
        for slot in slots {
            drop(slot.job_tx);
            handles.push(slot.handle);
        }
        for handle in handles {
            handle.await.map_err(QueueError::WorkerJoin)?;
        }
        Ok(())
    }

    fn sender_for(&self, key: &K) -> Result<mpsc::Sender<Job>, QueueError> {
        let mut state = self.lock();
        if state.closed {
            return Err(QueueError::ShutDown);
        }

        if let Some(slot) = state.workers.get(key) {
            return Ok(slot.job_tx.clone());
        }

        let predecessor = state.draining.remove(key);
        let (job_tx, job_rx) = mpsc::channel(self.config.buffer_size.max(1));
        let worker = KeyWorker::new(key.clone(), job_rx).after(predecessor);
        let handle = tokio::spawn(async move {
            worker.run().await;
        });
        debug!(key = ?key, "spawned key worker");

        state.workers.insert(
            key.clone(),
            WorkerSlot {
                job_tx: job_tx.clone(),
                handle,
            },
        );
        Ok(job_tx)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K> Default for ActionQueue<K>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

fn unit_failure<K: fmt::Debug>(key: &K, err: JoinError) -> QueueError {
    if !err.is_panic() {
        return QueueError::UnitCancelled;
    }

    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned());
    error!(key = ?key, %message, "queued unit panicked");
    QueueError::UnitPanicked { message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_unit_output() {
        let queue: ActionQueue = ActionQueue::default();
        let value = queue.enqueue("g".to_owned(), || async { 40 + 2 }).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(queue.active_keys(), vec!["g".to_owned()]);
    }

    async fn explode() -> u32 {
        panic!("boom")
    }

    #[tokio::test]
    async fn panic_is_reported_to_its_caller_only() {
        let queue: ActionQueue = ActionQueue::default();

        let failed = queue.enqueue("g".to_owned(), explode).await;
        assert!(matches!(
            failed,
            Err(QueueError::UnitPanicked { ref message }) if message == "boom"
        ));

        let next = queue.enqueue("g".to_owned(), || async { "still running" }).await;
        assert_eq!(next.unwrap(), "still running");
    }

    #[tokio::test]
    async fn release_and_shutdown() {
        let queue: ActionQueue = ActionQueue::default();
        queue.enqueue("a".to_owned(), || async {}).await.unwrap();
        queue.enqueue("b".to_owned(), || async {}).await.unwrap();

        assert!(queue.release(&"a".to_owned()));
        assert!(!queue.release(&"a".to_owned()));
        assert_eq!(queue.active_keys(), vec!["b".to_owned()]);

        queue.shutdown().await.unwrap();
        assert!(queue.active_keys().is_empty());
        assert!(matches!(
            queue.enqueue("b".to_owned(), || async {}).await,
            Err(QueueError::ShutDown)
        ));
    }
}
