//! Per-key worker that drains one FIFO of units of work.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A queued unit of work. The future spawns the caller's work, waits for it
/// to settle and delivers the reply; it never fails itself.
pub(crate) type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Background task that executes jobs for a single key.
///
/// The worker exits once every sender for its channel is dropped and the
/// remaining jobs have run.
pub(crate) struct KeyWorker<K> {
    key: K,
    job_rx: mpsc::Receiver<Job>,
    predecessor: Option<JoinHandle<()>>,
}

impl<K: fmt::Debug> KeyWorker<K> {
    pub(crate) fn new(key: K, job_rx: mpsc::Receiver<Job>) -> Self {
        Self {
            key,
            job_rx,
            predecessor: None,
        }
    }

    /// Holds every job until a released worker for the same key has drained.
    pub(crate) fn after(mut self, predecessor: Option<JoinHandle<()>>) -> Self {
        self.predecessor = predecessor;
        self
    }

    /// Main worker loop.
    pub(crate) async fn run(mut self) {
        if let Some(predecessor) = self.predecessor.take() {
            if let Err(err) = predecessor.await {
                warn!(key = ?self.key, error = %err, "released key worker failed");
            }
            debug!(key = ?self.key, "predecessor drained");
        }

        let mut processed = 0usize;
        loop {
            tokio::select! {
                Some(job) = self.job_rx.recv() => {
                    job.await;
                    processed += 1;
                }
                else => break,
            }
        }
        debug!(key = ?self.key, processed, "key worker drained");
    }
}
