//! Processing queue
//!
//! A fixed pool of workers consumes a bounded channel of entry ids. The entry
//! lock is taken at enqueue time and travels with the job, so an entry is
//! never queued twice or run concurrently. Each run is spawned as its own
//! task; a panic inside it is logged and the worker carries on.

use super::locks::{EntryGuard, EntryLocks};
use super::pipeline::{EntryProcessor, ProcessingReport};
use crate::database::EntryStore;
use crate::error::{AppError, Result};
use serde::Serialize;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Running totals across all completed runs
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStats {
    pub total_processed: u64,
    pub total_cost: f64,
    pub average_cost_per_entry: f64,
    pub currently_processing: usize,
    /// Runs that errored, panicked or left a failed action
    pub total_failures: u64,
    pub total_processing_time_ms: u64,
}

impl ProcessingStats {
    fn record(&mut self, outcome: &RunOutcome) {
        self.currently_processing = self.currently_processing.saturating_sub(1);
        // Aborted by shutdown; the backlog sweep picks the entry up again
        if matches!(outcome, RunOutcome::Cancelled) {
            return;
        }
        self.total_processed += 1;
        match outcome {
            RunOutcome::Completed(report) => {
                self.total_cost += report.cost;
                self.total_processing_time_ms += report.processing_time_ms;
                if report.has_failures() {
                    self.total_failures += 1;
                }
            }
            RunOutcome::Failed => self.total_failures += 1,
            RunOutcome::Cancelled => {}
        }
        self.average_cost_per_entry = self.total_cost / self.total_processed as f64;
    }
}

enum RunOutcome {
    Completed(ProcessingReport),
    Failed,
    Cancelled,
}

/// Result of a batch sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub enqueued: usize,
    /// Entries already running or queued
    pub skipped: usize,
}

struct Job {
    entry_id: String,
    _guard: EntryGuard,
}

struct QueueInner {
    sender: StdMutex<Option<mpsc::Sender<Job>>>,
    locks: EntryLocks,
    stats: RwLock<ProcessingStats>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct ProcessingQueue {
    inner: Arc<QueueInner>,
}

impl ProcessingQueue {
    /// Spawn `workers` workers draining a channel of `capacity` jobs
    pub fn start(
        processor: Arc<dyn EntryProcessor>,
        locks: EntryLocks,
        workers: usize,
        capacity: usize,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let inner = Arc::new(QueueInner {
            sender: StdMutex::new(Some(tx)),
            locks,
            stats: RwLock::new(ProcessingStats::default()),
            workers: Mutex::new(Vec::new()),
            cancel,
        });

        let mut handles = Vec::with_capacity(workers.max(1));
        for worker in 0..workers.max(1) {
            handles.push(tokio::spawn(run_worker(
                worker,
                rx.clone(),
                processor.clone(),
                inner.clone(),
            )));
        }

        if let Ok(mut slot) = inner.workers.try_lock() {
            *slot = handles;
        }

        tracing::info!(workers = workers.max(1), capacity, "Processing queue started");
        Self { inner }
    }

    pub fn locks(&self) -> &EntryLocks {
        &self.inner.locks
    }

    /// Queue one entry. Rejected with `EntryBusy` while it is queued or running.
    pub async fn enqueue(&self, entry_id: &str) -> Result<()> {
        let sender = self
            .inner
            .sender
            .lock()
            .map_err(|_| AppError::QueueClosed)?
            .clone()
            .ok_or(AppError::QueueClosed)?;

        let guard = self
            .inner
            .locks
            .try_acquire(entry_id)
            .ok_or_else(|| AppError::EntryBusy(entry_id.to_string()))?;

        let job = Job {
            entry_id: entry_id.to_string(),
            _guard: guard,
        };
        // A full channel must not outlive shutdown
        tokio::select! {
            sent = sender.send(job) => sent.map_err(|_| AppError::QueueClosed)?,
            _ = self.inner.cancel.cancelled() => return Err(AppError::QueueClosed),
        }

        tracing::debug!(entry_id, "Entry queued");
        Ok(())
    }

    /// Queue every entry that has never been processed
    pub async fn sweep(&self, store: &dyn EntryStore) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for entry in store.list_without_ai_metadata().await? {
            match self.enqueue(&entry.id).await {
                Ok(()) => report.enqueued += 1,
                Err(AppError::EntryBusy(_)) => report.skipped += 1,
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            enqueued = report.enqueued,
            skipped = report.skipped,
            "Backlog sweep finished"
        );
        Ok(report)
    }

    pub async fn stats(&self) -> ProcessingStats {
        self.inner.stats.read().await.clone()
    }

    /// Stop accepting work, cancel running jobs and wait for the workers
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        if let Ok(mut sender) = self.inner.sender.lock() {
            sender.take();
        }

        let handles: Vec<JoinHandle<()>> = self.inner.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Queue worker ended abnormally: {}", e);
            }
        }
        tracing::info!("Processing queue stopped");
    }
}

async fn run_worker(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    processor: Arc<dyn EntryProcessor>,
    inner: Arc<QueueInner>,
) {
    loop {
        let next = {
            let mut lock = rx.lock().await;
            tokio::select! {
                job = lock.recv() => job,
                _ = inner.cancel.cancelled() => None,
            }
        };
        let Some(job) = next else { break };

        if inner.cancel.is_cancelled() {
            break;
        }

        inner.stats.write().await.currently_processing += 1;

        let entry_id = job.entry_id.clone();
        let run_processor = processor.clone();
        let run_cancel = inner.cancel.child_token();
        let run = tokio::spawn(async move {
            run_processor.process(&entry_id, &run_cancel).await
        });

        let outcome = match run.await {
            Ok(Ok(report)) => RunOutcome::Completed(report),
            Ok(Err(AppError::Cancelled)) => {
                tracing::info!(worker, entry_id = %job.entry_id, "Entry processing cancelled");
                RunOutcome::Cancelled
            }
            Ok(Err(e)) => {
                tracing::warn!(worker, entry_id = %job.entry_id, error = %e, "Entry processing failed");
                RunOutcome::Failed
            }
            Err(e) => {
                tracing::error!(worker, entry_id = %job.entry_id, "Entry processing panicked: {}", e);
                RunOutcome::Failed
            }
        };

        inner.stats.write().await.record(&outcome);
        drop(job);
    }

    tracing::debug!(worker, "Queue worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Sleeps for each entry and records peak parallelism
    #[derive(Default)]
    struct SlowProcessor {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl EntryProcessor for SlowProcessor {
        async fn process(&self, entry_id: &str, cancel: &CancellationToken) -> Result<ProcessingReport> {
            if entry_id == "waits" {
                cancel.cancelled().await;
                return Err(AppError::Cancelled);
            }
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            if entry_id == "panics" {
                panic!("processor blew up");
            }
            Ok(ProcessingReport {
                entry_id: entry_id.to_string(),
                executed: 1,
                cost: 0.5,
                processing_time_ms: 30,
                ..ProcessingReport::default()
            })
        }
    }

    async fn wait_for_processed(queue: &ProcessingQueue, count: u64) -> ProcessingStats {
        for _ in 0..200 {
            let stats = queue.stats().await;
            if stats.total_processed >= count {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("queue did not process {} entries in time", count);
    }

    fn start_queue(processor: Arc<SlowProcessor>, workers: usize) -> ProcessingQueue {
        ProcessingQueue::start(processor, EntryLocks::new(), workers, 64, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_worker_count() {
        let processor = Arc::new(SlowProcessor::default());
        let queue = start_queue(processor.clone(), 3);

        for i in 0..12 {
            queue.enqueue(&format!("entry-{}", i)).await.unwrap();
        }

        let stats = wait_for_processed(&queue, 12).await;
        assert!(processor.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(stats.currently_processing, 0);
        assert!((stats.total_cost - 6.0).abs() < 1e-9);
        assert!((stats.average_cost_per_entry - 0.5).abs() < 1e-9);
        assert_eq!(stats.total_processing_time_ms, 360);

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_is_rejected() {
        let processor = Arc::new(SlowProcessor::default());
        let queue = start_queue(processor, 1);

        queue.enqueue("same").await.unwrap();
        let again = queue.enqueue("same").await;
        assert!(matches!(again, Err(AppError::EntryBusy(_))));

        wait_for_processed(&queue, 1).await;
        queue.enqueue("same").await.unwrap();
        wait_for_processed(&queue, 2).await;

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_panic_does_not_kill_worker() {
        let processor = Arc::new(SlowProcessor::default());
        let queue = start_queue(processor, 1);

        queue.enqueue("panics").await.unwrap();
        queue.enqueue("after").await.unwrap();

        let stats = wait_for_processed(&queue, 2).await;
        assert_eq!(stats.total_failures, 1);
        assert!(!queue.locks().is_held("panics"));

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_fails() {
        let queue = start_queue(Arc::new(SlowProcessor::default()), 2);
        queue.shutdown().await;

        let result = queue.enqueue("late").await;
        assert!(matches!(result, Err(AppError::QueueClosed)));
    }

    #[tokio::test]
    async fn test_cancelled_run_is_not_counted() {
        let queue = start_queue(Arc::new(SlowProcessor::default()), 2);

        queue.enqueue("finishes").await.unwrap();
        wait_for_processed(&queue, 1).await;

        queue.enqueue("waits").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.shutdown().await;

        let stats = queue.stats().await;
        assert_eq!(stats.total_processed, 1);
        assert_eq!(stats.total_failures, 0);
        assert_eq!(stats.currently_processing, 0);
        assert!((stats.average_cost_per_entry - 0.5).abs() < 1e-9);
        assert!(!queue.locks().is_held("waits"));
    }
}
