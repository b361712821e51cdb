//! Polling worker pool.
//!
//! Each worker repeatedly claims the oldest queued job through the
//! store's conditional update and drives it through the orchestrator.
//! Coordination happens entirely in the database: any number of workers
//! (in any number of processes) can poll the same backlog and a job is
//! only ever claimed once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use tokio::task::JoinHandle;

use crate::db::job_repo::JobFilter;
use crate::job::JobStore;
use crate::pipeline::{Orchestrator, PipelineError, RunOutcome};

pub struct WorkerPool {
    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `worker_count` polling workers on the current runtime.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn start(
        orchestrator: Arc<Orchestrator>,
        store: JobStore,
        worker_count: usize,
        poll_interval: Duration,
    ) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let orchestrator = Arc::clone(&orchestrator);
            let store = store.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            workers.push(tokio::spawn(async move {
                run_worker(worker_id, orchestrator, store, shutdown_flag, poll_interval).await;
            }));
        }

        info!("Started {} workers", worker_count);
        Self { shutdown, workers }
    }

    /// Signals all workers to stop after their current job.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Waits for all workers to finish.
    pub async fn wait(self) {
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.await {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }
        info!("All workers have stopped");
    }
}

async fn run_worker(
    worker_id: usize,
    orchestrator: Arc<Orchestrator>,
    store: JobStore,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Acquire) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        let claimed = match store.claim_next() {
            Ok(job) => job,
            Err(e) => {
                error!("Worker {} failed to poll queue: {}", worker_id, e);
                tokio::time::sleep(poll_interval).await;
                continue;
            }
        };

        if let Some(job) = claimed {
            debug!("Worker {} processing job {}", worker_id, job.job_id);
            log_outcome(worker_id, &job.job_id, orchestrator.start(&job.job_id).await);
            continue;
        }

        // Nothing queued: give deferred-storage jobs a turn.
        sweep_pending_storage(worker_id, &orchestrator, &store).await;

        tokio::time::sleep(poll_interval).await;
    }

    debug!("Worker {} stopped", worker_id);
}

/// Picks up jobs parked in `pending-storage` and finishes their write.
/// `complete_storage` is internally guarded, so two workers sweeping the
/// same job resolve the race through the store.
async fn sweep_pending_storage(
    worker_id: usize,
    orchestrator: &Arc<Orchestrator>,
    store: &JobStore,
) {
    let filter = JobFilter {
        status: Some("pending-storage".to_string()),
        limit: Some(4),
        ..Default::default()
    };
    let jobs = match store.list(&filter) {
        Ok((jobs, _)) => jobs,
        Err(e) => {
            error!("Worker {} failed to list pending-storage jobs: {}", worker_id, e);
            return;
        }
    };

    for job in jobs {
        match orchestrator.complete_storage(&job.job_id).await {
            Ok(outcome) => debug!(
                "Worker {} completed deferred storage for {}: {:?}",
                worker_id, job.job_id, outcome
            ),
            Err(PipelineError::NotRunnable { .. }) => {
                // Another worker got there first.
            }
            Err(e) => error!(
                "Worker {} failed deferred storage for {}: {}",
                worker_id, job.job_id, e
            ),
        }
    }
}

fn log_outcome(worker_id: usize, job_id: &str, result: Result<RunOutcome, PipelineError>) {
    match result {
        Ok(RunOutcome::AwaitingCallback) => {
            debug!("Worker {}: job {} awaiting callback", worker_id, job_id)
        }
        Ok(outcome) => debug!("Worker {}: job {} -> {:?}", worker_id, job_id, outcome),
        Err(PipelineError::NotRunnable { .. }) => {
            // Lost the claim race to another worker; not an error.
            debug!("Worker {}: job {} claimed elsewhere", worker_id, job_id)
        }
        Err(e) => error!("Worker {}: job {} failed: {}", worker_id, job_id, e),
    }
}
