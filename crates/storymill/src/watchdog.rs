//! Watchdog: deadline-based monitor for jobs parked in an asynchronous
//! wait. Armed when a job dispatches to the extraction worker, cleared
//! when the callback arrives or the job terminates through the normal
//! path. A cleared watchdog must not fire late: the timer task is
//! aborted on clear, and the expiry path itself re-checks job state with
//! a guarded update before failing anything.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::job::{JobStatus, JobStore, Phase};
use crate::trace::{EventInput, SpanStatus, TraceRecorder};

/// Default watchdog deadline.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(600);

/// Per-job watchdog timers. Cloning shares the timer table.
#[derive(Clone)]
pub struct WatchdogRegistry {
    store: JobStore,
    recorder: TraceRecorder,
    broadcaster: JobProgressBroadcaster,
    deadline: Duration,
    timers: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl WatchdogRegistry {
    pub fn new(
        store: JobStore,
        recorder: TraceRecorder,
        broadcaster: JobProgressBroadcaster,
        deadline: Duration,
    ) -> Self {
        Self {
            store,
            recorder,
            broadcaster,
            deadline,
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Arms (or re-arms) the watchdog for a job waiting in `phase`.
    pub fn arm(&self, job_id: &str, phase: Phase) {
        let store = self.store.clone();
        let recorder = self.recorder.clone();
        let broadcaster = self.broadcaster.clone();
        let deadline = self.deadline;
        let id = job_id.to_string();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            expire(&store, &recorder, &broadcaster, &id, phase, deadline);
        });

        if let Ok(mut timers) = self.timers.lock() {
            if let Some(old) = timers.insert(job_id.to_string(), handle) {
                old.abort();
            }
        }
    }

    /// Clears the watchdog; called on callback receipt and on terminal
    /// transitions through the normal path.
    pub fn clear(&self, job_id: &str) {
        if let Ok(mut timers) = self.timers.lock() {
            if let Some(handle) = timers.remove(job_id) {
                handle.abort();
            }
        }
    }

    /// Number of armed timers (introspection for tests and health).
    pub fn armed(&self) -> usize {
        self.timers.lock().map(|t| t.len()).unwrap_or(0)
    }
}

/// Expiry path. Every mutation is guarded so a timer that lost the race
/// against real progress is a no-op.
fn expire(
    store: &JobStore,
    recorder: &TraceRecorder,
    broadcaster: &JobProgressBroadcaster,
    job_id: &str,
    phase: Phase,
    deadline: Duration,
) {
    let details = serde_json::json!({
        "reason": "watchdog_timeout",
        "deadlineSecs": deadline.as_secs(),
    });
    let step_failed = match store.fail_step_if_running(
        job_id,
        phase,
        "No callback before watchdog deadline",
        &details,
    ) {
        Ok(failed) => failed,
        Err(e) => {
            log::error!("Watchdog for job {} could not update step: {}", job_id, e);
            return;
        }
    };
    if !step_failed {
        log::debug!("Watchdog for job {} fired after progress; ignoring", job_id);
        return;
    }

    log::warn!(
        "Watchdog expired for job {} in phase {} after {}s",
        job_id,
        phase,
        deadline.as_secs()
    );

    if let Err(e) = record_expiry(store, recorder, job_id, phase) {
        log::error!("Watchdog for job {} could not record expiry: {}", job_id, e);
    }

    broadcaster.send(JobProgressEvent::stalled(job_id, phase));
}

fn record_expiry(
    store: &JobStore,
    recorder: &TraceRecorder,
    job_id: &str,
    phase: Phase,
) -> Result<(), crate::db::DatabaseError> {
    // The timeout is distinguished in the trace from an upstream error so
    // operators can tell "never responded" from "responded with an error".
    recorder.add_event(
        job_id,
        EventInput::error("watchdog_expired")
            .with_message("job stalled in asynchronous wait")
            .with_attributes(serde_json::json!({ "phase": phase.as_str() })),
    )?;

    if let Some(job) = store.get(job_id)? {
        // Close the open phase span, then the root.
        let trace = recorder.trace_view(job_id)?;
        for span in trace.spans.iter().rev() {
            if span.ended_at.is_none() {
                recorder.end_span(job_id, &span.span_id, SpanStatus::Failed)?;
            }
        }
        store.set_error(job_id, "watchdog_timeout")?;
        if job.status == JobStatus::Running {
            store.set_status_if(job_id, JobStatus::Running, JobStatus::Failed)?;
        }
    }
    Ok(())
}
