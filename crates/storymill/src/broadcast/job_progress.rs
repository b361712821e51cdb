//! Job progress broadcaster for real-time job status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::job::types::{JobStatus, Phase};

/// What a progress event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Phase,
    Completed,
    Failed,
    /// The watchdog observed no progress before its deadline.
    Stalled,
}

/// Progress event for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    /// Unique job identifier.
    pub job_id: String,
    pub kind: ProgressKind,
    /// Phase the event refers to, when phase-scoped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    /// Overall job status at event time.
    pub status: JobStatus,
    /// Human-readable message describing current activity.
    pub message: String,
    /// Timestamp of this event.
    pub timestamp: DateTime<Utc>,
    /// Error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobProgressEvent {
    /// Creates a phase-transition event.
    pub fn phase(job_id: &str, phase: Phase, message: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            kind: ProgressKind::Phase,
            phase: Some(phase),
            status: JobStatus::Running,
            message: message.to_string(),
            timestamp: Utc::now(),
            error: None,
        }
    }

    /// Creates a completion event.
    pub fn completed(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            kind: ProgressKind::Completed,
            phase: None,
            status: JobStatus::Completed,
            message: "Processing completed successfully".to_string(),
            timestamp: Utc::now(),
            error: None,
        }
    }

    /// Creates a failure event.
    pub fn failed(job_id: &str, phase: Option<Phase>, error: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            kind: ProgressKind::Failed,
            phase,
            status: JobStatus::Failed,
            message: "Processing failed".to_string(),
            timestamp: Utc::now(),
            error: Some(error.to_string()),
        }
    }

    /// Creates a stalled event (watchdog expiry).
    pub fn stalled(job_id: &str, phase: Phase) -> Self {
        Self {
            job_id: job_id.to_string(),
            kind: ProgressKind::Stalled,
            phase: Some(phase),
            status: JobStatus::Failed,
            message: "No progress before watchdog deadline".to_string(),
            timestamp: Utc::now(),
            error: Some("watchdog_timeout".to_string()),
        }
    }
}

/// Broadcasts job progress events for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcaster_send_receive() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        broadcaster.send(JobProgressEvent::phase(
            "job-1",
            Phase::Extract,
            "Dispatching extraction...",
        ));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.job_id, "job-1");
        assert_eq!(received.kind, ProgressKind::Phase);
        assert_eq!(received.phase, Some(Phase::Extract));
        assert_eq!(received.status, JobStatus::Running);
    }

    #[test]
    fn test_stalled_event_shape() {
        let event = JobProgressEvent::stalled("job-2", Phase::Extract);
        assert_eq!(event.kind, ProgressKind::Stalled);
        assert_eq!(event.status, JobStatus::Failed);
        assert_eq!(event.error.as_deref(), Some("watchdog_timeout"));
    }

    #[test]
    fn test_send_without_receivers_is_fine() {
        let broadcaster = JobProgressBroadcaster::new(4);
        broadcaster.send(JobProgressEvent::completed("job-3"));
    }

    #[test]
    fn test_failure_event_carries_error() {
        let broadcaster = JobProgressBroadcaster::default();
        let mut rx = broadcaster.subscribe();

        broadcaster.send(JobProgressEvent::failed(
            "job-4",
            Some(Phase::Ingest),
            "index unavailable",
        ));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.kind, ProgressKind::Failed);
        assert_eq!(received.error.as_deref(), Some("index unavailable"));
    }
}
