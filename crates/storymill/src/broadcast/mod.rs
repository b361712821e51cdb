//! Broadcast channels for live subscribers.

pub mod job_progress;

pub use job_progress::{JobProgressBroadcaster, JobProgressEvent, ProgressKind};
