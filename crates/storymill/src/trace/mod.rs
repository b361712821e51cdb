//! Hierarchical trace recording: spans bracket durations, events are
//! timestamped point facts. The trace is the post-hoc record of exactly
//! what happened to a job, in what order, across asynchronous boundaries.

pub mod gap;
pub mod recorder;
pub mod types;

pub use gap::{analyze_gaps, Gap};
pub use recorder::TraceRecorder;
pub use types::{Event, EventInput, EventLevel, Span, SpanStatus, TraceView};
