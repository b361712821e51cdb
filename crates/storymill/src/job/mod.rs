//! Job aggregate: the persisted unit of pipeline work.

pub mod store;
pub mod types;

pub use store::{JobStore, StepUpdate};
pub use types::{
    Correlation, Job, JobParameters, JobResultSummary, JobStatus, Phase, PolicyOverrides,
    ProcessingOptions, SourceRef, Step, StepStatus, StepTransition,
};
