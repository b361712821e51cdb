pub mod artifact;
pub mod broadcast;
pub mod callback;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod index;
pub mod job;
pub mod pipeline;
pub mod storage;
pub mod template;
pub mod trace;
pub mod watchdog;
pub mod worker;

pub use artifact::{ArtifactKey, ArtifactKind, ArtifactLocation, ArtifactWrite};
pub use broadcast::{JobProgressBroadcaster, JobProgressEvent};
pub use callback::{CallbackCredentials, CallbackOutcome, CallbackSecret};
pub use config::{load_config, Config};
pub use error::{CallbackError, ConfigError, DispatchError, Result, StorymillError};
pub use job::{Correlation, Job, JobParameters, JobStatus, JobStore, Phase, Step, StepStatus};
pub use pipeline::{Directive, GateChecker, Orchestrator, PhasePolicies};
pub use trace::TraceRecorder;
pub use watchdog::WatchdogRegistry;
