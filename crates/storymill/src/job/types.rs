use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::policy::Directive;

/// Fixed pipeline phases, in execution order.
///
/// The phase set is closed: adding a phase means extending this enum, and
/// the compiler will flag every exhaustive match that needs a new arm
/// (policy mapping, span naming, step ordering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Extract,
    Template,
    Store,
    Ingest,
}

impl Phase {
    /// All phases in fixed execution order.
    pub const ALL: [Phase; 4] = [Phase::Extract, Phase::Template, Phase::Store, Phase::Ingest];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Extract => "extract",
            Phase::Template => "template",
            Phase::Store => "store",
            Phase::Ingest => "ingest",
        }
    }

    pub fn parse(s: &str) -> Option<Phase> {
        match s {
            "extract" => Some(Phase::Extract),
            "template" => Some(Phase::Template),
            "store" => Some(Phase::Store),
            "ingest" => Some(Phase::Ingest),
            _ => None,
        }
    }

    /// Span name for the phase span in the trace.
    pub fn span_name(&self) -> &'static str {
        match self {
            Phase::Extract => "phase.extract",
            Phase::Template => "phase.template",
            Phase::Store => "phase.store",
            Phase::Ingest => "phase.ingest",
        }
    }

    /// Position within the fixed order.
    pub fn position(&self) -> usize {
        match self {
            Phase::Extract => 0,
            Phase::Template => 1,
            Phase::Store => 2,
            Phase::Ingest => 3,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    PendingStorage,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::PendingStorage => "pending-storage",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "pending-storage" => Some(JobStatus::PendingStorage),
            _ => None,
        }
    }

    /// Terminal jobs only re-open through an explicit requeue.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Per-phase step status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<StepStatus> {
        match s {
            "pending" => Some(StepStatus::Pending),
            "running" => Some(StepStatus::Running),
            "completed" => Some(StepStatus::Completed),
            "failed" => Some(StepStatus::Failed),
            "skipped" => Some(StepStatus::Skipped),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

/// Outcome of checking a step status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepTransition {
    /// The transition is a legal state change.
    Allowed,
    /// Same terminal status repeated; tolerated as a no-op.
    Idempotent,
    /// Illegal transition (e.g. terminal back to pending).
    Rejected,
}

impl StepStatus {
    /// Validates a transition per the step state machine: `running` only
    /// from `pending`; terminal from `pending` (policy skip paths) or
    /// `running`; repeating the same terminal status is a tolerated no-op.
    pub fn check_transition(from: StepStatus, to: StepStatus) -> StepTransition {
        use StepStatus::*;
        match (from, to) {
            (a, b) if a == b && a.is_terminal() => StepTransition::Idempotent,
            (Pending, Running) => StepTransition::Allowed,
            (Pending, Completed) | (Pending, Skipped) | (Pending, Failed) => {
                StepTransition::Allowed
            }
            (Running, Completed) | (Running, Failed) | (Running, Skipped) => {
                StepTransition::Allowed
            }
            _ => StepTransition::Rejected,
        }
    }
}

/// Identity of the source item being processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    /// Storage item id of the source document.
    pub item_id: String,
    /// Storage item id of the folder containing the source.
    pub parent_id: String,
    /// Original file name (e.g. "report.pdf").
    pub name: String,
    /// MIME type of the source file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl SourceRef {
    pub fn new(item_id: &str, parent_id: &str, name: &str) -> Self {
        let mime_type = mime_guess::from_path(name).first().map(|m| m.to_string());
        Self {
            item_id: item_id.to_string(),
            parent_id: parent_id.to_string(),
            name: name.to_string(),
            mime_type,
        }
    }

    /// File name without its last extension ("report.pdf" -> "report").
    pub fn base_name(&self) -> &str {
        match self.name.rfind('.') {
            Some(0) | None => &self.name,
            Some(pos) => &self.name[..pos],
        }
    }
}

/// How the source should be processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingOptions {
    /// Target language for the transcript/transformation (e.g. "de").
    pub target_language: String,
    /// Extraction method hint passed through to the extraction worker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_method: Option<String>,
    /// Whether the extraction worker may serve a cached result.
    #[serde(default)]
    pub use_cache: bool,
    /// Whether the extraction worker should return page images.
    #[serde(default)]
    pub include_images: bool,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            target_language: "de".to_string(),
            extraction_method: None,
            use_cache: false,
            include_images: false,
        }
    }
}

/// Immutable identity of what is being processed and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Correlation {
    pub source: SourceRef,
    #[serde(default)]
    pub options: ProcessingOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_name: Option<String>,
}

/// Per-phase policy overrides carried in job parameters.
/// Unset fields fall back to `do`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract: Option<Directive>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Directive>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingest: Option<Directive>,
}

/// Free-form per-job configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobParameters {
    #[serde(default)]
    pub policies: PolicyOverrides,
    /// Template used for the transformation artifact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Store artifacts in a shadow sub-folder next to the source
    /// (`true`, the default) or as sibling files (`false`).
    #[serde(default = "default_true")]
    pub create_folder: bool,
    /// Defer the store phase to a separate writer; the job parks in
    /// `pending-storage` until storage is completed.
    #[serde(default)]
    pub defer_storage: bool,
}

fn default_true() -> bool {
    true
}

impl Default for JobParameters {
    fn default() -> Self {
        Self {
            policies: PolicyOverrides::default(),
            template: None,
            create_folder: true,
            defer_storage: false,
        }
    }
}

/// One step record per phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub phase: Phase,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl Step {
    pub fn pending(phase: Phase) -> Self {
        Self {
            phase,
            status: StepStatus::Pending,
            started_at: None,
            ended_at: None,
            error: None,
            details: None,
        }
    }

    /// Details payload for a skipped-by-policy/gate step.
    pub fn skipped_details(reason: &str) -> serde_json::Value {
        serde_json::json!({ "skipped": true, "reason": reason })
    }
}

/// Terminal result payload for a completed job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResultSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_item: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transformation_item: Option<String>,
    #[serde(default)]
    pub ingested_chunks: u64,
    #[serde(default)]
    pub ingested_documents: u64,
}

/// The job aggregate as read from the store.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub steps: Vec<Step>,
    pub correlation: Correlation,
    pub parameters: JobParameters,
    /// Hash of the per-job callback secret; the plaintext is never stored.
    #[serde(skip_serializing)]
    pub secret_hash: String,
    /// Text extracted by the worker, kept for phase resumption.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResultSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn step(&self, phase: Phase) -> Option<&Step> {
        self.steps.iter().find(|s| s.phase == phase)
    }

    /// First phase whose step is neither terminal nor skipped, in order.
    pub fn next_pending_phase(&self) -> Option<Phase> {
        Phase::ALL.iter().copied().find(|p| {
            self.step(*p)
                .map(|s| !s.status.is_terminal())
                .unwrap_or(true)
        })
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}
