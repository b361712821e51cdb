//! Policy resolver: a pure mapping from job parameters to per-phase
//! directives. No side effects and no I/O, so the orchestrator can
//! short-circuit skipped phases before touching any collaborator.

use serde::{Deserialize, Serialize};

use crate::job::types::{JobParameters, Phase};

/// Per-phase execution directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Directive {
    /// Always run, regardless of existing artifacts.
    Force,
    /// Never run; mark the step completed with a skip detail.
    Skip,
    /// Run unless the gate reports an equivalent artifact already exists.
    Auto,
    /// Phase not applicable at all; completed immediately.
    Ignore,
    /// Default: run.
    Do,
}

impl Directive {
    pub fn as_str(&self) -> &'static str {
        match self {
            Directive::Force => "force",
            Directive::Skip => "skip",
            Directive::Auto => "auto",
            Directive::Ignore => "ignore",
            Directive::Do => "do",
        }
    }
}

/// Resolved directives for the three policy fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhasePolicies {
    pub extract: Directive,
    pub metadata: Directive,
    pub ingest: Directive,
}

impl PhasePolicies {
    /// Directive governing a phase. Template and store are both governed
    /// by the `metadata` field; the match is exhaustive so a new phase
    /// can't silently run unpoliced.
    pub fn directive_for(&self, phase: Phase) -> Directive {
        match phase {
            Phase::Extract => self.extract,
            Phase::Template => self.metadata,
            Phase::Store => self.metadata,
            Phase::Ingest => self.ingest,
        }
    }
}

/// Resolves job parameters to phase policies. Unset overrides default to
/// `do`.
pub fn resolve(parameters: &JobParameters) -> PhasePolicies {
    PhasePolicies {
        extract: parameters.policies.extract.unwrap_or(Directive::Do),
        metadata: parameters.policies.metadata.unwrap_or(Directive::Do),
        ingest: parameters.policies.ingest.unwrap_or(Directive::Do),
    }
}
