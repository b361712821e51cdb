//! Phase orchestrator: the persisted state machine that drives a job
//! through extract → template → store → ingest.
//!
//! Every decision is re-derived from the job store, never from in-memory
//! continuations — the process that resumes a job after a callback may
//! not be the process that dispatched the work. Synchronous phases
//! (template, store, ingest) run in-line; extraction dispatches to the
//! external worker and returns, leaving the job awaiting its callback.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::artifact::{ArtifactKey, ArtifactResolver, ArtifactWriter};
use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::callback::CallbackData;
use crate::dispatch::{DispatchRequest, ExtractionDispatcher};
use crate::error::DispatchError;
use crate::index::{IndexMetadata, IndexService};
use crate::job::types::{Job, JobStatus, Phase, Step, StepStatus};
use crate::job::JobStore;
use crate::storage::{StorageError, StorageProvider};
use crate::template::{TemplateEngine, DEFAULT_TEMPLATE};
use crate::trace::{EventInput, SpanStatus, TraceRecorder};
use crate::watchdog::WatchdogRegistry;

use super::error::PipelineError;
use super::gate::GateChecker;
use super::policy::{self, Directive};

/// Event recorded when the extraction worker acknowledges a dispatch.
/// The start route refuses re-dispatch while this is present.
pub const EVENT_EXTRACTION_DISPATCHED: &str = "extraction_dispatched";

/// Ingestion refuses resolved text shorter than this: a near-empty input
/// means an earlier phase silently produced nothing, and a "successful
/// no-op" would corrupt the index.
const MIN_INGEST_TEXT_CHARS: usize = 16;

/// Where a pipeline run left the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Extraction dispatched; the job waits for its callback.
    AwaitingCallback,
    /// Terminal artifact write deferred to a separate writer.
    PendingStorage,
    Completed,
    Failed,
}

enum PhaseFlow {
    Continue,
    Suspend(RunOutcome),
    Failed,
}

pub struct Orchestrator {
    store: JobStore,
    recorder: TraceRecorder,
    broadcaster: JobProgressBroadcaster,
    watchdog: WatchdogRegistry,
    storage: Arc<dyn StorageProvider>,
    index: Arc<dyn IndexService>,
    dispatcher: Arc<dyn ExtractionDispatcher>,
    templates: TemplateEngine,
    /// Base URL under which this service receives callbacks.
    public_base_url: String,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: JobStore,
        recorder: TraceRecorder,
        broadcaster: JobProgressBroadcaster,
        watchdog: WatchdogRegistry,
        storage: Arc<dyn StorageProvider>,
        index: Arc<dyn IndexService>,
        dispatcher: Arc<dyn ExtractionDispatcher>,
        public_base_url: &str,
    ) -> Self {
        Self {
            store,
            recorder,
            broadcaster,
            watchdog,
            storage,
            index,
            dispatcher,
            templates: TemplateEngine::new(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Starts (or re-enters) a queued or running job.
    ///
    /// Idempotent re-entry: when a dispatch acknowledgment is already in
    /// the trace and the extract step is still waiting, no second
    /// dispatch happens.
    pub async fn start(&self, job_id: &str) -> Result<RunOutcome, PipelineError> {
        let job = self.store.get_required(job_id)?;
        match job.status {
            JobStatus::Queued => {
                if !self
                    .store
                    .set_status_if(job_id, JobStatus::Queued, JobStatus::Running)?
                {
                    // Another worker claimed it between read and write.
                    return Err(PipelineError::NotRunnable {
                        job_id: job_id.to_string(),
                        status: self.store.get_required(job_id)?.status.as_str().to_string(),
                    });
                }
            }
            JobStatus::Running => {}
            status => {
                return Err(PipelineError::NotRunnable {
                    job_id: job_id.to_string(),
                    status: status.as_str().to_string(),
                })
            }
        }

        self.recorder.initialize_trace(job_id)?;

        if self.recorder.has_event(job_id, EVENT_EXTRACTION_DISPATCHED)? {
            let job = self.store.get_required(job_id)?;
            if job
                .step(Phase::Extract)
                .map(|s| s.status == StepStatus::Running)
                .unwrap_or(false)
            {
                info!(job_id, "start refused re-dispatch: already awaiting callback");
                return Ok(RunOutcome::AwaitingCallback);
            }
        }

        self.advance(job_id, false).await
    }

    /// Resume entry point for the extraction callback.
    pub async fn resume_extraction(
        &self,
        job_id: &str,
        data: Option<&CallbackData>,
        process_id: Option<&str>,
    ) -> Result<RunOutcome, PipelineError> {
        self.watchdog.clear(job_id);

        let job = self.store.get_required(job_id)?;
        let extract = job.step(Phase::Extract);
        if extract.map(|s| s.status.is_terminal()).unwrap_or(false) {
            // Duplicate delivery after the phase already settled; the
            // correlator has logged the event, nothing to redo.
            debug!(job_id, "duplicate extraction callback ignored");
            return Ok(outcome_for_status(job.status));
        }

        let text = data
            .and_then(|d| d.extracted_text.as_deref())
            .map(str::trim)
            .unwrap_or("");
        if text.is_empty() {
            self.fail_phase(
                job_id,
                Phase::Extract,
                "Extraction worker returned no text",
                serde_json::json!({ "source": "upstream", "processId": process_id }),
            )?;
            return Ok(RunOutcome::Failed);
        }

        self.store.set_extracted_text(job_id, text)?;
        self.archive_images(&job, data);

        self.store.update_step(
            job_id,
            Phase::Extract,
            StepStatus::Completed,
            None,
            Some(&serde_json::json!({
                "textChars": text.len(),
                "processId": process_id,
            })),
        )?;
        self.end_phase_span(job_id, Phase::Extract, SpanStatus::Completed)?;
        self.broadcaster.send(JobProgressEvent::phase(
            job_id,
            Phase::Extract,
            "Extraction callback received",
        ));

        self.advance(job_id, false).await
    }

    /// Entry point for the deferred storage writer: picks a job out of
    /// `pending-storage` and finishes the remaining phases.
    pub async fn complete_storage(&self, job_id: &str) -> Result<RunOutcome, PipelineError> {
        if !self
            .store
            .set_status_if(job_id, JobStatus::PendingStorage, JobStatus::Running)?
        {
            let status = self.store.get_required(job_id)?.status;
            return Err(PipelineError::NotRunnable {
                job_id: job_id.to_string(),
                status: status.as_str().to_string(),
            });
        }
        self.advance(job_id, true).await
    }

    /// Walks the remaining phases in fixed order. Steps already terminal
    /// (completed, failed, skipped) are left untouched.
    async fn advance(
        &self,
        job_id: &str,
        allow_deferred_store: bool,
    ) -> Result<RunOutcome, PipelineError> {
        // The gate cache lives exactly as long as this run.
        let gate = GateChecker::new(
            ArtifactResolver::new(self.storage.clone()),
            self.index.clone(),
        );

        loop {
            let job = self.store.get_required(job_id)?;
            if job.steps.iter().any(|s| s.status == StepStatus::Failed) {
                // Fail fast and permanently: later phases are never
                // attempted past a failed step.
                return Ok(RunOutcome::Failed);
            }
            let Some(phase) = job.next_pending_phase() else {
                return self.finalize(job_id);
            };

            let policies = policy::resolve(&job.parameters);
            let directive = policies.directive_for(phase);
            debug!(job_id, phase = %phase, directive = directive.as_str(), "phase decision");

            match directive {
                Directive::Ignore => {
                    self.skip_phase(job_id, phase, "policy_ignore")?;
                    continue;
                }
                Directive::Skip => {
                    self.skip_phase(job_id, phase, "policy_skip")?;
                    continue;
                }
                Directive::Auto => {
                    let result = gate.check(phase, &job).await?;
                    if result.exists {
                        self.skip_phase(job_id, phase, "artifact_exists")?;
                        continue;
                    }
                }
                Directive::Force | Directive::Do => {}
            }

            match self.run_phase(&job, phase, allow_deferred_store).await? {
                PhaseFlow::Continue => continue,
                PhaseFlow::Suspend(outcome) => return Ok(outcome),
                PhaseFlow::Failed => return Ok(RunOutcome::Failed),
            }
        }
    }

    async fn run_phase(
        &self,
        job: &Job,
        phase: Phase,
        allow_deferred_store: bool,
    ) -> Result<PhaseFlow, PipelineError> {
        let job_id = job.job_id.as_str();

        if phase == Phase::Store && job.parameters.defer_storage && !allow_deferred_store {
            self.store
                .set_status_if(job_id, JobStatus::Running, JobStatus::PendingStorage)?;
            self.recorder
                .add_event(job_id, EventInput::info("storage_deferred"))?;
            info!(job_id, "storage deferred; job parked in pending-storage");
            return Ok(PhaseFlow::Suspend(RunOutcome::PendingStorage));
        }

        self.store
            .update_step(job_id, phase, StepStatus::Running, None, None)?;
        self.recorder
            .start_span(job_id, phase.span_name(), Some(phase), None)?;
        self.broadcaster.send(JobProgressEvent::phase(
            job_id,
            phase,
            &format!("Running {} phase", phase),
        ));

        let result = match phase {
            Phase::Extract => return self.dispatch_extraction(job).await,
            Phase::Template => self.run_template(job),
            Phase::Store => self.run_store(job),
            Phase::Ingest => self.run_ingest(job).await,
        };

        match result {
            Ok(details) => {
                self.store.update_step(
                    job_id,
                    phase,
                    StepStatus::Completed,
                    None,
                    Some(&details),
                )?;
                self.end_phase_span(job_id, phase, SpanStatus::Completed)?;
                Ok(PhaseFlow::Continue)
            }
            Err(e) => {
                self.fail_phase(
                    job_id,
                    phase,
                    &e.to_string(),
                    failure_details(&e),
                )?;
                Ok(PhaseFlow::Failed)
            }
        }
    }

    /// Fire-and-forget dispatch to the extraction worker. The secret is
    /// rotated here so the plaintext exists only in this process and only
    /// one secret is ever valid for the attempt.
    async fn dispatch_extraction(&self, job: &Job) -> Result<PhaseFlow, PipelineError> {
        let job_id = job.job_id.as_str();
        let source = &job.correlation.source;

        let secret = match self.store.rotate_secret(job_id) {
            Ok(s) => s,
            Err(e) => {
                self.fail_phase(
                    job_id,
                    Phase::Extract,
                    &e.to_string(),
                    serde_json::json!({ "source": "internal" }),
                )?;
                return Ok(PhaseFlow::Failed);
            }
        };

        let content = match self.storage.get_binary(&source.item_id) {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound(id)) => {
                let err = DispatchError::SourceUnavailable {
                    item_id: id,
                    reason: "not found in storage".to_string(),
                };
                self.fail_phase(
                    job_id,
                    Phase::Extract,
                    &err.to_string(),
                    serde_json::json!({ "source": "storage" }),
                )?;
                return Ok(PhaseFlow::Failed);
            }
            Err(e) => return Err(e.into()),
        };

        let request = DispatchRequest {
            job_id: job_id.to_string(),
            file_name: source.name.clone(),
            mime_type: source.mime_type.clone(),
            content,
            options: job.correlation.options.clone(),
            callback_url: format!("{}/jobs/{}", self.public_base_url, job_id),
            callback_token: secret.expose().to_string(),
        };

        match self.dispatcher.dispatch(request).await {
            Ok(ack) => {
                self.recorder.add_event(
                    job_id,
                    EventInput::info(EVENT_EXTRACTION_DISPATCHED).with_attributes(
                        serde_json::json!({ "processId": ack.process_id }),
                    ),
                )?;
                self.watchdog.arm(job_id, Phase::Extract);
                info!(job_id, "extraction dispatched; awaiting callback");
                Ok(PhaseFlow::Suspend(RunOutcome::AwaitingCallback))
            }
            Err(e) => {
                self.fail_phase(
                    job_id,
                    Phase::Extract,
                    &e.to_string(),
                    serde_json::json!({ "source": "upstream" }),
                )?;
                Ok(PhaseFlow::Failed)
            }
        }
    }

    fn run_template(&self, job: &Job) -> Result<serde_json::Value, PipelineError> {
        let text = self.resolve_text(job)?;
        let template = job
            .parameters
            .template
            .as_deref()
            .unwrap_or(DEFAULT_TEMPLATE);
        let rendered = self.templates.render(
            template,
            &job.correlation.source,
            &job.correlation.options,
            &text,
        )?;
        Ok(serde_json::json!({
            "template": template,
            "renderedChars": rendered.len(),
        }))
    }

    fn run_store(&self, job: &Job) -> Result<serde_json::Value, PipelineError> {
        let source = &job.correlation.source;
        let options = &job.correlation.options;
        let template = job
            .parameters
            .template
            .as_deref()
            .unwrap_or(DEFAULT_TEMPLATE);
        let text = self.resolve_text(job)?;

        let transcript_content = self.templates.render_transcript(source, options, &text);
        let transformation_content =
            self.templates
                .render(template, source, options, &text)?;

        let writer = ArtifactWriter::new(ArtifactResolver::new(self.storage.clone()));
        let create_folder = job.parameters.create_folder;

        let transcript_key = ArtifactKey::transcript(&source.item_id, &options.target_language);
        let transcript = writer.write(
            &transcript_key,
            source,
            transcript_content.as_bytes(),
            create_folder,
        )?;

        let transformation_key =
            ArtifactKey::transformation(&source.item_id, &options.target_language, template);
        let transformation = writer.write(
            &transformation_key,
            source,
            transformation_content.as_bytes(),
            create_folder,
        )?;

        debug!(
            job_id = %job.job_id,
            transcript = %transcript.item_id,
            transformation = %transformation.item_id,
            "artifacts stored"
        );

        Ok(serde_json::json!({
            "transcriptItem": transcript.item_id,
            "transcriptWasUpdated": transcript.was_updated,
            "transformationItem": transformation.item_id,
            "transformationWasUpdated": transformation.was_updated,
            "location": transcript.location,
        }))
    }

    async fn run_ingest(&self, job: &Job) -> Result<serde_json::Value, PipelineError> {
        let text = self.resolve_text(job)?;
        let trimmed = text.trim();
        if trimmed.len() < MIN_INGEST_TEXT_CHARS {
            return Err(PipelineError::TrivialText {
                length: trimmed.len(),
                minimum: MIN_INGEST_TEXT_CHARS,
            });
        }

        let source = &job.correlation.source;
        let key = ArtifactKey::transcript(
            &source.item_id,
            &job.correlation.options.target_language,
        );
        let metadata = IndexMetadata {
            job_id: job.job_id.clone(),
            source_name: source.name.clone(),
            mime_type: source.mime_type.clone(),
            language: job.correlation.options.target_language.clone(),
            batch_id: job.correlation.batch_id.clone(),
        };

        let counts = self.index.upsert(trimmed, &metadata, &key).await?;
        Ok(serde_json::json!({
            "upsertedChunks": counts.upserted_chunks,
            "upsertedDocuments": counts.upserted_documents,
        }))
    }

    /// The text later phases operate on: the worker's extracted text, or
    /// the existing transcript artifact when extraction was skipped.
    fn resolve_text(&self, job: &Job) -> Result<String, PipelineError> {
        if let Some(text) = &job.extracted_text {
            return Ok(text.clone());
        }

        let source = &job.correlation.source;
        let key = ArtifactKey::transcript(
            &source.item_id,
            &job.correlation.options.target_language,
        );
        let resolver = ArtifactResolver::new(self.storage.clone());
        if let Some((item, _)) = resolver.find(&key, source)? {
            let bytes = self.storage.get_binary(&item.id)?;
            let text = String::from_utf8_lossy(&bytes).to_string();
            return Ok(strip_front_matter(&text).to_string());
        }

        Err(PipelineError::MissingExtractedText(job.job_id.clone()))
    }

    /// Best-effort archiving of the worker's page-image bundle next to
    /// the other artifacts. Failure is a warning, never a phase failure.
    fn archive_images(&self, job: &Job, data: Option<&CallbackData>) {
        use base64::Engine as _;

        let Some(data) = data else { return };
        let (Some(encoded), Some(filename)) = (
            data.images_archive_data.as_deref(),
            data.images_archive_filename.as_deref(),
        ) else {
            return;
        };

        let source = &job.correlation.source;
        let result = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                let folder = self
                    .storage
                    .create_folder(
                        &source.parent_id,
                        &ArtifactKey::shadow_folder_name(source.base_name()),
                    )
                    .map_err(|e| e.to_string())?;
                self.storage
                    .upload_file(&folder.id, filename, &bytes)
                    .map_err(|e| e.to_string())
            });

        match result {
            Ok(outcome) => {
                self.recorder
                    .add_event(
                        &job.job_id,
                        EventInput::info("images_archived").with_attributes(
                            serde_json::json!({ "item": outcome.item.id }),
                        ),
                    )
                    .ok();
            }
            Err(e) => {
                warn!(job_id = %job.job_id, "failed to archive images: {}", e);
                self.recorder
                    .add_event(
                        &job.job_id,
                        EventInput::warn("images_archive_failed").with_message(&e),
                    )
                    .ok();
            }
        }
    }

    fn skip_phase(
        &self,
        job_id: &str,
        phase: Phase,
        reason: &str,
    ) -> Result<(), PipelineError> {
        let details = Step::skipped_details(reason);
        self.store
            .update_step(job_id, phase, StepStatus::Completed, None, Some(&details))?;
        self.recorder.add_event(
            job_id,
            EventInput::info("phase_skipped").with_attributes(serde_json::json!({
                "phase": phase.as_str(),
                "reason": reason,
            })),
        )?;
        debug!(job_id, phase = %phase, reason, "phase skipped");
        Ok(())
    }

    /// Persists a phase failure: step, spans, job status and error. The
    /// job store is the durable record; HTTP responses are secondary.
    fn fail_phase(
        &self,
        job_id: &str,
        phase: Phase,
        error: &str,
        details: serde_json::Value,
    ) -> Result<(), PipelineError> {
        warn!(job_id, phase = %phase, error, "phase failed");
        self.watchdog.clear(job_id);

        self.store
            .update_step(job_id, phase, StepStatus::Failed, Some(error), Some(&details))?;
        self.recorder.add_event(
            job_id,
            EventInput::error("phase_failed")
                .with_message(error)
                .with_attributes(serde_json::json!({ "phase": phase.as_str() })),
        )?;
        self.end_phase_span(job_id, phase, SpanStatus::Failed)?;
        self.end_root_span(job_id, SpanStatus::Failed)?;

        self.store.set_error(job_id, error)?;
        if !self
            .store
            .set_status_if(job_id, JobStatus::Running, JobStatus::Failed)?
        {
            self.store
                .set_status_if(job_id, JobStatus::PendingStorage, JobStatus::Failed)?;
        }

        self.broadcaster
            .send(JobProgressEvent::failed(job_id, Some(phase), error));
        Ok(())
    }

    fn finalize(&self, job_id: &str) -> Result<RunOutcome, PipelineError> {
        self.watchdog.clear(job_id);
        let job = self.store.get_required(job_id)?;

        if job
            .steps
            .iter()
            .any(|s| s.status == StepStatus::Failed)
        {
            // advance() only lands here when every step is terminal; a
            // failed step means the job already failed elsewhere.
            return Ok(RunOutcome::Failed);
        }

        let mut summary = crate::job::types::JobResultSummary::default();
        if let Some(details) = job.step(Phase::Store).and_then(|s| s.details.as_ref()) {
            summary.transcript_item = details
                .get("transcriptItem")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            summary.transformation_item = details
                .get("transformationItem")
                .and_then(|v| v.as_str())
                .map(str::to_string);
        }
        if let Some(details) = job.step(Phase::Ingest).and_then(|s| s.details.as_ref()) {
            summary.ingested_chunks = details
                .get("upsertedChunks")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            summary.ingested_documents = details
                .get("upsertedDocuments")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
        }

        self.store.set_result(job_id, &summary)?;
        self.end_root_span(job_id, SpanStatus::Completed)?;
        self.store
            .set_status_if(job_id, JobStatus::Running, JobStatus::Completed)?;
        self.broadcaster.send(JobProgressEvent::completed(job_id));
        info!(job_id, "job completed");
        Ok(RunOutcome::Completed)
    }

    /// Ends the open span recorded for a phase, if any.
    fn end_phase_span(
        &self,
        job_id: &str,
        phase: Phase,
        status: SpanStatus,
    ) -> Result<(), PipelineError> {
        let trace = self.recorder.trace_view(job_id)?;
        if let Some(span) = trace
            .spans
            .iter()
            .rev()
            .find(|s| s.phase == Some(phase) && s.ended_at.is_none())
        {
            self.recorder.end_span(job_id, &span.span_id, status)?;
        }
        Ok(())
    }

    fn end_root_span(&self, job_id: &str, status: SpanStatus) -> Result<(), PipelineError> {
        let trace = self.recorder.trace_view(job_id)?;
        if let Some(root) = trace
            .spans
            .iter()
            .find(|s| s.parent_span_id.is_none() && s.ended_at.is_none())
        {
            self.recorder.end_span(job_id, &root.span_id, status)?;
        }
        Ok(())
    }
}

/// Drops a leading YAML front-matter block from artifact content so a
/// transcript read back from storage yields the original text.
fn strip_front_matter(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("---\n") else {
        return text;
    };
    match rest.find("\n---\n") {
        Some(pos) => &rest[pos + 5..],
        None => text,
    }
}

fn outcome_for_status(status: JobStatus) -> RunOutcome {
    match status {
        JobStatus::Completed => RunOutcome::Completed,
        JobStatus::Failed => RunOutcome::Failed,
        JobStatus::PendingStorage => RunOutcome::PendingStorage,
        JobStatus::Queued | JobStatus::Running => RunOutcome::AwaitingCallback,
    }
}

fn failure_details(error: &PipelineError) -> serde_json::Value {
    let source = match error {
        PipelineError::TrivialText { .. } => "phase_input_contract",
        PipelineError::MissingExtractedText(_) => "phase_input_contract",
        PipelineError::Index(_) | PipelineError::Dispatch(_) => "upstream",
        PipelineError::Template(_) => "validation",
        _ => "internal",
    };
    serde_json::json!({ "source": source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::dispatch::DispatchAck;
    use crate::index::InMemoryIndex;
    use crate::job::types::{
        Correlation, JobParameters, PolicyOverrides, ProcessingOptions, SourceRef,
    };
    use crate::storage::FilesystemStorage;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Records dispatch requests and acknowledges them.
    #[derive(Default)]
    struct RecordingDispatcher {
        requests: Mutex<Vec<(String, String)>>,
        reject: bool,
    }

    impl RecordingDispatcher {
        fn rejecting() -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                reject: true,
            }
        }

        fn count(&self) -> usize {
            self.requests.lock().map(|r| r.len()).unwrap_or(0)
        }

        fn last_token(&self) -> Option<String> {
            self.requests
                .lock()
                .ok()
                .and_then(|r| r.last().map(|(_, t)| t.clone()))
        }
    }

    #[async_trait]
    impl ExtractionDispatcher for RecordingDispatcher {
        async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchAck, DispatchError> {
            if self.reject {
                return Err(DispatchError::Rejected {
                    status: 503,
                    body: "worker down".to_string(),
                });
            }
            if let Ok(mut requests) = self.requests.lock() {
                requests.push((request.job_id.clone(), request.callback_token.clone()));
            }
            Ok(DispatchAck {
                process_id: Some("proc-1".to_string()),
            })
        }
    }

    struct Harness {
        _tmp: TempDir,
        store: JobStore,
        recorder: TraceRecorder,
        storage: Arc<dyn StorageProvider>,
        index: Arc<InMemoryIndex>,
        dispatcher: Arc<RecordingDispatcher>,
        orchestrator: Orchestrator,
    }

    fn harness_with(dispatcher: RecordingDispatcher) -> Harness {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let store = JobStore::new(db.clone());
        let recorder = TraceRecorder::new(db);
        let broadcaster = JobProgressBroadcaster::default();
        let watchdog = WatchdogRegistry::new(
            store.clone(),
            recorder.clone(),
            broadcaster.clone(),
            Duration::from_secs(600),
        );
        let storage: Arc<dyn StorageProvider> = Arc::new(FilesystemStorage::new(tmp.path()));
        storage.create_folder("", "library").unwrap();
        storage
            .upload_file("library", "report.pdf", b"%PDF-1.4 source bytes")
            .unwrap();
        let index = Arc::new(InMemoryIndex::new());
        let dispatcher = Arc::new(dispatcher);

        let orchestrator = Orchestrator::new(
            store.clone(),
            recorder.clone(),
            broadcaster,
            watchdog,
            storage.clone(),
            index.clone() as Arc<dyn IndexService>,
            dispatcher.clone() as Arc<dyn ExtractionDispatcher>,
            "http://localhost:8080",
        );

        Harness {
            _tmp: tmp,
            store,
            recorder,
            storage,
            index,
            dispatcher,
            orchestrator,
        }
    }

    fn harness() -> Harness {
        harness_with(RecordingDispatcher::default())
    }

    fn correlation() -> Correlation {
        Correlation {
            source: SourceRef::new("library/report.pdf", "library", "report.pdf"),
            options: ProcessingOptions::default(),
            batch_id: None,
            batch_name: None,
        }
    }

    fn create_job(h: &Harness, parameters: JobParameters) -> String {
        let (job, _) = h.store.create(&correlation(), &parameters).unwrap();
        job.job_id
    }

    fn callback_data(text: &str) -> CallbackData {
        CallbackData {
            extracted_text: Some(text.to_string()),
            ..Default::default()
        }
    }

    const SAMPLE_TEXT: &str =
        "Quarterly report for the data platform.\n\nRevenue grew in every segment.\n\nOutlook remains stable.";

    #[tokio::test]
    async fn test_end_to_end_with_callback_resume() {
        let h = harness();
        let job_id = create_job(&h, JobParameters::default());

        // Start: dispatches extraction and suspends.
        let outcome = h.orchestrator.start(&job_id).await.unwrap();
        assert_eq!(outcome, RunOutcome::AwaitingCallback);
        assert_eq!(h.dispatcher.count(), 1);

        let job = h.store.get_required(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.step(Phase::Extract).unwrap().status, StepStatus::Running);

        // Callback resume: runs template, store, ingest to completion.
        let outcome = h
            .orchestrator
            .resume_extraction(&job_id, Some(&callback_data(SAMPLE_TEXT)), Some("proc-1"))
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Completed);

        let job = h.store.get_required(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job
            .steps
            .iter()
            .all(|s| s.status == StepStatus::Completed));

        // Shadow twin written under the dot folder.
        assert!(h
            .storage
            .get_item("library/.report/report.de.md")
            .unwrap()
            .is_some());
        assert!(h
            .storage
            .get_item("library/.report/report.summary.de.md")
            .unwrap()
            .is_some());

        // Index got at least one chunk, result summary recorded.
        assert_eq!(h.index.len(), 1);
        let result = job.result.unwrap();
        assert!(result.ingested_chunks >= 1);
        assert_eq!(
            result.transcript_item.as_deref(),
            Some("library/.report/report.de.md")
        );

        // Root span ended completed.
        let trace = h.recorder.trace_view(&job_id).unwrap();
        let root = trace
            .spans
            .iter()
            .find(|s| s.parent_span_id.is_none())
            .unwrap();
        assert_eq!(root.status, SpanStatus::Completed);
        assert!(root.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_policy_skip_and_ignore_truth_table() {
        let h = harness();
        let params = JobParameters {
            policies: PolicyOverrides {
                extract: Some(Directive::Skip),
                metadata: Some(Directive::Skip),
                ingest: Some(Directive::Ignore),
            },
            ..Default::default()
        };
        let job_id = create_job(&h, params);

        let outcome = h.orchestrator.start(&job_id).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(h.dispatcher.count(), 0);

        let job = h.store.get_required(&job_id).unwrap();
        for (phase, reason) in [
            (Phase::Extract, "policy_skip"),
            (Phase::Template, "policy_skip"),
            (Phase::Store, "policy_skip"),
            (Phase::Ingest, "policy_ignore"),
        ] {
            let step = job.step(phase).unwrap();
            assert_eq!(step.status, StepStatus::Completed, "{}", phase);
            let details = step.details.as_ref().unwrap();
            assert_eq!(details["skipped"], true);
            assert_eq!(details["reason"], reason, "{}", phase);
        }
    }

    #[tokio::test]
    async fn test_gate_short_circuit_skips_extraction() {
        let h = harness();
        // Existing transcript artifact from an earlier run.
        h.storage
            .upload_file(
                "library/.report",
                "report.de.md",
                b"---\nsource: report.pdf\n---\nPreviously extracted text, long enough for ingest.",
            )
            .unwrap();

        let params = JobParameters {
            policies: PolicyOverrides {
                extract: Some(Directive::Auto),
                metadata: None,
                ingest: None,
            },
            ..Default::default()
        };
        let job_id = create_job(&h, params);

        let outcome = h.orchestrator.start(&job_id).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);

        // Extraction worker never dispatched.
        assert_eq!(h.dispatcher.count(), 0);

        let job = h.store.get_required(&job_id).unwrap();
        let extract = job.step(Phase::Extract).unwrap();
        assert_eq!(extract.status, StepStatus::Completed);
        assert_eq!(extract.details.as_ref().unwrap()["reason"], "artifact_exists");

        // Later phases ran from the existing transcript.
        assert_eq!(job.step(Phase::Ingest).unwrap().status, StepStatus::Completed);
        assert_eq!(h.index.len(), 1);
    }

    #[tokio::test]
    async fn test_force_runs_despite_existing_artifact() {
        let h = harness();
        h.storage
            .upload_file("library/.report", "report.de.md", b"existing artifact body")
            .unwrap();

        let params = JobParameters {
            policies: PolicyOverrides {
                extract: Some(Directive::Force),
                ..Default::default()
            },
            ..Default::default()
        };
        let job_id = create_job(&h, params);

        let outcome = h.orchestrator.start(&job_id).await.unwrap();
        assert_eq!(outcome, RunOutcome::AwaitingCallback);
        assert_eq!(h.dispatcher.count(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_rejection_fails_job() {
        let h = harness_with(RecordingDispatcher::rejecting());
        let job_id = create_job(&h, JobParameters::default());

        let outcome = h.orchestrator.start(&job_id).await.unwrap();
        assert_eq!(outcome, RunOutcome::Failed);

        let job = h.store.get_required(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        let step = job.step(Phase::Extract).unwrap();
        assert_eq!(step.status, StepStatus::Failed);
        assert!(step.error.as_ref().unwrap().contains("503"));
        assert_eq!(step.details.as_ref().unwrap()["source"], "upstream");

        // Later phases never attempted.
        assert_eq!(job.step(Phase::Template).unwrap().status, StepStatus::Pending);
        assert_eq!(job.step(Phase::Ingest).unwrap().status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn test_empty_callback_text_is_upstream_failure() {
        let h = harness();
        let job_id = create_job(&h, JobParameters::default());

        h.orchestrator.start(&job_id).await.unwrap();
        let outcome = h
            .orchestrator
            .resume_extraction(&job_id, Some(&callback_data("   ")), None)
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Failed);

        let job = h.store.get_required(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.step(Phase::Extract).unwrap().status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn test_trivial_text_fails_ingest_contract() {
        let h = harness();
        let job_id = create_job(&h, JobParameters::default());

        h.orchestrator.start(&job_id).await.unwrap();
        // Non-empty but below the ingest floor: store succeeds, ingest
        // must treat it as an upstream failure rather than a no-op.
        let outcome = h
            .orchestrator
            .resume_extraction(&job_id, Some(&callback_data("too short")), None)
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Failed);

        let job = h.store.get_required(&job_id).unwrap();
        let ingest = job.step(Phase::Ingest).unwrap();
        assert_eq!(ingest.status, StepStatus::Failed);
        assert_eq!(
            ingest.details.as_ref().unwrap()["source"],
            "phase_input_contract"
        );
        assert_eq!(h.index.len(), 0);
    }

    #[tokio::test]
    async fn test_unknown_template_fails_template_phase() {
        let h = harness();
        let params = JobParameters {
            template: Some("no-such-template".to_string()),
            ..Default::default()
        };
        let job_id = create_job(&h, params);

        h.orchestrator.start(&job_id).await.unwrap();
        let outcome = h
            .orchestrator
            .resume_extraction(&job_id, Some(&callback_data(SAMPLE_TEXT)), None)
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Failed);

        let job = h.store.get_required(&job_id).unwrap();
        assert_eq!(job.step(Phase::Template).unwrap().status, StepStatus::Failed);
        assert_eq!(job.step(Phase::Store).unwrap().status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn test_start_refuses_second_dispatch() {
        let h = harness();
        let job_id = create_job(&h, JobParameters::default());

        h.orchestrator.start(&job_id).await.unwrap();
        assert_eq!(h.dispatcher.count(), 1);

        // Re-entrant start while awaiting callback: no second dispatch.
        let outcome = h.orchestrator.start(&job_id).await.unwrap();
        assert_eq!(outcome, RunOutcome::AwaitingCallback);
        assert_eq!(h.dispatcher.count(), 1);
    }

    #[tokio::test]
    async fn test_start_on_terminal_job_not_runnable() {
        let h = harness();
        let job_id = create_job(&h, JobParameters::default());
        h.store.set_status(&job_id, JobStatus::Failed).unwrap();

        let err = h.orchestrator.start(&job_id).await.unwrap_err();
        assert!(matches!(err, PipelineError::NotRunnable { .. }));
    }

    #[tokio::test]
    async fn test_deferred_storage_flow() {
        let h = harness();
        let params = JobParameters {
            defer_storage: true,
            ..Default::default()
        };
        let job_id = create_job(&h, params);

        h.orchestrator.start(&job_id).await.unwrap();
        let outcome = h
            .orchestrator
            .resume_extraction(&job_id, Some(&callback_data(SAMPLE_TEXT)), None)
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::PendingStorage);

        let job = h.store.get_required(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::PendingStorage);
        assert_eq!(job.step(Phase::Store).unwrap().status, StepStatus::Pending);

        // The separate writer finishes storage and the rest.
        let outcome = h.orchestrator.complete_storage(&job_id).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);

        let job = h.store.get_required(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(h
            .storage
            .get_item("library/.report/report.de.md")
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_duplicate_resume_after_completion_is_noop() {
        let h = harness();
        let job_id = create_job(&h, JobParameters::default());

        h.orchestrator.start(&job_id).await.unwrap();
        h.orchestrator
            .resume_extraction(&job_id, Some(&callback_data(SAMPLE_TEXT)), None)
            .await
            .unwrap();

        let before = h.recorder.trace_view(&job_id).unwrap().spans.len();
        let outcome = h
            .orchestrator
            .resume_extraction(&job_id, Some(&callback_data(SAMPLE_TEXT)), None)
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Completed);

        // No duplicate phase spans were opened for the repeated delivery.
        let after = h.recorder.trace_view(&job_id).unwrap().spans.len();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_dispatch_rotates_secret() {
        let h = harness();
        let (job, created_secret) = h
            .store
            .create(&correlation(), &JobParameters::default())
            .unwrap();

        h.orchestrator.start(&job.job_id).await.unwrap();

        let dispatched_token = h.dispatcher.last_token().unwrap();
        assert_ne!(dispatched_token, created_secret.expose());

        // The persisted hash matches the token actually on the wire.
        let stored = h.store.get_required(&job.job_id).unwrap();
        assert_eq!(
            stored.secret_hash,
            crate::callback::hash_token(&dispatched_token)
        );
    }

    #[tokio::test]
    async fn test_sibling_layout_when_create_folder_disabled() {
        let h = harness();
        let params = JobParameters {
            create_folder: false,
            ..Default::default()
        };
        let job_id = create_job(&h, params);

        h.orchestrator.start(&job_id).await.unwrap();
        let outcome = h
            .orchestrator
            .resume_extraction(&job_id, Some(&callback_data(SAMPLE_TEXT)), None)
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Completed);

        assert!(h.storage.get_item("library/report.de.md").unwrap().is_some());
        assert!(h.storage.get_item("library/.report").unwrap().is_none());
    }
}
