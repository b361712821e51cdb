//! Test harness for isolated pipeline execution.
//!
//! Provides a complete environment for integration tests: a temp
//! storage root, an in-memory database, mock extraction dispatcher,
//! in-memory index, and a fully wired orchestrator.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use storymill::broadcast::JobProgressBroadcaster;
use storymill::callback::CallbackCorrelator;
use storymill::db::Database;
use storymill::dispatch::{DispatchAck, DispatchRequest, ExtractionDispatcher};
use storymill::error::DispatchError;
use storymill::index::{IndexService, InMemoryIndex};
use storymill::job::types::{Correlation, JobParameters, ProcessingOptions, SourceRef};
use storymill::job::JobStore;
use storymill::pipeline::Orchestrator;
use storymill::storage::{FilesystemStorage, StorageProvider};
use storymill::trace::TraceRecorder;
use storymill::watchdog::WatchdogRegistry;

/// A recorded dispatch: (job id, callback token, callback url).
#[derive(Debug, Clone)]
pub struct RecordedDispatch {
    pub job_id: String,
    pub callback_token: String,
    pub callback_url: String,
    pub target_language: String,
}

/// Mock extraction worker endpoint: acknowledges dispatches and records
/// them so tests can later play the callback.
#[derive(Default)]
pub struct MockDispatcher {
    dispatches: Mutex<Vec<RecordedDispatch>>,
}

impl MockDispatcher {
    pub fn dispatches(&self) -> Vec<RecordedDispatch> {
        self.dispatches.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.dispatches.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<RecordedDispatch> {
        self.dispatches.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ExtractionDispatcher for MockDispatcher {
    async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchAck, DispatchError> {
        self.dispatches.lock().unwrap().push(RecordedDispatch {
            job_id: request.job_id.clone(),
            callback_token: request.callback_token.clone(),
            callback_url: request.callback_url.clone(),
            target_language: request.options.target_language.clone(),
        });
        Ok(DispatchAck {
            process_id: Some(format!("proc-{}", request.job_id)),
        })
    }
}

/// Isolated execution environment for integration tests.
pub struct TestHarness {
    pub temp_dir: TempDir,
    pub store: JobStore,
    pub recorder: TraceRecorder,
    pub correlator: CallbackCorrelator,
    pub orchestrator: Arc<Orchestrator>,
    pub storage: Arc<dyn StorageProvider>,
    pub index: Arc<InMemoryIndex>,
    pub dispatcher: Arc<MockDispatcher>,
    pub broadcaster: JobProgressBroadcaster,
}

impl TestHarness {
    /// Harness with the default (long) watchdog deadline.
    pub fn new() -> Self {
        Self::with_watchdog(Duration::from_secs(600))
    }

    /// Harness with a custom watchdog deadline (stall tests).
    pub fn with_watchdog(deadline: Duration) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open_in_memory().expect("Failed to open database");

        let store = JobStore::new(db.clone());
        let recorder = TraceRecorder::new(db);
        let broadcaster = JobProgressBroadcaster::default();
        let watchdog = WatchdogRegistry::new(
            store.clone(),
            recorder.clone(),
            broadcaster.clone(),
            deadline,
        );

        let storage: Arc<dyn StorageProvider> =
            Arc::new(FilesystemStorage::new(temp_dir.path()));
        let index = Arc::new(InMemoryIndex::new());
        let dispatcher = Arc::new(MockDispatcher::default());

        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            recorder.clone(),
            broadcaster.clone(),
            watchdog,
            storage.clone(),
            index.clone() as Arc<dyn IndexService>,
            dispatcher.clone() as Arc<dyn ExtractionDispatcher>,
            "http://localhost:8080",
        ));

        let correlator = CallbackCorrelator::new(store.clone(), recorder.clone());

        Self {
            temp_dir,
            store,
            recorder,
            correlator,
            orchestrator,
            storage,
            index,
            dispatcher,
            broadcaster,
        }
    }

    /// Writes a source document into the library and returns its ref.
    pub fn write_source(&self, folder: &str, name: &str, content: &[u8]) -> SourceRef {
        self.storage.create_folder("", folder).unwrap();
        let outcome = self.storage.upload_file(folder, name, content).unwrap();
        SourceRef::new(&outcome.item.id, folder, name)
    }

    /// Creates a queued job for a source.
    pub fn create_job(&self, source: SourceRef, parameters: JobParameters) -> String {
        let correlation = Correlation {
            source,
            options: ProcessingOptions::default(),
            batch_id: None,
            batch_name: None,
        };
        let (job, _) = self.store.create(&correlation, &parameters).unwrap();
        job.job_id
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
