//! Application state shared across routes and workers.

use std::sync::Arc;
use std::time::Duration;

use storymill::broadcast::JobProgressBroadcaster;
use storymill::callback::CallbackCorrelator;
use storymill::config::{resolve_secret, Config};
use storymill::db::{default_database_path, Database};
use storymill::dispatch::{ExtractionDispatcher, HttpExtractionClient};
use storymill::index::{HttpIndexService, IndexService, InMemoryIndex};
use storymill::job::JobStore;
use storymill::pipeline::Orchestrator;
use storymill::storage::{FilesystemStorage, StorageProvider};
use storymill::trace::TraceRecorder;
use storymill::watchdog::WatchdogRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: JobStore,
    pub recorder: TraceRecorder,
    pub correlator: CallbackCorrelator,
    pub orchestrator: Arc<Orchestrator>,
    pub broadcaster: JobProgressBroadcaster,
}

impl AppState {
    /// Wires up the full component graph from configuration.
    pub fn from_config(config: Config) -> Result<Self, storymill::StorymillError> {
        let db_path = config
            .database_path
            .clone()
            .or_else(default_database_path)
            .unwrap_or_else(|| "storymill.db".into());
        let db = Database::open(&db_path)?;

        let store = JobStore::new(db.clone());
        let recorder = TraceRecorder::new(db);
        let broadcaster = JobProgressBroadcaster::default();
        let watchdog = WatchdogRegistry::new(
            store.clone(),
            recorder.clone(),
            broadcaster.clone(),
            Duration::from_secs(config.watchdog_seconds),
        );

        let storage: Arc<dyn StorageProvider> =
            Arc::new(FilesystemStorage::new(&config.storage_root));

        let index: Arc<dyn IndexService> = match &config.index.base_url {
            Some(base_url) => {
                let token = resolve_secret(
                    "index",
                    config.index.bearer_token.as_deref(),
                    config.index.bearer_token_file.as_deref(),
                    config.index.bearer_token_env.as_deref(),
                )?;
                Arc::new(HttpIndexService::new(base_url, token))
            }
            None => {
                log::warn!("No index service configured; using in-memory index");
                Arc::new(InMemoryIndex::new())
            }
        };

        let extraction_token = resolve_secret(
            "extraction",
            config.extraction.bearer_token.as_deref(),
            config.extraction.bearer_token_file.as_deref(),
            config.extraction.bearer_token_env.as_deref(),
        )?;
        let dispatcher: Arc<dyn ExtractionDispatcher> = Arc::new(HttpExtractionClient::new(
            &config.extraction.base_url,
            extraction_token,
        ));

        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            recorder.clone(),
            broadcaster.clone(),
            watchdog,
            storage,
            index,
            dispatcher,
            &config.public_base_url,
        ));

        let correlator = CallbackCorrelator::new(store.clone(), recorder.clone());

        Ok(Self {
            config: Arc::new(config),
            store,
            recorder,
            correlator,
            orchestrator,
            broadcaster,
        })
    }
}
