//! Application state

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wfxrs_core::EventBus;
use wfxrs_database::{Database, JobStore, WorkflowStore};

use crate::config::Config;

/// Shared application state
///
/// Cloned into both listeners; the stores and the event bus are shared.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub database: Database,
    pub workflows: Arc<WorkflowStore>,
    pub jobs: Arc<JobStore>,
    pub bus: EventBus,
    /// Cancelled on shutdown; ends open event streams
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create new application state
    pub fn new(config: Config, database: Database) -> Self {
        let limits = config.page_limits();
        let bus = EventBus::new(config.event_queue_capacity);
        let workflows = Arc::new(WorkflowStore::new(database.pool().clone(), limits));
        let jobs = Arc::new(JobStore::new(
            database.pool().clone(),
            bus.clone(),
            limits,
        ));

        Self {
            config: Arc::new(config),
            database,
            workflows,
            jobs,
            bus,
            shutdown: CancellationToken::new(),
        }
    }

    /// Stop event delivery and end all open streams
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.bus.shutdown();
    }
}
