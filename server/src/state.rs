use std::sync::Arc;

use chrono::{DateTime, Utc};

use vidgate_core::{Catalog, Config, ConnectionLimiter, Scheduler, SchedulerConfig, StreamGate, TaskStore};

/// Shared application state, cheap to clone into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub catalog: Arc<Catalog>,
    /// Two-stage admission for streaming requests.
    pub stream_gate: Arc<StreamGate>,
    /// Request-level cap applied by middleware to the whole surface.
    pub request_gate: Arc<ConnectionLimiter>,
    pub scheduler: Arc<Scheduler>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: Config, scheduler_config: SchedulerConfig) -> vidgate_core::Result<Self> {
        let catalog = Catalog::new(&config);
        let stream_gate = StreamGate::new(
            config.server.max_connections,
            config.server.effective_tokens_per_second(),
        );
        let request_gate = ConnectionLimiter::new(config.server.max_connections);
        let store = Arc::new(TaskStore::new(config.tasks.data_dir.clone())?);
        let scheduler = Scheduler::new(store, scheduler_config);

        Ok(Self {
            config: Arc::new(config),
            catalog: Arc::new(catalog),
            stream_gate: Arc::new(stream_gate),
            request_gate: Arc::new(request_gate),
            scheduler: Arc::new(scheduler),
            started_at: Utc::now(),
        })
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
