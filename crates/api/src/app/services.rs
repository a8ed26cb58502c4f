use std::sync::Arc;

use labstore_infra::jobs::{
    InMemoryJobStore, JobStore, JobTypeRegistry, OrphanReaper, OrphanReaperConfig,
    OrphanReaperHandle, PostgresJobStore, Queue, QueueError, ReaperStats,
};

use crate::app::errors;
use crate::config::{ApiConfig, StoreConfig};

pub type SharedJobStore = Arc<dyn JobStore>;

/// Queue type used by the HTTP layer.
pub type JobQueue = Queue<SharedJobStore>;

pub enum AppServices {
    InMemory {
        queue: Arc<JobQueue>,
        store: Arc<InMemoryJobStore>,
        reaper: Option<OrphanReaperHandle>,
    },
    Persistent {
        queue: Arc<JobQueue>,
        reaper: Option<OrphanReaperHandle>,
    },
}

impl AppServices {
    pub fn queue(&self) -> &Arc<JobQueue> {
        match self {
            AppServices::InMemory { queue, .. } | AppServices::Persistent { queue, .. } => queue,
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            AppServices::InMemory { .. } => "in_memory",
            AppServices::Persistent { .. } => "postgres",
        }
    }

    pub fn reaper_stats(&self) -> Option<ReaperStats> {
        match self {
            AppServices::InMemory { reaper, .. } | AppServices::Persistent { reaper, .. } => {
                reaper.as_ref().map(OrphanReaperHandle::stats)
            }
        }
    }

    /// Number of records in the in-memory store; `None` for Postgres.
    pub fn in_memory_len(&self) -> Option<usize> {
        match self {
            AppServices::InMemory { store, .. } => Some(store.len()),
            AppServices::Persistent { .. } => None,
        }
    }

    /// Run a queue operation on the blocking pool.
    ///
    /// The storage port is synchronous (the Postgres store blocks on the
    /// runtime), so queue calls must never run on an async worker thread.
    pub async fn run<T, F>(&self, op: F) -> Result<T, axum::response::Response>
    where
        F: FnOnce(&JobQueue) -> Result<T, QueueError> + Send + 'static,
        T: Send + 'static,
    {
        let queue = self.queue().clone();
        match tokio::task::spawn_blocking(move || op(queue.as_ref())).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(errors::queue_error_to_response(e)),
            Err(join) => {
                tracing::error!(error = %join, "queue task panicked");
                Err(errors::json_error(
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "queue task failed",
                ))
            }
        }
    }
}

pub async fn build_services(config: &ApiConfig) -> anyhow::Result<AppServices> {
    match &config.store {
        StoreConfig::InMemory => build_in_memory_services(config),
        StoreConfig::Postgres { database_url } => {
            build_persistent_services(config, database_url).await
        }
    }
}

fn build_in_memory_services(config: &ApiConfig) -> anyhow::Result<AppServices> {
    let store = InMemoryJobStore::arc();
    let queue = Arc::new(Queue::new(
        store.clone() as SharedJobStore,
        JobTypeRegistry::with_engine_default(),
        config.queue.clone(),
    ));
    let reaper = spawn_reaper(config, &queue)?;

    tracing::info!(backend = "in_memory", reaper = reaper.is_some(), "job services ready");
    Ok(AppServices::InMemory {
        queue,
        store,
        reaper,
    })
}

async fn build_persistent_services(
    config: &ApiConfig,
    database_url: &str,
) -> anyhow::Result<AppServices> {
    let store = Arc::new(PostgresJobStore::connect(database_url).await?);
    store.ensure_schema().await?;

    let queue = Arc::new(Queue::new(
        store as SharedJobStore,
        JobTypeRegistry::with_engine_default(),
        config.queue.clone(),
    ));
    let reaper = spawn_reaper(config, &queue)?;

    tracing::info!(backend = "postgres", reaper = reaper.is_some(), "job services ready");
    Ok(AppServices::Persistent { queue, reaper })
}

fn spawn_reaper(
    config: &ApiConfig,
    queue: &Arc<JobQueue>,
) -> anyhow::Result<Option<OrphanReaperHandle>> {
    if !config.run_reaper {
        return Ok(None);
    }
    let handle = OrphanReaper::new(queue.clone()).spawn(
        OrphanReaperConfig::default().with_interval(config.queue.scan_interval),
    )?;
    Ok(Some(handle))
}
