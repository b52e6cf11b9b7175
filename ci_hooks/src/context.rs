//! Long-lived handles shared by the gate, the workers and the CLI.

use std::sync::Arc;

use crate::config::HookConfig;
use crate::db;
use crate::services::gitlab_service::{CiPlatform, GitlabClient};
use crate::services::opensearch_service::{LogIndex, OpenSearchClient};
use crate::services::task_queue::{PgTaskQueue, TaskQueue};
use crate::services::timing_service::{PgTimerStore, TimerStore};

/// Built once at startup and passed explicitly to every component.
#[derive(Clone)]
pub struct HookContext {
    pub config: HookConfig,
    pub platform: Arc<dyn CiPlatform>,
    pub index: Arc<dyn LogIndex>,
    pub timers: Arc<dyn TimerStore>,
    pub queue: Arc<dyn TaskQueue>,
}

impl HookContext {
    /// Connect the production backends and run both migrations.
    pub async fn connect(config: HookConfig) -> anyhow::Result<Self> {
        let timing_pool = db::build_pool(&config.database_url, 8)?;
        let task_pool = db::build_pool(&config.task_broker_url, config.workers.max(1) + 4)?;

        tracing::info!("Running database migrations...");
        db::migrate_timings(&timing_pool).await?;
        db::migrate_tasks(&task_pool).await?;
        tracing::info!("Database migrations completed.");

        Ok(Self {
            platform: Arc::new(GitlabClient::new(&config)?),
            index: Arc::new(OpenSearchClient::new(&config)?),
            timers: Arc::new(PgTimerStore::new(timing_pool)),
            queue: Arc::new(PgTaskQueue::new(task_pool)),
            config,
        })
    }
}
