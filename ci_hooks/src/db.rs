//! Connection pools and schema migrations.
//!
//! Timing analytics and the task queue live in separate databases (they may
//! share a server), each with its own pool and its own migration.

use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncPgConnection, SimpleAsyncConnection};

pub type DbPool = Pool<AsyncPgConnection>;
pub type DbConn = Object<AsyncPgConnection>;

/// SQL migration for build timing tables.
///
/// The unique constraint on (job_id, name, hash) is what keeps re-delivered
/// webhooks from duplicating timers.
pub const TIMING_MIGRATION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS ci_timers (
    id              BIGSERIAL PRIMARY KEY,
    job_id          BIGINT NOT NULL,
    name            TEXT NOT NULL,
    hash            VARCHAR(128) NOT NULL,
    cache           BOOLEAN NOT NULL,
    time_total      DOUBLE PRECISION NOT NULL,
    create_date     TIMESTAMPTZ DEFAULT NOW(),
    CONSTRAINT uq_ci_timers_job_name_hash UNIQUE (job_id, name, hash)
);

CREATE INDEX IF NOT EXISTS idx_ci_timers_job ON ci_timers (job_id);

CREATE TABLE IF NOT EXISTS ci_timer_phases (
    id              BIGSERIAL PRIMARY KEY,
    timer_id        BIGINT NOT NULL REFERENCES ci_timers(id) ON DELETE CASCADE,
    name            TEXT NOT NULL,
    path            TEXT NOT NULL,
    is_subphase     BOOLEAN NOT NULL,
    time_total      DOUBLE PRECISION NOT NULL,
    count           INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ci_timer_phases_timer ON ci_timer_phases (timer_id);

-- Widen columns created as bounded VARCHAR by earlier deployments.
ALTER TABLE ci_timers ALTER COLUMN name TYPE TEXT;
ALTER TABLE ci_timer_phases ALTER COLUMN name TYPE TEXT;
ALTER TABLE ci_timer_phases ALTER COLUMN path TYPE TEXT;
"#;

/// SQL migration for the durable task queue.
pub const TASK_MIGRATION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS ci_hook_tasks (
    id              BIGSERIAL PRIMARY KEY,
    kind            VARCHAR(32) NOT NULL,
    payload         JSONB NOT NULL,
    status          VARCHAR(16) NOT NULL DEFAULT 'pending',
    attempts        INTEGER NOT NULL DEFAULT 0,
    max_attempts    INTEGER NOT NULL DEFAULT 1,
    run_after       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    last_error      TEXT,
    create_date     TIMESTAMPTZ DEFAULT NOW(),
    write_date      TIMESTAMPTZ DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_ci_hook_tasks_due ON ci_hook_tasks (status, run_after);
"#;

/// Build a deadpool-backed diesel-async pool.
pub fn build_pool(database_url: &str, max_size: usize) -> anyhow::Result<DbPool> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    Pool::builder(manager)
        .max_size(max_size)
        .build()
        .map_err(|e| anyhow::anyhow!("database pool: {e}"))
}

/// Run timing-table migration.
pub async fn migrate_timings(pool: &DbPool) -> anyhow::Result<()> {
    let mut conn = pool
        .get()
        .await
        .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))?;
    conn.batch_execute(TIMING_MIGRATION_SQL)
        .await
        .map_err(|e| anyhow::anyhow!("timing migration failed: {e}"))?;
    Ok(())
}

/// Run task-queue migration.
pub async fn migrate_tasks(pool: &DbPool) -> anyhow::Result<()> {
    let mut conn = pool
        .get()
        .await
        .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))?;
    conn.batch_execute(TASK_MIGRATION_SQL)
        .await
        .map_err(|e| anyhow::anyhow!("task migration failed: {e}"))?;
    Ok(())
}
