//! Durable task queue for dispatched hook actions.
//!
//! Backed by `ci_hook_tasks`. Workers claim the oldest due pending task with
//! `FOR UPDATE SKIP LOCKED`, so any number of workers (in this process or
//! others) can share the table without double-claiming.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};

use crate::db::{DbConn, DbPool};
use crate::models::task::{CiHookTask, ClaimedTask, HookTask, NewCiHookTask, TaskKind};
use crate::schema::ci_hook_tasks;

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Submit a task. Returns its id once the queue has accepted it.
    async fn enqueue(&self, task: HookTask) -> anyhow::Result<i64>;

    /// Claim the next due task, if any.
    async fn claim(&self) -> anyhow::Result<Option<ClaimedTask>>;

    async fn complete(&self, task_id: i64) -> anyhow::Result<()>;

    /// Put the task back as pending, due after `delay`.
    async fn defer(&self, task_id: i64, delay: Duration, error: &str) -> anyhow::Result<()>;

    async fn fail(&self, task_id: i64, error: &str) -> anyhow::Result<()>;
}

pub struct PgTaskQueue {
    pool: DbPool,
}

impl PgTaskQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> anyhow::Result<DbConn> {
        self.pool
            .get()
            .await
            .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))
    }

    async fn set_status(
        &self,
        task_id: i64,
        status: &str,
        error: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        diesel::update(ci_hook_tasks::table.find(task_id))
            .set((
                ci_hook_tasks::status.eq(status),
                ci_hook_tasks::last_error.eq(error),
                ci_hook_tasks::write_date.eq(Utc::now()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}

/// Decode a claimed row. `attempts` has already been bumped for this run.
fn decode(row: CiHookTask) -> Result<ClaimedTask, String> {
    let kind = TaskKind::parse(&row.kind).ok_or_else(|| format!("unknown task kind {}", row.kind))?;
    let event = serde_json::from_value(row.payload).map_err(|e| format!("bad payload: {e}"))?;
    Ok(ClaimedTask {
        id: row.id,
        kind,
        event,
        attempt: row.attempts,
        max_attempts: row.max_attempts,
    })
}

#[async_trait]
impl TaskQueue for PgTaskQueue {
    async fn enqueue(&self, task: HookTask) -> anyhow::Result<i64> {
        let mut conn = self.conn().await?;
        let new_task = NewCiHookTask {
            kind: task.kind.as_str().to_string(),
            payload: serde_json::to_value(&task.event)?,
            status: "pending".to_string(),
            max_attempts: task.max_attempts,
        };

        let id: i64 = diesel::insert_into(ci_hook_tasks::table)
            .values(&new_task)
            .returning(ci_hook_tasks::id)
            .get_result(&mut conn)
            .await?;

        tracing::debug!(task_id = id, kind = task.kind.as_str(), "Task enqueued");
        Ok(id)
    }

    async fn claim(&self) -> anyhow::Result<Option<ClaimedTask>> {
        let mut conn = self.conn().await?;

        let row = conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                async move {
                    let now = Utc::now();
                    let row: Option<CiHookTask> = ci_hook_tasks::table
                        .filter(ci_hook_tasks::status.eq("pending"))
                        .filter(ci_hook_tasks::run_after.le(now))
                        .order(ci_hook_tasks::id.asc())
                        .select(CiHookTask::as_select())
                        .for_update()
                        .skip_locked()
                        .first(conn)
                        .await
                        .optional()?;

                    let Some(mut row) = row else {
                        return Ok(None);
                    };

                    row.attempts += 1;
                    diesel::update(ci_hook_tasks::table.find(row.id))
                        .set((
                            ci_hook_tasks::status.eq("running"),
                            ci_hook_tasks::attempts.eq(row.attempts),
                            ci_hook_tasks::write_date.eq(now),
                        ))
                        .execute(conn)
                        .await?;
                    Ok(Some(row))
                }
                .scope_boxed()
            })
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let task_id = row.id;
        match decode(row) {
            Ok(task) => Ok(Some(task)),
            Err(e) => {
                tracing::error!(task_id, "Dropping undecodable task: {e}");
                self.fail(task_id, &e).await?;
                Ok(None)
            }
        }
    }

    async fn complete(&self, task_id: i64) -> anyhow::Result<()> {
        self.set_status(task_id, "done", None).await
    }

    async fn defer(&self, task_id: i64, delay: Duration, error: &str) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let now = Utc::now();
        let run_after = now + chrono::Duration::from_std(delay)?;
        diesel::update(ci_hook_tasks::table.find(task_id))
            .set((
                ci_hook_tasks::status.eq("pending"),
                ci_hook_tasks::run_after.eq(run_after),
                ci_hook_tasks::last_error.eq(Some(error)),
                ci_hook_tasks::write_date.eq(now),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn fail(&self, task_id: i64, error: &str) -> anyhow::Result<()> {
        self.set_status(task_id, "failed", Some(error)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::{sample_event, BuildStatus};

    fn row(kind: &str, payload: serde_json::Value) -> CiHookTask {
        CiHookTask {
            id: 9,
            kind: kind.to_string(),
            payload,
            attempts: 2,
            max_attempts: 10,
        }
    }

    #[test]
    fn decodes_claimed_rows() {
        let event = sample_event(BuildStatus::Failed, "stage-1");
        let task = decode(row("classify_failure", serde_json::to_value(&event).unwrap())).unwrap();
        assert_eq!(task.kind, TaskKind::ClassifyFailure);
        assert_eq!(task.event, event);
        assert_eq!(task.attempt, 2);
        assert!(task.can_retry());
    }

    #[test]
    fn rejects_unknown_kinds_and_payloads() {
        assert!(decode(row("rebuild_index", serde_json::json!({}))).is_err());
        assert!(decode(row("archive_log", serde_json::json!({ "build_id": 1 }))).is_err());
    }
}
