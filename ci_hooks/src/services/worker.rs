//! Task worker — background loop that claims queued hook tasks and runs them.
//!
//! Tasks for the same job are independent: a classification may be claimed
//! before the archive it labels exists. That case is reported as a transient
//! error and the task is deferred instead of failed.

use std::time::Instant;

use crate::context::HookContext;
use crate::error::TaskError;
use crate::models::event::BuildEvent;
use crate::models::task::{ClaimedTask, TaskKind};
use crate::services::{failure_classifier, log_archiver, timing_service};

/// Run the worker loop forever. Spawned as a background tokio task.
pub async fn run_worker(worker_id: usize, ctx: HookContext) {
    tracing::info!(worker_id, poll = ?ctx.config.poll_interval, "Task worker started");

    loop {
        match poll_and_execute(&ctx).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => tracing::error!(worker_id, "Worker poll error: {e}"),
        }
        tokio::time::sleep(ctx.config.poll_interval).await;
    }
}

/// Claim and run one task. Returns whether a task was found.
pub async fn poll_and_execute(ctx: &HookContext) -> anyhow::Result<bool> {
    let Some(task) = ctx.queue.claim().await? else {
        return Ok(false);
    };

    let start = Instant::now();
    let result = execute(ctx, task.kind, &task.event).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(()) => {
            ctx.queue.complete(task.id).await?;
            crate::metrics::task_finished(task.kind.as_str(), "done", duration_ms);
        }
        Err(e) if e.is_transient() && task.can_retry() => {
            tracing::info!(
                task_id = task.id,
                kind = task.kind.as_str(),
                attempt = task.attempt,
                "Deferring task: {e}"
            );
            ctx.queue
                .defer(task.id, ctx.config.classify_retry_delay, &e.to_string())
                .await?;
            crate::metrics::task_finished(task.kind.as_str(), "deferred", duration_ms);
        }
        Err(e) => {
            report_failure(&task, &e);
            ctx.queue.fail(task.id, &e.to_string()).await?;
            crate::metrics::task_finished(task.kind.as_str(), "failed", duration_ms);
        }
    }

    Ok(true)
}

/// Run one hook action to completion.
pub async fn execute(ctx: &HookContext, kind: TaskKind, event: &BuildEvent) -> Result<(), TaskError> {
    let platform = ctx.platform.as_ref();
    match kind {
        TaskKind::ArchiveLog => {
            log_archiver::archive(platform, ctx.index.as_ref(), event).await?;
        }
        TaskKind::ClassifyFailure => {
            failure_classifier::classify_job(platform, ctx.index.as_ref(), event).await?;
        }
        TaskKind::ExtractTimings => {
            timing_service::extract_and_store(platform, ctx.timers.as_ref(), event.into()).await?;
        }
    }
    Ok(())
}

fn report_failure(task: &ClaimedTask, error: &TaskError) {
    match error {
        TaskError::ArtifactNotFound { job_id, path } => {
            crate::metrics::artifact_missing();
            tracing::error!(
                task_id = task.id,
                job_id,
                path = %path,
                project_id = task.event.project_id,
                "Timing report missing from artifacts"
            );
        }
        TaskError::ClassificationRace { job_id, .. } => {
            tracing::error!(
                task_id = task.id,
                job_id,
                attempts = task.attempt,
                "Gave up waiting for archived log to classify"
            );
        }
        other => {
            tracing::error!(
                task_id = task.id,
                kind = task.kind.as_str(),
                build_id = task.event.build_id,
                "Task failed: {other}"
            );
        }
    }
}
