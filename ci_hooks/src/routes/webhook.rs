//! GitLab job webhook gate — validates build events and dispatches tasks.

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::context::HookContext;
use crate::models::event::{BuildEvent, BuildStatus};
use crate::models::task::{HookTask, TaskKind};

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("invalid webhook token")]
    Unauthorized,
    #[error("body is not JSON")]
    NotJson,
    #[error("unsupported object_kind {0:?}")]
    WrongKind(String),
    #[error("malformed build event: {0}")]
    Malformed(String),
}

impl WebhookError {
    fn reason(&self) -> &'static str {
        match self {
            Self::Unauthorized => "token",
            Self::NotJson => "not_json",
            Self::WrongKind(_) => "object_kind",
            Self::Malformed(_) => "malformed",
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::BAD_REQUEST,
        };
        (status, self.to_string()).into_response()
    }
}

/// Peeked before the full parse so wrong hook types are told apart from
/// broken build events.
#[derive(Deserialize)]
struct KindProbe {
    #[serde(default)]
    object_kind: Option<String>,
}

fn digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn validate_token(expected: &str, headers: &HeaderMap) -> bool {
    if expected.is_empty() {
        return true;
    }
    let supplied = headers
        .get("x-gitlab-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    digest(expected) == digest(supplied)
}

/// Downstream actions a terminal build event triggers.
pub fn plan_actions(event: &BuildEvent) -> Vec<TaskKind> {
    let mut actions = vec![TaskKind::ArchiveLog];
    if event.build_status == BuildStatus::Failed {
        actions.push(TaskKind::ClassifyFailure);
    }
    if event.is_numbered_stage() {
        actions.push(TaskKind::ExtractTimings);
    }
    actions
}

/// Handle an incoming GitLab job hook.
pub async fn handle_webhook(
    ctx: &HookContext,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<String, WebhookError> {
    let result = gate(ctx, headers, body).await;
    if let Err(e) = &result {
        tracing::warn!("Webhook rejected: {e}");
        crate::metrics::webhook_rejected(e.reason());
    }
    result
}

async fn gate(ctx: &HookContext, headers: &HeaderMap, body: &Bytes) -> Result<String, WebhookError> {
    if !validate_token(&ctx.config.webhook_token, headers) {
        return Err(WebhookError::Unauthorized);
    }

    let probe: KindProbe = serde_json::from_slice(body).map_err(|_| WebhookError::NotJson)?;
    let kind = probe.object_kind.unwrap_or_default();
    crate::metrics::webhook_received(&kind);
    if kind != "build" {
        return Err(WebhookError::WrongKind(kind));
    }

    let event: BuildEvent =
        serde_json::from_slice(body).map_err(|e| WebhookError::Malformed(e.to_string()))?;

    if !event.build_status.is_terminal() {
        tracing::debug!(
            build_id = event.build_id,
            status = event.build_status.as_str(),
            "Skipping non-terminal build event"
        );
        crate::metrics::webhook_skipped(event.build_status.as_str());
        return Ok(format!("skip: build status {}", event.build_status.as_str()));
    }

    let mut dispatched = Vec::new();
    for kind in plan_actions(&event) {
        let mut task = HookTask::new(kind, event.clone());
        if kind == TaskKind::ClassifyFailure {
            task = task.with_max_attempts(ctx.config.classify_max_attempts);
        }

        match ctx.queue.enqueue(task).await {
            Ok(task_id) => {
                crate::metrics::task_dispatched(kind.as_str(), true);
                tracing::debug!(task_id, build_id = event.build_id, kind = kind.as_str(), "Dispatched");
                dispatched.push(kind.as_str());
            }
            Err(e) => {
                crate::metrics::task_dispatched(kind.as_str(), false);
                tracing::error!(
                    build_id = event.build_id,
                    kind = kind.as_str(),
                    "Failed to dispatch task: {e}"
                );
            }
        }
    }

    tracing::info!(
        build_id = event.build_id,
        status = event.build_status.as_str(),
        stage = %event.build_stage,
        actions = ?dispatched,
        "Build event accepted"
    );
    Ok(format!("dispatched: {}", dispatched.join(", ")))
}
