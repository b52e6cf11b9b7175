//! HTTP routes — webhook gate, health check, timings API.

pub mod webhook;

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::context::HookContext;
use crate::services::timing_service::TimerWithPhases;

/// Build the hook service's Axum router.
pub fn hook_router(ctx: HookContext) -> Router {
    Router::new()
        // Webhook
        .route("/", post(webhook_handler))
        .route("/healthz", get(healthz))
        // Timings API
        .route("/api/jobs/{job_id}/timers", get(job_timers))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .with_state(ctx)
}

// ── Webhook ──

async fn webhook_handler(
    State(ctx): State<HookContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<String, webhook::WebhookError> {
    webhook::handle_webhook(&ctx, &headers, &body).await
}

async fn healthz() -> &'static str {
    "ok"
}

// ── Timings API ──

async fn job_timers(
    State(ctx): State<HookContext>,
    Path(job_id): Path<i64>,
) -> Result<Json<Vec<TimerWithPhases>>, StatusCode> {
    ctx.timers
        .list_for_job(job_id)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!(job_id, "Timer lookup failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}
