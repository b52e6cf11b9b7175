//! Prometheus metrics for hook service observability.
//!
//! Downstream failures never reach the webhook caller, so these counters
//! (together with the logs) are the only place they show up.

use std::net::SocketAddr;

use metrics::{counter, histogram};

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics(port: u16) {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)));
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a webhook received event.
pub fn webhook_received(object_kind: &str) {
    counter!("ci_hook_webhooks_received_total", "kind" => object_kind.to_string()).increment(1);
}

/// Record a webhook rejected at the gate.
pub fn webhook_rejected(reason: &'static str) {
    counter!("ci_hook_webhooks_rejected_total", "reason" => reason).increment(1);
}

/// Record a webhook accepted but skipped (non-terminal status).
pub fn webhook_skipped(status: &str) {
    counter!("ci_hook_webhooks_skipped_total", "status" => status.to_string()).increment(1);
}

/// Record a task enqueue attempt.
pub fn task_dispatched(kind: &'static str, accepted: bool) {
    let outcome = if accepted { "accepted" } else { "error" };
    counter!("ci_hook_tasks_dispatched_total", "kind" => kind, "outcome" => outcome).increment(1);
}

/// Record a task execution outcome (`done`, `deferred`, `failed`).
pub fn task_finished(kind: &str, outcome: &'static str, duration_ms: u64) {
    counter!("ci_hook_tasks_total", "kind" => kind.to_string(), "outcome" => outcome).increment(1);
    histogram!("ci_hook_task_duration_ms", "kind" => kind.to_string()).record(duration_ms as f64);
}

/// Record a failed call that a retry policy is about to repeat.
pub fn retry_attempted() {
    counter!("ci_hook_retries_total").increment(1);
}

/// Record a job log written to the search index.
pub fn log_archived(bytes: usize) {
    counter!("ci_hook_logs_archived_total").increment(1);
    histogram!("ci_hook_log_size_bytes").record(bytes as f64);
}

/// Record a classification result.
pub fn failure_classified(label: &str) {
    counter!("ci_hook_failures_classified_total", "label" => label.to_string()).increment(1);
}

/// Record timers ingested from a timing report.
pub fn timers_ingested(created: usize, skipped: usize, failed: usize) {
    counter!("ci_hook_timers_total", "outcome" => "created").increment(created as u64);
    counter!("ci_hook_timers_total", "outcome" => "skipped").increment(skipped as u64);
    counter!("ci_hook_timers_total", "outcome" => "failed").increment(failed as u64);
}

/// Record a timing report missing from an artifact archive.
pub fn artifact_missing() {
    counter!("ci_hook_artifacts_missing_total").increment(1);
}
