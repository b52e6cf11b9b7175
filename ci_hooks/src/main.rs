//! Centrix CI Hooks — GitLab build-event webhook service.
//!
//! Receives GitLab job hooks and fans each terminal build out to durable
//! background tasks: log archival into the search index, failure
//! classification of failed jobs, and build timing extraction from the
//! artifacts of numbered build stages.

mod config;
mod context;
mod db;
mod error;
mod metrics;
mod models;
mod routes;
mod schema;
mod services;
#[cfg(test)]
mod testing;

use std::net::SocketAddr;

use clap::{Parser, Subcommand};

use crate::config::HookConfig;
use crate::context::HookContext;
use crate::services::gitlab_service::JobRef;
use crate::services::{timing_service, worker};

#[derive(Parser)]
#[command(name = "ci-hooks", about = "Centrix CI build-event hooks")]
struct Cli {
    /// Server port
    #[arg(short, long, env = "CI_PORT", default_value = "8080")]
    port: u16,

    /// Prometheus exporter port
    #[arg(long, env = "CI_METRICS_PORT", default_value = "9000")]
    metrics_port: u16,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the webhook and run task workers in-process (default)
    Serve,
    /// Run task workers only
    Worker,
    /// Extract build timings for one job, bypassing the queue
    BackfillTimings {
        #[arg(long)]
        project_id: i64,
        #[arg(long)]
        job_id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let cli = Cli::parse();

    // Missing configuration is fatal before anything is served.
    let config = HookConfig::from_env()?;

    tracing::info!("Starting Centrix CI Hooks...");
    let ctx = HookContext::connect(config).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            metrics::init_metrics(cli.metrics_port);
            spawn_workers(&ctx);
            serve(ctx, cli.port).await?;
        }
        Command::Worker => {
            metrics::init_metrics(cli.metrics_port);
            spawn_workers(&ctx);
            shutdown_signal().await;
        }
        Command::BackfillTimings { project_id, job_id } => {
            let job = JobRef { project_id, job_id };
            let summary =
                timing_service::extract_and_store(ctx.platform.as_ref(), ctx.timers.as_ref(), job)
                    .await?;
            tracing::info!(
                job_id,
                created = summary.created,
                already_present = summary.already_present,
                failed = summary.failed,
                "Backfill complete"
            );
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn spawn_workers(ctx: &HookContext) {
    for worker_id in 0..ctx.config.workers {
        tokio::spawn(worker::run_worker(worker_id, ctx.clone()));
    }
    tracing::info!("Spawned {} task workers", ctx.config.workers);
}

async fn serve(ctx: HookContext, port: u16) -> anyhow::Result<()> {
    let app = routes::hook_router(ctx);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Centrix CI Hooks listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
