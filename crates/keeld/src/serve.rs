//! `keeld serve`: the HTTP surface and the job runner, sharing one
//! shutdown signal.

use std::sync::Arc;

use keel_api::{ApiState, build_router};
use keel_core::KeelConfig;
use keel_jobs::{Consumers, JobContext, JobRunner, RunnerSettings};
use tokio::sync::watch;
use tracing::{error, info};

pub async fn run(config: &KeelConfig, ctx: Arc<JobContext>, listen: &str) -> anyhow::Result<()> {
    info!("keel daemon starting");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Job runner ─────────────────────────────────────────────

    let settings = RunnerSettings::from_config(&config.jobs)?;
    let (queue, runner) = JobRunner::new(Arc::new(Consumers::new(ctx.clone())), settings, shutdown_rx);
    info!(
        concurrency = settings.concurrency,
        max_attempts = settings.max_attempts,
        "job runner initialized"
    );
    let runner_handle = tokio::spawn(runner.run());

    // ── HTTP surface ───────────────────────────────────────────

    let router = build_router(ApiState {
        deployments: ctx.deployments.clone(),
        autoscalers: ctx.autoscalers.clone(),
        queue,
    });
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(addr = %listener.local_addr()?, "API server starting");

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for Ctrl-C; stop the process externally");
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Running jobs finish; queued ones are dropped.
    let _ = runner_handle.await;

    info!("keel daemon stopped");
    Ok(())
}
