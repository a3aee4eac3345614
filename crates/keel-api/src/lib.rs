//! keel-api — HTTP surface for logs, pod status and job intake.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthz` | Liveness |
//! | GET | `/logs/{namespace}/{deployment_id}?tail=N` | Logs of every pod of a deployment |
//! | GET | `/logs/{namespace}/{workload}/status` | Pod status summary of a workload |
//!
//! Both `/logs` routes share one `{name}` path segment: a deployment id for
//! logs, a workload name for status.
//! | GET | `/autoscalers/{namespace}` | Autoscaler status for a namespace |
//! | POST | `/jobs/deploy` | Queue a single-service deploy |
//! | POST | `/jobs/template` | Queue a template deploy |
//!
//! The two `/logs` routes answer with bare bodies (`{"logs": ...}` and the
//! status report). Everything else uses the `{success, data, error}`
//! envelope.

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use keel_autoscale::AutoscalerManager;
use keel_jobs::JobQueue;
use keel_workload::DeploymentManager;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub deployments: DeploymentManager,
    pub autoscalers: AutoscalerManager,
    pub queue: JobQueue,
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/logs/{namespace}/{name}", get(handlers::pod_logs))
        .route("/logs/{namespace}/{name}/status", get(handlers::pod_status))
        .route("/autoscalers/{namespace}", get(handlers::list_autoscalers))
        .route("/jobs/deploy", post(handlers::submit_deploy))
        .route("/jobs/template", post(handlers::submit_template))
        .with_state(state)
}
