//! Route handlers.
//!
//! Log and status reads go straight to the cluster through the
//! [`DeploymentManager`](keel_workload::DeploymentManager); job routes only
//! enqueue and return `202 Accepted`.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use keel_jobs::{DeployJob, Job, SubmitError, TemplateJob};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok("ok")
}

// ── Logs ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    /// Lines per pod; the configured default when absent.
    pub tail: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct LogsBody {
    pub logs: String,
}

/// GET /logs/{namespace}/{deployment_id}
pub async fn pod_logs(
    State(state): State<ApiState>,
    Path((namespace, deployment_id)): Path<(String, String)>,
    Query(query): Query<LogsQuery>,
) -> impl IntoResponse {
    if query.tail.is_some_and(|n| n < 0) {
        return error_response("tail must not be negative", StatusCode::BAD_REQUEST).into_response();
    }
    match state
        .deployments
        .pod_logs(&namespace, &deployment_id, query.tail)
        .await
    {
        Ok(logs) => Json(LogsBody { logs }).into_response(),
        Err(e) => {
            warn!(%namespace, %deployment_id, error = %e, "log query failed");
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

/// GET /logs/{namespace}/{workload}/status
pub async fn pod_status(
    State(state): State<ApiState>,
    Path((namespace, workload)): Path<(String, String)>,
) -> impl IntoResponse {
    Json(state.deployments.pod_status(&namespace, &workload).await)
}

// ── Autoscalers ────────────────────────────────────────────────

/// GET /autoscalers/{namespace}
pub async fn list_autoscalers(
    State(state): State<ApiState>,
    Path(namespace): Path<String>,
) -> impl IntoResponse {
    match state.autoscalers.list(&namespace).await {
        Ok(list) => ApiResponse::ok(list).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Jobs ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAccepted {
    pub job_id: String,
}

/// POST /jobs/deploy
pub async fn submit_deploy(
    State(state): State<ApiState>,
    Json(job): Json<DeployJob>,
) -> impl IntoResponse {
    if job.deployment_id.is_empty() || job.tenant_id.is_empty() {
        return error_response("deploymentId and tenantId are required", StatusCode::BAD_REQUEST)
            .into_response();
    }
    submit(&state, Job::Deploy(job)).await
}

/// POST /jobs/template
pub async fn submit_template(
    State(state): State<ApiState>,
    Json(job): Json<TemplateJob>,
) -> impl IntoResponse {
    if job.template_deployment_id.is_empty() || job.template_id.is_empty() || job.tenant_id.is_empty()
    {
        return error_response(
            "templateDeploymentId, templateId and tenantId are required",
            StatusCode::BAD_REQUEST,
        )
        .into_response();
    }
    submit(&state, Job::Template(job)).await
}

async fn submit(state: &ApiState, job: Job) -> axum::response::Response {
    let job_id = job.id();
    match state.queue.submit(job).await {
        Ok(()) => {
            info!(job = %job_id, "job accepted");
            (StatusCode::ACCEPTED, ApiResponse::ok(JobAccepted { job_id })).into_response()
        }
        Err(e) => {
            let status = match e {
                SubmitError::Duplicate(_) => StatusCode::CONFLICT,
                SubmitError::QueueFull | SubmitError::Closed => StatusCode::SERVICE_UNAVAILABLE,
            };
            warn!(job = %job_id, error = %e, "job refused");
            error_response(&e.to_string(), status).into_response()
        }
    }
}
