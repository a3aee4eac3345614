use keel_autoscale::AutoscaleError;
use keel_secrets::SecretError;
use keel_state::StateError;
use keel_workload::WorkloadError;
use thiserror::Error;

use crate::resolver::ResolveError;

pub type JobResult<T> = Result<T, JobError>;

/// Unexpected job failures. Rollout failures are not errors.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("secret error: {0}")]
    Secret(#[from] SecretError),

    #[error("workload error: {0}")]
    Workload(#[from] WorkloadError),

    #[error("autoscaler error: {0}")]
    Autoscale(#[from] AutoscaleError),

    #[error("env resolution failed: {0}")]
    Resolve(#[from] ResolveError),
}

impl JobError {
    pub(crate) fn not_found(kind: &'static str, id: &str) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}
