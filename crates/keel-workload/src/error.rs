use thiserror::Error;

use keel_cluster::ClusterError;

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}

pub type WorkloadResult<T> = Result<T, WorkloadError>;
