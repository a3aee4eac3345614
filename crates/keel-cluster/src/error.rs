//! Error types for cluster operations.

use thiserror::Error;

use crate::manifest::ResourceKind;

/// Errors from a [`ClusterClient`](crate::ClusterClient).
///
/// `NotFound` and `AlreadyExists` are expected outcomes that callers branch
/// on (replace-else-create, check-then-create). Everything else propagates.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("{kind} is namespaced but no namespace was given")]
    MissingNamespace { kind: ResourceKind },

    #[error("cluster API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("kube client error: {0}")]
    Kube(kube::Error),

    #[error("manifest serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClusterError::AlreadyExists(_))
    }
}

impl From<kube::Error> for ClusterError {
    /// Lift 404/409 API responses into the recoverable variants.
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => match resp.code {
                404 => ClusterError::NotFound(resp.message),
                409 => ClusterError::AlreadyExists(resp.message),
                code => ClusterError::Api {
                    code,
                    message: resp.message,
                },
            },
            other => ClusterError::Kube(other),
        }
    }
}

pub type ClusterResult<T> = Result<T, ClusterError>;

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("status {code}"),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn classifies_api_status_codes() {
        assert!(ClusterError::from(api_error(404)).is_not_found());
        assert!(ClusterError::from(api_error(409)).is_already_exists());
        assert!(matches!(
            ClusterError::from(api_error(500)),
            ClusterError::Api { code: 500, .. }
        ));
    }
}
