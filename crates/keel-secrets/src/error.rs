use thiserror::Error;

use keel_cluster::ClusterError;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("encryption key not set (expected {0})")]
    MissingKey(&'static str),

    #[error("invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("malformed iv/tag field: {0}")]
    MalformedIvTag(String),

    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    /// Wrong key, or the ciphertext/tag was tampered with.
    #[error("decryption failed: authentication tag mismatch")]
    Authentication,

    #[error("decrypted value is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("encryption failed")]
    Encryption,

    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),
}

pub type SecretResult<T> = Result<T, SecretError>;
