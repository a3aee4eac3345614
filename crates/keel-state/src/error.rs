//! State store errors.
//!
//! redb reports a different error type per layer (database, transaction,
//! table, storage, commit); each is flattened to its message under the
//! layer it came from.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open state database: {0}")]
    Open(String),

    #[error("state transaction failed: {0}")]
    Transaction(String),

    #[error("cannot open table: {0}")]
    Table(String),

    #[error("state read failed: {0}")]
    Read(String),

    #[error("state write failed: {0}")]
    Write(String),

    #[error("cannot encode record: {0}")]
    Serialize(String),

    #[error("cannot decode record: {0}")]
    Deserialize(String),

    /// An update addressed a record that does not exist.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
}

impl StateError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}
