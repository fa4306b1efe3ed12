use thiserror::Error;

use crate::runtime::RuntimeError;
use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, PodiumError>;

/// Which kind of record a lookup missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Container,
    Service,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::Container => f.write_str("container"),
            RecordKind::Service => f.write_str("service"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PodiumError {
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: RecordKind, id: String },
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("Store error: {0}")]
    Store(StoreError),
    #[error("Container {id} reached its restart limit ({restarts}/{cap})")]
    PolicyLimit { id: String, restarts: u32, cap: u32 },
}

impl PodiumError {
    pub fn validation(msg: impl Into<String>) -> Self {
        PodiumError::Validation(msg.into())
    }

    /// Client-class errors are rejected before any side effect.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PodiumError::Validation(_) | PodiumError::NotFound { .. }
        )
    }
}

impl From<StoreError> for PodiumError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { namespace, id } => PodiumError::NotFound {
                kind: namespace.record_kind(),
                id,
            },
            other => PodiumError::Store(other),
        }
    }
}
