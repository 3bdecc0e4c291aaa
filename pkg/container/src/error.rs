use std::time::Duration;

/// Failures of a single backend call.
///
/// Idempotent outcomes ("already exists", "not found" on delete, ...) are not
/// errors; they come back as variants of the outcome enums in `backend`.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend call `{operation}` timed out after {after:?}")]
    Timeout {
        operation: String,
        after: Duration,
    },

    /// The requested subnet overlaps a pool another actor already holds.
    #[error("subnet {0} overlaps an existing address pool")]
    SubnetConflict(String),

    #[error("invalid resource specification: {0}")]
    InvalidSpec(String),

    #[error("`{operation}` is not supported by the {backend} backend")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    #[error("backend API error: {0}")]
    Api(String),
}

impl BackendError {
    /// Errors that mean the backend could not be reached at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            BackendError::Unavailable(_) | BackendError::Timeout { .. }
        )
    }
}

pub type BackendResult<T> = Result<T, BackendError>;
