use thiserror::Error;

/// Errors raised by the indexing layer and the collaborative-filtering engine.
#[derive(Error, Debug)]
pub enum RecError {
    /// Malformed or inconsistent column-family mapping, or a frame that
    /// doesn't match the fitted schema.
    #[error("schema error: {0}")]
    Schema(String),

    /// An id that can't be resolved when strict resolution is required.
    #[error("unknown {kind}: {id}")]
    UnknownEntity { kind: &'static str, id: String },

    /// Cold-start strategy, similarity metric or task name outside the
    /// supported set.
    #[error("unsupported strategy: {0}")]
    UnsupportedStrategy(String),

    #[error("storage not found: {0}")]
    StorageNotFound(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to (de)serialize {name}: {reason}")]
    Serialization { name: String, reason: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RecError>;

#[cfg(feature = "python")]
impl From<RecError> for pyo3::PyErr {
    fn from(err: RecError) -> Self {
        use pyo3::exceptions::{PyIOError, PyValueError};
        match err {
            RecError::StorageNotFound(_) | RecError::Io(_) | RecError::Serialization { .. } => {
                PyIOError::new_err(err.to_string())
            }
            _ => PyValueError::new_err(err.to_string()),
        }
    }
}
