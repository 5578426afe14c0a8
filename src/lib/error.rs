use thiserror::Error;

use super::doc::ConversionError;
use super::store::StoreError;

/// Request-level failures, mapped onto conventional HTTP status codes by the
/// host. Per-row failures inside the bulk pipelines never surface here; they
/// are logged and the row is skipped.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("stream write failed: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn status(&self) -> u16 {
        match self {
            Error::NotFound(_) => 404,
            Error::PermissionDenied(_) => 403,
            Error::Validation(_) => 400,
            Error::MethodNotAllowed(_) => 405,
            Error::Store(_) | Error::Io(_) => 500,
        }
    }
}

// A record that cannot be decoded is a validation problem when it happens
// before streaming begins (e.g. the survey document itself).
impl From<ConversionError> for Error {
    fn from(err: ConversionError) -> Self {
        Error::Validation(err.to_string())
    }
}
