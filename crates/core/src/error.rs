/// Shared error type used across all fleet-mesh crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("stream not found: {0}")]
    StreamNotFound(String),

    #[error("not registered: {0}")]
    NotRegistered(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("pagination filter mismatch")]
    PaginationFilterMismatch,

    #[error("no work available")]
    NoWorkAvailable,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Stable machine-readable error kind surfaced to tool callers.
///
/// This is the boundary representation: internal [`Error`] variants carry
/// implementation detail (broker client messages, IO paths) that MUST NOT
/// leak verbatim past the tool surface; `ErrorKind` plus a human message is
/// all a caller ever sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ErrorKind {
    BrokerUnavailable,
    NotRegistered,
    InvalidArgument,
    NotFound,
    PermissionDenied,
    InvalidCursor,
    PaginationFilterMismatch,
    NoWorkAvailable,
    Conflict,
    Internal,
}

impl Error {
    /// Map an internal error onto the stable kind callers see.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BrokerUnavailable(_) | Error::StreamNotFound(_) => ErrorKind::BrokerUnavailable,
            Error::NotRegistered(_) => ErrorKind::NotRegistered,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Error::InvalidCursor(_) => ErrorKind::InvalidCursor,
            Error::PaginationFilterMismatch => ErrorKind::PaginationFilterMismatch,
            Error::NoWorkAvailable => ErrorKind::NoWorkAvailable,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Io(_) | Error::Json(_) | Error::Config(_) | Error::Other(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// Envelope returned to tool callers on failure.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorEnvelope {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for ErrorEnvelope {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
