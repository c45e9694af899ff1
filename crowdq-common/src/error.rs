//! Common error types for crowdq

use thiserror::Error;

/// Common result type for crowdq operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced to callers
///
/// Domain kinds (`NotFound` through `Conflict`) describe a rejected request and
/// guarantee that no state was changed. `Internal` is reserved for failures the
/// caller could not have caused and is never used in place of a domain kind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Unknown session, song, account or token
    #[error("Not found: {0}")]
    NotFound(String),

    /// Mutation attempted against a session that no longer accepts it
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Caller's identity or tier does not permit the operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Malformed request (missing metadata, empty id, bad query)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Conflicting request; redundant votes are no-ops and never produce this
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation error
    #[error("IO error: {0}")]
    Io(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NotFound",
            Error::InvalidState(_) => "InvalidState",
            Error::PermissionDenied(_) => "PermissionDenied",
            Error::InvalidArgument(_) => "InvalidArgument",
            Error::Conflict(_) => "Conflict",
            Error::Config(_) => "Config",
            Error::Io(_) => "Io",
            Error::Internal(_) => "Internal",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
