//! Error types for the IDS client.
//!
//! # Design
//! Every failure surfaces as a single `IdsError` carrying a `kind` and a
//! human-readable `message`. The kinds mirror the exception codes the
//! service puts in its `{"code": ..., "message": ...}` error bodies; codes the
//! client does not know are carried through verbatim in `ErrorKind::Other`.
//! Failures that never reach the network (an oversized URL, a missing upload
//! source) use the same kinds so callers only ever match on one type.

use std::fmt;

/// Classification of an `IdsError`, matching the service's error codes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or missing input, including locally rejected requests.
    BadRequest,
    /// The referenced entity or prepared id does not exist.
    NotFound,
    /// Server-side fault, transport failure, or an integrity check that failed.
    Internal,
    InsufficientPrivileges,
    InsufficientStorage,
    /// The requested data must be restored from archive storage first.
    DataNotOnline,
    NotImplemented,
    /// Any other code the server reported, kept verbatim.
    Other(String),
}

impl ErrorKind {
    /// Map a wire code such as `"NotFoundException"` onto a kind.
    pub fn from_code(code: &str) -> Self {
        match code {
            "BadRequestException" => ErrorKind::BadRequest,
            "NotFoundException" => ErrorKind::NotFound,
            "InternalException" => ErrorKind::Internal,
            "InsufficientPrivilegesException" => ErrorKind::InsufficientPrivileges,
            "InsufficientStorageException" => ErrorKind::InsufficientStorage,
            "DataNotOnlineException" => ErrorKind::DataNotOnline,
            "NotImplementedException" => ErrorKind::NotImplemented,
            other => ErrorKind::Other(other.to_string()),
        }
    }

    /// The wire code for this kind.
    pub fn as_str(&self) -> &str {
        match self {
            ErrorKind::BadRequest => "BadRequestException",
            ErrorKind::NotFound => "NotFoundException",
            ErrorKind::Internal => "InternalException",
            ErrorKind::InsufficientPrivileges => "InsufficientPrivilegesException",
            ErrorKind::InsufficientStorage => "InsufficientStorageException",
            ErrorKind::DataNotOnline => "DataNotOnlineException",
            ErrorKind::NotImplemented => "NotImplementedException",
            ErrorKind::Other(code) => code,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single error type returned by every `IdsClient` operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct IdsError {
    pub kind: ErrorKind,
    pub message: String,
}

impl IdsError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<std::io::Error> for IdsError {
    fn from(e: std::io::Error) -> Self {
        IdsError::internal(format!("IOException {e}"))
    }
}
