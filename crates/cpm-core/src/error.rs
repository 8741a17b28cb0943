//! Failure taxonomy shared by every layer.
//!
//! Everything that can go wrong inside the engine travels as a [`Rejection`]:
//! a kind from the taxonomy plus a human-readable message. Rejections are
//! plain owned values. A settled promise keeps its own copy and every
//! observer receives a clone, so there is no question of who frees what.

use cpm_schema::SchemaError;
use std::fmt;
use thiserror::Error;

/// What class of failure a [`Rejection`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    /// A precondition violation at the API surface.
    InvalidArgument,
    /// Malformed manifest, version or constraint.
    ParseError,
    /// Package or version missing from the registry.
    NotFound,
    /// No available version satisfies a constraint.
    ConstraintUnsatisfiable,
    /// Dependency cycle.
    Cycle,
    /// Resolution depth cap reached.
    ResolutionLimitExceeded,
    /// Mutually unsatisfiable constraints across the graph.
    Conflict,
    /// Submission refused by a queue's depth limit.
    QueueFull,
    /// A per-operation or plan-wide deadline was reached.
    Timeout,
    /// The registry transport failed.
    TransportError,
    /// The filesystem refused an operation.
    IoFailure,
    /// A user-supplied handler signalled failure or panicked.
    HandlerFailure,
    /// The surrounding plan was abandoned.
    Cancelled,
}

impl ErrorKind {
    /// Process exit status for a failure of this kind. Never 0.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::InvalidArgument => 2,
            Self::ParseError => 3,
            Self::NotFound => 4,
            Self::ConstraintUnsatisfiable => 5,
            Self::Cycle => 6,
            Self::ResolutionLimitExceeded => 7,
            Self::Conflict => 8,
            Self::QueueFull => 9,
            Self::Timeout => 10,
            Self::TransportError => 11,
            Self::IoFailure => 12,
            Self::HandlerFailure => 13,
            Self::Cancelled => 14,
        }
    }

    /// Stable identifier, as printed in messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "InvalidArgument",
            Self::ParseError => "ParseError",
            Self::NotFound => "NotFound",
            Self::ConstraintUnsatisfiable => "ConstraintUnsatisfiable",
            Self::Cycle => "Cycle",
            Self::ResolutionLimitExceeded => "ResolutionLimitExceeded",
            Self::Conflict => "Conflict",
            Self::QueueFull => "QueueFull",
            Self::Timeout => "Timeout",
            Self::TransportError => "TransportError",
            Self::IoFailure => "IOFailure",
            Self::HandlerFailure => "HandlerFailure",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The reason carried by a rejected promise.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct Rejection {
    /// Failure class.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl Rejection {
    /// Create a rejection of any kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// `InvalidArgument` with `message`.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// `NotFound` with `message`.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// `Timeout` with `message`.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// `Cancelled` with `message`.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// `TransportError` with `message`.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransportError, message)
    }

    /// `IoFailure` with `message`.
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IoFailure, message)
    }

    /// The reason used when a handler panics.
    pub fn handler_failed() -> Self {
        Self::new(ErrorKind::HandlerFailure, "handler failed")
    }

    /// Convenience for [`ErrorKind::exit_code`].
    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }
}

impl From<SchemaError> for Rejection {
    fn from(err: SchemaError) -> Self {
        let kind = if err.is_parse_error() {
            ErrorKind::ParseError
        } else {
            ErrorKind::InvalidArgument
        };
        Self::new(kind, err.to_string())
    }
}

impl From<std::io::Error> for Rejection {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind() {
        let r = Rejection::timeout("op exceeded 5ms");
        assert_eq!(r.to_string(), "Timeout: op exceeded 5ms");
        assert_eq!(Rejection::handler_failed().message, "handler failed");
    }

    #[test]
    fn test_exit_codes_are_distinct_and_nonzero() {
        let kinds = [
            ErrorKind::InvalidArgument,
            ErrorKind::ParseError,
            ErrorKind::NotFound,
            ErrorKind::ConstraintUnsatisfiable,
            ErrorKind::Cycle,
            ErrorKind::ResolutionLimitExceeded,
            ErrorKind::Conflict,
            ErrorKind::QueueFull,
            ErrorKind::Timeout,
            ErrorKind::TransportError,
            ErrorKind::IoFailure,
            ErrorKind::HandlerFailure,
            ErrorKind::Cancelled,
        ];
        let mut codes: Vec<_> = kinds.iter().map(|k| k.exit_code()).collect();
        assert!(codes.iter().all(|&c| c != 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn test_schema_errors_map_to_kinds() {
        let parse: Rejection = cpm_schema::Version::parse("1.x").unwrap_err().into();
        assert_eq!(parse.kind, ErrorKind::ParseError);

        let invalid: Rejection = cpm_schema::PackageName::parse("").unwrap_err().into();
        assert_eq!(invalid.kind, ErrorKind::InvalidArgument);
    }
}
