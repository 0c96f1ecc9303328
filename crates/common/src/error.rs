//! Error types for the common crate
//!
//! This module defines the error taxonomy shared by every runtime crate.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for acceleration runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error classification reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Capability detection or backend bring-up failed
    InitFailed,
    /// Artifact build failed
    CompileFailed,
    /// Backend execution failed
    RuntimeError,
    /// Requested memory exceeds the detected or configured ceiling
    MemoryError,
    /// No capable backend supports the operation
    UnsupportedOp,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::InitFailed => write!(f, "INIT_FAILED"),
            ErrorCode::CompileFailed => write!(f, "COMPILE_FAILED"),
            ErrorCode::RuntimeError => write!(f, "RUNTIME_ERROR"),
            ErrorCode::MemoryError => write!(f, "MEMORY_ERROR"),
            ErrorCode::UnsupportedOp => write!(f, "UNSUPPORTED_OP"),
        }
    }
}

/// Common error type for acceleration runtime operations
///
/// Variants carry rendered messages rather than source errors so that a
/// single failure can be cloned out to every waiter of a coalesced build.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Initialization error
    #[error("Initialization failed: {0}")]
    InitFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Compilation error
    #[error("Compilation failed: {0}")]
    CompileFailed(String),

    /// Runtime error
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Accelerated execution and the baseline safety net both failed
    #[error("Runtime error: accelerated path failed ({accelerated}); baseline path failed ({baseline})")]
    FallbackFailed {
        /// Failure of the accelerated backend
        accelerated: String,
        /// Failure of the baseline path
        baseline: String,
    },

    /// Memory error
    #[error("Memory error: {0}")]
    Memory(String),

    /// Unsupported operation error
    #[error("Unsupported operation: {0}")]
    UnsupportedOp(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Invalid argument error
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// The component was disposed and can no longer be used
    #[error("Disposed: {0}")]
    Disposed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Maps the error onto the reported taxonomy
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InitFailed(_) | Error::Config(_) | Error::Disposed(_) => ErrorCode::InitFailed,
            Error::CompileFailed(_) => ErrorCode::CompileFailed,
            Error::Runtime(_)
            | Error::FallbackFailed { .. }
            | Error::Timeout(_)
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::NotFound(_)
            | Error::InvalidArgument(_) => ErrorCode::RuntimeError,
            Error::Memory(_) => ErrorCode::MemoryError,
            Error::UnsupportedOp(_) => ErrorCode::UnsupportedOp,
        }
    }

    /// Returns true if the error is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Returns true if the error comes from a disposed component
    pub fn is_disposed(&self) -> bool {
        matches!(self, Error::Disposed(_))
    }

    /// Returns true if the error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::Config("bad".into()).code(), ErrorCode::InitFailed);
        assert_eq!(Error::Disposed("gone".into()).code(), ErrorCode::InitFailed);
        assert_eq!(Error::Timeout("slow".into()).code(), ErrorCode::RuntimeError);
        assert_eq!(Error::Memory("big".into()).code(), ErrorCode::MemoryError);
        assert_eq!(
            Error::FallbackFailed {
                accelerated: "a".into(),
                baseline: "b".into(),
            }
            .code(),
            ErrorCode::RuntimeError
        );
    }

    #[test]
    fn test_fallback_failed_mentions_both_causes() {
        let err = Error::FallbackFailed {
            accelerated: "kernel exploded".into(),
            baseline: "provider offline".into(),
        };
        let message = err.to_string();
        assert!(message.contains("kernel exploded"));
        assert!(message.contains("provider offline"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.bin");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(ref msg) if msg.contains("missing.bin")));
        assert_eq!(ErrorCode::CompileFailed.to_string(), "COMPILE_FAILED");
    }
}
