//! Library error type.
//!
//! Registry and push service operations return distinct variants so that an
//! embedding application can tell validation failures apart. I/O failures on
//! a single client never surface here as fatal errors; they terminate that
//! client only (see the server module).

use thiserror::Error;

/// Errors returned by the JSON API library.
#[derive(Debug, Error)]
pub enum JapiError {
    /// An argument failed validation (empty name, null message, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A handler or push service with the same name is already registered.
    #[error("'{0}' is already registered")]
    Duplicate(String),

    /// Request names starting with the built-in prefix are rejected.
    #[error("request name '{0}' starts with the reserved prefix 'japi_'")]
    ReservedName(String),

    /// The named entity does not exist.
    #[error("'{0}' not found")]
    NotFound(String),

    /// A single line exceeded the configured maximum size.
    #[error("maximum line size of {0} bytes exceeded")]
    LineTooLarge(usize),

    /// The peer closed the connection while a partial line was buffered.
    #[error("received EOF while the line buffer is not empty")]
    EofMidLine,

    /// A push service routine was stopped without having been started.
    #[error("push service routine is not running")]
    NotRunning,

    /// An underlying socket operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
