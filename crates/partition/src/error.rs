//! Error types for the partition lifecycle

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::settings::SettingsError;

/// Result type for partition lifecycle operations.
pub type PartitionResult<T> = Result<T, Error>;

/// Main error type for the partition lifecycle.
#[derive(Debug, Error)]
pub struct Error {
    /// Error kind
    kind: ErrorKind,
    /// Error context
    context: ErrorContext,
}

impl Error {
    /// Create a new error
    pub fn new(kind: ErrorKind, context: ErrorContext) -> Self {
        Self { kind, context }
    }

    /// Create error with string context
    pub fn with_context(kind: ErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: ErrorContext::Message(context.into()),
        }
    }

    /// Get error kind
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get error context
    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::InvalidState, msg)
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::Configuration, msg)
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::Timeout, msg)
    }

    /// Create a consensus request error
    pub fn consensus(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::Consensus, msg)
    }

    /// Create a listener failure error
    pub fn listener(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::Listener, msg)
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::Internal, msg)
    }

    /// Create an unrecoverable failure marker error
    ///
    /// An unrecoverable error instructs the supervisor not to attempt
    /// recovery of the partition on this node.
    pub fn unrecoverable(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::Unrecoverable, msg)
    }

    /// Create an aggregate carrying every error collected during a shutdown
    pub fn aggregate(message: impl Into<String>, errors: Vec<Error>) -> Self {
        Self {
            kind: ErrorKind::Shutdown,
            context: ErrorContext::Aggregate {
                message: message.into(),
                errors,
            },
        }
    }

    /// Create an error sharing a stored outcome with additional callers
    pub fn shared(error: &Arc<Error>) -> Self {
        Self {
            kind: error.kind,
            context: ErrorContext::Shared(error.clone()),
        }
    }

    /// Check whether this error (or any error it carries) is the
    /// unrecoverable failure marker
    pub fn is_unrecoverable(&self) -> bool {
        if self.kind == ErrorKind::Unrecoverable {
            return true;
        }
        match &self.context {
            ErrorContext::Shared(inner) => inner.is_unrecoverable(),
            ErrorContext::Aggregate { errors, .. } => errors.iter().any(Error::is_unrecoverable),
            ErrorContext::Message(_) | ErrorContext::Chain { .. } => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            ErrorContext::Message(msg) => write!(f, "{}: {}", self.kind, msg),
            ErrorContext::Chain { message, source } => {
                write!(f, "{}: {} (caused by: {})", self.kind, message, source)
            }
            ErrorContext::Aggregate { message, errors } => {
                write!(f, "{}: {}", self.kind, message)?;
                for error in errors {
                    write!(f, "; {error}")?;
                }
                Ok(())
            }
            ErrorContext::Shared(inner) => write!(f, "{inner}"),
        }
    }
}

/// Error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invariant violation: an operation was invoked in a state that
    /// forbids it
    InvalidState,
    /// Startup was aborted because shutdown was requested
    Aborted,
    /// One or more steps failed during shutdown
    Shutdown,
    /// Operation timed out
    Timeout,
    /// A consensus request failed
    Consensus,
    /// A partition listener failed
    Listener,
    /// Persisted settings could not be read or written
    Settings,
    /// Configuration error
    Configuration,
    /// The replica must not attempt recovery on this node
    Unrecoverable,
    /// Internal error
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::InvalidState => write!(f, "Invalid state"),
            ErrorKind::Aborted => write!(f, "Aborted"),
            ErrorKind::Shutdown => write!(f, "Shutdown error"),
            ErrorKind::Timeout => write!(f, "Timeout"),
            ErrorKind::Consensus => write!(f, "Consensus error"),
            ErrorKind::Listener => write!(f, "Listener error"),
            ErrorKind::Settings => write!(f, "Settings error"),
            ErrorKind::Configuration => write!(f, "Configuration error"),
            ErrorKind::Unrecoverable => write!(f, "Unrecoverable failure"),
            ErrorKind::Internal => write!(f, "Internal error"),
        }
    }
}

/// Error context
#[derive(Debug)]
pub enum ErrorContext {
    /// Simple message
    Message(String),
    /// Error chain with source
    Chain {
        /// Error message
        message: String,
        /// Source error
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Errors collected while a shutdown ran to completion
    Aggregate {
        /// Summary message
        message: String,
        /// The collected step errors, in teardown order
        errors: Vec<Error>,
    },
    /// A stored outcome shared with every duplicate caller
    Shared(Arc<Error>),
}

// Conversion implementations for common error types

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self {
            kind: ErrorKind::Internal,
            context: ErrorContext::Chain {
                message: "I/O error".to_string(),
                source: Box::new(err),
            },
        }
    }
}

impl From<SettingsError> for Error {
    fn from(err: SettingsError) -> Self {
        Self {
            kind: ErrorKind::Settings,
            context: ErrorContext::Chain {
                message: "persisted settings error".to_string(),
                source: Box::new(err),
            },
        }
    }
}

impl From<treadle_actor::ActorError> for Error {
    fn from(err: treadle_actor::ActorError) -> Self {
        Self {
            kind: ErrorKind::InvalidState,
            context: ErrorContext::Chain {
                message: "partition executor is unavailable".to_string(),
                source: Box::new(err),
            },
        }
    }
}
