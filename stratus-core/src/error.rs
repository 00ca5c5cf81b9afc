//! Error and status types for the Stratus framework.

use std::fmt;
use std::time::Duration;

/// Boxed error used for failures that carry no declared status.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Status codes reported to callers.
///
/// The numbering matches the gRPC status codes so transports can pass
/// them through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl StatusCode {
    /// Map a wire value back to a status code. Unknown values map to `Unknown`.
    #[must_use]
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => Self::Ok,
            1 => Self::Cancelled,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            6 => Self::AlreadyExists,
            7 => Self::PermissionDenied,
            8 => Self::ResourceExhausted,
            9 => Self::FailedPrecondition,
            10 => Self::Aborted,
            11 => Self::OutOfRange,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            15 => Self::DataLoss,
            16 => Self::Unauthenticated,
            _ => Self::Unknown,
        }
    }

    /// The wire value of this code.
    #[inline]
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A declared call outcome: status code plus human-readable detail.
///
/// Returning `Err(Status)` from a method or filter is the normal way to
/// report a non-OK result to the caller. It is not treated as a failure
/// of the framework and is never logged as one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {detail}")]
pub struct Status {
    /// Status code.
    pub code: StatusCode,
    /// Detail text sent to the caller.
    pub detail: String,
}

impl Status {
    /// Create a status with code and detail.
    #[must_use]
    pub fn new(code: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn unknown(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::Unknown, detail)
    }

    #[must_use]
    pub fn invalid_argument(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, detail)
    }

    #[must_use]
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NotFound, detail)
    }

    #[must_use]
    pub fn permission_denied(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::PermissionDenied, detail)
    }

    #[must_use]
    pub fn unimplemented(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::Unimplemented, detail)
    }

    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::Internal, detail)
    }

    #[must_use]
    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, detail)
    }
}

/// Error returned by method bodies and filters.
#[derive(Debug, thiserror::Error)]
pub enum MethodError {
    /// A declared status. Delivered to the caller as-is.
    #[error(transparent)]
    Status(#[from] Status),

    /// Anything else. Logged; its text reaches the caller only when the
    /// server is configured to return error details.
    #[error("{0}")]
    Unhandled(BoxError),
}

impl MethodError {
    /// Shorthand for a declared status.
    #[must_use]
    pub fn status(code: StatusCode, detail: impl Into<String>) -> Self {
        Self::Status(Status::new(code, detail))
    }

    /// Wrap an arbitrary error as an unhandled failure.
    #[must_use]
    pub fn unhandled(err: impl Into<BoxError>) -> Self {
        Self::Unhandled(err.into())
    }

    /// The declared status, if this is one.
    #[must_use]
    pub fn as_status(&self) -> Option<&Status> {
        match self {
            Self::Status(status) => Some(status),
            Self::Unhandled(_) => None,
        }
    }
}

impl From<CodecError> for MethodError {
    fn from(err: CodecError) -> Self {
        Self::Unhandled(Box::new(err))
    }
}

impl From<TransportError> for MethodError {
    fn from(err: TransportError) -> Self {
        Self::Unhandled(Box::new(err))
    }
}

impl From<StratusError> for MethodError {
    fn from(err: StratusError) -> Self {
        match err {
            StratusError::Status(status) => Self::Status(status),
            other => Self::Unhandled(Box::new(other)),
        }
    }
}

/// Startup errors raised while building handlers. Never raised per call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    /// The method signature cannot be mapped to a handler.
    #[error("invalid signature for {service}.{method}: {reason}")]
    InvalidSignature {
        service: String,
        method: String,
        reason: String,
    },

    /// Two methods resolved to the same (service, method) key.
    #[error("duplicate registration of {service}.{method}")]
    DuplicateRegistration { service: String, method: String },

    /// Two hub methods resolved to the same method id.
    #[error("hub {hub}: method id {method_id} is used by both {first} and {second}")]
    DuplicateMethodId {
        hub: String,
        method_id: i32,
        first: String,
        second: String,
    },

    /// A filter factory could not build its filter.
    #[error("filter {filter} could not be constructed: {reason}")]
    FilterConstruction { filter: String, reason: String },
}

impl RegistrationError {
    pub(crate) fn invalid(service: &str, method: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSignature {
            service: service.to_string(),
            method: method.to_string(),
            reason: reason.into(),
        }
    }
}

/// Main error type for Stratus operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StratusError {
    /// Transport-level error (connection, IO, etc.)
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Codec error (serialization/deserialization)
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Declared status returned by a remote party.
    #[error("status {0}")]
    Status(#[from] Status),

    /// Handler construction failed.
    #[error("registration error: {0}")]
    Registration(#[from] RegistrationError),

    /// Request timed out
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// Request was cancelled
    #[error("request cancelled")]
    Cancelled,
}

/// Transport-level errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// IO error from the underlying transport
    #[error("io error: {0}")]
    Io(std::sync::Arc<std::io::Error>),

    /// Connection was closed unexpectedly
    #[error("connection closed")]
    ConnectionClosed,

    /// Protocol violation
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(std::sync::Arc::new(e))
    }
}

/// Codec errors for the positional wire format.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Input ended before a complete value was read.
    #[error("truncated input: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes required by the next read.
        needed: usize,
        /// Bytes left in the input.
        remaining: usize,
    },

    /// Structurally invalid message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A nil element where a value was required.
    #[error("unexpected nil element at position {0}")]
    UnexpectedNil(usize),

    /// rkyv serialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// rkyv deserialization/validation failed
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl StratusError {
    /// Check if this error indicates the connection is gone.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Transport(TransportError::ConnectionClosed)
                | Self::Transport(TransportError::Io(_))
                | Self::Transport(TransportError::Protocol(_))
        )
    }
}
