//! Error taxonomy shared across the coordination RPC surfaces.
//!
//! Every component maps its failures into [`ErrorKind`], whose numeric
//! codes match the canonical gRPC status codes so application-level
//! `code` fields on responses round-trip losslessly through the wire.

use thiserror::Error;

/// Result type for coordination operations.
pub type CoordResult<T> = Result<T, CoordError>;

/// Failure classes used consistently by every subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Serialization faults, stream-removed edge cases with no better class.
    Unknown,

    /// Bad inputs: unknown tensor name, missing registration, shape errors.
    InvalidArgument,

    /// A monitor deadline fired before the operation completed.
    DeadlineExceeded,

    /// Rendezvous name not registered on this side.
    NotFound,

    /// Lookup-table memory cap exceeded.
    ResourceExhausted,

    /// Wrong communicator state or stage status for the operation.
    FailedPrecondition,

    /// Dataset exhausted, or the peer terminated the reader rendezvous.
    OutOfRange,

    /// No backend accepts the requested scheme.
    Unimplemented,

    /// Invariant violation inside the substrate itself.
    Internal,

    /// Cluster not fully registered, or a transient backend failure.
    Unavailable,

    /// Step mismatch between a parked request and its waiter.
    DataLoss,
}

impl ErrorKind {
    /// The canonical numeric code for this kind (gRPC status code space).
    pub fn code(self) -> i32 {
        match self {
            Self::Unknown => 2,
            Self::InvalidArgument => 3,
            Self::DeadlineExceeded => 4,
            Self::NotFound => 5,
            Self::ResourceExhausted => 8,
            Self::FailedPrecondition => 9,
            Self::OutOfRange => 11,
            Self::Unimplemented => 12,
            Self::Internal => 13,
            Self::Unavailable => 14,
            Self::DataLoss => 15,
        }
    }

    /// Maps a wire code back into a kind. Unrecognized codes (including
    /// codes this substrate never produces) come back as `Unknown`.
    pub fn from_code(code: i32) -> Self {
        match code {
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            8 => Self::ResourceExhausted,
            9 => Self::FailedPrecondition,
            11 => Self::OutOfRange,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            15 => Self::DataLoss,
            _ => Self::Unknown,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::InvalidArgument => "invalid argument",
            Self::DeadlineExceeded => "deadline exceeded",
            Self::NotFound => "not found",
            Self::ResourceExhausted => "resource exhausted",
            Self::FailedPrecondition => "failed precondition",
            Self::OutOfRange => "out of range",
            Self::Unimplemented => "unimplemented",
            Self::Internal => "internal",
            Self::Unavailable => "unavailable",
            Self::DataLoss => "data loss",
        }
    }
}

/// An error carrying its taxonomy class and a human-readable message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{}: {message}", .kind.as_str())]
pub struct CoordError {
    /// Failure class.
    pub kind: ErrorKind,

    /// Context message.
    pub message: String,
}

impl CoordError {
    /// Creates an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates an `Unknown` error.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// Creates an `InvalidArgument` error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Creates a `DeadlineExceeded` error.
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DeadlineExceeded, message)
    }

    /// Creates a `NotFound` error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Creates a `ResourceExhausted` error.
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceExhausted, message)
    }

    /// Creates a `FailedPrecondition` error.
    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FailedPrecondition, message)
    }

    /// Creates an `OutOfRange` error.
    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OutOfRange, message)
    }

    /// Creates an `Unimplemented` error.
    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unimplemented, message)
    }

    /// Creates an `Internal` error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Creates an `Unavailable` error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    /// Creates a `DataLoss` error.
    pub fn data_loss(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DataLoss, message)
    }

    /// The wire code for this error.
    pub fn code(&self) -> i32 {
        self.kind.code()
    }

    /// Reconstructs an error from an application-level response code.
    ///
    /// Code 0 is success and must be handled by the caller before this.
    pub fn from_code(code: i32, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::from_code(code),
            message: message.into(),
        }
    }
}

// Message gRPC reports when the HTTP/2 stream vanished under a call; the
// original discovery client treats it as a retryable outage rather than
// an unknown fault.
const STREAM_REMOVED_MESSAGE: &str = "Stream removed";

impl From<tonic::Status> for CoordError {
    fn from(status: tonic::Status) -> Self {
        let kind = match status.code() {
            tonic::Code::InvalidArgument => ErrorKind::InvalidArgument,
            tonic::Code::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            tonic::Code::NotFound => ErrorKind::NotFound,
            tonic::Code::ResourceExhausted => ErrorKind::ResourceExhausted,
            tonic::Code::FailedPrecondition => ErrorKind::FailedPrecondition,
            tonic::Code::OutOfRange => ErrorKind::OutOfRange,
            tonic::Code::Unimplemented => ErrorKind::Unimplemented,
            tonic::Code::Internal => ErrorKind::Internal,
            tonic::Code::Unavailable => ErrorKind::Unavailable,
            tonic::Code::DataLoss => ErrorKind::DataLoss,
            tonic::Code::Unknown if status.message() == STREAM_REMOVED_MESSAGE => {
                ErrorKind::Unavailable
            }
            _ => ErrorKind::Unknown,
        };
        Self::new(kind, status.message())
    }
}

impl From<CoordError> for tonic::Status {
    fn from(err: CoordError) -> Self {
        let code = match err.kind {
            ErrorKind::Unknown => tonic::Code::Unknown,
            ErrorKind::InvalidArgument => tonic::Code::InvalidArgument,
            ErrorKind::DeadlineExceeded => tonic::Code::DeadlineExceeded,
            ErrorKind::NotFound => tonic::Code::NotFound,
            ErrorKind::ResourceExhausted => tonic::Code::ResourceExhausted,
            ErrorKind::FailedPrecondition => tonic::Code::FailedPrecondition,
            ErrorKind::OutOfRange => tonic::Code::OutOfRange,
            ErrorKind::Unimplemented => tonic::Code::Unimplemented,
            ErrorKind::Internal => tonic::Code::Internal,
            ErrorKind::Unavailable => tonic::Code::Unavailable,
            ErrorKind::DataLoss => tonic::Code::DataLoss,
        };
        tonic::Status::new(code, err.message)
    }
}
