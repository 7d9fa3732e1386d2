//! Error codes and error types.

use core::fmt;

use rowstream_protocol::{Status, error_code};

/// RPC status codes.
///
/// Numbering follows gRPC so that codes on the wire ([`Status::code`]) and
/// codes reported by the harness read the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, facet::Facet)]
#[repr(u32)]
pub enum ErrorCode {
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

impl ErrorCode {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            error_code::OK => Some(Self::Ok),
            error_code::CANCELLED => Some(Self::Cancelled),
            error_code::UNKNOWN => Some(Self::Unknown),
            error_code::INVALID_ARGUMENT => Some(Self::InvalidArgument),
            error_code::DEADLINE_EXCEEDED => Some(Self::DeadlineExceeded),
            error_code::NOT_FOUND => Some(Self::NotFound),
            error_code::ALREADY_EXISTS => Some(Self::AlreadyExists),
            error_code::PERMISSION_DENIED => Some(Self::PermissionDenied),
            error_code::RESOURCE_EXHAUSTED => Some(Self::ResourceExhausted),
            error_code::FAILED_PRECONDITION => Some(Self::FailedPrecondition),
            error_code::ABORTED => Some(Self::Aborted),
            error_code::OUT_OF_RANGE => Some(Self::OutOfRange),
            error_code::UNIMPLEMENTED => Some(Self::Unimplemented),
            error_code::INTERNAL => Some(Self::Internal),
            error_code::UNAVAILABLE => Some(Self::Unavailable),
            error_code::DATA_LOSS => Some(Self::DataLoss),
            error_code::UNAUTHENTICATED => Some(Self::Unauthenticated),
            _ => None,
        }
    }

    /// Like [`from_u32`](Self::from_u32), mapping unknown values to `Unknown`.
    pub fn from_wire(value: u32) -> Self {
        Self::from_u32(value).unwrap_or(Self::Unknown)
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Canonical upper-case name, e.g. `DEADLINE_EXCEEDED`.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Aborted => "ABORTED",
            Self::OutOfRange => "OUT_OF_RANGE",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
            Self::DataLoss => "DATA_LOSS",
            Self::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Transport-level errors.
#[derive(Debug, Clone)]
pub enum TransportError {
    Closed,
    Io(IoError),
    FrameTooSmall { len: usize },
    PayloadTooLarge { len: u32, max: u32 },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "transport closed"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::FrameTooSmall { len } => write!(f, "frame too small: {len} bytes"),
            Self::PayloadTooLarge { len, max } => {
                write!(f, "payload {len} bytes exceeds max {max}")
            }
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::Closed
        } else {
            Self::Io(e.into())
        }
    }
}

/// Cloneable snapshot of a [`std::io::Error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoError {
    pub kind: std::io::ErrorKind,
    pub message: String,
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for IoError {}

impl From<std::io::Error> for IoError {
    fn from(e: std::io::Error) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// Encoding errors.
#[derive(Debug, Clone)]
pub enum EncodeError {
    EncodeFailed(String),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EncodeFailed(msg) => write!(f, "encode failed: {msg}"),
        }
    }
}

impl std::error::Error for EncodeError {}

/// Decoding errors.
#[derive(Debug, Clone)]
pub enum DecodeError {
    InvalidData(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidData(msg) => write!(f, "invalid data: {msg}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// High-level RPC errors.
#[derive(Debug, Clone)]
pub enum RpcError {
    Transport(TransportError),
    /// The peer terminated the stream with a non-OK status.
    Status {
        code: ErrorCode,
        message: String,
    },
    DeadlineExceeded,
    Encode(EncodeError),
    Decode(DecodeError),
}

impl RpcError {
    /// The status code this error reports to a caller.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Transport(_) => ErrorCode::Unavailable,
            Self::Status { code, .. } => *code,
            Self::DeadlineExceeded => ErrorCode::DeadlineExceeded,
            Self::Encode(_) => ErrorCode::Internal,
            Self::Decode(_) => ErrorCode::Internal,
        }
    }

    pub fn from_status(status: Status) -> Self {
        Self::Status {
            code: ErrorCode::from_wire(status.code),
            message: status.message,
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Status { code, message } => write!(f, "{code}: {message}"),
            Self::DeadlineExceeded => write!(f, "deadline exceeded"),
            Self::Encode(e) => write!(f, "could not serialize to postcard: {e}"),
            Self::Decode(e) => write!(f, "could not deserialize from postcard: {e}"),
        }
    }
}

impl std::error::Error for RpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for RpcError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<EncodeError> for RpcError {
    fn from(e: EncodeError) -> Self {
        Self::Encode(e)
    }
}

impl From<DecodeError> for RpcError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}
