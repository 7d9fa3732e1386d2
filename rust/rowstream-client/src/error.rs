use std::time::Duration;

use rowstream_core::{ErrorCode, RpcError, TransportError};

use crate::{MergeError, QueryError};

/// Errors returned by [`Client`](crate::Client) calls.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// The call failed on the wire or the server ended it with an error status.
    #[error(transparent)]
    Rpc(#[from] RpcError),
    /// The server sent a row stream that does not reassemble.
    #[error("malformed row stream: {0}")]
    Merge(#[from] MergeError),
    /// The server sent a query stream that does not assemble.
    #[error("malformed query stream: {0}")]
    Query(#[from] QueryError),
    #[error("deadline of {timeout:?} exceeded")]
    DeadlineExceeded { timeout: Duration },
    #[error("could not connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: TransportError,
    },
}

impl ClientError {
    /// The status code a caller should report for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Rpc(e) => e.code(),
            Self::Merge(_) | Self::Query(_) => ErrorCode::Internal,
            Self::DeadlineExceeded { .. } => ErrorCode::DeadlineExceeded,
            Self::Connect { .. } => ErrorCode::Unavailable,
        }
    }

    /// True when the server broke stream framing rather than failing the call.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::Merge(_) | Self::Query(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes() {
        let status = ClientError::from(RpcError::Status {
            code: ErrorCode::NotFound,
            message: "gone".into(),
        });
        assert_eq!(status.code(), ErrorCode::NotFound);
        assert!(!status.is_protocol_violation());

        let merge = ClientError::from(MergeError::MissingRowKey);
        assert_eq!(merge.code(), ErrorCode::Internal);
        assert!(merge.is_protocol_violation());

        let timeout = ClientError::DeadlineExceeded {
            timeout: Duration::from_secs(2),
        };
        assert_eq!(timeout.code(), ErrorCode::DeadlineExceeded);

        let connect = ClientError::Connect {
            target: "127.0.0.1:1".into(),
            source: TransportError::Closed,
        };
        assert_eq!(connect.code(), ErrorCode::Unavailable);
    }
}
