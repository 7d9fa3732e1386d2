use rowstream_client::{ClientError, QueryResult};
use rowstream_core::ErrorCode;
use rowstream_protocol::Row;

use crate::SessionError;

/// Which layer a [`Failure`] comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOrigin {
    /// The server's status, a transport failure or a deadline.
    Backend,
    /// The server's stream did not reassemble.
    Protocol,
    /// The session was closed or could not be created.
    Session,
    /// The operation task itself failed.
    Harness,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub code: ErrorCode,
    pub message: String,
    pub origin: FailureOrigin,
}

impl From<ClientError> for Failure {
    fn from(e: ClientError) -> Self {
        let origin = if e.is_protocol_violation() {
            FailureOrigin::Protocol
        } else {
            FailureOrigin::Backend
        };
        Self {
            code: e.code(),
            message: e.to_string(),
            origin,
        }
    }
}

impl From<SessionError> for Failure {
    fn from(e: SessionError) -> Self {
        let code = match &e {
            SessionError::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            SessionError::NotFound { .. } => ErrorCode::NotFound,
            SessionError::Closed { .. } | SessionError::Create { .. } => ErrorCode::Unavailable,
        };
        Self {
            code,
            message: e.to_string(),
            origin: FailureOrigin::Session,
        }
    }
}

/// Outcome of one operation: a payload or a failure, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult {
    Row(Option<Row>),
    Rows(Vec<Row>),
    Query(QueryResult),
    Failure(Failure),
}

impl OperationResult {
    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::Failure(_))
    }

    /// `Ok` for any payload.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Failure(failure) => failure.code,
            _ => ErrorCode::Ok,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Failure(failure) => Some(failure),
            _ => None,
        }
    }

    /// The row of a point read.
    pub fn row(&self) -> Option<&Row> {
        match self {
            Self::Row(row) => row.as_ref(),
            _ => None,
        }
    }

    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            Self::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn query(&self) -> Option<&QueryResult> {
        match self {
            Self::Query(result) => Some(result),
            _ => None,
        }
    }
}

impl<T, E> From<Result<T, E>> for OperationResult
where
    T: Into<OperationResult>,
    E: Into<Failure>,
{
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(payload) => payload.into(),
            Err(e) => Self::Failure(e.into()),
        }
    }
}

impl From<Option<Row>> for OperationResult {
    fn from(row: Option<Row>) -> Self {
        Self::Row(row)
    }
}

impl From<Vec<Row>> for OperationResult {
    fn from(rows: Vec<Row>) -> Self {
        Self::Rows(rows)
    }
}

impl From<QueryResult> for OperationResult {
    fn from(result: QueryResult) -> Self {
        Self::Query(result)
    }
}
