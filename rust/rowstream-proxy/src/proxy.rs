use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use rowstream_client::{CallOptions, ClientConfig};
use rowstream_core::ErrorCode;
use rowstream_protocol::{ExecuteQueryRequest, ReadRowsRequest};

use crate::{Failure, FailureOrigin, OperationResult, ProxyConfig, SessionError, SessionManager};

/// What to run.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    ReadRow { table_name: String, row_key: Vec<u8> },
    ReadRows(ReadRowsRequest),
    ExecuteQuery(ExecuteQueryRequest),
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadRow { .. } => "ReadRow",
            Self::ReadRows(_) => "ReadRows",
            Self::ExecuteQuery(_) => "ExecuteQuery",
        }
    }
}

/// One operation addressed to a session.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    pub client_id: String,
    pub operation: Operation,
    /// Falls back to the session's default deadline.
    pub deadline: Option<Duration>,
}

impl OperationRequest {
    pub fn new(client_id: impl Into<String>, operation: Operation) -> Self {
        Self {
            client_id: client_id.into(),
            operation,
            deadline: None,
        }
    }

    pub fn read_row(
        client_id: impl Into<String>,
        table_name: impl Into<String>,
        row_key: impl AsRef<[u8]>,
    ) -> Self {
        Self::new(
            client_id,
            Operation::ReadRow {
                table_name: table_name.into(),
                row_key: row_key.as_ref().to_vec(),
            },
        )
    }

    pub fn read_rows(client_id: impl Into<String>, request: ReadRowsRequest) -> Self {
        Self::new(client_id, Operation::ReadRows(request))
    }

    pub fn execute_query(client_id: impl Into<String>, request: ExecuteQueryRequest) -> Self {
        Self::new(client_id, Operation::ExecuteQuery(request))
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Runs operations against named client sessions.
///
/// Cloning is cheap; clones share sessions.
#[derive(Debug, Clone)]
pub struct TestProxy {
    sessions: Arc<SessionManager>,
}

impl TestProxy {
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            sessions: Arc::new(SessionManager::new(config.default_client)),
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub async fn create_client(&self, id: &str, config: ClientConfig) -> Result<(), SessionError> {
        self.sessions.create(id, config).await
    }

    pub fn close_client(&self, id: &str) -> Result<(), SessionError> {
        self.sessions.close(id)
    }

    pub fn remove_client(&self, id: &str) -> bool {
        self.sessions.remove(id)
    }

    /// Run one operation to completion.
    pub async fn run(&self, request: OperationRequest) -> OperationResult {
        let OperationRequest {
            client_id,
            operation,
            deadline,
        } = request;
        let name = operation.name();

        let client = match self.sessions.resolve(&client_id).await {
            Ok(client) => client,
            Err(e) => {
                tracing::debug!(
                    client_id = %client_id,
                    operation = name,
                    error = %e,
                    "session rejected operation"
                );
                return OperationResult::Failure(e.into());
            }
        };

        let options = CallOptions { deadline };
        tracing::debug!(client_id = %client_id, operation = name, ?deadline, "running operation");
        let result: OperationResult = match operation {
            Operation::ReadRow {
                table_name,
                row_key,
            } => client.read_row(&table_name, row_key, options).await.into(),
            Operation::ReadRows(request) => client.read_rows(request, options).await.into(),
            Operation::ExecuteQuery(request) => client.execute_query(request, options).await.into(),
        };

        if let Some(failure) = result.failure() {
            tracing::debug!(
                client_id = %client_id,
                operation = name,
                code = %failure.code,
                origin = ?failure.origin,
                "operation failed"
            );
        }
        result
    }

    /// Run every request concurrently. Results are in request order.
    pub async fn run_all(&self, requests: Vec<OperationRequest>) -> Vec<OperationResult> {
        let tasks: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let proxy = self.clone();
                tokio::spawn(async move { proxy.run(request).await })
            })
            .collect();
        join_in_order(tasks).await
    }

    /// Like [`run_all`](Self::run_all), closing `client_id` after
    /// `close_after` while the batch is still in flight.
    pub async fn run_all_then_close(
        &self,
        client_id: &str,
        requests: Vec<OperationRequest>,
        close_after: Duration,
    ) -> Vec<OperationResult> {
        let tasks: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let proxy = self.clone();
                tokio::spawn(async move { proxy.run(request).await })
            })
            .collect();

        tokio::time::sleep(close_after).await;
        if let Err(e) = self.close_client(client_id) {
            tracing::warn!(client_id, error = %e, "close during batch failed");
        }
        join_in_order(tasks).await
    }
}

async fn join_in_order(
    tasks: Vec<tokio::task::JoinHandle<OperationResult>>,
) -> Vec<OperationResult> {
    join_all(tasks)
        .await
        .into_iter()
        .map(|joined| {
            joined.unwrap_or_else(|e| {
                tracing::error!(error = %e, "operation task failed");
                OperationResult::Failure(Failure {
                    code: ErrorCode::Internal,
                    message: e.to_string(),
                    origin: FailureOrigin::Harness,
                })
            })
        })
        .collect()
}
