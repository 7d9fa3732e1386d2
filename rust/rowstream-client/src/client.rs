use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use rowstream_core::{
    AnyTransport, Connection, ResponseStream, RpcError, call_timeout, decode, encode,
};
use rowstream_protocol::{
    CallRequest, ExecuteQueryRequest, ExecuteQueryResponse, ReadRowsRequest, ReadRowsResponse,
    Row, RowSet, method,
};

use crate::headers::call_metadata;
use crate::{CallOptions, ClientConfig, ClientError, QueryAssembler, QueryResult, RowMerger};

struct ClientInner {
    config: ClientConfig,
    connection: Connection,
}

/// Handle to one connection. Clones share the connection, which closes when
/// the last clone is dropped.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("data_target", &self.inner.config.data_target)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Client {
    /// Connect over TCP to `config.data_target`.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let transport = AnyTransport::connect_tcp(config.data_target.as_str())
            .await
            .map_err(|source| ClientError::Connect {
                target: config.data_target.clone(),
                source,
            })?;
        tracing::debug!(target = %config.data_target, "client connected");
        Ok(Self::with_transport(config, transport))
    }

    /// Use an already-connected transport.
    pub fn with_transport(config: ClientConfig, transport: AnyTransport) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                connection: Connection::new(transport),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.connection.is_closed()
    }

    /// Point read of `row_key`. `Ok(None)` when the row does not exist.
    pub async fn read_row(
        &self,
        table_name: &str,
        row_key: impl Into<Vec<u8>>,
        options: CallOptions,
    ) -> Result<Option<Row>, ClientError> {
        let request = ReadRowsRequest {
            table_name: table_name.to_string(),
            rows: RowSet {
                row_keys: vec![row_key.into()],
                row_ranges: Vec::new(),
            },
            rows_limit: 1,
            ..Default::default()
        };
        let rows = self.read_rows(request, options).await?;
        Ok(rows.into_iter().next())
    }

    /// Every row the server commits, in key order. Stops after `rows_limit`
    /// rows when it is positive.
    pub async fn read_rows(
        &self,
        mut request: ReadRowsRequest,
        options: CallOptions,
    ) -> Result<Vec<Row>, ClientError> {
        if request.app_profile_id.is_empty() {
            request.app_profile_id = self.inner.config.app_profile_id.clone();
        }
        let metadata = call_metadata("table_name", &request.table_name, &request.app_profile_id);
        let limit = usize::try_from(request.rows_limit).unwrap_or(0);

        self.bounded(options, |deadline| async move {
            let mut stream = self.open(method::READ_ROWS, metadata, &request, deadline).await?;
            let mut merger = RowMerger::new();
            let mut rows = Vec::new();

            while let Some(bytes) = stream.message().await? {
                let response: ReadRowsResponse = decode(&bytes).map_err(RpcError::from)?;
                for chunk in response.chunks {
                    if let Some(row) = merger.push(chunk)? {
                        tracing::trace!(key = ?row.key, "row committed");
                        rows.push(row);
                    }
                }
                if limit > 0 && rows.len() >= limit && !merger.has_open_row() {
                    rows.truncate(limit);
                    return Ok(rows);
                }
            }
            merger.finish()?;
            Ok(rows)
        })
        .await
    }

    pub async fn execute_query(
        &self,
        mut request: ExecuteQueryRequest,
        options: CallOptions,
    ) -> Result<QueryResult, ClientError> {
        if request.app_profile_id.is_empty() {
            request.app_profile_id = self.inner.config.app_profile_id.clone();
        }
        if request.instance_name.is_empty() {
            request.instance_name = self.inner.config.instance_name();
        }
        let metadata = call_metadata("name", &request.instance_name, &request.app_profile_id);

        self.bounded(options, |deadline| async move {
            let mut stream = self
                .open(method::EXECUTE_QUERY, metadata, &request, deadline)
                .await?;
            let mut assembler = QueryAssembler::new();
            while let Some(bytes) = stream.message().await? {
                let response: ExecuteQueryResponse =
                    decode(&bytes).map_err(RpcError::from)?;
                assembler.push(response)?;
            }
            Ok(assembler.finish()?)
        })
        .await
    }

    fn timeout(&self, options: CallOptions) -> Duration {
        options
            .deadline
            .or(self.inner.config.default_deadline)
            .unwrap_or_else(call_timeout)
    }

    /// Run `call` under the resolved deadline, which is also handed to the
    /// call for propagation. A deadline past what `SystemTime` can represent
    /// is propagated as none.
    async fn bounded<T, F, Fut>(&self, options: CallOptions, call: F) -> Result<T, ClientError>
    where
        F: FnOnce(Option<SystemTime>) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let timeout = self.timeout(options);
        let deadline = SystemTime::now().checked_add(timeout);
        match tokio::time::timeout(timeout, call(deadline)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(?timeout, "call deadline exceeded");
                Err(ClientError::DeadlineExceeded { timeout })
            }
        }
    }

    async fn open<Req: facet::Facet<'static>>(
        &self,
        method_id: u32,
        metadata: Vec<(String, String)>,
        request: &Req,
        deadline: Option<SystemTime>,
    ) -> Result<ResponseStream, ClientError> {
        let body = encode(request).map_err(RpcError::from)?;
        let call = CallRequest { metadata, body };
        Ok(self
            .inner
            .connection
            .open_stream(method_id, &call, deadline)
            .await?)
    }
}
