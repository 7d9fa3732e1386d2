//! The scripted server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::{Instant, SystemTime};

use parking_lot::{Mutex, RwLock};
use rowstream_core::{AnyTransport, Frame, Responder, TransportError, deadline_from_ns, decode};
use rowstream_protocol::{
    CallRequest, ExecuteQueryRequest, ReadRowsRequest, Status, error_code, method,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::{
    ExecuteQueryHandler, Handler, ReadRowsHandler, RequestRecord, ResponseSink, ScriptError,
};

/// Where the server listens.
#[derive(Debug, Clone)]
pub struct MockServerConfig {
    pub bind_addr: SocketAddr,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        }
    }
}

#[derive(Default)]
struct Handlers {
    read_rows: Option<ReadRowsHandler>,
    execute_query: Option<ExecuteQueryHandler>,
}

struct ServerInner {
    handlers: RwLock<Handlers>,
    script_errors: Mutex<Vec<ScriptError>>,
    connections: Mutex<Vec<AnyTransport>>,
    shutdown: watch::Sender<bool>,
}

/// A per-test scripted server.
///
/// Each accepted connection is served independently and every inbound stream
/// runs in its own task. Handlers may be installed or replaced at any time;
/// a call uses the handler installed when it arrives.
pub struct MockServer {
    inner: Arc<ServerInner>,
    local_addr: Option<SocketAddr>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for MockServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockServer")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockServer {
    /// A server without a listener; feed it transports with
    /// [`serve_transport`](Self::serve_transport).
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ServerInner {
                handlers: RwLock::new(Handlers::default()),
                script_errors: Mutex::new(Vec::new()),
                connections: Mutex::new(Vec::new()),
                shutdown: watch::Sender::new(false),
            }),
            local_addr: None,
            accept_task: Mutex::new(None),
        }
    }

    /// Listen on `127.0.0.1` with an ephemeral port.
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with(MockServerConfig::default()).await
    }

    pub async fn start_with(config: MockServerConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let mut server = Self::new();
        server.local_addr = Some(local_addr);

        let inner = server.inner.clone();
        let task = tokio::spawn(async move { inner.accept_loop(listener).await });
        *server.accept_task.lock() = Some(task);

        tracing::debug!(%local_addr, "mock server listening");
        Ok(server)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// `host:port` to hand to a client, if listening.
    pub fn address(&self) -> Option<String> {
        self.local_addr.map(|addr| addr.to_string())
    }

    /// Serve one already-connected transport until it closes or the server
    /// shuts down.
    pub fn serve_transport(&self, transport: AnyTransport) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.serve_connection(transport).await })
    }

    pub fn set_read_rows(&self, handler: ReadRowsHandler) {
        self.inner.handlers.write().read_rows = Some(handler);
    }

    pub fn set_execute_query(&self, handler: ExecuteQueryHandler) {
        self.inner.handlers.write().execute_query = Some(handler);
    }

    /// Remove every installed handler.
    pub fn clear_handlers(&self) {
        *self.inner.handlers.write() = Handlers::default();
    }

    /// Scripting failures seen so far. A passing test expects none.
    pub fn script_errors(&self) -> Vec<ScriptError> {
        self.inner.script_errors.lock().clone()
    }

    /// Stop accepting and close live connections. Streams already being
    /// played keep running until their writes fail.
    pub fn shutdown(&self) {
        if self.inner.shutdown.send_replace(true) {
            return;
        }
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }
        for transport in self.inner.connections.lock().drain(..) {
            transport.close();
        }
        tracing::debug!(local_addr = ?self.local_addr, "mock server shut down");
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl ServerInner {
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown.wait_for(|stop| *stop) => return,
            };
            match accepted {
                Ok((socket, peer)) => {
                    if let Err(e) = socket.set_nodelay(true) {
                        tracing::debug!(%peer, error = %e, "set_nodelay failed");
                    }
                    tracing::debug!(%peer, "mock server: accepted connection");
                    let inner = self.clone();
                    tokio::spawn(async move {
                        inner.serve_connection(AnyTransport::stream(socket)).await
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "mock server: accept failed");
                }
            }
        }
    }

    async fn serve_connection(self: Arc<Self>, transport: AnyTransport) {
        if *self.shutdown.borrow() {
            transport.close();
            return;
        }
        self.connections.lock().push(transport.clone());
        let msg_ids = Arc::new(AtomicU64::new(1));

        loop {
            let frame = match transport.recv_frame().await {
                Ok(frame) => frame,
                Err(TransportError::Closed) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "mock server: transport error");
                    break;
                }
            };
            if frame.is_response() || !frame.is_eos() {
                tracing::warn!(
                    channel_id = frame.channel_id(),
                    flags = ?frame.flags(),
                    "mock server: ignoring frame that is not a request"
                );
                continue;
            }

            let responder = Arc::new(Responder::new(
                transport.clone(),
                &frame.desc,
                msg_ids.clone(),
            ));
            let inner = self.clone();
            tokio::spawn(async move { inner.dispatch(frame, responder).await });
        }

        transport.close();
        self.connections.lock().retain(|live| !live.is_closed());
        tracing::debug!("mock server: connection closed");
    }

    async fn dispatch(self: Arc<Self>, frame: Frame, responder: Arc<Responder>) {
        let received_at = Instant::now();
        let received_wall = SystemTime::now();
        let method_id = frame.desc.method_id;
        let deadline = deadline_from_ns(frame.desc.deadline_ns);

        let call: CallRequest = match decode(frame.payload_bytes()) {
            Ok(call) => call,
            Err(e) => {
                self.reject(&responder, error_code::INVALID_ARGUMENT, e.to_string())
                    .await;
                return;
            }
        };

        tracing::debug!(
            channel_id = frame.desc.channel_id,
            method = method::name(method_id),
            headers = call.metadata.len(),
            has_deadline = deadline.is_some(),
            "mock server: call received"
        );

        let status = match method_id {
            method::READ_ROWS => {
                let request: ReadRowsRequest = match decode(&call.body) {
                    Ok(request) => request,
                    Err(e) => {
                        self.reject(&responder, error_code::INVALID_ARGUMENT, e.to_string())
                            .await;
                        return;
                    }
                };
                let record = RequestRecord {
                    request,
                    metadata: call.metadata,
                    deadline,
                    received_at,
                    received_wall,
                };
                let installed = self.handlers.read().read_rows.clone();
                self.run_handler(installed, record, &responder).await
            }
            method::EXECUTE_QUERY => {
                let request: ExecuteQueryRequest = match decode(&call.body) {
                    Ok(request) => request,
                    Err(e) => {
                        self.reject(&responder, error_code::INVALID_ARGUMENT, e.to_string())
                            .await;
                        return;
                    }
                };
                let record = RequestRecord {
                    request,
                    metadata: call.metadata,
                    deadline,
                    received_at,
                    received_wall,
                };
                let installed = self.handlers.read().execute_query.clone();
                self.run_handler(installed, record, &responder).await
            }
            other => Status::error(
                error_code::UNIMPLEMENTED,
                format!("unknown method id {other:#010x}"),
            ),
        };

        if let Err(e) = responder.finish(status).await {
            tracing::debug!(
                channel_id = responder.channel_id(),
                error = %e,
                "mock server: could not send terminal status"
            );
        }
    }

    async fn run_handler<Req, Resp>(
        &self,
        installed: Option<Handler<Req, Resp>>,
        record: RequestRecord<Req>,
        responder: &Arc<Responder>,
    ) -> Status
    where
        Resp: facet::Facet<'static>,
    {
        // No handler: empty response, OK status.
        let Some(handler) = installed else {
            return Status::ok();
        };

        match handler(record, ResponseSink::new(responder.clone())).await {
            Ok(status) => status,
            Err(e @ ScriptError::Disconnected { .. }) => {
                tracing::debug!(error = %e, "mock server: playback abandoned");
                Status::error(error_code::CANCELLED, e.to_string())
            }
            Err(e) => {
                tracing::error!(error = %e, "mock server: scripting error");
                let status = Status::error(error_code::INTERNAL, e.to_string());
                self.script_errors.lock().push(e);
                status
            }
        }
    }

    async fn reject(&self, responder: &Responder, code: u32, message: String) {
        tracing::warn!(
            channel_id = responder.channel_id(),
            code,
            %message,
            "mock server: rejecting call"
        );
        if let Err(e) = responder.finish(Status::error(code, message)).await {
            tracing::debug!(error = %e, "mock server: could not send rejection");
        }
    }
}
