//! Per-case server, proxy and session setup.

use rowstream_client::ClientConfig;
use rowstream_mock::{ChunkData, ChunkStatus, MockServer};
use rowstream_proxy::{OperationRequest, OperationResult, ProxyConfig, TestProxy};

pub const PROJECT_ID: &str = "project";
pub const INSTANCE_ID: &str = "instance";

/// `projects/project/instances/instance/tables/{table}`
pub fn table_name(table: &str) -> String {
    format!("projects/{PROJECT_ID}/instances/{INSTANCE_ID}/tables/{table}")
}

pub fn instance_name() -> String {
    format!("projects/{PROJECT_ID}/instances/{INSTANCE_ID}")
}

/// One cell in family `f`, column `col`, at timestamp 1000.
pub fn dummy_chunk(row_key: &str, value: &str, status: ChunkStatus) -> ChunkData {
    ChunkData::new()
        .row_key(row_key)
        .family("f")
        .qualifier("col")
        .timestamp(1000)
        .value(value)
        .status(status)
}

/// A listening mock server plus a proxy with one session created for the case.
pub struct Fixture {
    pub server: MockServer,
    pub proxy: TestProxy,
    pub client_id: String,
}

impl Fixture {
    pub async fn start(client_id: &str) -> Result<Self, String> {
        let server = MockServer::start()
            .await
            .map_err(|e| format!("mock server did not start: {e}"))?;
        let address = server
            .address()
            .ok_or_else(|| "mock server has no address".to_string())?;

        let config = ClientConfig {
            data_target: address.clone(),
            project_id: PROJECT_ID.into(),
            instance_id: INSTANCE_ID.into(),
            ..ClientConfig::default()
        };
        let proxy = TestProxy::new(ProxyConfig {
            default_client: config.clone(),
        });
        proxy
            .create_client(client_id, config)
            .await
            .map_err(|e| format!("client setup failed: {e}"))?;

        tracing::debug!(client_id, %address, "fixture ready");
        Ok(Self {
            server,
            proxy,
            client_id: client_id.to_string(),
        })
    }

    pub fn read_row(&self, row_key: &str) -> OperationRequest {
        OperationRequest::read_row(self.client_id.as_str(), table_name("table"), row_key)
    }

    pub async fn run(&self, request: OperationRequest) -> OperationResult {
        self.proxy.run(request).await
    }

    /// Fail if the server saw scripting errors, then tear everything down.
    pub fn finish(self) -> Result<(), String> {
        let errors = self.server.script_errors();
        self.proxy.remove_client(&self.client_id);
        self.server.shutdown();
        match errors.first() {
            None => Ok(()),
            Some(first) => Err(format!(
                "{} scripting error(s) on the mock server, first: {first}",
                errors.len()
            )),
        }
    }
}
