use std::time::{Duration, Instant};

use rowstream_client::ClientConfig;
use rowstream_core::ErrorCode;
use rowstream_core::protocol::{ExecuteQueryRequest, ReadRowsRequest};
use rowstream_mock::{ChunkData, MockServer, ReadRowsAction, Recorder, scripted_read_rows};
use rowstream_proxy::{
    FailureOrigin, OperationRequest, OperationResult, ProxyConfig, SessionError, TestProxy,
};

const TABLE: &str = "projects/project/instances/instance/tables/table";

fn cell(key: &str, value: &str) -> ChunkData {
    ChunkData::new()
        .row_key(key)
        .family("f")
        .qualifier("col")
        .timestamp(1000)
        .value(value)
        .commit()
}

async fn server_with(actions: Vec<ReadRowsAction>, recorder: Recorder<ReadRowsRequest>) -> MockServer {
    let server = MockServer::start().await.unwrap();
    server.set_read_rows(scripted_read_rows(recorder, actions));
    server
}

fn proxy_for(server: &MockServer) -> TestProxy {
    TestProxy::new(ProxyConfig::with_target(server.address().unwrap()))
}

#[tokio::test]
async fn sessions_are_created_on_first_use() {
    let server = server_with(vec![ReadRowsAction::new(vec![cell("row-01", "v")])], Recorder::new(4)).await;
    let proxy = proxy_for(&server);

    let result = proxy.run(OperationRequest::read_row("c1", TABLE, "row-01")).await;
    assert!(result.is_ok(), "{result:?}");
    assert_eq!(result.row().unwrap().key, b"row-01");
    assert_eq!(proxy.sessions().len(), 1);
}

#[tokio::test]
async fn explicit_create_rejects_live_ids() {
    let server = MockServer::start().await.unwrap();
    let proxy = proxy_for(&server);
    let config = ClientConfig::with_target(server.address().unwrap());

    proxy.create_client("c1", config.clone()).await.unwrap();
    assert!(matches!(
        proxy.create_client("c1", config.clone()).await,
        Err(SessionError::AlreadyExists { .. })
    ));

    proxy.close_client("c1").unwrap();
    assert!(matches!(
        proxy.create_client("c1", config.clone()).await,
        Err(SessionError::Closed { .. })
    ));

    assert!(proxy.remove_client("c1"));
    proxy.create_client("c1", config).await.unwrap();
}

#[tokio::test]
async fn closed_session_rejects_new_work() {
    let server = server_with(vec![ReadRowsAction::new(vec![cell("row-01", "v")])], Recorder::new(4)).await;
    let proxy = proxy_for(&server);
    proxy.run(OperationRequest::read_row("c1", TABLE, "row-01")).await;
    proxy.close_client("c1").unwrap();

    let result = proxy.run(OperationRequest::read_row("c1", TABLE, "row-01")).await;
    let failure = result.failure().expect("closed session fails");
    assert_eq!(failure.code, ErrorCode::Unavailable);
    assert_eq!(failure.origin, FailureOrigin::Session);
    assert!(proxy.sessions().is_closed("c1"));
}

#[tokio::test]
async fn close_lets_admitted_operations_finish() {
    let recorder = Recorder::new(8);
    let actions = (0..4)
        .map(|i| {
            ReadRowsAction::new(vec![cell(&format!("op{i}-row"), &format!("value{i}"))])
                .with_delay(Duration::from_millis(600))
        })
        .collect();
    let server = server_with(actions, recorder.clone()).await;
    let proxy = proxy_for(&server);
    proxy
        .create_client("c1", ClientConfig::with_target(server.address().unwrap()))
        .await
        .unwrap();

    let first = (0..2)
        .map(|i| OperationRequest::read_row("c1", TABLE, format!("op{i}-row")))
        .collect();
    let second = (2..4)
        .map(|i| OperationRequest::read_row("c1", TABLE, format!("op{i}-row")))
        .collect();

    let admitted = proxy
        .run_all_then_close("c1", first, Duration::from_millis(200))
        .await;
    let rejected = proxy.run_all(second).await;

    assert!(admitted.iter().all(OperationResult::is_ok), "{admitted:?}");
    for (i, result) in admitted.iter().enumerate() {
        let row = result.row().expect("admitted read returns its row");
        assert_eq!(row.key, format!("op{i}-row").into_bytes());
    }
    assert!(rejected.iter().all(|r| r.code() == ErrorCode::Unavailable));
    assert_eq!(recorder.len(), 2);
}

#[tokio::test]
async fn deadline_maps_to_deadline_exceeded() {
    let server = server_with(
        vec![ReadRowsAction::new(vec![cell("row-01", "v")]).with_delay(Duration::from_secs(2))],
        Recorder::new(1),
    )
    .await;
    let proxy = proxy_for(&server);

    let started = Instant::now();
    let result = proxy
        .run(OperationRequest::read_row("c1", TABLE, "row-01").with_deadline(Duration::from_millis(200)))
        .await;
    assert_eq!(result.code(), ErrorCode::DeadlineExceeded);
    assert_eq!(result.failure().unwrap().origin, FailureOrigin::Backend);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn unbounded_deadline_is_sent_as_none() {
    let recorder = Recorder::new(1);
    let server = server_with(vec![ReadRowsAction::new(vec![cell("row-01", "v")])], recorder.clone()).await;
    let proxy = proxy_for(&server);

    let result = proxy
        .run(OperationRequest::read_row("c1", TABLE, "row-01").with_deadline(Duration::MAX))
        .await;
    assert!(result.is_ok(), "{result:?}");
    let record = recorder.try_recv().expect("request recorded");
    assert_eq!(record.deadline, None);
}

#[tokio::test]
async fn protocol_violations_are_tagged() {
    let server = server_with(
        vec![ReadRowsAction::new(vec![
            ChunkData::new().row_key("a").family("f").qualifier("q").value("1"),
        ])],
        Recorder::new(1),
    )
    .await;
    let proxy = proxy_for(&server);

    let result = proxy
        .run(OperationRequest::read_rows("c1", ReadRowsRequest::default()))
        .await;
    let failure = result.failure().unwrap();
    assert_eq!(failure.origin, FailureOrigin::Protocol);
    assert_eq!(failure.code, ErrorCode::Internal);
}

#[tokio::test]
async fn query_without_handler_is_empty() {
    let server = MockServer::start().await.unwrap();
    let proxy = proxy_for(&server);
    let result = proxy
        .run(OperationRequest::execute_query("c1", ExecuteQueryRequest::default()))
        .await;
    let query = result.query().expect("query payload");
    assert!(query.rows.is_empty());
}

#[tokio::test]
async fn unreachable_server_is_a_session_failure() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let proxy = TestProxy::new(ProxyConfig::with_target(addr.to_string()));
    let result = proxy.run(OperationRequest::read_row("c1", TABLE, "row-01")).await;
    assert_eq!(result.failure().unwrap().origin, FailureOrigin::Session);
    assert!(proxy.sessions().is_empty());
}
