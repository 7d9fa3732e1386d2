use std::time::{Duration, Instant};

use rowstream_core::protocol::{
    CallRequest, ExecuteQueryRequest, ExecuteQueryResponse, ReadRowsRequest, ReadRowsResponse,
    RowSet, Status, Value, ValueType, error_code, method,
};
use rowstream_core::{AnyTransport, Connection, ErrorCode, RpcError, TransportError, decode, encode};
use rowstream_mock::{
    ChunkData, ExecuteQueryAction, MockServer, QueryFragment, ReadRowsAction, Recorder,
    ScriptError, column, handler, scripted_execute_query, scripted_read_rows,
};

fn read_rows_call(key: &str) -> CallRequest {
    let request = ReadRowsRequest {
        table_name: "projects/p/instances/i/tables/t".into(),
        rows: RowSet {
            row_keys: vec![key.as_bytes().to_vec()],
            row_ranges: Vec::new(),
        },
        rows_limit: 1,
        ..Default::default()
    };
    CallRequest {
        metadata: vec![("user-agent".into(), "mock-tests".into())],
        body: encode(&request).unwrap(),
    }
}

fn query_call() -> CallRequest {
    let request = ExecuteQueryRequest {
        instance_name: "projects/p/instances/i".into(),
        query: "SELECT * FROM table".into(),
        ..Default::default()
    };
    CallRequest {
        metadata: Vec::new(),
        body: encode(&request).unwrap(),
    }
}

fn connected(server: &MockServer) -> Connection {
    let (client, server_side) = AnyTransport::mem_pair();
    server.serve_transport(server_side);
    Connection::new(client)
}

async fn collect_rows(
    connection: &Connection,
    call: &CallRequest,
) -> Result<Vec<ReadRowsResponse>, RpcError> {
    let mut stream = connection.open_stream(method::READ_ROWS, call, None).await?;
    let mut out = Vec::new();
    while let Some(bytes) = stream.message().await? {
        out.push(decode::<ReadRowsResponse>(&bytes)?);
    }
    Ok(out)
}

async fn collect_query(
    connection: &Connection,
    call: &CallRequest,
) -> Result<Vec<ExecuteQueryResponse>, RpcError> {
    let mut stream = connection.open_stream(method::EXECUTE_QUERY, call, None).await?;
    let mut out = Vec::new();
    while let Some(bytes) = stream.message().await? {
        out.push(decode::<ExecuteQueryResponse>(&bytes)?);
    }
    Ok(out)
}

fn dummy_chunk(key: &str, value: &str) -> ChunkData {
    ChunkData::new()
        .row_key(key)
        .family("f")
        .qualifier("col")
        .timestamp(1000)
        .value(value)
        .commit()
}

#[tokio::test]
async fn read_rows_plays_and_records() {
    let server = MockServer::new();
    let recorder = Recorder::new(1);
    server.set_read_rows(scripted_read_rows(
        recorder.clone(),
        vec![ReadRowsAction::new(vec![dummy_chunk("row-01", "v1")])],
    ));
    let connection = connected(&server);

    let messages = collect_rows(&connection, &read_rows_call("row-01")).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].chunks[0].row_key, b"row-01");
    assert_eq!(messages[0].chunks[0].value, b"v1");

    let record = recorder.try_recv().expect("request was recorded");
    assert_eq!(record.request.rows.row_keys, vec![b"row-01".to_vec()]);
    assert_eq!(record.request.rows_limit, 1);
    assert_eq!(record.header("user-agent"), Some("mock-tests"));
    assert!(record.deadline.is_none());
    assert!(server.script_errors().is_empty());
}

#[tokio::test]
async fn no_handler_means_empty_ok_response() {
    let server = MockServer::new();
    let connection = connected(&server);

    assert!(collect_rows(&connection, &read_rows_call("x")).await.unwrap().is_empty());
    assert!(collect_query(&connection, &query_call()).await.unwrap().is_empty());
}

#[tokio::test]
async fn exhausted_actions_are_internal_errors() {
    let server = MockServer::new();
    let recorder = Recorder::new(4);
    server.set_read_rows(scripted_read_rows(
        recorder.clone(),
        vec![
            ReadRowsAction::new(vec![dummy_chunk("a", "1")]),
            ReadRowsAction::new(vec![dummy_chunk("b", "2")]),
        ],
    ));
    let connection = connected(&server);

    for key in ["a", "b"] {
        let messages = collect_rows(&connection, &read_rows_call(key)).await.unwrap();
        assert_eq!(messages[0].chunks[0].row_key, key.as_bytes());
    }
    match collect_rows(&connection, &read_rows_call("c")).await {
        Err(RpcError::Status { code, .. }) => assert_eq!(code, ErrorCode::Internal),
        other => panic!("expected INTERNAL, got {other:?}"),
    }

    let errors = server.script_errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        errors[0],
        ScriptError::ActionsExhausted { call: 2, registered: 2, .. }
    ));
    assert_eq!(recorder.len(), 3);
}

#[tokio::test]
async fn actions_follow_the_requested_row_key() {
    let server = MockServer::new();
    server.set_read_rows(scripted_read_rows(
        Recorder::new(4),
        vec![
            ReadRowsAction::new(vec![dummy_chunk("op0-row", "0")]),
            ReadRowsAction::new(vec![dummy_chunk("op1-row", "1")]),
            ReadRowsAction::new(vec![dummy_chunk("op2-row", "2")]),
        ],
    ));
    let connection = connected(&server);

    for key in ["op2-row", "op0-row", "op1-row"] {
        let messages = collect_rows(&connection, &read_rows_call(key)).await.unwrap();
        assert_eq!(messages[0].chunks[0].row_key, key.as_bytes());
    }
    assert!(server.script_errors().is_empty());
}

#[tokio::test]
async fn unmatched_key_takes_the_next_unplayed_action() {
    let server = MockServer::new();
    server.set_read_rows(scripted_read_rows(
        Recorder::new(4),
        vec![
            ReadRowsAction::new(vec![dummy_chunk("a", "1")]),
            ReadRowsAction::new(vec![dummy_chunk("b", "2")]),
        ],
    ));
    let connection = connected(&server);

    let first = collect_rows(&connection, &read_rows_call("b")).await.unwrap();
    assert_eq!(first[0].chunks[0].row_key, b"b");
    let second = collect_rows(&connection, &read_rows_call("zzz")).await.unwrap();
    assert_eq!(second[0].chunks[0].row_key, b"a");
}

#[tokio::test]
async fn delay_and_status_are_applied() {
    let server = MockServer::new();
    server.set_read_rows(scripted_read_rows(
        Recorder::new(1),
        vec![ReadRowsAction::new(vec![dummy_chunk("row-01", "v1")])
            .with_delay(Duration::from_millis(150))
            .with_status(Status::error(error_code::UNAVAILABLE, "go away"))],
    ));
    let connection = connected(&server);

    let started = Instant::now();
    let mut stream = connection
        .open_stream(method::READ_ROWS, &read_rows_call("row-01"), None)
        .await
        .unwrap();
    assert!(stream.message().await.unwrap().is_some());
    assert!(started.elapsed() >= Duration::from_millis(150));
    match stream.message().await {
        Err(RpcError::Status { code, message }) => {
            assert_eq!(code, ErrorCode::Unavailable);
            assert_eq!(message, "go away");
        }
        other => panic!("expected UNAVAILABLE, got {other:?}"),
    }
}

#[tokio::test]
async fn query_actions_stream_until_end_of_stream() {
    let server = MockServer::new();
    let recorder = Recorder::new(2);
    server.set_execute_query(scripted_execute_query(
        recorder.clone(),
        vec![
            ExecuteQueryAction::new(vec![QueryFragment::metadata(vec![column(
                "test",
                ValueType::String,
            )])]),
            ExecuteQueryAction::new(vec![QueryFragment::results(
                "token",
                vec![Value::String("foo".into())],
            )])
            .end_of_stream(),
            ExecuteQueryAction::new(vec![QueryFragment::metadata(Vec::new())]).end_of_stream(),
        ],
    ));
    let connection = connected(&server);

    let first = collect_query(&connection, &query_call()).await.unwrap();
    assert_eq!(first.len(), 2);
    assert!(matches!(first[0], ExecuteQueryResponse::Metadata(_)));
    assert!(matches!(first[1], ExecuteQueryResponse::Results(_)));

    let second = collect_query(&connection, &query_call()).await.unwrap();
    assert_eq!(second.len(), 1);

    let record = recorder.try_recv().unwrap();
    assert_eq!(record.request.query, "SELECT * FROM table");
    assert_eq!(record.request.instance_name, "projects/p/instances/i");
}

#[tokio::test]
async fn custom_handler_sees_headers() {
    let server = MockServer::new();
    let seen = Recorder::<ReadRowsRequest>::new(1);
    let sink = seen.clone();
    server.set_read_rows(handler(move |record, _responses| {
        let sink = sink.clone();
        async move {
            sink.push(record);
            Ok(Status::ok())
        }
    }));
    let connection = connected(&server);

    collect_rows(&connection, &read_rows_call("row-01")).await.unwrap();
    let record = seen.recv().await;
    assert_eq!(record.header("user-agent"), Some("mock-tests"));
}

#[tokio::test]
async fn serves_tcp_connections() {
    let server = MockServer::start().await.unwrap();
    server.set_read_rows(scripted_read_rows(
        Recorder::new(1),
        vec![ReadRowsAction::new(vec![dummy_chunk("row-01", "v1"), dummy_chunk("row-02", "v2")])
            .with_chunks_per_message(2)],
    ));

    let address = server.address().unwrap();
    let transport = AnyTransport::connect_tcp(address.as_str()).await.unwrap();
    let connection = Connection::new(transport);

    let messages = collect_rows(&connection, &read_rows_call("row-01")).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].chunks.len(), 2);
}

#[tokio::test]
async fn shutdown_closes_live_connections() {
    let server = MockServer::new();
    server.set_read_rows(scripted_read_rows(
        Recorder::new(1),
        vec![ReadRowsAction::new(vec![dummy_chunk("row-01", "v1")])
            .with_delay(Duration::from_secs(5))],
    ));
    let connection = connected(&server);
    let mut stream = connection
        .open_stream(method::READ_ROWS, &read_rows_call("row-01"), None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    server.shutdown();

    let result = tokio::time::timeout(Duration::from_secs(1), stream.message())
        .await
        .expect("stream should end promptly");
    assert!(matches!(result, Err(RpcError::Transport(TransportError::Closed))));
}
