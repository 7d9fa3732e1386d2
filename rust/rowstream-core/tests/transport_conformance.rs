use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::{Duration, SystemTime};

use rowstream_core::protocol::{CallRequest, Status, error_code, method};
use rowstream_core::{
    AnyTransport, Connection, ErrorCode, Responder, RpcError, TransportError, decode,
    deadline_from_ns,
};

/// Answers every call by echoing its body back `repeat` times, then ending
/// with `status`.
async fn spawn_echo_server(
    server_transport: AnyTransport,
    expected_calls: usize,
    repeat: usize,
    status: Status,
) -> tokio::task::JoinHandle<Vec<Option<SystemTime>>> {
    tokio::spawn(async move {
        let msg_ids = Arc::new(AtomicU64::new(1));
        let mut deadlines = Vec::new();
        for _ in 0..expected_calls {
            let request = server_transport
                .recv_frame()
                .await
                .expect("server recv_frame failed");
            deadlines.push(deadline_from_ns(request.desc.deadline_ns));
            let call: CallRequest = decode(request.payload_bytes()).expect("bad call payload");

            let responder = Responder::new(server_transport.clone(), &request.desc, msg_ids.clone());
            for _ in 0..repeat {
                responder.send(&call.body).await.expect("send failed");
            }
            responder.finish(status.clone()).await.expect("finish failed");
        }
        deadlines
    })
}

fn call(body: &[u8]) -> CallRequest {
    CallRequest {
        metadata: vec![("user-agent".into(), "transport-conformance".into())],
        body: body.to_vec(),
    }
}

async fn collect(stream: &mut rowstream_core::ResponseStream) -> Result<Vec<Vec<u8>>, RpcError> {
    let mut out = Vec::new();
    while let Some(bytes) = stream.message().await? {
        out.push(decode::<Vec<u8>>(&bytes)?);
    }
    Ok(out)
}

async fn run_stream_round_trip(make_pair: impl FnOnce() -> (AnyTransport, AnyTransport)) {
    let (client_transport, server_transport) = make_pair();
    let server_task = spawn_echo_server(server_transport, 1, 3, Status::ok()).await;

    let connection = Connection::new(client_transport);
    let mut stream = connection
        .open_stream(method::READ_ROWS, &call(b"hello"), None)
        .await
        .expect("open_stream failed");

    let messages = collect(&mut stream).await.expect("stream failed");
    assert_eq!(messages, vec![b"hello".to_vec(); 3]);
    assert_eq!(stream.message().await.expect("after end"), None);
    assert_eq!(connection.open_streams(), 0);

    let deadlines = server_task.await.expect("server task join failed");
    assert_eq!(deadlines, vec![None]);
}

async fn run_error_status(make_pair: impl FnOnce() -> (AnyTransport, AnyTransport)) {
    let (client_transport, server_transport) = make_pair();
    let server_task = spawn_echo_server(
        server_transport,
        1,
        1,
        Status::error(error_code::INVALID_ARGUMENT, "test error message"),
    )
    .await;

    let connection = Connection::new(client_transport);
    let mut stream = connection
        .open_stream(method::EXECUTE_QUERY, &call(b"x"), None)
        .await
        .expect("open_stream failed");

    assert!(stream.message().await.expect("first message").is_some());
    match stream.message().await {
        Err(RpcError::Status { code, message }) => {
            assert_eq!(code, ErrorCode::InvalidArgument);
            assert_eq!(message, "test error message");
        }
        other => panic!("expected Status error, got {other:?}"),
    }

    server_task.await.expect("server task join failed");
}

async fn run_deadline_propagation(make_pair: impl FnOnce() -> (AnyTransport, AnyTransport)) {
    let (client_transport, server_transport) = make_pair();
    let server_task = spawn_echo_server(server_transport, 1, 0, Status::ok()).await;

    let connection = Connection::new(client_transport);
    let deadline = SystemTime::now() + Duration::from_secs(2);
    let mut stream = connection
        .open_stream(method::READ_ROWS, &call(b""), Some(deadline))
        .await
        .expect("open_stream failed");
    assert_eq!(stream.message().await.expect("stream failed"), None);

    let deadlines = server_task.await.expect("server task join failed");
    assert_eq!(deadlines, vec![Some(deadline)]);
}

async fn run_interleaved_streams(make_pair: impl FnOnce() -> (AnyTransport, AnyTransport)) {
    let (client_transport, server_transport) = make_pair();
    let connection = Arc::new(Connection::new(client_transport));

    let mut streams = Vec::new();
    for i in 0..4u8 {
        let stream = connection
            .open_stream(method::READ_ROWS, &call(&[i]), None)
            .await
            .expect("open_stream failed");
        streams.push(stream);
    }
    assert_eq!(connection.open_streams(), 4);

    // Answer in reverse order of arrival.
    let msg_ids = Arc::new(AtomicU64::new(1));
    let mut requests = Vec::new();
    for _ in 0..4 {
        requests.push(server_transport.recv_frame().await.expect("recv failed"));
    }
    for request in requests.iter().rev() {
        let body = decode::<CallRequest>(request.payload_bytes()).expect("decode").body;
        let responder = Responder::new(server_transport.clone(), &request.desc, msg_ids.clone());
        responder.send(&body).await.expect("send failed");
        responder.finish(Status::ok()).await.expect("finish failed");
    }

    for (i, stream) in streams.iter_mut().enumerate() {
        let messages = collect(stream).await.expect("stream failed");
        assert_eq!(messages, vec![vec![i as u8]]);
    }
}

async fn run_abandoned_stream(make_pair: impl FnOnce() -> (AnyTransport, AnyTransport)) {
    let (client_transport, server_transport) = make_pair();
    let server_task = spawn_echo_server(server_transport, 2, 2, Status::ok()).await;
    let connection = Connection::new(client_transport);

    let abandoned = connection
        .open_stream(method::READ_ROWS, &call(b"first"), None)
        .await
        .expect("open_stream failed");
    drop(abandoned);
    assert_eq!(connection.open_streams(), 0);

    let mut stream = connection
        .open_stream(method::READ_ROWS, &call(b"second"), None)
        .await
        .expect("open_stream failed");
    let messages = collect(&mut stream).await.expect("stream failed");
    assert_eq!(messages, vec![b"second".to_vec(); 2]);

    server_task.await.expect("server task join failed");
}

async fn run_close_ends_open_streams(make_pair: impl FnOnce() -> (AnyTransport, AnyTransport)) {
    let (client_transport, _server_transport) = make_pair();
    let connection = Connection::new(client_transport);

    let mut stream = connection
        .open_stream(method::READ_ROWS, &call(b"never answered"), None)
        .await
        .expect("open_stream failed");
    connection.close();

    assert!(matches!(
        stream.message().await,
        Err(RpcError::Transport(TransportError::Closed))
    ));
    assert!(matches!(
        connection.open_stream(method::READ_ROWS, &call(b""), None).await,
        Err(RpcError::Transport(TransportError::Closed))
    ));
}

macro_rules! transport_suite {
    ($name:ident, $make_pair:expr) => {
        mod $name {
            use super::*;

            #[tokio::test]
            async fn stream_round_trip() {
                run_stream_round_trip($make_pair).await;
            }

            #[tokio::test]
            async fn error_status() {
                run_error_status($make_pair).await;
            }

            #[tokio::test]
            async fn deadline_propagation() {
                run_deadline_propagation($make_pair).await;
            }

            #[tokio::test]
            async fn interleaved_streams() {
                run_interleaved_streams($make_pair).await;
            }

            #[tokio::test]
            async fn abandoned_stream() {
                run_abandoned_stream($make_pair).await;
            }

            #[tokio::test]
            async fn close_ends_open_streams() {
                run_close_ends_open_streams($make_pair).await;
            }
        }
    };
}

transport_suite!(mem, AnyTransport::mem_pair);
transport_suite!(stream, AnyTransport::stream_pair);
