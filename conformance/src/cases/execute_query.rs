//! Query cases.

use rowstream_core::protocol::{ExecuteQueryRequest, Value, ValueType};
use rowstream_mock::{ExecuteQueryAction, QueryFragment, Recorder, column, scripted_execute_query};
use rowstream_proxy::OperationRequest;

use crate::fixture::{Fixture, instance_name};
use crate::{conformance_case, ensure, ensure_eq};

fn select(fx: &Fixture) -> OperationRequest {
    OperationRequest::execute_query(
        fx.client_id.as_str(),
        ExecuteQueryRequest {
            instance_name: instance_name(),
            query: "SELECT * FROM table".into(),
            ..Default::default()
        },
    )
}

conformance_case!(
    "execute_query.empty_response",
    "a query answered with metadata only returns no rows",
    empty_response
);
async fn empty_response() -> Result<(), String> {
    let fx = Fixture::start("execute_query.empty_response").await?;
    let recorder = Recorder::new(1);
    fx.server.set_execute_query(scripted_execute_query(
        recorder.clone(),
        vec![
            ExecuteQueryAction::new(vec![QueryFragment::metadata(vec![column(
                "test",
                ValueType::String,
            )])])
            .end_of_stream(),
        ],
    ));

    let result = fx.run(select(&fx)).await;
    let query = result
        .query()
        .ok_or_else(|| format!("expected a query result, got {result:?}"))?;
    ensure!(query.rows.is_empty(), "expected no rows, got {:?}", query.rows);
    ensure_eq!(query.columns().len(), 1, "column count");
    let first = &query.columns()[0];
    ensure_eq!(first.name.as_str(), "test", "column name");
    ensure_eq!(first.value_type, ValueType::String, "column type");

    let record = recorder.try_recv().ok_or("server recorded no request")?;
    ensure_eq!(record.request.instance_name, instance_name(), "instance name");
    ensure_eq!(record.request.query.as_str(), "SELECT * FROM table", "query");
    fx.finish()
}

conformance_case!(
    "execute_query.single_simple_row",
    "a single string value completes one row",
    single_simple_row
);
async fn single_simple_row() -> Result<(), String> {
    let fx = Fixture::start("execute_query.single_simple_row").await?;
    fx.server.set_execute_query(scripted_execute_query(
        Recorder::new(1),
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
        ],
    ));

    let result = fx.run(select(&fx)).await;
    let query = result
        .query()
        .ok_or_else(|| format!("expected a query result, got {result:?}"))?;
    ensure_eq!(query.columns().len(), 1, "column count");
    ensure_eq!(query.rows.len(), 1, "row count");
    ensure_eq!(
        query.get(0, "test"),
        Some(&Value::String("foo".into())),
        "value of column test"
    );
    fx.finish()
}
