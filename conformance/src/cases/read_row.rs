//! Point read cases.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use rowstream_core::ErrorCode;
use rowstream_mock::{ChunkData, ChunkStatus, ReadRowsAction, Recorder, scripted_read_rows};
use rowstream_proxy::OperationResult;

use crate::fixture::{Fixture, dummy_chunk, table_name};
use crate::{conformance_case, ensure, ensure_eq};

conformance_case!(
    "read_row.generic_headers",
    "point reads carry client and resource info plus app_profile_id in the headers",
    generic_headers
);
async fn generic_headers() -> Result<(), String> {
    let fx = Fixture::start("read_row.generic_headers").await?;
    let recorder = Recorder::new(1);
    fx.server.set_read_rows(scripted_read_rows(
        recorder.clone(),
        vec![ReadRowsAction::new(vec![dummy_chunk("row-01", "v1", ChunkStatus::Commit)])],
    ));

    let result = fx.run(fx.read_row("row-01")).await;
    ensure!(result.is_ok(), "read failed: {:?}", result.failure());

    let record = recorder
        .recv_timeout(Duration::from_secs(1))
        .await
        .ok_or("server recorded no request")?;
    ensure!(
        record.header("user-agent").is_some() || record.header("x-rowstream-api-client").is_some(),
        "client info is missing in the request headers"
    );
    let resource = record
        .header("x-rowstream-request-params")
        .ok_or("request params header is missing")?;
    let table = table_name("table");
    let escaped = table.replace('/', "%2F");
    ensure!(
        resource.contains(&table) || resource.contains(&escaped),
        "resource info is missing in the request header: {resource}"
    );
    ensure!(
        resource.contains("app_profile_id="),
        "app_profile_id is missing in the request header: {resource}"
    );
    fx.finish()
}

conformance_case!(
    "read_row.point_read_deadline",
    "a point read gives up at its deadline while the server is still delaying",
    point_read_deadline
);
async fn point_read_deadline() -> Result<(), String> {
    let fx = Fixture::start("read_row.point_read_deadline").await?;
    let recorder = Recorder::new(1);
    fx.server.set_read_rows(scripted_read_rows(
        recorder.clone(),
        vec![
            ReadRowsAction::new(vec![dummy_chunk("row-01", "v1", ChunkStatus::Commit)])
                .with_delay(Duration::from_secs(5)),
        ],
    ));

    let started = Instant::now();
    let result = fx
        .run(fx.read_row("row-01").with_deadline(Duration::from_secs(2)))
        .await;
    let elapsed = started.elapsed();

    ensure!(
        elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(5),
        "call took {elapsed:?}, expected between the 2s deadline and the 5s delay"
    );
    let record = recorder.try_recv().ok_or("server recorded no request")?;
    ensure_eq!(
        record.request.rows.row_keys.first().map(Vec::as_slice),
        Some(&b"row-01"[..]),
        "requested row key"
    );
    ensure_eq!(record.request.rows_limit, 1, "rows_limit of a point read");
    let remaining = record
        .time_remaining()
        .ok_or("client did not propagate the deadline")?;
    ensure!(
        remaining <= Duration::from_secs(2),
        "propagated deadline is {remaining:?} away, longer than the 2s timeout"
    );
    ensure_eq!(result.code(), ErrorCode::DeadlineExceeded, "status code");
    fx.finish()
}

conformance_case!(
    "read_row.commit_in_separate_chunk",
    "a row whose commit marker arrives on a later chunk than its first cell",
    commit_in_separate_chunk
);
async fn commit_in_separate_chunk() -> Result<(), String> {
    let fx = Fixture::start("read_row.commit_in_separate_chunk").await?;
    fx.server.set_read_rows(scripted_read_rows(
        Recorder::new(1),
        vec![ReadRowsAction::new(vec![
            ChunkData::new()
                .row_key("row-01")
                .family("A")
                .qualifier("Qw1")
                .timestamp(99)
                .value("dmFsdWUtVkFM"),
            ChunkData::new()
                .family("B")
                .qualifier("Qw2")
                .timestamp(102)
                .value("dmFsdWUtVkFJ")
                .commit(),
        ])],
    ));

    let result = fx.run(fx.read_row("row-01")).await;
    let row = result
        .row()
        .ok_or_else(|| format!("expected a row, got {result:?}"))?;
    ensure_eq!(row.key.as_slice(), b"row-01".as_slice(), "row key");
    let families: Vec<_> = row.families.iter().map(|f| f.name.as_str()).collect();
    ensure_eq!(families, vec!["A", "B"], "families");

    for (family, qualifier, ts, value) in [
        ("A", "Qw1", 99, "dmFsdWUtVkFM"),
        ("B", "Qw2", 102, "dmFsdWUtVkFJ"),
    ] {
        let column = row
            .family(family)
            .and_then(|f| f.column(qualifier.as_bytes()))
            .ok_or_else(|| format!("missing column {family}:{qualifier}"))?;
        ensure_eq!(column.cells.len(), 1, "cells per column");
        ensure_eq!(column.cells[0].timestamp_micros, ts, "cell timestamp");
        ensure_eq!(column.cells[0].value.as_slice(), value.as_bytes(), "cell value");
    }
    fx.finish()
}

const OP_KEYS: [&str; 6] = [
    "op0-row", "op1-row", "op2-row", "op3-row", "op4-row", "op5-row",
];

fn delayed_actions(keys: &[&str]) -> Vec<ReadRowsAction> {
    keys.iter()
        .enumerate()
        .map(|(i, key)| {
            ReadRowsAction::new(vec![dummy_chunk(key, &format!("value{i}"), ChunkStatus::Commit)])
                .with_delay(Duration::from_secs(2))
        })
        .collect()
}

conformance_case!(
    "read_row.multi_streams",
    "concurrent point reads each get a complete row of their own",
    multi_streams
);
async fn multi_streams() -> Result<(), String> {
    let keys = &OP_KEYS[..5];
    let fx = Fixture::start("read_row.multi_streams").await?;
    let recorder = Recorder::new(10);
    fx.server
        .set_read_rows(scripted_read_rows(recorder.clone(), delayed_actions(keys)));

    let requests = keys.iter().map(|key| fx.read_row(key)).collect();
    let results = fx.proxy.run_all(requests).await;

    ensure_eq!(results.len(), keys.len(), "result count");
    if let Some(failed) = results.iter().find(|r| !r.is_ok()) {
        return Err(format!("an operation failed: {failed:?}"));
    }

    let records = recorder.drain();
    ensure_eq!(records.len(), keys.len(), "recorded requests");
    let first = records
        .iter()
        .map(|r| r.received_at)
        .min()
        .ok_or("no records")?;
    let last = records
        .iter()
        .map(|r| r.received_at)
        .max()
        .ok_or("no records")?;
    ensure!(
        last.duration_since(first) <= Duration::from_millis(1000),
        "requests were spread over {:?}, expected them within 1s",
        last.duration_since(first)
    );

    let expected: BTreeSet<Vec<u8>> = keys.iter().map(|k| k.as_bytes().to_vec()).collect();
    let requested: BTreeSet<Vec<u8>> = records
        .iter()
        .flat_map(|r| r.request.rows.row_keys.clone())
        .collect();
    ensure_eq!(requested, expected, "requested keys");

    let mut returned = BTreeSet::new();
    for (index, (key, result)) in keys.iter().zip(&results).enumerate() {
        let row = result
            .row()
            .ok_or_else(|| format!("read of {key} returned no row"))?;
        ensure_eq!(row.key.as_slice(), key.as_bytes(), "row key of the operation");
        let cell = row
            .family("f")
            .and_then(|f| f.column(b"col"))
            .and_then(|c| c.cells.first())
            .ok_or("row has no f:col cell")?;
        ensure_eq!(
            cell.value.clone(),
            format!("value{index}").into_bytes(),
            "value of the row"
        );
        returned.insert(row.key.clone());
    }
    ensure_eq!(returned, expected, "returned keys");
    fx.finish()
}

conformance_case!(
    "read_row.close_client",
    "closing a client lets admitted reads finish and rejects later ones",
    close_client
);
async fn close_client() -> Result<(), String> {
    let half = OP_KEYS.len() / 2;
    let fx = Fixture::start("read_row.close_client").await?;
    let recorder = Recorder::new(10);
    fx.server
        .set_read_rows(scripted_read_rows(recorder.clone(), delayed_actions(&OP_KEYS)));

    let batch_one = OP_KEYS[..half].iter().map(|key| fx.read_row(key)).collect();
    let batch_two = OP_KEYS[half..].iter().map(|key| fx.read_row(key)).collect();

    let results_one = fx
        .proxy
        .run_all_then_close(&fx.client_id, batch_one, Duration::from_secs(1))
        .await;
    let results_two = fx.proxy.run_all(batch_two).await;

    ensure_eq!(recorder.len(), half, "requests that reached the server");

    ensure_eq!(results_one.len(), half, "admitted result count");
    for (key, result) in OP_KEYS[..half].iter().zip(&results_one) {
        let row = result
            .row()
            .ok_or_else(|| format!("admitted read did not finish: {result:?}"))?;
        ensure_eq!(row.key.as_slice(), key.as_bytes(), "row key of the operation");
    }

    for result in &results_two {
        ensure!(
            !result.is_ok(),
            "read on a closed client succeeded: {result:?}"
        );
        ensure!(
            result.code() != ErrorCode::Ok,
            "failure without a status code"
        );
    }
    if let Some(OperationResult::Failure(failure)) = results_two.first() {
        tracing::debug!(code = %failure.code, origin = ?failure.origin, "closed client rejected read");
    }
    fx.finish()
}
