//! Row reassembly cases.

use std::time::Duration;

use rowstream_core::protocol::{ReadRowsRequest, RowSet};
use rowstream_mock::{ChunkData, ChunkStatus, ReadRowsAction, Recorder, scripted_read_rows};
use rowstream_proxy::OperationRequest;

use crate::fixture::{Fixture, dummy_chunk, table_name};
use crate::{conformance_case, ensure, ensure_eq};

fn scan(fx: &Fixture) -> OperationRequest {
    OperationRequest::read_rows(
        fx.client_id.as_str(),
        ReadRowsRequest {
            table_name: table_name("table"),
            rows: RowSet::default(),
            ..Default::default()
        },
    )
}

conformance_case!(
    "read_rows.two_qualifiers",
    "two cells of one family in separate qualifiers form one row",
    two_qualifiers
);
async fn two_qualifiers() -> Result<(), String> {
    let fx = Fixture::start("read_rows.two_qualifiers").await?;
    fx.server.set_read_rows(scripted_read_rows(
        Recorder::new(1),
        vec![ReadRowsAction::new(vec![
            ChunkData::new()
                .row_key("row-01")
                .family("A")
                .qualifier("Q")
                .timestamp(99)
                .value("v1"),
            ChunkData::new().qualifier("Q2").timestamp(102).value("v2").commit(),
        ])],
    ));

    let result = fx.run(fx.read_row("row-01")).await;
    let row = result
        .row()
        .ok_or_else(|| format!("expected a row, got {result:?}"))?;
    ensure_eq!(row.families.len(), 1, "family count");
    let family = row.family("A").ok_or("family A is missing")?;
    let qualifiers: Vec<_> = family.columns.iter().map(|c| c.qualifier.clone()).collect();
    ensure_eq!(qualifiers, vec![b"Q".to_vec(), b"Q2".to_vec()], "qualifiers");
    ensure_eq!(family.columns[1].cells[0].value.as_slice(), b"v2".as_slice(), "second cell");
    fx.finish()
}

conformance_case!(
    "read_rows.reset_discards_row",
    "a reset marker discards the open row and the retransmitted row is kept",
    reset_discards_row
);
async fn reset_discards_row() -> Result<(), String> {
    let fx = Fixture::start("read_rows.reset_discards_row").await?;
    fx.server.set_read_rows(scripted_read_rows(
        Recorder::new(1),
        vec![ReadRowsAction::new(vec![
            dummy_chunk("row-01", "stale", ChunkStatus::None),
            ChunkData::new().reset(),
            dummy_chunk("row-01", "fresh", ChunkStatus::Commit),
            dummy_chunk("row-02", "second", ChunkStatus::Commit),
        ])
        .with_chunks_per_message(2)],
    ));

    let result = fx.run(scan(&fx)).await;
    let rows = result
        .rows()
        .ok_or_else(|| format!("expected rows, got {result:?}"))?;
    ensure_eq!(rows.len(), 2, "row count");
    let cells = &rows[0]
        .family("f")
        .and_then(|f| f.column(b"col"))
        .ok_or("row-01 has no f:col")?
        .cells;
    ensure_eq!(cells.len(), 1, "cells left after the reset");
    ensure_eq!(cells[0].value.as_slice(), b"fresh".as_slice(), "kept value");
    fx.finish()
}

conformance_case!(
    "read_rows.zero_fragments",
    "an action without fragments yields no rows and an OK status",
    zero_fragments
);
async fn zero_fragments() -> Result<(), String> {
    let fx = Fixture::start("read_rows.zero_fragments").await?;
    let recorder = Recorder::new(1);
    fx.server.set_read_rows(scripted_read_rows(
        recorder.clone(),
        vec![ReadRowsAction::new(Vec::new())],
    ));

    let result = fx.run(scan(&fx)).await;
    let rows = result
        .rows()
        .ok_or_else(|| format!("expected an empty result, got {result:?}"))?;
    ensure!(rows.is_empty(), "expected no rows, got {}", rows.len());
    ensure!(
        recorder.recv_timeout(Duration::from_secs(1)).await.is_some(),
        "server recorded no request"
    );
    fx.finish()
}

conformance_case!(
    "read_rows.uncommitted_row",
    "a stream ending inside a row is reported as a protocol violation",
    uncommitted_row
);
async fn uncommitted_row() -> Result<(), String> {
    let fx = Fixture::start("read_rows.uncommitted_row").await?;
    fx.server.set_read_rows(scripted_read_rows(
        Recorder::new(1),
        vec![ReadRowsAction::new(vec![
            dummy_chunk("row-01", "v1", ChunkStatus::Commit),
            dummy_chunk("row-02", "v2", ChunkStatus::None),
        ])],
    ));

    let result = fx.run(scan(&fx)).await;
    let failure = result
        .failure()
        .ok_or_else(|| format!("expected a failure, got {result:?}"))?;
    ensure_eq!(
        failure.origin,
        rowstream_proxy::FailureOrigin::Protocol,
        "failure origin"
    );
    fx.finish()
}
