//! Row reassembly.
//!
//! A `ReadRows` stream is a sequence of [`CellChunk`]s. Each chunk carries
//! one cell, or one piece of a cell when `value_size` is set. The first chunk
//! of a row names the row key; family and qualifier are only sent when they
//! change. A row ends with a chunk marked [`RowStatus::CommitRow`], or is
//! abandoned by a chunk marked [`RowStatus::ResetRow`].
//!
//! [`RowMerger`] turns that sequence back into [`Row`]s and rejects streams
//! that break the framing rules with a [`MergeError`].

use rowstream_protocol::{Cell, CellChunk, Column, Family, MAX_PAYLOAD_SIZE, Row, RowStatus};

/// A stream that violates the row framing rules.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    #[error("stream ended with an uncommitted row {key:?}")]
    UncommittedRow { key: Vec<u8> },
    #[error("row {key:?} committed without any family data")]
    CommitWithoutData { key: Vec<u8> },
    #[error("first chunk of a row has no row key")]
    MissingRowKey,
    #[error("row key changed from {open:?} to {got:?} inside a row")]
    RowKeyChanged { open: Vec<u8>, got: Vec<u8> },
    #[error("row key {got:?} does not sort after {previous:?}")]
    KeysOutOfOrder { previous: Vec<u8>, got: Vec<u8> },
    #[error("reset chunk carries data")]
    ResetWithData,
    #[error("reset chunk with no open row")]
    ResetWithoutRow,
    #[error("family {family:?} started without a qualifier")]
    FamilyWithoutQualifier { family: String },
    #[error("cell in row {key:?} has no family")]
    MissingFamily { key: Vec<u8> },
    #[error("split cell interrupted by a chunk that changes {field}")]
    SplitCellInterrupted { field: &'static str },
    #[error("row {key:?} committed or reset inside a split cell")]
    SplitCellUnfinished { key: Vec<u8> },
}

/// A cell whose value arrives over several chunks.
#[derive(Debug)]
struct SplitCell {
    timestamp_micros: i64,
    labels: Vec<String>,
    value: Vec<u8>,
}

#[derive(Debug)]
struct OpenRow {
    key: Vec<u8>,
    families: Vec<Family>,
    family: Option<String>,
    qualifier: Option<Vec<u8>>,
    split: Option<SplitCell>,
}

impl OpenRow {
    fn new(key: Vec<u8>) -> Self {
        Self {
            key,
            families: Vec::new(),
            family: None,
            qualifier: None,
            split: None,
        }
    }

    fn push_cell(&mut self, cell: Cell) -> Result<(), MergeError> {
        let (Some(family_name), Some(qualifier)) = (&self.family, &self.qualifier) else {
            return Err(MergeError::MissingFamily {
                key: self.key.clone(),
            });
        };

        let family = match self.families.iter().position(|f| &f.name == family_name) {
            Some(i) => &mut self.families[i],
            None => {
                self.families.push(Family {
                    name: family_name.clone(),
                    columns: Vec::new(),
                });
                let last = self.families.len() - 1;
                &mut self.families[last]
            }
        };
        let column = match family.columns.iter().position(|c| &c.qualifier == qualifier) {
            Some(i) => &mut family.columns[i],
            None => {
                family.columns.push(Column {
                    qualifier: qualifier.clone(),
                    cells: Vec::new(),
                });
                let last = family.columns.len() - 1;
                &mut family.columns[last]
            }
        };
        column.cells.push(cell);
        Ok(())
    }

    fn into_row(self) -> Row {
        Row {
            key: self.key,
            families: self.families,
        }
    }
}

/// Reassembles the chunks of one read into rows.
#[derive(Debug, Default)]
pub struct RowMerger {
    open: Option<OpenRow>,
    last_key: Option<Vec<u8>>,
    committed: usize,
}

impl RowMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a row has been started but not committed or reset.
    pub fn has_open_row(&self) -> bool {
        self.open.is_some()
    }

    /// Rows committed so far.
    pub fn committed_rows(&self) -> usize {
        self.committed
    }

    /// Feed one chunk; returns the row it committed, if any.
    pub fn push(&mut self, chunk: CellChunk) -> Result<Option<Row>, MergeError> {
        if chunk.row_status == RowStatus::ResetRow {
            self.reset(&chunk)?;
            return Ok(None);
        }

        let mut row = match self.open.take() {
            Some(row) => {
                if !chunk.row_key.is_empty() && chunk.row_key != row.key {
                    return Err(MergeError::RowKeyChanged {
                        open: row.key,
                        got: chunk.row_key,
                    });
                }
                row
            }
            None => self.start_row(&chunk)?,
        };

        let commit = chunk.row_status == RowStatus::CommitRow;
        if !commit && row.family.is_none() && chunk.family_name.is_none() {
            return Err(MergeError::MissingFamily { key: row.key });
        }
        if commit && row.families.is_empty() && row.family.is_none() && chunk.family_name.is_none()
        {
            return Err(MergeError::CommitWithoutData { key: row.key });
        }

        Self::apply_cell(&mut row, chunk)?;

        if commit {
            if row.split.is_some() {
                return Err(MergeError::SplitCellUnfinished { key: row.key });
            }
            self.last_key = Some(row.key.clone());
            self.committed += 1;
            return Ok(Some(row.into_row()));
        }

        self.open = Some(row);
        Ok(None)
    }

    /// Call once the stream has ended cleanly.
    pub fn finish(&mut self) -> Result<(), MergeError> {
        match self.open.take() {
            Some(row) => Err(MergeError::UncommittedRow { key: row.key }),
            None => Ok(()),
        }
    }

    fn start_row(&self, chunk: &CellChunk) -> Result<OpenRow, MergeError> {
        if chunk.row_key.is_empty() {
            return Err(MergeError::MissingRowKey);
        }
        if let Some(previous) = &self.last_key {
            if chunk.row_key <= *previous {
                return Err(MergeError::KeysOutOfOrder {
                    previous: previous.clone(),
                    got: chunk.row_key.clone(),
                });
            }
        }
        Ok(OpenRow::new(chunk.row_key.clone()))
    }

    fn reset(&mut self, chunk: &CellChunk) -> Result<(), MergeError> {
        let carries_data = !chunk.row_key.is_empty()
            || chunk.family_name.is_some()
            || chunk.qualifier.is_some()
            || chunk.timestamp_micros != 0
            || !chunk.labels.is_empty()
            || !chunk.value.is_empty()
            || chunk.value_size != 0;
        if carries_data {
            return Err(MergeError::ResetWithData);
        }

        match self.open.take() {
            None => Err(MergeError::ResetWithoutRow),
            Some(row) if row.split.is_some() => {
                Err(MergeError::SplitCellUnfinished { key: row.key })
            }
            Some(row) => {
                tracing::trace!(key = ?row.key, "row reset");
                Ok(())
            }
        }
    }

    fn apply_cell(row: &mut OpenRow, chunk: CellChunk) -> Result<(), MergeError> {
        if let Some(split) = &row.split {
            if chunk
                .family_name
                .as_ref()
                .is_some_and(|f| Some(f) != row.family.as_ref())
            {
                return Err(MergeError::SplitCellInterrupted { field: "family" });
            }
            if chunk
                .qualifier
                .as_ref()
                .is_some_and(|q| Some(q) != row.qualifier.as_ref())
            {
                return Err(MergeError::SplitCellInterrupted { field: "qualifier" });
            }
            if chunk.timestamp_micros != 0 && chunk.timestamp_micros != split.timestamp_micros {
                return Err(MergeError::SplitCellInterrupted { field: "timestamp" });
            }
        } else if let Some(family) = chunk.family_name {
            let Some(qualifier) = chunk.qualifier else {
                return Err(MergeError::FamilyWithoutQualifier { family });
            };
            row.family = Some(family);
            row.qualifier = Some(qualifier);
        } else if let Some(qualifier) = chunk.qualifier {
            row.qualifier = Some(qualifier);
        }

        match row.split.take() {
            Some(mut split) => {
                split.value.extend_from_slice(&chunk.value);
                if chunk.value_size > 0 {
                    row.split = Some(split);
                    return Ok(());
                }
                row.push_cell(Cell {
                    timestamp_micros: split.timestamp_micros,
                    value: split.value,
                    labels: split.labels,
                })
            }
            None if chunk.value_size > 0 => {
                // The announced size is only a hint from the server.
                let reserve = chunk.value_size.unsigned_abs().min(MAX_PAYLOAD_SIZE) as usize;
                let mut value = Vec::with_capacity(reserve);
                value.extend_from_slice(&chunk.value);
                row.split = Some(SplitCell {
                    timestamp_micros: chunk.timestamp_micros,
                    labels: chunk.labels,
                    value,
                });
                Ok(())
            }
            None => row.push_cell(Cell {
                timestamp_micros: chunk.timestamp_micros,
                value: chunk.value,
                labels: chunk.labels,
            }),
        }
    }
}

/// Merge a complete chunk sequence.
pub fn merge_chunks(chunks: impl IntoIterator<Item = CellChunk>) -> Result<Vec<Row>, MergeError> {
    let mut merger = RowMerger::new();
    let mut rows = Vec::new();
    for chunk in chunks {
        if let Some(row) = merger.push(chunk)? {
            rows.push(row);
        }
    }
    merger.finish()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(key: &str, family: Option<&str>, qualifier: Option<&str>, ts: i64, value: &str) -> CellChunk {
        CellChunk {
            row_key: key.as_bytes().to_vec(),
            family_name: family.map(str::to_string),
            qualifier: qualifier.map(|q| q.as_bytes().to_vec()),
            timestamp_micros: ts,
            value: value.as_bytes().to_vec(),
            ..Default::default()
        }
    }

    fn commit(mut c: CellChunk) -> CellChunk {
        c.row_status = RowStatus::CommitRow;
        c
    }

    fn reset() -> CellChunk {
        CellChunk {
            row_status: RowStatus::ResetRow,
            ..Default::default()
        }
    }

    #[test]
    fn two_qualifiers_in_one_family() {
        let rows = merge_chunks([
            chunk("row-01", Some("A"), Some("Q"), 99, "v1"),
            commit(chunk("", Some("A"), Some("Q2"), 102, "v2")),
        ])
        .unwrap();

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.key, b"row-01");
        assert_eq!(row.families.len(), 1);
        let family = row.family("A").unwrap();
        assert_eq!(family.columns.len(), 2);
        assert_eq!(family.column(b"Q").unwrap().cells[0].value, b"v1");
        assert_eq!(family.column(b"Q2").unwrap().cells[0].timestamp_micros, 102);
    }

    #[test]
    fn commit_in_separate_chunk_spans_families() {
        let rows = merge_chunks([
            chunk("row-01", Some("A"), Some("Qw1"), 99, "dmFsdWUtVkFM"),
            commit(chunk("", Some("B"), Some("Qw2"), 102, "dmFsdWUtVkFJ")),
        ])
        .unwrap();

        let names: Vec<_> = rows[0].families.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn cells_without_family_continue_previous_column() {
        let rows = merge_chunks([
            chunk("r", Some("f"), Some("c"), 3, "new"),
            commit(chunk("", None, None, 1, "old")),
        ])
        .unwrap();
        let cells = &rows[0].family("f").unwrap().column(b"c").unwrap().cells;
        let values: Vec<_> = cells.iter().map(|c| c.value.as_slice()).collect();
        assert_eq!(values, vec![&b"new"[..], &b"old"[..]]);
    }

    #[test]
    fn revisited_family_appends_to_first_entry() {
        let rows = merge_chunks([
            chunk("r", Some("A"), Some("x"), 1, "1"),
            chunk("", Some("B"), Some("y"), 1, "2"),
            commit(chunk("", Some("A"), Some("x"), 0, "3")),
        ])
        .unwrap();
        assert_eq!(rows[0].families.len(), 2);
        assert_eq!(rows[0].family("A").unwrap().column(b"x").unwrap().cells.len(), 2);
    }

    #[test]
    fn reset_discards_open_row() {
        let rows = merge_chunks([
            chunk("r1", Some("f"), Some("c"), 1, "discarded"),
            reset(),
            commit(chunk("r1", Some("f"), Some("c"), 1, "kept")),
        ])
        .unwrap();
        assert_eq!(rows.len(), 1);
        let cells = &rows[0].family("f").unwrap().column(b"c").unwrap().cells;
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].value, b"kept");
    }

    #[test]
    fn many_rows_in_key_order() {
        let rows = merge_chunks([
            commit(chunk("a", Some("f"), Some("c"), 1, "1")),
            commit(chunk("b", Some("f"), Some("c"), 1, "2")),
            commit(chunk("c", Some("f"), Some("c"), 1, "3")),
        ])
        .unwrap();
        let keys: Vec<_> = rows.iter().map(|r| r.key.clone()).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn empty_stream_has_no_rows() {
        assert!(merge_chunks([]).unwrap().is_empty());
    }

    #[test]
    fn split_cell_is_concatenated() {
        let mut first = chunk("r", Some("f"), Some("c"), 7, "hel");
        first.value_size = 5;
        first.labels = vec!["l".into()];
        let rows = merge_chunks([first, commit(chunk("", None, None, 0, "lo"))]).unwrap();
        let cell = &rows[0].family("f").unwrap().column(b"c").unwrap().cells[0];
        assert_eq!(cell.value, b"hello");
        assert_eq!(cell.timestamp_micros, 7);
        assert_eq!(cell.labels, vec!["l".to_string()]);
    }

    #[test]
    fn oversized_announced_value_is_not_trusted() {
        let first = split(chunk("r", Some("f"), Some("c"), 7, "ab"), i32::MAX);
        let rows = merge_chunks([first, commit(chunk("", None, None, 0, "cd"))]).unwrap();
        let cell = &rows[0].family("f").unwrap().column(b"c").unwrap().cells[0];
        assert_eq!(cell.value, b"abcd");
        assert!(cell.value.capacity() <= MAX_PAYLOAD_SIZE as usize);
    }

    fn split(mut c: CellChunk, value_size: i32) -> CellChunk {
        c.value_size = value_size;
        c
    }

    #[test]
    fn open_row_at_end_of_stream() {
        let err = merge_chunks([chunk("r", Some("f"), Some("c"), 1, "v")]).unwrap_err();
        assert_eq!(err, MergeError::UncommittedRow { key: b"r".to_vec() });
    }

    #[test]
    fn commit_without_family() {
        let err = merge_chunks([commit(chunk("r", None, None, 0, ""))]).unwrap_err();
        assert_eq!(err, MergeError::CommitWithoutData { key: b"r".to_vec() });
    }

    #[test]
    fn row_key_rules() {
        assert_eq!(
            merge_chunks([commit(chunk("", Some("f"), Some("c"), 1, "v"))]).unwrap_err(),
            MergeError::MissingRowKey
        );
        assert!(matches!(
            merge_chunks([
                chunk("r1", Some("f"), Some("c"), 1, "v"),
                chunk("r2", Some("f"), Some("c"), 1, "v"),
            ]),
            Err(MergeError::RowKeyChanged { .. })
        ));
        assert!(matches!(
            merge_chunks([
                commit(chunk("b", Some("f"), Some("c"), 1, "v")),
                commit(chunk("a", Some("f"), Some("c"), 1, "v")),
            ]),
            Err(MergeError::KeysOutOfOrder { .. })
        ));
        assert!(matches!(
            merge_chunks([
                commit(chunk("a", Some("f"), Some("c"), 1, "v")),
                commit(chunk("a", Some("f"), Some("c"), 1, "v")),
            ]),
            Err(MergeError::KeysOutOfOrder { .. })
        ));
    }

    #[test]
    fn reset_rules() {
        let dirty_reset = CellChunk {
            value: b"x".to_vec(),
            row_status: RowStatus::ResetRow,
            ..Default::default()
        };
        assert_eq!(
            merge_chunks([chunk("r", Some("f"), Some("c"), 1, "v"), dirty_reset]).unwrap_err(),
            MergeError::ResetWithData
        );
        assert_eq!(merge_chunks([reset()]).unwrap_err(), MergeError::ResetWithoutRow);
        assert!(matches!(
            merge_chunks([split(chunk("r", Some("f"), Some("c"), 1, "ab"), 4), reset()]),
            Err(MergeError::SplitCellUnfinished { .. })
        ));
    }

    #[test]
    fn family_needs_qualifier() {
        assert!(matches!(
            merge_chunks([commit(chunk("r", Some("f"), None, 1, "v"))]),
            Err(MergeError::FamilyWithoutQualifier { .. })
        ));
    }

    #[test]
    fn split_cell_rules() {
        assert_eq!(
            merge_chunks([
                split(chunk("r", Some("f"), Some("c"), 1, "ab"), 4),
                commit(chunk("", None, Some("other"), 0, "cd")),
            ])
            .unwrap_err(),
            MergeError::SplitCellInterrupted { field: "qualifier" }
        );
        assert_eq!(
            merge_chunks([
                split(chunk("r", Some("f"), Some("c"), 1, "ab"), 4),
                commit(chunk("", None, None, 9, "cd")),
            ])
            .unwrap_err(),
            MergeError::SplitCellInterrupted { field: "timestamp" }
        );
        assert!(matches!(
            merge_chunks([commit(split(chunk("r", Some("f"), Some("c"), 1, "ab"), 4))]),
            Err(MergeError::SplitCellUnfinished { .. })
        ));
    }
}
