//! What the scripted server sends back.

use std::time::Duration;

use rowstream_protocol::{
    CellChunk, ColumnMetadata, ExecuteQueryResponse, PartialResultSet, ReadRowsResponse,
    ResultSetMetadata, RowStatus, Status, Value, ValueType,
};

/// Marker on the last fragment of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkStatus {
    /// More fragments follow.
    #[default]
    None,
    /// Discard everything sent for the open row.
    Reset,
    /// The open row is complete.
    Commit,
}

impl From<ChunkStatus> for RowStatus {
    fn from(status: ChunkStatus) -> Self {
        match status {
            ChunkStatus::None => RowStatus::Continue,
            ChunkStatus::Reset => RowStatus::ResetRow,
            ChunkStatus::Commit => RowStatus::CommitRow,
        }
    }
}

/// One scripted row fragment.
///
/// Unset `row_key`, `family_name` or `qualifier` continue the previous
/// fragment's value. Nothing here is validated: a script may describe a
/// malformed stream on purpose.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkData {
    pub row_key: Option<Vec<u8>>,
    pub family_name: Option<String>,
    pub qualifier: Option<Vec<u8>>,
    pub timestamp_micros: i64,
    pub labels: Vec<String>,
    pub value: Vec<u8>,
    pub value_size: i32,
    pub status: ChunkStatus,
}

impl ChunkData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_key(mut self, key: impl AsRef<[u8]>) -> Self {
        self.row_key = Some(key.as_ref().to_vec());
        self
    }

    pub fn family(mut self, name: impl Into<String>) -> Self {
        self.family_name = Some(name.into());
        self
    }

    pub fn qualifier(mut self, qualifier: impl AsRef<[u8]>) -> Self {
        self.qualifier = Some(qualifier.as_ref().to_vec());
        self
    }

    pub fn timestamp(mut self, micros: i64) -> Self {
        self.timestamp_micros = micros;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn value(mut self, value: impl AsRef<[u8]>) -> Self {
        self.value = value.as_ref().to_vec();
        self
    }

    /// Mark this fragment as the first piece of a value of `total` bytes.
    pub fn value_size(mut self, total: i32) -> Self {
        self.value_size = total;
        self
    }

    pub fn status(mut self, status: ChunkStatus) -> Self {
        self.status = status;
        self
    }

    pub fn commit(self) -> Self {
        self.status(ChunkStatus::Commit)
    }

    pub fn reset(self) -> Self {
        self.status(ChunkStatus::Reset)
    }

    pub fn to_chunk(&self) -> CellChunk {
        CellChunk {
            row_key: self.row_key.clone().unwrap_or_default(),
            family_name: self.family_name.clone(),
            qualifier: self.qualifier.clone(),
            timestamp_micros: self.timestamp_micros,
            labels: self.labels.clone(),
            value: self.value.clone(),
            value_size: self.value_size,
            row_status: self.status.into(),
        }
    }
}

/// Script for one `ReadRows` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRowsAction {
    pub chunks: Vec<ChunkData>,
    /// Slept before the first message is written.
    pub delay: Option<Duration>,
    /// Sent after the last chunk.
    pub status: Status,
    /// How many chunks share one response message (at least one).
    pub chunks_per_message: usize,
}

impl ReadRowsAction {
    pub fn new(chunks: Vec<ChunkData>) -> Self {
        Self {
            chunks,
            delay: None,
            status: Status::ok(),
            chunks_per_message: 1,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn with_chunks_per_message(mut self, n: usize) -> Self {
        self.chunks_per_message = n.max(1);
        self
    }

    /// Row key of the first chunk, if it names one.
    pub fn first_row_key(&self) -> Option<&[u8]> {
        self.chunks.first()?.row_key.as_deref()
    }

    /// The response messages this action writes, in order.
    pub fn messages(&self) -> Vec<ReadRowsResponse> {
        self.chunks
            .chunks(self.chunks_per_message.max(1))
            .map(|group| ReadRowsResponse {
                chunks: group.iter().map(ChunkData::to_chunk).collect(),
                last_scanned_row_key: Vec::new(),
            })
            .collect()
    }
}

/// One scripted query response message.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryFragment {
    /// Schema header.
    Metadata(ResultSetMetadata),
    /// A batch of values.
    Results {
        values: Vec<Value>,
        resume_token: Vec<u8>,
        reset: bool,
    },
}

impl QueryFragment {
    /// Schema header with the given columns.
    pub fn metadata(columns: Vec<ColumnMetadata>) -> Self {
        Self::Metadata(ResultSetMetadata { columns })
    }

    /// A value batch closed by `resume_token`.
    pub fn results(resume_token: impl AsRef<[u8]>, values: Vec<Value>) -> Self {
        Self::Results {
            values,
            resume_token: resume_token.as_ref().to_vec(),
            reset: false,
        }
    }

    pub fn to_response(&self) -> ExecuteQueryResponse {
        match self {
            Self::Metadata(metadata) => ExecuteQueryResponse::Metadata(metadata.clone()),
            Self::Results {
                values,
                resume_token,
                reset,
            } => ExecuteQueryResponse::Results(PartialResultSet {
                values: values.clone(),
                resume_token: resume_token.clone(),
                reset: *reset,
            }),
        }
    }
}

/// A result column.
pub fn column(name: impl Into<String>, value_type: ValueType) -> ColumnMetadata {
    ColumnMetadata {
        name: name.into(),
        value_type,
    }
}

/// Script for part of an `ExecuteQuery` stream.
///
/// Consecutive actions are streamed within one call until an action with
/// `end_of_stream` set, or the last action.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteQueryAction {
    pub fragments: Vec<QueryFragment>,
    pub delay: Option<Duration>,
    pub status: Status,
    pub end_of_stream: bool,
}

impl ExecuteQueryAction {
    pub fn new(fragments: Vec<QueryFragment>) -> Self {
        Self {
            fragments,
            delay: None,
            status: Status::ok(),
            end_of_stream: false,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn end_of_stream(mut self) -> Self {
        self.end_of_stream = true;
        self
    }
}
