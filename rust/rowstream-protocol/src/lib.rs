//! Rowstream wire types.
//!
//! This crate defines the message schema spoken between a client under test
//! and the scripted server. It is shared by the client library, the mock
//! server and the conformance suite, so every component agrees on the same
//! encoding.
//!
//! The schema models a subset of a wide-column table service:
//! - `ReadRows`: server-streaming read returning row fragments ([`CellChunk`])
//! - `ExecuteQuery`: server-streaming query returning a schema header
//!   ([`ResultSetMetadata`]) followed by value batches ([`PartialResultSet`])
//!
//! Payloads are postcard-encoded through `facet`. Frames are a 32-byte
//! descriptor ([`MsgDesc`]) followed by the payload bytes.

#![deny(unsafe_code)]

use facet::Facet;

// =============================================================================
// Frame Format
// =============================================================================

/// Sentinel value indicating no deadline.
pub const NO_DEADLINE: u64 = 0xFFFFFFFFFFFFFFFF;

/// Size of an encoded [`MsgDesc`] in bytes.
pub const DESC_SIZE: usize = 32;

/// Largest payload a single frame may carry.
pub const MAX_PAYLOAD_SIZE: u32 = 4 * 1024 * 1024;

/// Frame descriptor (32 bytes on the wire, little-endian).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MsgDesc {
    /// Unique message ID per connection, monotonically increasing.
    pub msg_id: u64,
    /// Logical stream this frame belongs to (0 is never used for calls).
    pub channel_id: u32,
    /// Method identifier (FNV-1a hash of `service.method`).
    pub method_id: u32,
    /// Frame flags, see [`flags`].
    pub flags: u32,
    /// Payload length in bytes.
    pub payload_len: u32,
    /// Absolute deadline in nanoseconds since the Unix epoch.
    pub deadline_ns: u64,
}

impl MsgDesc {
    /// Create a new descriptor with default values.
    pub const fn new() -> Self {
        Self {
            msg_id: 0,
            channel_id: 0,
            method_id: 0,
            flags: 0,
            payload_len: 0,
            deadline_ns: NO_DEADLINE,
        }
    }

    /// Encode descriptor to bytes (little-endian).
    pub fn to_bytes(&self) -> [u8; DESC_SIZE] {
        let mut buf = [0u8; DESC_SIZE];
        buf[0..8].copy_from_slice(&self.msg_id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.channel_id.to_le_bytes());
        buf[12..16].copy_from_slice(&self.method_id.to_le_bytes());
        buf[16..20].copy_from_slice(&self.flags.to_le_bytes());
        buf[20..24].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[24..32].copy_from_slice(&self.deadline_ns.to_le_bytes());
        buf
    }

    /// Decode descriptor from bytes (little-endian).
    pub fn from_bytes(buf: &[u8; DESC_SIZE]) -> Self {
        let u32_at =
            |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        let u64_at = |at: usize| {
            let mut word = [0u8; 8];
            word.copy_from_slice(&buf[at..at + 8]);
            u64::from_le_bytes(word)
        };
        Self {
            msg_id: u64_at(0),
            channel_id: u32_at(8),
            method_id: u32_at(12),
            flags: u32_at(16),
            payload_len: u32_at(20),
            deadline_ns: u64_at(24),
        }
    }

    /// Returns true if a deadline was propagated with this frame.
    #[inline]
    pub const fn has_deadline(&self) -> bool {
        self.deadline_ns != NO_DEADLINE
    }
}

impl Default for MsgDesc {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Frame Flags
// =============================================================================

/// Frame flags.
pub mod flags {
    /// Frame carries payload data.
    pub const DATA: u32 = 0b0000_0001;
    /// End of stream. On a response this frame carries the terminal [`Status`](super::Status).
    pub const EOS: u32 = 0b0000_0100;
    /// Terminal status is not OK.
    pub const ERROR: u32 = 0b0001_0000;
    /// This is a response frame (server to client).
    pub const RESPONSE: u32 = 0b0010_0000_0000;
}

// =============================================================================
// Method IDs
// =============================================================================

/// Service name all methods are registered under.
pub const SERVICE_NAME: &str = "rowstream.v1.Table";

/// Compute method ID using FNV-1a hash.
pub const fn compute_method_id(service_name: &str, method_name: &str) -> u32 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut hash: u64 = FNV_OFFSET;

    let service = service_name.as_bytes();
    let mut i = 0;
    while i < service.len() {
        hash ^= service[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }

    hash ^= b'.' as u64;
    hash = hash.wrapping_mul(FNV_PRIME);

    let method = method_name.as_bytes();
    let mut i = 0;
    while i < method.len() {
        hash ^= method[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }

    // Fold to 32 bits
    ((hash >> 32) ^ hash) as u32
}

/// Method identifiers for every call the service exposes.
pub mod method {
    use super::{SERVICE_NAME, compute_method_id};

    /// Server-streaming row read.
    pub const READ_ROWS: u32 = compute_method_id(SERVICE_NAME, "ReadRows");
    /// Server-streaming tabular query.
    pub const EXECUTE_QUERY: u32 = compute_method_id(SERVICE_NAME, "ExecuteQuery");

    /// Human-readable name of a method id, for logs.
    pub fn name(method_id: u32) -> &'static str {
        match method_id {
            READ_ROWS => "ReadRows",
            EXECUTE_QUERY => "ExecuteQuery",
            _ => "<unknown>",
        }
    }
}

// =============================================================================
// Call Envelope
// =============================================================================

/// First frame of every call: transport metadata plus the encoded request body.
#[derive(Debug, Clone, PartialEq, Eq, Default, Facet)]
pub struct CallRequest {
    /// Request headers, in the order the client sent them.
    pub metadata: Vec<(String, String)>,
    /// Postcard-encoded request message.
    pub body: Vec<u8>,
}

/// RPC status carried by the final frame of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct Status {
    /// Error code (0 = OK), see [`error_code`].
    pub code: u32,
    /// Human-readable description.
    pub message: String,
}

impl Status {
    /// Create a success status.
    pub fn ok() -> Self {
        Self {
            code: error_code::OK,
            message: String::new(),
        }
    }

    /// Create an error status.
    pub fn error(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Returns true if this is a success status.
    pub fn is_ok(&self) -> bool {
        self.code == error_code::OK
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::ok()
    }
}

/// Standard error codes (gRPC-compatible numbering).
pub mod error_code {
    /// Success.
    pub const OK: u32 = 0;
    /// Request was cancelled.
    pub const CANCELLED: u32 = 1;
    /// Unknown error.
    pub const UNKNOWN: u32 = 2;
    /// Invalid argument.
    pub const INVALID_ARGUMENT: u32 = 3;
    /// Deadline exceeded.
    pub const DEADLINE_EXCEEDED: u32 = 4;
    /// Entity not found.
    pub const NOT_FOUND: u32 = 5;
    /// Entity already exists.
    pub const ALREADY_EXISTS: u32 = 6;
    /// Permission denied.
    pub const PERMISSION_DENIED: u32 = 7;
    /// Resource exhausted.
    pub const RESOURCE_EXHAUSTED: u32 = 8;
    /// Failed precondition.
    pub const FAILED_PRECONDITION: u32 = 9;
    /// Operation aborted.
    pub const ABORTED: u32 = 10;
    /// Out of range.
    pub const OUT_OF_RANGE: u32 = 11;
    /// Not implemented.
    pub const UNIMPLEMENTED: u32 = 12;
    /// Internal error.
    pub const INTERNAL: u32 = 13;
    /// Service unavailable.
    pub const UNAVAILABLE: u32 = 14;
    /// Data loss.
    pub const DATA_LOSS: u32 = 15;
    /// Unauthenticated.
    pub const UNAUTHENTICATED: u32 = 16;
}

// =============================================================================
// ReadRows
// =============================================================================

/// A contiguous range of rows, `[start_key_closed, end_key_open)`.
///
/// An empty `end_key_open` means "to the end of the table".
#[derive(Debug, Clone, PartialEq, Eq, Default, Facet)]
pub struct RowRange {
    pub start_key_closed: Vec<u8>,
    pub end_key_open: Vec<u8>,
}

/// Rows selected by a read. Empty means the whole table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Facet)]
pub struct RowSet {
    pub row_keys: Vec<Vec<u8>>,
    pub row_ranges: Vec<RowRange>,
}

/// Request for the `ReadRows` method.
#[derive(Debug, Clone, PartialEq, Eq, Default, Facet)]
pub struct ReadRowsRequest {
    /// Fully qualified table name (`projects/p/instances/i/tables/t`).
    pub table_name: String,
    /// App profile used for routing.
    pub app_profile_id: String,
    /// Rows to read.
    pub rows: RowSet,
    /// Maximum number of rows to return (0 = unlimited).
    pub rows_limit: i64,
}

/// Marker carried by the last fragment of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Facet)]
#[repr(u8)]
pub enum RowStatus {
    /// More fragments follow for the current row.
    Continue = 0,
    /// Discard everything received for the current row.
    ResetRow = 1,
    /// The current row is complete.
    CommitRow = 2,
}

impl Default for RowStatus {
    fn default() -> Self {
        Self::Continue
    }
}

/// One fragment of a row.
///
/// `family_name` and `qualifier` are only set when they change; an absent
/// value continues the previous family or column.
#[derive(Debug, Clone, PartialEq, Eq, Default, Facet)]
pub struct CellChunk {
    /// Set on the first fragment of a row, empty otherwise.
    pub row_key: Vec<u8>,
    pub family_name: Option<String>,
    pub qualifier: Option<Vec<u8>>,
    pub timestamp_micros: i64,
    pub labels: Vec<String>,
    pub value: Vec<u8>,
    /// Non-zero when the cell value continues in the next fragment; this is
    /// the total size of the full value.
    pub value_size: i32,
    pub row_status: RowStatus,
}

/// One message of a `ReadRows` response stream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Facet)]
pub struct ReadRowsResponse {
    pub chunks: Vec<CellChunk>,
    pub last_scanned_row_key: Vec<u8>,
}

/// A cell value at a specific timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Default, Facet)]
pub struct Cell {
    pub timestamp_micros: i64,
    pub value: Vec<u8>,
    pub labels: Vec<String>,
}

/// All cells sharing a qualifier, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Facet)]
pub struct Column {
    pub qualifier: Vec<u8>,
    pub cells: Vec<Cell>,
}

/// All columns of a column family, in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Facet)]
pub struct Family {
    pub name: String,
    pub columns: Vec<Column>,
}

/// A fully reassembled row.
#[derive(Debug, Clone, PartialEq, Eq, Default, Facet)]
pub struct Row {
    pub key: Vec<u8>,
    pub families: Vec<Family>,
}

impl Row {
    /// Look up a family by name.
    pub fn family(&self, name: &str) -> Option<&Family> {
        self.families.iter().find(|f| f.name == name)
    }
}

impl Family {
    /// Look up a column by qualifier.
    pub fn column(&self, qualifier: &[u8]) -> Option<&Column> {
        self.columns.iter().find(|c| c.qualifier == qualifier)
    }
}

// =============================================================================
// ExecuteQuery
// =============================================================================

/// Type of a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Facet)]
#[repr(u8)]
pub enum ValueType {
    Bytes = 1,
    String = 2,
    Int64 = 3,
    Float64 = 4,
    Bool = 5,
}

/// A single encoded value in a result set or query parameter.
#[derive(Debug, Clone, PartialEq, Facet)]
#[repr(u8)]
pub enum Value {
    Null,
    Bytes(Vec<u8>),
    String(String),
    Int64(i64),
    Float64(f64),
    Bool(bool),
}

/// Name and type of one result column.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct ColumnMetadata {
    pub name: String,
    pub value_type: ValueType,
}

/// Schema header of a query result.
#[derive(Debug, Clone, PartialEq, Eq, Default, Facet)]
pub struct ResultSetMetadata {
    pub columns: Vec<ColumnMetadata>,
}

/// A batch of values, row-major.
///
/// Values accumulate on the client until a message with a non-empty
/// `resume_token` arrives; that batch is then complete and is split into rows
/// of `columns.len()` values each. `reset` discards everything buffered since
/// the last token before this message's values are applied.
#[derive(Debug, Clone, PartialEq, Default, Facet)]
pub struct PartialResultSet {
    pub values: Vec<Value>,
    pub resume_token: Vec<u8>,
    pub reset: bool,
}

/// Request for the `ExecuteQuery` method.
#[derive(Debug, Clone, PartialEq, Default, Facet)]
pub struct ExecuteQueryRequest {
    /// Fully qualified instance name (`projects/p/instances/i`).
    pub instance_name: String,
    pub app_profile_id: String,
    pub query: String,
    pub params: Vec<(String, Value)>,
}

/// One message of an `ExecuteQuery` response stream.
#[derive(Debug, Clone, PartialEq, Facet)]
#[repr(u8)]
pub enum ExecuteQueryResponse {
    Metadata(ResultSetMetadata),
    Results(PartialResultSet),
}
