//! Query result assembly.

use rowstream_protocol::{
    ColumnMetadata, ExecuteQueryResponse, PartialResultSet, ResultSetMetadata, Value, ValueType,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("result values arrived before the metadata header")]
    ResultsBeforeMetadata,
    #[error("metadata header sent twice")]
    DuplicateMetadata,
    #[error("batch of {values} values does not divide into rows of {columns} columns")]
    IncompleteRow { values: usize, columns: usize },
    #[error("stream ended with {values} values not closed by a resume token")]
    TrailingValues { values: usize },
    #[error("column {column:?} expects {expected:?}, got {got}")]
    TypeMismatch {
        column: String,
        expected: ValueType,
        got: &'static str,
    },
}

/// Metadata plus the complete rows of one query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResult {
    pub metadata: ResultSetMetadata,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.metadata.columns
    }

    /// Value of column `name` in row `row`.
    pub fn get(&self, row: usize, name: &str) -> Option<&Value> {
        let index = self.metadata.columns.iter().position(|c| c.name == name)?;
        self.rows.get(row)?.get(index)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bytes(_) => "bytes",
        Value::String(_) => "string",
        Value::Int64(_) => "int64",
        Value::Float64(_) => "float64",
        Value::Bool(_) => "bool",
    }
}

fn matches_type(value: &Value, expected: ValueType) -> bool {
    matches!(
        (value, expected),
        (Value::Null, _)
            | (Value::Bytes(_), ValueType::Bytes)
            | (Value::String(_), ValueType::String)
            | (Value::Int64(_), ValueType::Int64)
            | (Value::Float64(_), ValueType::Float64)
            | (Value::Bool(_), ValueType::Bool)
    )
}

/// Turns an `ExecuteQuery` response stream into a [`QueryResult`].
#[derive(Debug, Default)]
pub struct QueryAssembler {
    metadata: Option<ResultSetMetadata>,
    buffered: Vec<Value>,
    rows: Vec<Vec<Value>>,
}

impl QueryAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metadata(&self) -> Option<&ResultSetMetadata> {
        self.metadata.as_ref()
    }

    pub fn push(&mut self, response: ExecuteQueryResponse) -> Result<(), QueryError> {
        match response {
            ExecuteQueryResponse::Metadata(metadata) => {
                if self.metadata.is_some() {
                    return Err(QueryError::DuplicateMetadata);
                }
                self.metadata = Some(metadata);
                Ok(())
            }
            ExecuteQueryResponse::Results(batch) => self.push_results(batch),
        }
    }

    fn push_results(&mut self, batch: PartialResultSet) -> Result<(), QueryError> {
        let Some(metadata) = &self.metadata else {
            return Err(QueryError::ResultsBeforeMetadata);
        };
        if batch.reset {
            self.buffered.clear();
        }
        self.buffered.extend(batch.values);
        if batch.resume_token.is_empty() {
            return Ok(());
        }

        let columns = metadata.columns.len();
        if self.buffered.is_empty() {
            return Ok(());
        }
        if columns == 0 || self.buffered.len() % columns != 0 {
            return Err(QueryError::IncompleteRow {
                values: self.buffered.len(),
                columns,
            });
        }
        for (i, value) in self.buffered.iter().enumerate() {
            let column = &metadata.columns[i % columns];
            if !matches_type(value, column.value_type) {
                return Err(QueryError::TypeMismatch {
                    column: column.name.clone(),
                    expected: column.value_type,
                    got: type_name(value),
                });
            }
        }

        let mut values = std::mem::take(&mut self.buffered).into_iter();
        while values.len() > 0 {
            self.rows.push(values.by_ref().take(columns).collect());
        }
        Ok(())
    }

    /// The assembled result once the stream ended with an OK status.
    pub fn finish(self) -> Result<QueryResult, QueryError> {
        if !self.buffered.is_empty() {
            return Err(QueryError::TrailingValues {
                values: self.buffered.len(),
            });
        }
        Ok(QueryResult {
            metadata: self.metadata.unwrap_or_default(),
            rows: self.rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(columns: &[(&str, ValueType)]) -> ExecuteQueryResponse {
        ExecuteQueryResponse::Metadata(ResultSetMetadata {
            columns: columns
                .iter()
                .map(|(name, value_type)| ColumnMetadata {
                    name: name.to_string(),
                    value_type: *value_type,
                })
                .collect(),
        })
    }

    fn results(token: &str, values: Vec<Value>) -> ExecuteQueryResponse {
        ExecuteQueryResponse::Results(PartialResultSet {
            values,
            resume_token: token.as_bytes().to_vec(),
            reset: false,
        })
    }

    #[test]
    fn metadata_only_is_an_empty_result() {
        let mut assembler = QueryAssembler::new();
        assembler.push(metadata(&[("test", ValueType::String)])).unwrap();
        let result = assembler.finish().unwrap();
        assert_eq!(result.columns().len(), 1);
        assert!(result.rows.is_empty());
    }

    #[test]
    fn single_simple_row() {
        let mut assembler = QueryAssembler::new();
        assembler.push(metadata(&[("test", ValueType::String)])).unwrap();
        assembler
            .push(results("token", vec![Value::String("foo".into())]))
            .unwrap();
        let result = assembler.finish().unwrap();
        assert_eq!(result.rows, vec![vec![Value::String("foo".into())]]);
        assert_eq!(result.get(0, "test"), Some(&Value::String("foo".into())));
        assert_eq!(result.get(0, "missing"), None);
    }

    #[test]
    fn values_buffer_until_resume_token() {
        let mut assembler = QueryAssembler::new();
        assembler
            .push(metadata(&[("k", ValueType::Bytes), ("n", ValueType::Int64)]))
            .unwrap();
        assembler
            .push(results("", vec![Value::Bytes(b"a".to_vec()), Value::Int64(1)]))
            .unwrap();
        assembler
            .push(results("t1", vec![Value::Bytes(b"b".to_vec()), Value::Null]))
            .unwrap();
        let result = assembler.finish().unwrap();
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[1][1], Value::Null);
    }

    #[test]
    fn reset_drops_unclosed_values() {
        let mut assembler = QueryAssembler::new();
        assembler.push(metadata(&[("n", ValueType::Int64)])).unwrap();
        assembler.push(results("", vec![Value::Int64(1)])).unwrap();
        assembler
            .push(ExecuteQueryResponse::Results(PartialResultSet {
                values: vec![Value::Int64(2)],
                resume_token: b"t".to_vec(),
                reset: true,
            }))
            .unwrap();
        assert_eq!(assembler.finish().unwrap().rows, vec![vec![Value::Int64(2)]]);
    }

    #[test]
    fn framing_errors() {
        let mut assembler = QueryAssembler::new();
        assert_eq!(
            assembler.push(results("t", vec![Value::Int64(1)])),
            Err(QueryError::ResultsBeforeMetadata)
        );

        let mut assembler = QueryAssembler::new();
        assembler.push(metadata(&[])).unwrap();
        assert_eq!(
            assembler.push(metadata(&[])),
            Err(QueryError::DuplicateMetadata)
        );

        let mut assembler = QueryAssembler::new();
        assembler
            .push(metadata(&[("a", ValueType::Int64), ("b", ValueType::Int64)]))
            .unwrap();
        assert_eq!(
            assembler.push(results("t", vec![Value::Int64(1)])),
            Err(QueryError::IncompleteRow { values: 1, columns: 2 })
        );

        let mut assembler = QueryAssembler::new();
        assembler.push(metadata(&[("a", ValueType::Int64)])).unwrap();
        assert!(matches!(
            assembler.push(results("t", vec![Value::Bool(true)])),
            Err(QueryError::TypeMismatch { got: "bool", .. })
        ));

        let mut assembler = QueryAssembler::new();
        assembler.push(metadata(&[("a", ValueType::Int64)])).unwrap();
        assembler.push(results("", vec![Value::Int64(1)])).unwrap();
        assert_eq!(
            assembler.finish(),
            Err(QueryError::TrailingValues { values: 1 })
        );
    }
}
