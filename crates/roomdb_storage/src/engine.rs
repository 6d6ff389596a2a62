//! SQL engine trait definition.

use crate::error::StorageResult;
use std::collections::BTreeMap;

/// A value bound to or read from the SQL engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Returns the text content, if this value is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer content, if this value is an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        SqlValue::Integer(i)
    }
}

/// Result of a query against the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    /// Column names, in select order.
    pub columns: Vec<String>,
    /// Result rows; each row has one value per column.
    pub rows: Vec<Vec<SqlValue>>,
    /// Rows changed, for statements that mutate; 0 for reads.
    pub rows_affected: usize,
}

impl QueryOutput {
    /// Returns the rows as column-name → value maps.
    pub fn row_maps(&self) -> Vec<BTreeMap<String, SqlValue>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }
}

/// An embedded SQL engine.
///
/// The engine is an **external collaborator**: roomdb drives it through
/// this seam and owns no SQL semantics of its own. Implementations
/// provide parameterized execution, named savepoints, and whole-image
/// serialize/load.
///
/// # Invariants
///
/// - `execute` and `query` bind `params` positionally (`?1`, `?2`, …)
/// - Savepoint labels are engine-verbatim: `savepoint(l)` followed by
///   `rollback_to(l)` restores the state at the savepoint without
///   releasing it
/// - `serialize` captures the engine state as seen by this handle,
///   including writes inside an open savepoint; `load` replaces the
///   current contents with a previously serialized image
///
/// # Implementors
///
/// - [`super::SqliteEngine`] - rusqlite-backed engine
pub trait SqlEngine {
    /// Executes a single mutating statement, returning rows changed.
    fn execute(&self, sql: &str, params: &[SqlValue]) -> StorageResult<usize>;

    /// Executes a batch of statements with no parameters (DDL).
    fn execute_batch(&self, sql: &str) -> StorageResult<()>;

    /// Runs a query and collects its full result set.
    fn query(&self, sql: &str, params: &[SqlValue]) -> StorageResult<QueryOutput>;

    /// Creates a named savepoint at the current state.
    fn savepoint(&self, label: &str) -> StorageResult<()>;

    /// Releases a named savepoint, keeping all changes made since.
    fn release(&self, label: &str) -> StorageResult<()>;

    /// Rolls back to a named savepoint without releasing it.
    fn rollback_to(&self, label: &str) -> StorageResult<()>;

    /// Serializes the full engine state to bytes.
    fn serialize(&self) -> StorageResult<Vec<u8>>;

    /// Replaces the engine contents with a serialized image.
    fn load(&mut self, image: &[u8]) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_output_row_maps() {
        let output = QueryOutput {
            columns: vec!["id".into(), "v".into()],
            rows: vec![
                vec![SqlValue::Text("a".into()), SqlValue::Integer(1)],
                vec![SqlValue::Text("b".into()), SqlValue::Integer(2)],
            ],
            rows_affected: 0,
        };

        let maps = output.row_maps();
        assert_eq!(maps.len(), 2);
        assert_eq!(maps[0]["id"], SqlValue::Text("a".into()));
        assert_eq!(maps[1]["v"], SqlValue::Integer(2));
    }

    #[test]
    fn sql_value_accessors() {
        assert_eq!(SqlValue::from("x").as_text(), Some("x"));
        assert_eq!(SqlValue::from(3i64).as_integer(), Some(3));
        assert_eq!(SqlValue::Null.as_text(), None);
    }
}
