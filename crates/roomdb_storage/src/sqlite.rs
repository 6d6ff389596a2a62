//! rusqlite-backed SQL engine.

use crate::engine::{QueryOutput, SqlEngine, SqlValue};
use crate::error::{StorageError, StorageResult};
use rusqlite::backup::Backup;
use rusqlite::{params_from_iter, Connection};
use std::path::Path;
use std::time::Duration;

impl From<SqlValue> for rusqlite::types::Value {
    fn from(value: SqlValue) -> Self {
        match value {
            SqlValue::Null => rusqlite::types::Value::Null,
            SqlValue::Integer(i) => rusqlite::types::Value::Integer(i),
            SqlValue::Real(r) => rusqlite::types::Value::Real(r),
            SqlValue::Text(s) => rusqlite::types::Value::Text(s),
            SqlValue::Blob(b) => rusqlite::types::Value::Blob(b),
        }
    }
}

impl From<rusqlite::types::Value> for SqlValue {
    fn from(value: rusqlite::types::Value) -> Self {
        match value {
            rusqlite::types::Value::Null => SqlValue::Null,
            rusqlite::types::Value::Integer(i) => SqlValue::Integer(i),
            rusqlite::types::Value::Real(r) => SqlValue::Real(r),
            rusqlite::types::Value::Text(s) => SqlValue::Text(s),
            rusqlite::types::Value::Blob(b) => SqlValue::Blob(b),
        }
    }
}

/// An embedded SQL engine backed by rusqlite.
///
/// Savepoints are issued as verbatim `SAVEPOINT` / `RELEASE` /
/// `ROLLBACK TO` statements, so labels are restricted to
/// `[A-Za-z0-9_]`. Serialize and load move the whole database image
/// through the SQLite backup API via a scratch file; the backup runs on
/// this handle, so writes inside an open savepoint are captured.
pub struct SqliteEngine {
    conn: Connection,
}

impl SqliteEngine {
    /// Opens an in-memory engine.
    pub fn open_in_memory() -> StorageResult<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Opens a file-backed engine at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Ok(Self {
            conn: Connection::open(path)?,
        })
    }

    /// Opens an in-memory engine from a serialized image.
    pub fn from_image(image: &[u8]) -> StorageResult<Self> {
        let mut engine = Self::open_in_memory()?;
        engine.load(image)?;
        Ok(engine)
    }

    fn validate_label(label: &str) -> StorageResult<()> {
        let ok = !label.is_empty()
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if ok {
            Ok(())
        } else {
            Err(StorageError::invalid_label(label))
        }
    }

    fn bound_params(params: &[SqlValue]) -> impl Iterator<Item = rusqlite::types::Value> + '_ {
        params.iter().cloned().map(rusqlite::types::Value::from)
    }
}

impl SqlEngine for SqliteEngine {
    fn execute(&self, sql: &str, params: &[SqlValue]) -> StorageResult<usize> {
        Ok(self
            .conn
            .execute(sql, params_from_iter(Self::bound_params(params)))?)
    }

    fn execute_batch(&self, sql: &str) -> StorageResult<()> {
        Ok(self.conn.execute_batch(sql)?)
    }

    fn query(&self, sql: &str, params: &[SqlValue]) -> StorageResult<QueryOutput> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let column_count = stmt.column_count();
        let readonly = stmt.readonly();

        let mut out_rows = Vec::new();
        {
            let mut rows = stmt.query(params_from_iter(Self::bound_params(params)))?;
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(column_count);
                for i in 0..column_count {
                    let value: rusqlite::types::Value = row.get(i)?;
                    values.push(SqlValue::from(value));
                }
                out_rows.push(values);
            }
        }

        let rows_affected = if readonly {
            0
        } else {
            self.conn.changes() as usize
        };

        Ok(QueryOutput {
            columns,
            rows: out_rows,
            rows_affected,
        })
    }

    fn savepoint(&self, label: &str) -> StorageResult<()> {
        Self::validate_label(label)?;
        Ok(self.conn.execute_batch(&format!("SAVEPOINT {label}"))?)
    }

    fn release(&self, label: &str) -> StorageResult<()> {
        Self::validate_label(label)?;
        Ok(self
            .conn
            .execute_batch(&format!("RELEASE SAVEPOINT {label}"))?)
    }

    fn rollback_to(&self, label: &str) -> StorageResult<()> {
        Self::validate_label(label)?;
        Ok(self
            .conn
            .execute_batch(&format!("ROLLBACK TO SAVEPOINT {label}"))?)
    }

    fn serialize(&self) -> StorageResult<Vec<u8>> {
        let scratch = tempfile::NamedTempFile::new()?;
        {
            let mut dst = Connection::open(scratch.path())?;
            let backup = Backup::new(&self.conn, &mut dst)?;
            backup.run_to_completion(64, Duration::ZERO, None)?;
        }
        Ok(std::fs::read(scratch.path())?)
    }

    fn load(&mut self, image: &[u8]) -> StorageResult<()> {
        if image.is_empty() {
            return Err(StorageError::snapshot("empty engine image"));
        }

        let scratch = tempfile::NamedTempFile::new()?;
        std::fs::write(scratch.path(), image)?;
        let src = Connection::open(scratch.path())?;
        let backup = Backup::new(&src, &mut self.conn)?;
        backup.run_to_completion(64, Duration::ZERO, None)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with_table() -> SqliteEngine {
        let engine = SqliteEngine::open_in_memory().unwrap();
        engine
            .execute_batch("CREATE TABLE t (id TEXT PRIMARY KEY, v INTEGER)")
            .unwrap();
        engine
    }

    #[test]
    fn execute_and_query() {
        let engine = engine_with_table();

        let changed = engine
            .execute(
                "INSERT INTO t (id, v) VALUES (?1, ?2)",
                &["a".into(), 1i64.into()],
            )
            .unwrap();
        assert_eq!(changed, 1);

        let output = engine.query("SELECT id, v FROM t", &[]).unwrap();
        assert_eq!(output.columns, vec!["id", "v"]);
        assert_eq!(
            output.rows,
            vec![vec![SqlValue::Text("a".into()), SqlValue::Integer(1)]]
        );
        assert_eq!(output.rows_affected, 0);
    }

    #[test]
    fn savepoint_rollback_keeps_anchor() {
        let engine = engine_with_table();
        engine
            .execute(
                "INSERT INTO t (id, v) VALUES (?1, ?2)",
                &["a".into(), 1i64.into()],
            )
            .unwrap();

        engine.savepoint("cp_1").unwrap();
        engine
            .execute(
                "INSERT INTO t (id, v) VALUES (?1, ?2)",
                &["b".into(), 2i64.into()],
            )
            .unwrap();

        engine.rollback_to("cp_1").unwrap();
        let rows = engine.query("SELECT id FROM t", &[]).unwrap().rows;
        assert_eq!(rows.len(), 1);

        // The savepoint survives the rollback and can be rolled to again.
        engine
            .execute(
                "INSERT INTO t (id, v) VALUES (?1, ?2)",
                &["c".into(), 3i64.into()],
            )
            .unwrap();
        engine.rollback_to("cp_1").unwrap();
        let rows = engine.query("SELECT id FROM t", &[]).unwrap().rows;
        assert_eq!(rows.len(), 1);

        engine.release("cp_1").unwrap();
    }

    #[test]
    fn invalid_label_is_rejected() {
        let engine = engine_with_table();
        assert!(matches!(
            engine.savepoint("cp 1; DROP TABLE t"),
            Err(StorageError::InvalidLabel { .. })
        ));
        assert!(matches!(
            engine.savepoint(""),
            Err(StorageError::InvalidLabel { .. })
        ));
    }

    #[test]
    fn serialize_load_roundtrip() {
        let engine = engine_with_table();
        engine
            .execute(
                "INSERT INTO t (id, v) VALUES (?1, ?2)",
                &["a".into(), 7i64.into()],
            )
            .unwrap();

        let image = engine.serialize().unwrap();
        assert!(!image.is_empty());

        let restored = SqliteEngine::from_image(&image).unwrap();
        let rows = restored.query("SELECT v FROM t WHERE id = ?1", &["a".into()]).unwrap();
        assert_eq!(rows.rows, vec![vec![SqlValue::Integer(7)]]);
    }

    #[test]
    fn serialize_sees_writes_inside_open_savepoint() {
        let engine = engine_with_table();
        engine.savepoint("cp_0").unwrap();
        engine
            .execute(
                "INSERT INTO t (id, v) VALUES (?1, ?2)",
                &["pending".into(), 1i64.into()],
            )
            .unwrap();

        let image = engine.serialize().unwrap();
        let restored = SqliteEngine::from_image(&image).unwrap();
        let rows = restored
            .query("SELECT v FROM t WHERE id = ?1", &["pending".into()])
            .unwrap();
        assert_eq!(rows.rows, vec![vec![SqlValue::Integer(1)]]);
    }

    #[test]
    fn load_empty_image_fails() {
        let mut engine = SqliteEngine::open_in_memory().unwrap();
        assert!(matches!(
            engine.load(&[]),
            Err(StorageError::Snapshot { .. })
        ));
    }
}
