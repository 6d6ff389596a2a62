//! Persistence of engine images, identity, and operation records.

use crate::error::SyncResult;
use roomdb_protocol::{OpKind, OpPayload, Operation};
use roomdb_storage::{BlobStore, SqlEngine, SqlValue};
use tracing::warn;

const BLOB_KEY: &str = "db_blob";
const CLIENT_ID_KEY: &str = "client_id";
const LOCAL_SEQ_COUNTER: &str = "local_seq_counter";

/// Blob-store persistence for one database, namespaced by name.
pub struct Persistence {
    store: Box<dyn BlobStore>,
    namespace: String,
}

impl Persistence {
    /// Creates a persistence handle over the given store.
    pub fn new(store: Box<dyn BlobStore>, db_name: &str) -> Self {
        Self {
            store,
            namespace: db_name.to_string(),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}/{}", self.namespace, name)
    }

    /// Loads the persisted engine image, if one exists.
    pub fn load_blob(&self) -> SyncResult<Option<Vec<u8>>> {
        Ok(self.store.get(&self.key(BLOB_KEY))?)
    }

    /// Serializes the engine and writes the image to the store.
    pub fn save_blob(&self, engine: &dyn SqlEngine) -> SyncResult<()> {
        let image = engine.serialize()?;
        self.store.put(&self.key(BLOB_KEY), &image)?;
        Ok(())
    }

    /// Returns the stable client identifier, allocating one on first use.
    pub fn load_or_create_client_id(&self) -> SyncResult<String> {
        let key = self.key(CLIENT_ID_KEY);
        if let Some(bytes) = self.store.get(&key)? {
            if let Ok(id) = String::from_utf8(bytes) {
                return Ok(id);
            }
            warn!("stored client id is not UTF-8; reallocating");
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.store.put(&key, id.as_bytes())?;
        Ok(id)
    }
}

/// Creates the engine-internal metadata and operation tables.
pub fn ensure_internal_tables(engine: &dyn SqlEngine) -> SyncResult<()> {
    engine.execute_batch(
        "CREATE TABLE IF NOT EXISTS _meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS _ops (
            id TEXT PRIMARY KEY,
            seq INTEGER NOT NULL,
            local_seq INTEGER NOT NULL,
            table_name TEXT NOT NULL,
            op_type TEXT NOT NULL,
            data TEXT NOT NULL,
            client_id TEXT NOT NULL,
            confirmed INTEGER NOT NULL
        );",
    )?;
    Ok(())
}

/// Records an operation row, replacing any previous row with the same id.
///
/// Pending operations write `confirmed = 0` and `seq = 0`; confirmation
/// overwrites the same row with the assigned sequence.
pub fn record_operation(engine: &dyn SqlEngine, op: &Operation, confirmed: bool) -> SyncResult<()> {
    let data = serde_json::to_string(&op.payload)
        .map_err(roomdb_protocol::ProtocolError::from)?;

    engine.execute(
        "INSERT OR REPLACE INTO _ops
            (id, seq, local_seq, table_name, op_type, data, client_id, confirmed)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        &[
            op.id.as_str().into(),
            SqlValue::Integer(op.seq as i64),
            SqlValue::Integer(op.local_seq as i64),
            op.table.as_str().into(),
            op.kind().as_str().into(),
            data.as_str().into(),
            op.client_id.as_str().into(),
            SqlValue::Integer(i64::from(confirmed)),
        ],
    )?;
    Ok(())
}

/// Rebuilds the pending queue from persisted unconfirmed rows.
///
/// Rows that fail to decode, carry an unknown `op_type` tag, or whose
/// tag disagrees with the stored payload are skipped with a warning
/// rather than poisoning the reload.
pub fn load_pending_operations(engine: &dyn SqlEngine) -> SyncResult<Vec<Operation>> {
    let output = engine.query(
        "SELECT id, local_seq, table_name, op_type, data, client_id
         FROM _ops WHERE confirmed = 0 ORDER BY local_seq",
        &[],
    )?;

    let mut pending = Vec::with_capacity(output.rows.len());
    for row in &output.rows {
        match decode_pending_row(row) {
            Some(op) => pending.push(op),
            None => warn!("skipping undecodable pending operation row"),
        }
    }
    Ok(pending)
}

fn decode_pending_row(row: &[SqlValue]) -> Option<Operation> {
    let id = row.first()?.as_text()?.to_string();
    let local_seq = row.get(1)?.as_integer()?;
    let table = row.get(2)?.as_text()?.to_string();
    let kind = OpKind::from_str(row.get(3)?.as_text()?)?;
    let payload: OpPayload = serde_json::from_str(row.get(4)?.as_text()?).ok()?;
    if payload.kind() != kind {
        return None;
    }
    let client_id = row.get(5)?.as_text()?.to_string();

    Some(Operation {
        id,
        client_id,
        local_seq: local_seq as u64,
        seq: 0,
        table,
        payload,
    })
}

/// Reads the persisted local sequence counter, defaulting to 0.
pub fn read_local_seq_counter(engine: &dyn SqlEngine) -> SyncResult<u64> {
    let output = engine.query(
        "SELECT value FROM _meta WHERE key = ?1",
        &[LOCAL_SEQ_COUNTER.into()],
    )?;

    let value = output
        .rows
        .first()
        .and_then(|row| row[0].as_text())
        .and_then(|text| text.parse().ok())
        .unwrap_or(0);
    Ok(value)
}

/// Persists the local sequence counter.
pub fn write_local_seq_counter(engine: &dyn SqlEngine, value: u64) -> SyncResult<()> {
    engine.execute(
        "INSERT OR REPLACE INTO _meta (key, value) VALUES (?1, ?2)",
        &[LOCAL_SEQ_COUNTER.into(), value.to_string().as_str().into()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomdb_protocol::Scalar;
    use roomdb_storage::{MemoryBlobStore, SqliteEngine};
    use std::collections::BTreeMap;

    fn make_op(local_seq: u64) -> Operation {
        let mut columns = BTreeMap::new();
        columns.insert("id".to_string(), Scalar::Text(format!("row{local_seq}")));
        Operation::insert(
            format!("c1_{local_seq}_0"),
            "c1",
            local_seq,
            "t",
            columns,
        )
    }

    fn prepared_engine() -> SqliteEngine {
        let engine = SqliteEngine::open_in_memory().unwrap();
        ensure_internal_tables(&engine).unwrap();
        engine
    }

    #[test]
    fn ensure_internal_tables_is_idempotent() {
        let engine = prepared_engine();
        ensure_internal_tables(&engine).unwrap();
    }

    #[test]
    fn pending_rows_roundtrip() {
        let engine = prepared_engine();

        record_operation(&engine, &make_op(2), false).unwrap();
        record_operation(&engine, &make_op(1), false).unwrap();

        let pending = load_pending_operations(&engine).unwrap();
        let seqs: Vec<u64> = pending.iter().map(|op| op.local_seq).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert_eq!(pending[0], make_op(1));
    }

    #[test]
    fn corrupted_op_type_rows_are_skipped() {
        let engine = prepared_engine();
        record_operation(&engine, &make_op(1), false).unwrap();

        // A row whose tag disagrees with its payload.
        engine
            .execute(
                "INSERT INTO _ops VALUES (?1, 0, 2, 't', 'DELETE', ?2, 'c1', 0)",
                &[
                    "c1_2_0".into(),
                    r#"{"type":"INSERT","columns":{"id":"x"}}"#.into(),
                ],
            )
            .unwrap();
        // A row with a tag no client ever writes.
        engine
            .execute(
                "INSERT INTO _ops VALUES (?1, 0, 3, 't', 'MERGE', ?2, 'c1', 0)",
                &[
                    "c1_3_0".into(),
                    r#"{"type":"INSERT","columns":{"id":"y"}}"#.into(),
                ],
            )
            .unwrap();

        let pending = load_pending_operations(&engine).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "c1_1_0");
    }

    #[test]
    fn confirmation_overwrites_the_pending_row() {
        let engine = prepared_engine();
        let op = make_op(1);

        record_operation(&engine, &op, false).unwrap();
        record_operation(&engine, &op.clone().with_seq(9), true).unwrap();

        assert!(load_pending_operations(&engine).unwrap().is_empty());

        let output = engine
            .query("SELECT seq, confirmed FROM _ops WHERE id = ?1", &[op.id.as_str().into()])
            .unwrap();
        assert_eq!(output.rows[0][0].as_integer(), Some(9));
        assert_eq!(output.rows[0][1].as_integer(), Some(1));
    }

    #[test]
    fn counter_roundtrip() {
        let engine = prepared_engine();
        assert_eq!(read_local_seq_counter(&engine).unwrap(), 0);

        write_local_seq_counter(&engine, 7).unwrap();
        assert_eq!(read_local_seq_counter(&engine).unwrap(), 7);

        write_local_seq_counter(&engine, 8).unwrap();
        assert_eq!(read_local_seq_counter(&engine).unwrap(), 8);
    }

    #[test]
    fn client_id_is_stable() {
        let store = MemoryBlobStore::new();
        let persistence = Persistence::new(Box::new(store.clone()), "mydb");

        let first = persistence.load_or_create_client_id().unwrap();
        let second = persistence.load_or_create_client_id().unwrap();
        assert_eq!(first, second);

        // A different namespace allocates its own id.
        let other = Persistence::new(Box::new(store), "otherdb");
        assert_ne!(other.load_or_create_client_id().unwrap(), first);
    }

    #[test]
    fn blob_save_and_load() {
        let store = MemoryBlobStore::new();
        let persistence = Persistence::new(Box::new(store.clone()), "mydb");
        assert!(persistence.load_blob().unwrap().is_none());

        let engine = prepared_engine();
        record_operation(&engine, &make_op(1), false).unwrap();
        persistence.save_blob(&engine).unwrap();

        let image = persistence.load_blob().unwrap().unwrap();
        let restored = SqliteEngine::from_image(&image).unwrap();
        assert_eq!(load_pending_operations(&restored).unwrap().len(), 1);
    }
}
