//! The public sync database façade.

use crate::apply;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::persist::{self, Persistence};
use crate::reconciler::{Outcome, Reconciler};
use crate::transport::{RoomConnection, RoomTransport, TransportEvent};
use roomdb_protocol::{Envelope, InputFrame, OpPayload, Operation, Scalar};
use roomdb_storage::{BlobStore, QueryOutput, SqlEngine, SqlValue};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Effects surfaced by a [`SyncDatabase`].
///
/// All methods default to no-ops; hosts implement what they observe.
/// Callbacks fire after the corresponding state transition and its
/// persistence have completed.
pub trait SyncEvents {
    /// This client was the first to open the room.
    fn on_room_create(&mut self) {}

    /// Join and hydration finished; `applied` lists the historical
    /// operations incorporated, in sequence order.
    fn on_connect(&mut self, snapshot: Option<&[u8]>, applied: &[Operation]) {
        let _ = (snapshot, applied);
    }

    /// A remote operation was applied.
    fn on_input(&mut self, op: &Operation) {
        let _ = op;
    }

    /// The room connection was lost.
    fn on_disconnect(&mut self) {}
}

/// The no-op event sink.
impl SyncEvents for () {}

/// An offline-first, room-replicated SQL database.
///
/// Local mutations apply optimistically, are recorded as pending
/// operations, and are sent to the room's authority for sequencing. The
/// authority's total order is reconciled back in via the
/// [`Reconciler`]; the engine image and operation records persist to the
/// injected [`BlobStore`] after every confirmed transition and local
/// mutation.
///
/// The database is single-threaded cooperative: hosts call [`pump`] (or
/// any public method) from one logical executor, and transport events
/// are drained by polling rather than delivered re-entrantly.
///
/// [`pump`]: SyncDatabase::pump
pub struct SyncDatabase<E: SqlEngine> {
    config: SyncConfig,
    engine: E,
    persistence: Persistence,
    reconciler: Reconciler,
    events: Box<dyn SyncEvents>,
    conn: Option<Box<dyn RoomConnection>>,
    client_id: String,
    local_seq_counter: u64,
    online: bool,
    closed: bool,
}

impl<E: SqlEngine> SyncDatabase<E> {
    /// Opens a database: restores the persisted image if one exists,
    /// allocates or loads the client id, and rebuilds the pending queue.
    ///
    /// A present-but-unrestorable image fails with
    /// [`SyncError::EngineLoadFailed`] and leaves no partial state.
    pub fn open(
        config: SyncConfig,
        mut engine: E,
        store: Box<dyn BlobStore>,
        events: Box<dyn SyncEvents>,
    ) -> SyncResult<Self> {
        let persistence = Persistence::new(store, &config.db_name);

        if let Some(image) = persistence.load_blob()? {
            engine
                .load(&image)
                .map_err(|e| SyncError::engine_load_failed(e.to_string()))?;
        }
        persist::ensure_internal_tables(&engine)?;

        let client_id = persistence.load_or_create_client_id()?;
        let local_seq_counter = persist::read_local_seq_counter(&engine)?;
        let pending = persist::load_pending_operations(&engine)?;
        debug!(
            client_id = %client_id,
            local_seq_counter,
            pending = pending.len(),
            "opened database"
        );

        Ok(Self {
            config,
            engine,
            persistence,
            reconciler: Reconciler::with_pending(pending),
            events,
            conn: None,
            client_id,
            local_seq_counter,
            online: false,
            closed: false,
        })
    }

    /// The stable client identifier.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// True while a room connection is live.
    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Number of local operations awaiting confirmation.
    pub fn pending_count(&self) -> usize {
        self.reconciler.pending_count()
    }

    /// Highest authority sequence incorporated into the confirmed state.
    pub fn confirmed_seq(&self) -> u64 {
        self.reconciler.confirmed_seq()
    }

    /// Sequence the live checkpoint was taken at, or 0.
    pub fn savepoint_seq(&self) -> u64 {
        self.reconciler.savepoint_seq()
    }

    /// Value of the persisted per-client mutation counter.
    pub fn local_seq_counter(&self) -> u64 {
        self.local_seq_counter
    }

    fn ensure_open(&self) -> SyncResult<()> {
        if self.closed {
            Err(SyncError::Closed)
        } else {
            Ok(())
        }
    }

    /// Runs DDL against the engine.
    ///
    /// Schema is assumed equal across clients and is **not** logged as an
    /// operation; only the engine image is persisted.
    pub fn create_table(&mut self, schema_sql: &str) -> SyncResult<()> {
        self.ensure_open()?;
        self.engine.execute_batch(schema_sql)?;
        self.persistence.save_blob(&self.engine)?;
        Ok(())
    }

    /// Inserts a row, replicating the mutation to the room.
    pub fn insert(&mut self, table: &str, columns: BTreeMap<String, Scalar>) -> SyncResult<()> {
        self.mutate(table, OpPayload::Insert { columns })
    }

    /// Updates rows matching the equality predicate.
    pub fn update(
        &mut self,
        table: &str,
        set: BTreeMap<String, Scalar>,
        predicate: BTreeMap<String, Scalar>,
    ) -> SyncResult<()> {
        self.mutate(table, OpPayload::Update { set, predicate })
    }

    /// Deletes rows matching the equality predicate.
    pub fn delete(&mut self, table: &str, predicate: BTreeMap<String, Scalar>) -> SyncResult<()> {
        self.mutate(table, OpPayload::Delete { predicate })
    }

    /// Runs a read-only query against the local state.
    pub fn query(&self, sql: &str, params: &[SqlValue]) -> SyncResult<QueryOutput> {
        self.ensure_open()?;
        Ok(self.engine.query(sql, params)?)
    }

    /// Connects to the configured room and hydrates from its history.
    ///
    /// Processing the join runs to completion before this returns: the
    /// historical inputs are reconciled, the checkpoint is established,
    /// and the pending queue is flushed to the authority.
    pub fn connect(&mut self, transport: &dyn RoomTransport) -> SyncResult<()> {
        self.ensure_open()?;
        let conn = transport.connect(&self.config.server_url, &self.config.room_id)?;
        self.conn = Some(conn);
        self.online = true;
        self.pump()
    }

    /// Drains and handles all queued transport events.
    pub fn pump(&mut self) -> SyncResult<()> {
        self.ensure_open()?;
        loop {
            let event = match self.conn.as_mut() {
                Some(conn) => conn.poll(),
                None => None,
            };
            match event {
                Some(event) => self.handle_event(event)?,
                None => break,
            }
        }
        Ok(())
    }

    /// Persists, disconnects, and marks the database closed.
    ///
    /// Closing twice is a no-op.
    pub fn close(&mut self) -> SyncResult<()> {
        if self.closed {
            return Ok(());
        }

        self.persistence.save_blob(&self.engine)?;
        if let Some(mut conn) = self.conn.take() {
            conn.close();
        }
        self.online = false;
        self.closed = true;
        Ok(())
    }

    fn mutate(&mut self, table: &str, payload: OpPayload) -> SyncResult<()> {
        self.ensure_open()?;

        let local_seq = self.local_seq_counter + 1;
        let op = Operation {
            id: format!("{}_{}_{}", self.client_id, local_seq, wallclock_ms()),
            client_id: self.client_id.clone(),
            local_seq,
            seq: 0,
            table: table.to_string(),
            payload,
        };

        // Strict apply: a malformed mutation surfaces to the caller and
        // is neither logged nor broadcast.
        apply::apply(&self.engine, &op)?;
        self.local_seq_counter = local_seq;

        self.reconciler.record_local(op.clone());
        persist::record_operation(&self.engine, &op, false)?;
        persist::write_local_seq_counter(&self.engine, self.local_seq_counter)?;
        self.persistence.save_blob(&self.engine)?;

        if self.online {
            self.send_envelope(&Envelope::op(op));
        }
        Ok(())
    }

    fn handle_event(&mut self, event: TransportEvent) -> SyncResult<()> {
        match event {
            TransportEvent::RoomCreated => {
                self.events.on_room_create();
            }
            TransportEvent::Joined { snapshot, inputs } => {
                self.hydrate(snapshot, inputs)?;
            }
            TransportEvent::Input(frame) => {
                self.handle_input(frame)?;
            }
            TransportEvent::Disconnected => {
                self.online = false;
                self.events.on_disconnect();
            }
            TransportEvent::Reconnected => {
                self.online = true;
                self.flush_pending();
            }
        }
        Ok(())
    }

    /// Incorporates the room's historical prefix, then announces the
    /// connection and flushes pending operations.
    ///
    /// The snapshot is carried to the host untouched; hydration relies on
    /// replaying the sequenced inputs.
    fn hydrate(&mut self, snapshot: Option<Vec<u8>>, mut inputs: Vec<InputFrame>) -> SyncResult<()> {
        inputs.sort_by_key(|frame| frame.seq);

        let mut applied = Vec::new();
        for frame in inputs {
            match frame.into_operation() {
                Ok(Some(op)) => {
                    let outcome = self.reconciler.ingest(&self.engine, op);
                    self.record_outcome(&outcome)?;
                    match outcome {
                        Outcome::Duplicate => {}
                        Outcome::ConfirmedLocal { op }
                        | Outcome::AppliedRemote { op, .. }
                        | Outcome::GapAhead { op, .. } => applied.push(op),
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "skipping undecodable join input"),
            }
        }

        self.reconciler.finish_hydration(&self.engine);
        self.persistence.save_blob(&self.engine)?;
        self.flush_pending();
        self.events.on_connect(snapshot.as_deref(), &applied);
        Ok(())
    }

    fn handle_input(&mut self, frame: InputFrame) -> SyncResult<()> {
        let op = match frame.into_operation() {
            Ok(Some(op)) => op,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!(error = %e, "skipping undecodable input");
                return Ok(());
            }
        };

        let outcome = self.reconciler.ingest(&self.engine, op);
        self.record_outcome(&outcome)?;
        if !matches!(outcome, Outcome::Duplicate) {
            self.persistence.save_blob(&self.engine)?;
        }

        match &outcome {
            Outcome::AppliedRemote { op, .. } => self.events.on_input(op),
            Outcome::GapAhead {
                op,
                was_local: false,
                ..
            } => self.events.on_input(op),
            _ => {}
        }
        Ok(())
    }

    /// Writes the confirmed operation row for a non-duplicate outcome.
    fn record_outcome(&self, outcome: &Outcome) -> SyncResult<()> {
        match outcome {
            Outcome::Duplicate => Ok(()),
            Outcome::ConfirmedLocal { op }
            | Outcome::AppliedRemote { op, .. }
            | Outcome::GapAhead { op, .. } => persist::record_operation(&self.engine, op, true),
        }
    }

    /// Sends every pending operation in `local_seq` order.
    fn flush_pending(&mut self) {
        let pending: Vec<Operation> = self.reconciler.oplog().pending().cloned().collect();
        for op in pending {
            if !self.send_envelope(&Envelope::op(op)) {
                break;
            }
        }
    }

    fn send_envelope(&mut self, envelope: &Envelope) -> bool {
        let Some(conn) = self.conn.as_mut() else {
            return false;
        };

        match conn.send(envelope) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "send failed; going offline");
                self.online = false;
                false
            }
        }
    }
}

fn wallclock_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomdb_storage::{MemoryBlobStore, SqliteEngine};

    fn columns(pairs: &[(&str, Scalar)]) -> BTreeMap<String, Scalar> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn open_db(store: MemoryBlobStore) -> SyncDatabase<SqliteEngine> {
        let engine = SqliteEngine::open_in_memory().unwrap();
        SyncDatabase::open(
            SyncConfig::new("testdb"),
            engine,
            Box::new(store),
            Box::new(()),
        )
        .unwrap()
    }

    #[test]
    fn fresh_database_state() {
        let db = open_db(MemoryBlobStore::new());

        assert!(!db.is_online());
        assert_eq!(db.pending_count(), 0);
        assert_eq!(db.confirmed_seq(), 0);
        assert_eq!(db.local_seq_counter(), 0);
        assert!(!db.client_id().is_empty());
    }

    #[test]
    fn local_mutations_advance_the_counter() {
        let mut db = open_db(MemoryBlobStore::new());
        db.create_table("CREATE TABLE t (id TEXT PRIMARY KEY, v INTEGER)")
            .unwrap();

        db.insert("t", columns(&[("id", "a".into()), ("v", 1i64.into())]))
            .unwrap();
        db.update(
            "t",
            columns(&[("v", 2i64.into())]),
            columns(&[("id", "a".into())]),
        )
        .unwrap();

        assert_eq!(db.local_seq_counter(), 2);
        assert_eq!(db.pending_count(), 2);

        let seqs: Vec<u64> = db
            .reconciler
            .oplog()
            .pending()
            .map(|op| op.local_seq)
            .collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn malformed_mutation_is_not_logged() {
        let mut db = open_db(MemoryBlobStore::new());
        db.create_table("CREATE TABLE t (id TEXT PRIMARY KEY)").unwrap();

        let result = db.insert("no_such_table", columns(&[("id", "a".into())]));
        assert!(result.is_err());

        assert_eq!(db.pending_count(), 0);
        assert_eq!(db.local_seq_counter(), 0);
    }

    #[test]
    fn query_reads_local_state() {
        let mut db = open_db(MemoryBlobStore::new());
        db.create_table("CREATE TABLE t (id TEXT PRIMARY KEY, v INTEGER)")
            .unwrap();
        db.insert("t", columns(&[("id", "a".into()), ("v", 1i64.into())]))
            .unwrap();

        let output = db.query("SELECT v FROM t WHERE id = ?1", &["a".into()]).unwrap();
        assert_eq!(output.rows, vec![vec![SqlValue::Integer(1)]]);
    }

    #[test]
    fn closed_database_rejects_calls() {
        let mut db = open_db(MemoryBlobStore::new());
        db.close().unwrap();
        db.close().unwrap();

        assert!(matches!(
            db.query("SELECT 1", &[]),
            Err(SyncError::Closed)
        ));
        assert!(matches!(
            db.insert("t", BTreeMap::new()),
            Err(SyncError::Closed)
        ));
    }

    #[test]
    fn client_id_survives_reopen() {
        let store = MemoryBlobStore::new();

        let mut db = open_db(store.clone());
        let id = db.client_id().to_string();
        db.close().unwrap();

        let db = open_db(store);
        assert_eq!(db.client_id(), id);
    }

    #[test]
    fn corrupt_image_fails_open() {
        let store = MemoryBlobStore::new();
        store.put("testdb/db_blob", b"not a database image").unwrap();

        let engine = SqliteEngine::open_in_memory().unwrap();
        let result = SyncDatabase::open(
            SyncConfig::new("testdb"),
            engine,
            Box::new(store),
            Box::new(()),
        );
        assert!(matches!(result, Err(SyncError::EngineLoadFailed { .. })));
    }
}
