//! Checkpoint management over the engine's named savepoints.

use roomdb_storage::{SqlEngine, StorageResult};
use tracing::{debug, warn};

/// Maintains the single named savepoint anchoring the last-confirmed
/// state.
///
/// At most one checkpoint is live at a time. `savepoint_seq == 0` means
/// no checkpoint exists, the state of a fresh or just-reloaded client
/// (no savepoint survives an engine reload).
#[derive(Debug, Default)]
pub struct CheckpointManager {
    savepoint_seq: u64,
}

impl CheckpointManager {
    /// Creates a manager with no live checkpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the sequence the current checkpoint was taken at, or 0.
    pub fn savepoint_seq(&self) -> u64 {
        self.savepoint_seq
    }

    fn label(seq: u64) -> String {
        format!("cp_{seq}")
    }

    /// Establishes the checkpoint at the current engine state.
    ///
    /// Releases the previous checkpoint first; a failed release is
    /// non-fatal (the savepoint may not exist after a reload).
    pub fn establish_at(&mut self, engine: &dyn SqlEngine, seq: u64) -> StorageResult<()> {
        if self.savepoint_seq > 0 {
            let old = Self::label(self.savepoint_seq);
            if let Err(e) = engine.release(&old) {
                debug!(label = %old, error = %e, "releasing previous checkpoint failed");
            }
        }

        engine.savepoint(&Self::label(seq))?;
        self.savepoint_seq = seq;
        Ok(())
    }

    /// Rolls the engine back to the checkpoint without releasing it.
    ///
    /// With no live checkpoint this is a no-op; the caller proceeds from
    /// the current state and the checkpoint is recreated on the next
    /// advance.
    pub fn rollback(&self, engine: &dyn SqlEngine) {
        if self.savepoint_seq == 0 {
            warn!("rollback requested with no live checkpoint");
            return;
        }

        let label = Self::label(self.savepoint_seq);
        if let Err(e) = engine.rollback_to(&label) {
            warn!(label = %label, error = %e, "checkpoint rollback failed");
        }
    }

    /// Releases the checkpoint, if any, keeping all changes.
    pub fn drop_checkpoint(&mut self, engine: &dyn SqlEngine) {
        if self.savepoint_seq == 0 {
            return;
        }

        let label = Self::label(self.savepoint_seq);
        if let Err(e) = engine.release(&label) {
            debug!(label = %label, error = %e, "releasing checkpoint failed");
        }
        self.savepoint_seq = 0;
    }
}
