//! Reconciling authority order with optimistic local order.

use crate::apply;
use crate::checkpoint::CheckpointManager;
use roomdb_protocol::{OpLog, Operation};
use roomdb_storage::SqlEngine;
use tracing::{debug, trace, warn};

/// How the reconciler handled one authority-ordered arrival.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Already incorporated; dropped with no state change.
    Duplicate,
    /// A locally-pending operation was confirmed in order; the optimistic
    /// state already reflected it, so nothing was re-applied.
    ConfirmedLocal {
        /// The operation, now carrying its authority sequence.
        op: Operation,
    },
    /// A remote operation was applied in order.
    AppliedRemote {
        /// The applied operation.
        op: Operation,
        /// True when pending operations had to be rolled back and
        /// replayed on top of the remote effect.
        replayed: bool,
    },
    /// The arrival skipped ahead of the expected sequence; it was
    /// incorporated best-effort and the checkpoint left untouched.
    GapAhead {
        /// The operation as incorporated.
        op: Operation,
        /// The sequence this client expected next.
        expected: u64,
        /// True when the arrival confirmed a locally-pending operation.
        was_local: bool,
    },
}

/// The reconciler state machine.
///
/// Accepts operations in authority order and keeps the engine state equal
/// to (confirmed log in `seq` order) overlaid by (pending queue in
/// `local_seq` order). When a remote operation lands while local
/// operations are pending, the optimistic interleaving is wrong (the
/// remote effect must precede the pendings), so the reconciler rolls
/// back to the checkpoint, applies the remote operation, and replays the
/// pending queue.
///
/// `ingest` never propagates engine errors: failed applies and checkpoint
/// maintenance are logged and swallowed so a single bad operation cannot
/// stall the sequence.
#[derive(Debug, Default)]
pub struct Reconciler {
    confirmed_seq: u64,
    oplog: OpLog,
    checkpoint: CheckpointManager,
}

impl Reconciler {
    /// Creates a reconciler with no confirmed state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a reconciler whose pending queue is rebuilt from persisted
    /// operations (in `local_seq` order).
    ///
    /// `confirmed_seq` restarts at 0: no checkpoint survives a reload, and
    /// the confirmed prefix is re-delivered on the next join.
    pub fn with_pending(pending: Vec<Operation>) -> Self {
        let mut oplog = OpLog::new();
        for op in pending {
            oplog.append_pending(op);
        }
        Self {
            confirmed_seq: 0,
            oplog,
            checkpoint: CheckpointManager::new(),
        }
    }

    /// Highest sequence incorporated into the confirmed state.
    pub fn confirmed_seq(&self) -> u64 {
        self.confirmed_seq
    }

    /// Sequence the live checkpoint was taken at, or 0.
    pub fn savepoint_seq(&self) -> u64 {
        self.checkpoint.savepoint_seq()
    }

    /// The operation log.
    pub fn oplog(&self) -> &OpLog {
        &self.oplog
    }

    /// Records a locally-created operation as pending.
    ///
    /// The caller has already applied it optimistically.
    pub fn record_local(&mut self, op: Operation) {
        self.oplog.append_pending(op);
    }

    /// Number of operations awaiting confirmation.
    pub fn pending_count(&self) -> usize {
        self.oplog.pending_count()
    }

    /// Accepts one authority-ordered operation and reconciles it.
    pub fn ingest(&mut self, engine: &dyn SqlEngine, op: Operation) -> Outcome {
        if op.seq == 0 {
            warn!(op_id = %op.id, "dropping unsequenced arrival");
            return Outcome::Duplicate;
        }

        if op.seq <= self.confirmed_seq {
            trace!(seq = op.seq, confirmed = self.confirmed_seq, "duplicate arrival");
            return Outcome::Duplicate;
        }

        let expected = self.confirmed_seq + 1;
        let is_local = self.oplog.contains_pending(&op.id);

        if op.seq == expected {
            if is_local {
                self.confirm_local(engine, op)
            } else {
                self.apply_remote(engine, op)
            }
        } else {
            self.accept_gap(engine, op, expected, is_local)
        }
    }

    /// In-order confirmation of a locally-pending operation.
    ///
    /// The optimistic state already reflects the operation and its order
    /// relative to the remaining pendings is unchanged, so no replay is
    /// needed.
    fn confirm_local(&mut self, engine: &dyn SqlEngine, op: Operation) -> Outcome {
        let confirmed = match self.oplog.confirm(&op.id, op.seq) {
            Some(confirmed) => confirmed,
            None => {
                // contains_pending was just checked; fall back to the
                // arrival itself rather than dropping the sequence.
                self.oplog.append_confirmed(op.clone());
                op
            }
        };

        self.confirmed_seq = confirmed.seq;
        self.reestablish_checkpoint(engine);
        debug!(seq = confirmed.seq, op_id = %confirmed.id, "confirmed local operation");
        Outcome::ConfirmedLocal { op: confirmed }
    }

    /// In-order apply of a remote operation, replaying pendings when the
    /// optimistic interleaving is stale.
    fn apply_remote(&mut self, engine: &dyn SqlEngine, op: Operation) -> Outcome {
        self.oplog.append_confirmed(op.clone());
        self.confirmed_seq = op.seq;

        let replayed = self.oplog.pending_count() > 0;
        if replayed {
            self.checkpoint.rollback(engine);
            apply::apply_best_effort(engine, &op);
            for pending in self.oplog.pending() {
                apply::apply_best_effort(engine, pending);
            }
        } else {
            apply::apply_best_effort(engine, &op);
        }

        self.reestablish_checkpoint(engine);
        debug!(seq = op.seq, op_id = %op.id, replayed, "applied remote operation");
        Outcome::AppliedRemote { op, replayed }
    }

    /// Out-of-order arrival ahead of the expected sequence.
    ///
    /// Incorporated best-effort; the checkpoint stays at its previous
    /// anchor because checkpoint anchors are meant to be gap-free.
    fn accept_gap(
        &mut self,
        engine: &dyn SqlEngine,
        op: Operation,
        expected: u64,
        was_local: bool,
    ) -> Outcome {
        warn!(
            expected,
            got = op.seq,
            op_id = %op.id,
            "sequence gap; incorporating without checkpoint advance"
        );

        if was_local {
            self.oplog.confirm(&op.id, op.seq);
        } else {
            apply::apply_best_effort(engine, &op);
            self.oplog.append_confirmed(op.clone());
        }
        self.confirmed_seq = op.seq;

        Outcome::GapAhead {
            op,
            expected,
            was_local,
        }
    }

    /// Re-anchors the checkpoint at the current confirmed sequence.
    ///
    /// Called after hydration so that the first remote arrival can roll
    /// back to the joined state.
    pub fn finish_hydration(&mut self, engine: &dyn SqlEngine) {
        if self.confirmed_seq > 0 {
            self.reestablish_checkpoint(engine);
        }
    }

    fn reestablish_checkpoint(&mut self, engine: &dyn SqlEngine) {
        if let Err(e) = self.checkpoint.establish_at(engine, self.confirmed_seq) {
            warn!(seq = self.confirmed_seq, error = %e, "could not establish checkpoint");
        }
    }
}
