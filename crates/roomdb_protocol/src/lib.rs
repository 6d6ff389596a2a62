//! # roomdb Sync Protocol
//!
//! Protocol types for roomdb's authority-ordered replication.
//!
//! This crate provides:
//! - `Operation` for replayable mutation records
//! - `OpLog` for tracking pending and confirmed operations
//! - Wire envelopes and seq-stamped input frames
//! - JSON encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod envelope;
mod error;
mod operation;
mod oplog;

pub use envelope::{Envelope, InputFrame};
pub use error::{ProtocolError, ProtocolResult};
pub use operation::{OpKind, OpPayload, Operation, Scalar};
pub use oplog::OpLog;
