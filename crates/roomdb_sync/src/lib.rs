//! # roomdb Sync Engine
//!
//! Authority-ordered replication with optimistic local apply.
//!
//! This crate provides:
//! - The reconciler state machine (confirm / apply / rollback-replay)
//! - Checkpointing over the engine's named savepoints
//! - Room transport seams and an in-memory authority
//! - Blob-store persistence of the engine image and operation records
//! - The public [`SyncDatabase`] façade

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod apply;
mod checkpoint;
mod client;
mod config;
mod error;
mod persist;
mod reconciler;
mod transport;

pub use checkpoint::CheckpointManager;
pub use client::{SyncDatabase, SyncEvents};
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use persist::Persistence;
pub use reconciler::{Outcome, Reconciler};
pub use transport::{
    MemoryAuthority, MemoryConnection, RoomConnection, RoomTransport, TransportEvent,
};
