//! # roomdb Storage
//!
//! Storage seams for roomdb.
//!
//! This crate provides:
//! - The `SqlEngine` trait: execute, query, named savepoints, and
//!   serialize/load of the whole engine image
//! - `SqliteEngine`, the rusqlite-backed engine
//! - The `BlobStore` trait with in-memory and file backends
//!
//! roomdb owns all replication semantics; this crate only abstracts the
//! embedded engine and the key→bytes persistence host.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod blob;
mod engine;
mod error;
mod file;
mod memory;
mod sqlite;

pub use blob::BlobStore;
pub use engine::{QueryOutput, SqlEngine, SqlValue};
pub use error::{StorageError, StorageResult};
pub use file::FileBlobStore;
pub use memory::MemoryBlobStore;
pub use sqlite::SqliteEngine;
