//! Replayable mutation records.

use crate::error::ProtocolResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A scalar value carried in an operation payload.
///
/// Scalars map onto the JSON value space on the wire and onto SQL bind
/// parameters when applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// SQL NULL / JSON null.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
}

impl Scalar {
    /// Returns the text content, if this scalar is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer content, if this scalar is an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Scalar::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_string())
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Scalar::Integer(i)
    }
}

/// Type of mutation an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Row inserted (or replaced, under replay).
    Insert,
    /// Rows updated by equality predicate.
    Update,
    /// Rows deleted by equality predicate.
    Delete,
}

impl OpKind {
    /// Converts to the wire / storage tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Insert => "INSERT",
            OpKind::Update => "UPDATE",
            OpKind::Delete => "DELETE",
        }
    }

    /// Converts from the wire / storage tag.
    pub fn from_str(tag: &str) -> Option<Self> {
        match tag {
            "INSERT" => Some(OpKind::Insert),
            "UPDATE" => Some(OpKind::Update),
            "DELETE" => Some(OpKind::Delete),
            _ => None,
        }
    }
}

/// Typed payload of an operation, tagged by mutation kind.
///
/// Column maps are ordered so that generated SQL is deterministic across
/// clients replaying the same operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OpPayload {
    /// Insert a row; replays replace the existing row.
    #[serde(rename = "INSERT")]
    Insert {
        /// Column name to value.
        columns: BTreeMap<String, Scalar>,
    },
    /// Update rows matching the equality predicate.
    #[serde(rename = "UPDATE")]
    Update {
        /// Column name to new value.
        set: BTreeMap<String, Scalar>,
        /// Column name to required value.
        #[serde(rename = "where")]
        predicate: BTreeMap<String, Scalar>,
    },
    /// Delete rows matching the equality predicate.
    #[serde(rename = "DELETE")]
    Delete {
        /// Column name to required value.
        #[serde(rename = "where")]
        predicate: BTreeMap<String, Scalar>,
    },
}

impl OpPayload {
    /// Returns the mutation kind of this payload.
    pub fn kind(&self) -> OpKind {
        match self {
            OpPayload::Insert { .. } => OpKind::Insert,
            OpPayload::Update { .. } => OpKind::Update,
            OpPayload::Delete { .. } => OpKind::Delete,
        }
    }
}

/// A replayable mutation record.
///
/// Operations are born pending on the client that created them and become
/// confirmed once the authority assigns a global sequence number.
///
/// # Fields
///
/// - `id`: globally unique (`<client_id>_<local_seq>_<wallclock_ms>`;
///   `<client_id>_<local_seq>` alone is sufficient for uniqueness)
/// - `client_id`: origin client
/// - `local_seq`: per-client monotonic counter assigned at creation
/// - `seq`: authority-assigned global sequence; `0` while pending
/// - `table`: target table name
/// - `payload`: typed mutation payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Globally unique operation ID.
    pub id: String,
    /// Origin client identifier.
    pub client_id: String,
    /// Per-client creation counter.
    pub local_seq: u64,
    /// Authority-assigned global sequence (0 while pending).
    #[serde(default)]
    pub seq: u64,
    /// Target table name.
    pub table: String,
    /// Mutation payload.
    #[serde(flatten)]
    pub payload: OpPayload,
}

impl Operation {
    /// Creates a pending insert operation.
    pub fn insert(
        id: impl Into<String>,
        client_id: impl Into<String>,
        local_seq: u64,
        table: impl Into<String>,
        columns: BTreeMap<String, Scalar>,
    ) -> Self {
        Self {
            id: id.into(),
            client_id: client_id.into(),
            local_seq,
            seq: 0,
            table: table.into(),
            payload: OpPayload::Insert { columns },
        }
    }

    /// Creates a pending update operation.
    pub fn update(
        id: impl Into<String>,
        client_id: impl Into<String>,
        local_seq: u64,
        table: impl Into<String>,
        set: BTreeMap<String, Scalar>,
        predicate: BTreeMap<String, Scalar>,
    ) -> Self {
        Self {
            id: id.into(),
            client_id: client_id.into(),
            local_seq,
            seq: 0,
            table: table.into(),
            payload: OpPayload::Update { set, predicate },
        }
    }

    /// Creates a pending delete operation.
    pub fn delete(
        id: impl Into<String>,
        client_id: impl Into<String>,
        local_seq: u64,
        table: impl Into<String>,
        predicate: BTreeMap<String, Scalar>,
    ) -> Self {
        Self {
            id: id.into(),
            client_id: client_id.into(),
            local_seq,
            seq: 0,
            table: table.into(),
            payload: OpPayload::Delete { predicate },
        }
    }

    /// Returns the mutation kind.
    pub fn kind(&self) -> OpKind {
        self.payload.kind()
    }

    /// Returns true while no authority sequence has been assigned.
    pub fn is_pending(&self) -> bool {
        self.seq == 0
    }

    /// Returns a copy with the authority sequence assigned.
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    /// Encodes to JSON bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON bytes.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
