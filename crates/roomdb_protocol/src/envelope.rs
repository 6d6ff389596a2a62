//! Wire envelopes and authority input frames.

use crate::error::{ProtocolError, ProtocolResult};
use crate::operation::Operation;
use serde::{Deserialize, Serialize};

/// An outbound message wrapped for the room transport.
///
/// Only `op` envelopes exist today; envelopes with an unrecognized `type`
/// decode to `None` so newer peers can extend the protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    /// A replicated operation.
    Op {
        /// The operation being sent.
        operation: Operation,
    },
}

impl Envelope {
    /// Wraps an operation for sending.
    pub fn op(operation: Operation) -> Self {
        Self::Op { operation }
    }

    /// Encodes to JSON bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON bytes.
    ///
    /// Returns `Ok(None)` for well-formed envelopes of an unrecognized
    /// `type`; malformed JSON, or an `op` envelope without its
    /// `operation` field, is an error.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Option<Self>> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// Decodes from an already-parsed JSON value, leniently.
    pub fn from_value(value: serde_json::Value) -> ProtocolResult<Option<Self>> {
        match value.get("type").and_then(|t| t.as_str()) {
            Some("op") => {
                if value.get("operation").is_none() {
                    return Err(ProtocolError::invalid_structure(
                        "op envelope is missing its operation",
                    ));
                }
                Ok(Some(serde_json::from_value(value)?))
            }
            _ => Ok(None),
        }
    }
}

/// A sequenced input rebroadcast by the authority.
///
/// The authority assigns `seq` and echoes the original envelope in `data`;
/// converting back to an [`Operation`] stamps the assigned sequence onto
/// the carried record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputFrame {
    /// Authority-assigned global sequence number.
    pub seq: u64,
    /// The original envelope, as sent.
    pub data: serde_json::Value,
}

impl InputFrame {
    /// Creates an input frame from a sequenced envelope.
    pub fn new(seq: u64, envelope: &Envelope) -> ProtocolResult<Self> {
        Ok(Self {
            seq,
            data: serde_json::to_value(envelope)?,
        })
    }

    /// Extracts the carried operation, stamped with this frame's `seq`.
    ///
    /// Returns `None` when the frame does not carry an `op` envelope.
    pub fn into_operation(self) -> ProtocolResult<Option<Operation>> {
        match Envelope::from_value(self.data)? {
            Some(Envelope::Op { operation }) => Ok(Some(operation.with_seq(self.seq))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Scalar;
    use std::collections::BTreeMap;

    fn make_op() -> Operation {
        let mut columns = BTreeMap::new();
        columns.insert("id".to_string(), Scalar::Text("a".into()));
        Operation::insert("c1_1_0", "c1", 1, "t", columns)
    }

    #[test]
    fn envelope_roundtrip() {
        let envelope = Envelope::op(make_op());

        let bytes = envelope.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap().unwrap();

        assert_eq!(decoded, envelope);
    }

    #[test]
    fn envelope_wire_shape() {
        let bytes = Envelope::op(make_op()).encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["type"], "op");
        assert_eq!(value["operation"]["id"], "c1_1_0");
    }

    #[test]
    fn unknown_envelope_type_is_ignored() {
        let decoded = Envelope::decode(br#"{"type":"presence","who":"c2"}"#).unwrap();
        assert!(decoded.is_none());

        let decoded = Envelope::decode(br#"{"no_type_at_all":1}"#).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(Envelope::decode(b"{not json").is_err());
    }

    #[test]
    fn op_envelope_without_operation_is_an_error() {
        let result = Envelope::decode(br#"{"type":"op"}"#);
        assert!(matches!(
            result,
            Err(crate::error::ProtocolError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn input_frame_stamps_seq() {
        let frame = InputFrame::new(9, &Envelope::op(make_op())).unwrap();

        let op = frame.into_operation().unwrap().unwrap();
        assert_eq!(op.seq, 9);
        assert_eq!(op.id, "c1_1_0");
    }

    #[test]
    fn input_frame_with_unknown_envelope() {
        let frame = InputFrame {
            seq: 3,
            data: serde_json::json!({"type": "cursor", "x": 1}),
        };

        assert!(frame.into_operation().unwrap().is_none());
    }
}
