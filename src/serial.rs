//! Binary persistence of compiled [`RuleIR`].
//!
//! A 32-byte fixed header followed by a bincode-encoded payload.
//!
//! ## Wire Format
//!
//! ```text
//! Offset  Size  Field
//! 0       4     Magic bytes: b"RGIR"
//! 4       2     Format version (u16, little-endian)
//! 6       2     Engine version (u16, little-endian)
//! 8       4     Flags (u32, reserved)
//! 12      4     Payload length in bytes (u32, little-endian)
//! 16      16    BLAKE3 hash of the payload (truncated to 16 bytes)
//! 32..    var   Bincode-encoded payload
//! ```
//!
//! The payload is a mirror of `RuleIR` built from plain tagged enums, so the
//! wire format does not depend on the JSON-oriented serde attributes of the
//! in-memory types. The format version must match exactly; the engine
//! version is informational.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{
    ApplicabilityMode, CompiledApplicability, CompiledCheck, CompiledPremise, ContentHash,
    DeadlineSpec, DeadlineUnit, DecisionEntry, IrError, ObligationSpec, Operator, RuleIR, Value,
};

const MAGIC: &[u8; 4] = b"RGIR";
const FORMAT_VERSION: u16 = 1;
const ENGINE_VERSION: u16 = 1;
const HEADER_SIZE: usize = 32;

/// Errors from [`RuleIR::to_bytes`].
#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("failed to encode rule IR: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("encoded payload of {0} bytes exceeds the 4 GiB format limit")]
    TooLarge(usize),
}

/// Errors from [`RuleIR::from_bytes`].
#[derive(Debug, Error)]
pub enum DeserializeError {
    #[error("not a regula IR image: invalid magic bytes")]
    BadMagic,

    #[error("unsupported IR format v{blob} (this build reads v{supported})")]
    IncompatibleVersion { blob: u16, supported: u16 },

    #[error("IR payload checksum does not match its header")]
    ChecksumMismatch,

    #[error("IR image truncated or padded: expected {expected} bytes, found {actual}")]
    LengthMismatch { expected: u32, actual: usize },

    #[error("failed to decode IR payload: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("metadata mismatch: {0}")]
    Metadata(String),

    #[error("invalid IR: {0}")]
    Invalid(#[from] IrError),
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializedRuleIR {
    metadata: IrMetadata,
    rule_id: String,
    version: u32,
    content_hash: String,
    applicability: SerializedApplicability,
    checks: Vec<SerializedCheck>,
    decisions: Vec<SerializedDecision>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IrMetadata {
    check_count: usize,
    decision_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializedApplicability {
    any: bool,
    premises: Vec<(String, SerializedOperator, SerializedValue)>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializedCheck {
    node_id: usize,
    field: String,
    operator: SerializedOperator,
    operand: SerializedValue,
    true_next: usize,
    false_next: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializedDecision {
    node_id: usize,
    outcome: String,
    obligations: Vec<SerializedObligation>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializedObligation {
    id: String,
    description: Option<String>,
    deadline: Option<SerializedDeadline>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum SerializedDeadline {
    Days(u32),
    Weeks(u32),
    Months(u32),
    Years(u32),
    Ongoing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum SerializedValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<SerializedValue>),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum SerializedOperator {
    Eq,
    Neq,
    In,
    NotIn,
    Contains,
    Gt,
    Gte,
    Lt,
    Lte,
}

fn serialize_op(op: Operator) -> SerializedOperator {
    match op {
        Operator::Eq => SerializedOperator::Eq,
        Operator::Neq => SerializedOperator::Neq,
        Operator::In => SerializedOperator::In,
        Operator::NotIn => SerializedOperator::NotIn,
        Operator::Contains => SerializedOperator::Contains,
        Operator::Gt => SerializedOperator::Gt,
        Operator::Gte => SerializedOperator::Gte,
        Operator::Lt => SerializedOperator::Lt,
        Operator::Lte => SerializedOperator::Lte,
    }
}

fn deserialize_op(op: SerializedOperator) -> Operator {
    match op {
        SerializedOperator::Eq => Operator::Eq,
        SerializedOperator::Neq => Operator::Neq,
        SerializedOperator::In => Operator::In,
        SerializedOperator::NotIn => Operator::NotIn,
        SerializedOperator::Contains => Operator::Contains,
        SerializedOperator::Gt => Operator::Gt,
        SerializedOperator::Gte => Operator::Gte,
        SerializedOperator::Lt => Operator::Lt,
        SerializedOperator::Lte => Operator::Lte,
    }
}

fn serialize_value(value: &Value) -> SerializedValue {
    match value {
        Value::Bool(v) => SerializedValue::Bool(*v),
        Value::Int(v) => SerializedValue::Int(*v),
        Value::Float(v) => SerializedValue::Float(*v),
        Value::String(v) => SerializedValue::Str(v.clone()),
        Value::List(items) => SerializedValue::List(items.iter().map(serialize_value).collect()),
    }
}

fn deserialize_value(value: SerializedValue) -> Value {
    match value {
        SerializedValue::Bool(v) => Value::Bool(v),
        SerializedValue::Int(v) => Value::Int(v),
        SerializedValue::Float(v) => Value::Float(v),
        SerializedValue::Str(v) => Value::String(v),
        SerializedValue::List(items) => {
            Value::List(items.into_iter().map(deserialize_value).collect())
        }
    }
}

fn serialize_deadline(spec: DeadlineSpec) -> SerializedDeadline {
    match spec {
        DeadlineSpec::Ongoing => SerializedDeadline::Ongoing,
        DeadlineSpec::Relative { amount, unit } => match unit {
            DeadlineUnit::Days => SerializedDeadline::Days(amount),
            DeadlineUnit::Weeks => SerializedDeadline::Weeks(amount),
            DeadlineUnit::Months => SerializedDeadline::Months(amount),
            DeadlineUnit::Years => SerializedDeadline::Years(amount),
        },
    }
}

fn deserialize_deadline(spec: SerializedDeadline) -> DeadlineSpec {
    let relative = |amount, unit| DeadlineSpec::Relative { amount, unit };
    match spec {
        SerializedDeadline::Ongoing => DeadlineSpec::Ongoing,
        SerializedDeadline::Days(n) => relative(n, DeadlineUnit::Days),
        SerializedDeadline::Weeks(n) => relative(n, DeadlineUnit::Weeks),
        SerializedDeadline::Months(n) => relative(n, DeadlineUnit::Months),
        SerializedDeadline::Years(n) => relative(n, DeadlineUnit::Years),
    }
}

fn ir_to_serialized(ir: &RuleIR) -> SerializedRuleIR {
    let premises = ir
        .applicability
        .premises
        .iter()
        .map(|p| (p.field.clone(), serialize_op(p.operator), serialize_value(&p.operand)))
        .collect();

    let checks = ir
        .checks
        .iter()
        .map(|c| SerializedCheck {
            node_id: c.node_id,
            field: c.field.clone(),
            operator: serialize_op(c.operator),
            operand: serialize_value(&c.operand),
            true_next: c.true_next,
            false_next: c.false_next,
        })
        .collect();

    let decisions = ir
        .decisions
        .iter()
        .map(|d| SerializedDecision {
            node_id: d.node_id,
            outcome: d.outcome.clone(),
            obligations: d
                .obligations
                .iter()
                .map(|o| SerializedObligation {
                    id: o.id.clone(),
                    description: o.description.clone(),
                    deadline: o.deadline.map(serialize_deadline),
                })
                .collect(),
        })
        .collect();

    SerializedRuleIR {
        metadata: IrMetadata {
            check_count: ir.checks.len(),
            decision_count: ir.decisions.len(),
        },
        rule_id: ir.rule_id.clone(),
        version: ir.version,
        content_hash: ir.content_hash.as_str().to_owned(),
        applicability: SerializedApplicability {
            any: ir.applicability.mode == ApplicabilityMode::Any,
            premises,
        },
        checks,
        decisions,
    }
}

fn serialized_to_ir(ser: SerializedRuleIR) -> Result<RuleIR, DeserializeError> {
    if ser.metadata.check_count != ser.checks.len() {
        return Err(DeserializeError::Metadata(format!(
            "metadata says {} checks but payload has {}",
            ser.metadata.check_count,
            ser.checks.len()
        )));
    }
    if ser.metadata.decision_count != ser.decisions.len() {
        return Err(DeserializeError::Metadata(format!(
            "metadata says {} decisions but payload has {}",
            ser.metadata.decision_count,
            ser.decisions.len()
        )));
    }

    let applicability = CompiledApplicability {
        mode: if ser.applicability.any {
            ApplicabilityMode::Any
        } else {
            ApplicabilityMode::All
        },
        premises: ser
            .applicability
            .premises
            .into_iter()
            .map(|(field, op, operand)| CompiledPremise {
                field,
                operator: deserialize_op(op),
                operand: deserialize_value(operand),
            })
            .collect(),
    };

    let checks = ser
        .checks
        .into_iter()
        .map(|c| CompiledCheck {
            node_id: c.node_id,
            field: c.field,
            operator: deserialize_op(c.operator),
            operand: deserialize_value(c.operand),
            true_next: c.true_next,
            false_next: c.false_next,
        })
        .collect();

    let decisions = ser
        .decisions
        .into_iter()
        .map(|d| DecisionEntry {
            node_id: d.node_id,
            outcome: d.outcome,
            obligations: d
                .obligations
                .into_iter()
                .map(|o| ObligationSpec {
                    id: o.id,
                    description: o.description,
                    deadline: o.deadline.map(deserialize_deadline),
                })
                .collect(),
        })
        .collect();

    let ir = RuleIR {
        rule_id: ser.rule_id,
        version: ser.version,
        content_hash: ContentHash::from_hex(ser.content_hash),
        applicability,
        checks,
        decisions,
    };
    ir.validate()?;
    Ok(ir)
}

/// The fixed-size prefix of an IR image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    format_version: u16,
    engine_version: u16,
    flags: u32,
    payload_len: u32,
    checksum: [u8; 16],
}

impl Header {
    fn describe(payload: &[u8]) -> Result<Self, SerializeError> {
        let payload_len =
            u32::try_from(payload.len()).map_err(|_| SerializeError::TooLarge(payload.len()))?;
        Ok(Self {
            format_version: FORMAT_VERSION,
            engine_version: ENGINE_VERSION,
            flags: 0,
            payload_len,
            checksum: checksum(payload),
        })
    }

    fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0_u8; HEADER_SIZE];
        out[0..4].copy_from_slice(MAGIC);
        out[4..6].copy_from_slice(&self.format_version.to_le_bytes());
        out[6..8].copy_from_slice(&self.engine_version.to_le_bytes());
        out[8..12].copy_from_slice(&self.flags.to_le_bytes());
        out[12..16].copy_from_slice(&self.payload_len.to_le_bytes());
        out[16..32].copy_from_slice(&self.checksum);
        out
    }

    /// Split `bytes` into the header and the remaining payload. Only the
    /// magic is checked here.
    #[allow(clippy::cast_possible_truncation)] // HEADER_SIZE is 32
    fn split(bytes: &[u8]) -> Result<(Self, &[u8]), DeserializeError> {
        let Some((head, payload)) = bytes.split_first_chunk::<HEADER_SIZE>() else {
            return Err(DeserializeError::LengthMismatch {
                expected: HEADER_SIZE as u32,
                actual: bytes.len(),
            });
        };
        if &head[0..4] != MAGIC {
            return Err(DeserializeError::BadMagic);
        }
        let u16_at = |at: usize| u16::from_le_bytes([head[at], head[at + 1]]);
        let u32_at = |at: usize| {
            u32::from_le_bytes([head[at], head[at + 1], head[at + 2], head[at + 3]])
        };
        let mut checksum = [0_u8; 16];
        checksum.copy_from_slice(&head[16..32]);

        let header = Self {
            format_version: u16_at(4),
            engine_version: u16_at(6),
            flags: u32_at(8),
            payload_len: u32_at(12),
            checksum,
        };
        Ok((header, payload))
    }

    fn verify(&self, payload: &[u8]) -> Result<(), DeserializeError> {
        if self.format_version != FORMAT_VERSION {
            return Err(DeserializeError::IncompatibleVersion {
                blob: self.format_version,
                supported: FORMAT_VERSION,
            });
        }
        if usize::try_from(self.payload_len).ok() != Some(payload.len()) {
            return Err(DeserializeError::LengthMismatch {
                expected: self.payload_len,
                actual: payload.len(),
            });
        }
        if checksum(payload) != self.checksum {
            return Err(DeserializeError::ChecksumMismatch);
        }
        Ok(())
    }
}

fn checksum(payload: &[u8]) -> [u8; 16] {
    let mut out = [0_u8; 16];
    out.copy_from_slice(&blake3::hash(payload).as_bytes()[..16]);
    out
}

pub(crate) fn serialize(ir: &RuleIR) -> Result<Vec<u8>, SerializeError> {
    let payload = bincode::serde::encode_to_vec(ir_to_serialized(ir), bincode::config::standard())?;
    let header = Header::describe(&payload)?;

    let mut image = Vec::with_capacity(HEADER_SIZE + payload.len());
    image.extend_from_slice(&header.encode());
    image.extend_from_slice(&payload);
    Ok(image)
}

pub(crate) fn deserialize(bytes: &[u8]) -> Result<RuleIR, DeserializeError> {
    let (header, payload) = Header::split(bytes)?;
    header.verify(payload)?;

    let (serialized, _): (SerializedRuleIR, usize) =
        bincode::serde::decode_from_slice(payload, bincode::config::standard())?;
    serialized_to_ir(serialized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operators_survive_mirroring() {
        for op in Operator::ALL {
            assert_eq!(deserialize_op(serialize_op(op)), op);
        }
    }

    #[test]
    fn nested_list_value_survives_mirroring() {
        let v = Value::List(vec![Value::String("art".into()), Value::Int(3)]);
        assert_eq!(deserialize_value(serialize_value(&v)), v);
    }

    #[test]
    fn header_round_trips() {
        let header = Header::describe(b"payload").unwrap();
        let encoded = header.encode();
        assert_eq!(&encoded[..4], b"RGIR");
        assert_eq!(&encoded[12..16], &7_u32.to_le_bytes());

        let mut image = encoded.to_vec();
        image.extend_from_slice(b"payload");
        let (decoded, payload) = Header::split(&image).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(payload, b"payload");
        assert!(decoded.verify(payload).is_ok());
    }

    #[test]
    fn bad_magic_rejected() {
        let mut image = [0_u8; HEADER_SIZE];
        image[0..4].copy_from_slice(b"XXXX");
        assert!(matches!(Header::split(&image), Err(DeserializeError::BadMagic)));
    }

    #[test]
    fn short_input_rejected() {
        assert!(matches!(
            Header::split(&[0_u8; 10]),
            Err(DeserializeError::LengthMismatch { expected: 32, actual: 10 })
        ));
    }

    #[test]
    fn flipped_payload_byte_fails_checksum() {
        let header = Header::describe(b"abc").unwrap();
        assert!(matches!(header.verify(b"abd"), Err(DeserializeError::ChecksumMismatch)));
    }

    #[test]
    fn metadata_mismatch_rejected() {
        let ser = SerializedRuleIR {
            metadata: IrMetadata {
                check_count: 1,
                decision_count: 1,
            },
            rule_id: "r".into(),
            version: 1,
            content_hash: "00".into(),
            applicability: SerializedApplicability {
                any: false,
                premises: vec![],
            },
            checks: vec![],
            decisions: vec![SerializedDecision {
                node_id: 0,
                outcome: "ok".into(),
                obligations: vec![],
            }],
        };
        assert!(matches!(serialized_to_ir(ser), Err(DeserializeError::Metadata(_))));
    }
}
