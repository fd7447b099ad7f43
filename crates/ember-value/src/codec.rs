//! Binary dump/load for [`Value`].
//!
//! Layout: `Header { version: u32, size: u32 }` followed by exactly `size`
//! bytes of recursive tagged payload. All integers are little-endian.
//!
//! Payload per tag byte:
//! - `Nil` — nothing
//! - `Boolean` — 1 byte
//! - `Number` — f64, 8 bytes
//! - `Bytes` — u32 length + raw bytes (not NUL-terminated)
//! - `Table` — u32 entry count, then interleaved key/value payloads, then
//!   the metatable's payload or a `Nil` marker
//! - `Function` — u32 bytecode length + bytes, u32 upvalue count, then each
//!   upvalue's payload (recursive; upvalues must not cycle back into the
//!   enclosing function — caller invariant, not enforced)
//!
//! Decode failures are errors, never panics: the caller decides whether to
//! escalate into a script-level error.

use thiserror::Error;

use crate::pill::Pill;
use crate::value::{Function, Table, Value, ValueTag};

/// Version stamped into every dump header. Consumers seeing any other
/// version must refuse to interpret the payload.
pub const FORMAT_VERSION: u32 = 1;

const HEADER_SIZE: usize = 8;

/// Maximum table/function nesting depth accepted on decode. Deeper
/// payloads are refused rather than risking stack exhaustion.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed value data")]
    MalformedData,
    #[error("incompatible format version {found} (expected {FORMAT_VERSION})")]
    IncompatibleVersion { found: u32 },
}

/// Serialize a value into a fresh envelope.
pub fn dump(value: &Value) -> Pill {
    let mut pill = Pill::new();
    pill.add_u32(FORMAT_VERSION);
    pill.add_u32(0); // size, backfilled below
    dump_into(value, &mut pill);

    let size = (pill.size() - HEADER_SIZE) as u32;
    pill.patch(4, &size.to_le_bytes());
    pill
}

fn dump_into(value: &Value, pill: &mut Pill) {
    pill.add_u8(value.tag() as u8);
    match value {
        Value::Nil => {}
        Value::Boolean(b) => pill.add_u8(*b as u8),
        Value::Number(n) => pill.add_f64(*n),
        Value::Bytes(b) => {
            pill.add_u32(b.len() as u32);
            pill.add(b);
        }
        Value::Table(table) => {
            pill.add_u32(table.entries.len() as u32);
            for (key, val) in &table.entries {
                dump_into(key, pill);
                dump_into(val, pill);
            }
            match &table.metatable {
                Some(mt) => dump_into(&Value::Table((**mt).clone()), pill),
                None => dump_into(&Value::Nil, pill),
            }
        }
        Value::Function(f) => {
            pill.add_u32(f.bytecode.len() as u32);
            pill.add(&f.bytecode);
            pill.add_u32(f.upvalues.len() as u32);
            for upvalue in &f.upvalues {
                dump_into(upvalue, pill);
            }
        }
    }
}

/// Deserialize one value, consuming the envelope's cursor.
///
/// The declared payload size is validated against the buffer before any
/// decoding starts, and reconciled against the bytes actually consumed
/// afterwards; a truncated or mis-sized buffer yields `MalformedData`
/// without reading past the end.
pub fn load(pill: &mut Pill) -> Result<Value, CodecError> {
    if pill.remaining() < HEADER_SIZE {
        return Err(CodecError::MalformedData);
    }
    let version = pill.take_u32().ok_or(CodecError::MalformedData)?;
    if version != FORMAT_VERSION {
        return Err(CodecError::IncompatibleVersion { found: version });
    }
    let size = pill.take_u32().ok_or(CodecError::MalformedData)? as usize;
    if pill.remaining() < size {
        return Err(CodecError::MalformedData);
    }
    let before = pill.remaining();
    let value = load_one(pill, 0)?;
    // The header's size and the payload actually consumed must agree.
    if before - pill.remaining() != size {
        return Err(CodecError::MalformedData);
    }
    Ok(value)
}

fn load_one(pill: &mut Pill, depth: usize) -> Result<Value, CodecError> {
    if depth > MAX_DEPTH {
        return Err(CodecError::MalformedData);
    }
    let tag = pill.take_u8().ok_or(CodecError::MalformedData)?;
    let tag = ValueTag::try_from(tag).map_err(|_| CodecError::MalformedData)?;

    match tag {
        ValueTag::Nil => Ok(Value::Nil),
        ValueTag::Boolean => {
            let b = pill.take_u8().ok_or(CodecError::MalformedData)?;
            Ok(Value::Boolean(b != 0))
        }
        ValueTag::Number => {
            let n = pill.take_f64().ok_or(CodecError::MalformedData)?;
            Ok(Value::Number(n))
        }
        ValueTag::Bytes => {
            let len = pill.take_u32().ok_or(CodecError::MalformedData)? as usize;
            let bytes = pill.take(len).ok_or(CodecError::MalformedData)?;
            Ok(Value::Bytes(bytes.to_vec()))
        }
        ValueTag::Table => {
            let count = pill.take_u32().ok_or(CodecError::MalformedData)? as usize;
            let mut table = Table::new();
            for _ in 0..count {
                let key = load_one(pill, depth + 1)?;
                let value = load_one(pill, depth + 1)?;
                table.insert(key, value);
            }
            table.metatable = match load_one(pill, depth + 1)? {
                Value::Nil => None,
                Value::Table(mt) => Some(Box::new(mt)),
                _ => return Err(CodecError::MalformedData),
            };
            Ok(Value::Table(table))
        }
        ValueTag::Function => {
            let len = pill.take_u32().ok_or(CodecError::MalformedData)? as usize;
            let bytecode = pill.take(len).ok_or(CodecError::MalformedData)?.to_vec();
            let count = pill.take_u32().ok_or(CodecError::MalformedData)? as usize;
            let mut upvalues = Vec::with_capacity(count.min(64));
            for _ in 0..count {
                upvalues.push(load_one(pill, depth + 1)?);
            }
            Ok(Value::Function(Function {
                bytecode,
                upvalues,
                reference: None,
            }))
        }
    }
}
