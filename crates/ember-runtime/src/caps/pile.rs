//! Script-visible binary buffer, a thin wrapper over the wire envelope.

use ember_value::{Pill, Value};

use crate::error::RuntimeError;
use crate::object::{Call, CallOutcome, CapabilityKind, Ctx, Object, ObjectCore};

pub static CALLS: &[Call] = &[
    Call::plain("read"),
    Call::plain("write"),
    Call::plain("find"),
    Call::plain("length"),
];

pub struct PileCap {
    core: ObjectCore,
    pill: Pill,
}

impl PileCap {
    pub fn new() -> PileCap {
        PileCap {
            core: ObjectCore::new(CapabilityKind::Pile),
            pill: Pill::new(),
        }
    }

    pub fn filled(bytes: Vec<u8>) -> PileCap {
        PileCap {
            core: ObjectCore::new(CapabilityKind::Pile),
            pill: Pill::from_vec(bytes),
        }
    }

    pub fn contents(&self) -> &[u8] {
        self.pill.bytes()
    }
}

impl Default for PileCap {
    fn default() -> Self {
        PileCap::new()
    }
}

impl Object for PileCap {
    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ObjectCore {
        &mut self.core
    }

    fn invoke(
        &mut self,
        call: &'static Call,
        args: Vec<Value>,
        _ctx: &mut Ctx<'_>,
    ) -> Result<CallOutcome, RuntimeError> {
        match call.name {
            "read" => {
                let count = match args.first() {
                    None | Some(Value::Nil) => 0,
                    Some(Value::Number(n)) if *n >= 0.0 && n.fract() == 0.0 => *n as usize,
                    _ => return Err(RuntimeError::bad_argument("bad byte count")),
                };
                let bytes = self.pill.read(count);
                Ok(CallOutcome::Return(vec![Value::Bytes(bytes)]))
            }
            "write" => {
                let bytes = args
                    .first()
                    .and_then(Value::as_bytes)
                    .ok_or_else(|| RuntimeError::bad_argument("bad payload"))?;
                self.pill.add(bytes);
                Ok(CallOutcome::Return(Vec::new()))
            }
            "find" => {
                let needle = args
                    .first()
                    .and_then(Value::as_bytes)
                    .ok_or_else(|| RuntimeError::bad_argument("bad needle"))?;
                let result = match self.pill.find(needle) {
                    Some(position) => Value::Number(position as f64),
                    None => Value::Nil,
                };
                Ok(CallOutcome::Return(vec![result]))
            }
            "length" => Ok(CallOutcome::Return(vec![Value::Number(
                self.pill.size() as f64
            )])),
            _ => Err(RuntimeError::native("unknown call")),
        }
    }
}
