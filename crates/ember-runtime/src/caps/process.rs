//! Subprocess stream capability.
//!
//! Output arrives as discrete chunks pushed by the reactor, one event per
//! pipe read. `start` and `read` both park until the next chunk, exit, or
//! close; chunks arriving between calls queue FIFO so none are lost.

use ember_value::Value;

use crate::error::RuntimeError;
use crate::link::LinkState;
use crate::object::{Call, CallOutcome, CapabilityKind, Ctx, Object, ObjectCore};
use crate::reactor::{Delivery, EventKind, HandleId};
use crate::runner::RunnerId;
use crate::tin::TinState;

pub static CALLS: &[Call] = &[
    Call::resolved_by("start", EventKind::Data),
    Call::resolved_by("read", EventKind::Data),
    Call::plain("write"),
    Call::plain("close"),
    Call::plain("status"),
];

pub struct ProcessCap {
    core: ObjectCore,
    link: LinkState,
    tin: TinState,
    exit_status: Option<i32>,
}

impl ProcessCap {
    pub fn open(handle: HandleId) -> ProcessCap {
        ProcessCap {
            core: ObjectCore::new(CapabilityKind::Process),
            link: LinkState::new(),
            tin: TinState::with_handle(handle),
            exit_status: None,
        }
    }

    pub fn handle(&self) -> Option<HandleId> {
        self.tin.handle()
    }

    fn ended(&self) -> bool {
        self.exit_status.is_some() || self.tin.handle().is_none()
    }

    /// Resolve a parked start/read with a nil payload (stream over).
    fn settle_parked(&mut self, ctx: &mut Ctx<'_>) {
        if let Some(parked) = self.core.parked.take() {
            ctx.wake(parked.runner, parked.token, vec![Value::Nil]);
        }
    }
}

impl Object for ProcessCap {
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
        ctx: &mut Ctx<'_>,
    ) -> Result<CallOutcome, RuntimeError> {
        match call.name {
            "start" | "read" => {
                if self.ended() && self.link.queued(EventKind::Data) == 0 {
                    return Ok(CallOutcome::Return(vec![Value::Nil]));
                }
                self.tin.suspend(&mut self.core, &mut self.link, ctx)
            }
            "write" => {
                let bytes = args
                    .first()
                    .and_then(Value::as_bytes)
                    .ok_or_else(|| RuntimeError::bad_argument("bad payload"))?;
                self.tin.write(bytes, ctx)?;
                Ok(CallOutcome::Return(Vec::new()))
            }
            "close" => {
                self.link.clear();
                self.tin.close(ctx);
                Ok(CallOutcome::Return(Vec::new()))
            }
            "status" => {
                let result = match self.exit_status {
                    Some(status) => Value::Number(status as f64),
                    None => Value::Nil,
                };
                Ok(CallOutcome::Return(vec![result]))
            }
            _ => Err(RuntimeError::native("unknown call")),
        }
    }

    fn on_event(&mut self, event: Delivery, ctx: &mut Ctx<'_>) {
        match event {
            Delivery::Data { .. } => {
                if let Some(Delivery::Data { bytes, .. }) = self.link.offer(&self.core, event) {
                    if let Some(parked) = self.core.take_parked(EventKind::Data) {
                        ctx.wake(parked.runner, parked.token, vec![Value::Bytes(bytes)]);
                    }
                }
            }
            Delivery::Exited { status } => {
                self.exit_status = Some(status);
                self.settle_parked(ctx);
            }
            Delivery::Closed => {
                self.settle_parked(ctx);
                self.link.clear();
                self.tin.close(ctx);
            }
            _ => {}
        }
    }

    fn on_runner_stopped(&mut self, runner: RunnerId, _ctx: &mut Ctx<'_>) {
        if self.core.parked.map(|p| p.runner) == Some(runner) {
            self.core.parked = None;
        }
    }

    fn cleanup(&mut self, ctx: &mut Ctx<'_>) {
        self.link.clear();
        self.tin.close(ctx);
    }
}
