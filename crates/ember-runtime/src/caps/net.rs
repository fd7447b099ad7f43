//! Non-blocking socket capability.
//!
//! `read` returns whatever is buffered (up to a cap); `receive` insists
//! on an exact byte count and keeps waiting across readable events until
//! enough has accumulated. A close while a call is parked resolves it
//! with nil.

use ember_value::{Table, Value};

use crate::error::RuntimeError;
use crate::link::LinkState;
use crate::object::{Call, CallOutcome, CapabilityKind, Ctx, Object, ObjectCore};
use crate::reactor::{Delivery, EventKind, HandleId};
use crate::runner::RunnerId;
use crate::tin::TinState;

pub static CALLS: &[Call] = &[
    Call::resolved_by("read", EventKind::Readable),
    Call::resolved_by("receive", EventKind::Readable),
    Call::plain("send"),
    Call::plain("close"),
    Call::plain("peer"),
];

#[derive(Clone, Copy)]
struct PendingRead {
    /// Insist on exactly `count` bytes rather than up to `count`.
    exact: bool,
    /// Zero means "all buffered".
    count: usize,
}

pub struct NetCap {
    core: ObjectCore,
    link: LinkState,
    tin: TinState,
    pending: Option<PendingRead>,
}

impl NetCap {
    pub fn open(handle: HandleId) -> NetCap {
        NetCap {
            core: ObjectCore::new(CapabilityKind::Net),
            link: LinkState::new(),
            tin: TinState::with_handle(handle),
            pending: None,
        }
    }

    pub fn handle(&self) -> Option<HandleId> {
        self.tin.handle()
    }

    fn count_arg(args: &[Value]) -> Result<usize, RuntimeError> {
        match args.first() {
            None | Some(Value::Nil) => Ok(0),
            Some(Value::Number(n)) if *n >= 0.0 && n.fract() == 0.0 => Ok(*n as usize),
            _ => Err(RuntimeError::bad_argument("bad byte count")),
        }
    }

    /// Resolve a parked read against what is buffered now. Keeps the
    /// runner parked when an exact receive is still short.
    fn deliver(&mut self, ctx: &mut Ctx<'_>) -> Result<(), RuntimeError> {
        let Some(parked) = self.core.take_parked(EventKind::Readable) else {
            return Ok(());
        };
        let pending = self.pending.take().unwrap_or(PendingRead {
            exact: false,
            count: 0,
        });
        let buffered = self.tin.buffered(ctx);
        if pending.exact && buffered < pending.count {
            self.core.parked = Some(parked);
            self.pending = Some(pending);
            return Ok(());
        }
        if buffered == 0 {
            self.core.parked = Some(parked);
            self.pending = Some(pending);
            return Ok(());
        }
        let bytes = self.tin.read(pending.count, ctx)?;
        ctx.wake(parked.runner, parked.token, vec![Value::Bytes(bytes)]);
        Ok(())
    }
}

impl Object for NetCap {
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
            "read" | "receive" => {
                let count = Self::count_arg(&args)?;
                let exact = call.name == "receive";
                if exact && count == 0 {
                    return Err(RuntimeError::bad_argument("bad byte count"));
                }
                let buffered = self.tin.buffered(ctx);
                let satisfied = if exact { buffered >= count } else { buffered > 0 };
                if satisfied {
                    let bytes = self.tin.read(count, ctx)?;
                    return Ok(CallOutcome::Return(vec![Value::Bytes(bytes)]));
                }
                self.pending = Some(PendingRead { exact, count });
                self.tin.suspend(&mut self.core, &mut self.link, ctx)
            }
            "send" => {
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
            "peer" => {
                let result = match self.tin.peer(ctx) {
                    Some(peer) => {
                        let mut table = Table::new();
                        table.set("host", Value::from(peer.host.as_str()));
                        table.set("port", Value::Number(peer.port as f64));
                        Value::Table(table)
                    }
                    None => Value::Nil,
                };
                Ok(CallOutcome::Return(vec![result]))
            }
            _ => Err(RuntimeError::native("unknown call")),
        }
    }

    fn on_event(&mut self, event: Delivery, ctx: &mut Ctx<'_>) {
        match event {
            Delivery::Readable => {
                if let Some(Delivery::Readable) = self.link.offer(&self.core, event) {
                    // Delivery only fails when the handle is gone; the
                    // parked runner was resolved by the close then.
                    let _ = self.deliver(ctx);
                }
            }
            Delivery::Closed => {
                if let Some(parked) = self.core.parked.take() {
                    self.pending = None;
                    ctx.wake(parked.runner, parked.token, vec![Value::Nil]);
                }
                self.link.clear();
                self.tin.close(ctx);
            }
            _ => {}
        }
    }

    fn on_runner_stopped(&mut self, runner: RunnerId, _ctx: &mut Ctx<'_>) {
        if self.core.parked.map(|p| p.runner) == Some(runner) {
            self.core.parked = None;
            self.pending = None;
        }
    }

    fn cleanup(&mut self, ctx: &mut Ctx<'_>) {
        self.link.clear();
        self.tin.close(ctx);
    }
}
