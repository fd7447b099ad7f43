//! Concrete capability kinds.
//!
//! Each variant is a thin policy layer over the shared `wait`/`link`/`tin`
//! machinery; the only per-kind logic is how its event kind maps to a
//! resumption payload. `Capability` is the closed set the arenas hold.

pub mod event;
pub mod flow;
pub mod host;
pub mod net;
pub mod pile;
pub mod process;

use ember_value::Value;

use crate::error::RuntimeError;
use crate::object::{Call, CallOutcome, CapabilityKind, Ctx, Object, ObjectCore};
use crate::reactor::Delivery;
use crate::runner::RunnerId;

pub enum Capability {
    Event(event::EventCap),
    Net(net::NetCap),
    Process(process::ProcessCap),
    Flow(flow::FlowCap),
    Pile(pile::PileCap),
    Main(host::MainCap),
    Make(host::MakeCap),
    Util(host::UtilCap),
}

/// Declared call table for a kind; what `Session::bind` installs.
pub fn calls(kind: CapabilityKind) -> &'static [Call] {
    match kind {
        CapabilityKind::Event => event::CALLS,
        CapabilityKind::Net => net::CALLS,
        CapabilityKind::Process => process::CALLS,
        CapabilityKind::Flow => flow::CALLS,
        CapabilityKind::Pile => pile::CALLS,
        CapabilityKind::Main => host::MAIN_CALLS,
        CapabilityKind::Make => host::MAKE_CALLS,
        CapabilityKind::Util => host::UTIL_CALLS,
    }
}

macro_rules! each {
    ($value:expr, $cap:ident => $body:expr) => {
        match $value {
            Capability::Event($cap) => $body,
            Capability::Net($cap) => $body,
            Capability::Process($cap) => $body,
            Capability::Flow($cap) => $body,
            Capability::Pile($cap) => $body,
            Capability::Main($cap) => $body,
            Capability::Make($cap) => $body,
            Capability::Util($cap) => $body,
        }
    };
}

impl Object for Capability {
    fn core(&self) -> &ObjectCore {
        each!(self, cap => cap.core())
    }

    fn core_mut(&mut self) -> &mut ObjectCore {
        each!(self, cap => cap.core_mut())
    }

    fn invoke(
        &mut self,
        call: &'static Call,
        args: Vec<Value>,
        ctx: &mut Ctx<'_>,
    ) -> Result<CallOutcome, RuntimeError> {
        each!(self, cap => cap.invoke(call, args, ctx))
    }

    fn on_event(&mut self, event: Delivery, ctx: &mut Ctx<'_>) {
        each!(self, cap => cap.on_event(event, ctx))
    }

    fn on_timeout(&mut self, runner: RunnerId, ctx: &mut Ctx<'_>) -> bool {
        each!(self, cap => cap.on_timeout(runner, ctx))
    }

    fn on_runner_stopped(&mut self, runner: RunnerId, ctx: &mut Ctx<'_>) {
        each!(self, cap => cap.on_runner_stopped(runner, ctx))
    }

    fn cleanup(&mut self, ctx: &mut Ctx<'_>) {
        each!(self, cap => cap.cleanup(ctx))
    }
}

impl Capability {
    pub fn as_event(&self) -> Option<&event::EventCap> {
        match self {
            Capability::Event(cap) => Some(cap),
            _ => None,
        }
    }

    pub fn as_flow(&self) -> Option<&flow::FlowCap> {
        match self {
            Capability::Flow(cap) => Some(cap),
            _ => None,
        }
    }

    pub fn as_pile(&self) -> Option<&pile::PileCap> {
        match self {
            Capability::Pile(cap) => Some(cap),
            _ => None,
        }
    }
}
