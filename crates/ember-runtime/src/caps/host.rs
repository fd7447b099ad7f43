//! Host singletons installed at engine open: `main` (spawning), `make`
//! (capability construction), and `util` (codec and introspection
//! services).

use ember_value::{dump, load, Pill, Table, Value};

use crate::error::RuntimeError;
use crate::object::{Call, CallOutcome, CapabilityKind, Ctx, Object, ObjectCore, Task};
use crate::reactor::{ResourceKind, ResourceOptions};

pub static MAIN_CALLS: &[Call] = &[Call::plain("start")];

pub static MAKE_CALLS: &[Call] = &[
    Call::plain("event"),
    Call::plain("net"),
    Call::plain("process"),
    Call::plain("pile"),
];

pub static UTIL_CALLS: &[Call] = &[
    Call::plain("dump"),
    Call::plain("load"),
    Call::plain("compare"),
    Call::plain("info"),
    Call::plain("random"),
];

/// `main`: spawning new coroutines from script functions.
pub struct MainCap {
    core: ObjectCore,
}

impl MainCap {
    pub fn new() -> MainCap {
        MainCap {
            core: ObjectCore::new(CapabilityKind::Main),
        }
    }
}

impl Default for MainCap {
    fn default() -> Self {
        MainCap::new()
    }
}

impl Object for MainCap {
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
            "start" => {
                let function = match args.into_iter().next() {
                    Some(Value::Function(function)) => function,
                    _ => return Err(RuntimeError::bad_argument("bad start function")),
                };
                // Park the caller; the spawn task resumes it with the
                // tracking flow once the new runner has had its first turn.
                let token = ctx.suspend(&mut self.core)?;
                ctx.tasks.push_back(Task::Start {
                    function,
                    waiter: Some((ctx.runner, ctx.object, token)),
                });
                Ok(CallOutcome::Suspend)
            }
            _ => Err(RuntimeError::native("unknown call")),
        }
    }
}

/// `make`: the capability constructor registry.
pub struct MakeCap {
    core: ObjectCore,
}

impl MakeCap {
    pub fn new() -> MakeCap {
        MakeCap {
            core: ObjectCore::new(CapabilityKind::Make),
        }
    }
}

impl Default for MakeCap {
    fn default() -> Self {
        MakeCap::new()
    }
}

/// Flatten a script options table into string pairs for the reactor.
fn parse_options(args: &[Value]) -> Result<ResourceOptions, RuntimeError> {
    match args.first() {
        None | Some(Value::Nil) => Ok(Vec::new()),
        Some(Value::Table(table)) => Ok(table
            .entries
            .iter()
            .map(|(key, value)| {
                (
                    String::from_utf8_lossy(&key.canonical()).into_owned(),
                    String::from_utf8_lossy(&value.canonical()).into_owned(),
                )
            })
            .collect()),
        _ => Err(RuntimeError::bad_argument("bad options")),
    }
}

impl Object for MakeCap {
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
        let capability = match call.name {
            "event" => super::Capability::Event(super::event::EventCap::new()),
            "pile" => super::Capability::Pile(match args.first() {
                Some(Value::Bytes(bytes)) => super::pile::PileCap::filled(bytes.clone()),
                _ => super::pile::PileCap::new(),
            }),
            "net" => {
                let options = parse_options(&args)?;
                let handle = ctx.reactor.open(ResourceKind::Socket, &options)?;
                let capability = super::Capability::Net(super::net::NetCap::open(handle));
                ctx.reactor.watch(handle);
                capability
            }
            "process" => {
                let options = parse_options(&args)?;
                let handle = ctx.reactor.open(ResourceKind::Process, &options)?;
                let capability =
                    super::Capability::Process(super::process::ProcessCap::open(handle));
                ctx.reactor.watch(handle);
                capability
            }
            _ => return Err(RuntimeError::native("unknown call")),
        };

        let kind = capability.core().kind();
        let handle = match &capability {
            super::Capability::Net(net) => net.handle(),
            super::Capability::Process(process) => process.handle(),
            _ => None,
        };
        let id = ctx.objects.insert(capability);
        if let Some(handle) = handle {
            ctx.streams.insert(handle, id);
        }
        ctx.session.bind(kind, super::calls(kind), None)?;
        let instance = match ctx.objects.get_mut(id) {
            Some(placed) => ctx.session.materialize(placed.core_mut(), ctx.runner),
            None => return Err(RuntimeError::native("lost fresh object")),
        };
        Ok(CallOutcome::Return(vec![instance]))
    }
}

/// `util`: codec and host introspection services.
pub struct UtilCap {
    core: ObjectCore,
}

impl UtilCap {
    pub fn new() -> UtilCap {
        UtilCap {
            core: ObjectCore::new(CapabilityKind::Util),
        }
    }
}

impl Default for UtilCap {
    fn default() -> Self {
        UtilCap::new()
    }
}

impl Object for UtilCap {
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
            "dump" => {
                let value = args.into_iter().next().unwrap_or(Value::Nil);
                let pill = dump(&value);
                Ok(CallOutcome::Return(vec![Value::Bytes(pill.into_vec())]))
            }
            "load" => {
                // Decode failures surface as nil; the script decides
                // whether that is an error.
                let result = match args.first().and_then(Value::as_bytes) {
                    Some(bytes) => {
                        let mut pill = Pill::from_vec(bytes.to_vec());
                        load(&mut pill).unwrap_or(Value::Nil)
                    }
                    None => Value::Nil,
                };
                Ok(CallOutcome::Return(vec![result]))
            }
            "compare" => {
                let mut args = args.into_iter();
                let a = args.next().unwrap_or(Value::Nil);
                let b = args.next().unwrap_or(Value::Nil);
                Ok(CallOutcome::Return(vec![Value::Boolean(a == b)]))
            }
            "info" => {
                let mut table = Table::new();
                table.set("worker", Value::Number(ctx.session.worker() as f64));
                table.set("pid", Value::Number(std::process::id() as f64));
                table.set("version", Value::from(env!("CARGO_PKG_VERSION")));
                Ok(CallOutcome::Return(vec![Value::Table(table)]))
            }
            "random" => {
                let result = match args.first() {
                    None | Some(Value::Nil) => Value::Number(fastrand::f64()),
                    Some(Value::Number(max)) if *max >= 1.0 => {
                        Value::Number(fastrand::u64(1..=*max as u64) as f64)
                    }
                    _ => return Err(RuntimeError::bad_argument("bad range")),
                };
                Ok(CallOutcome::Return(vec![result]))
            }
            _ => Err(RuntimeError::native("unknown call")),
        }
    }
}
