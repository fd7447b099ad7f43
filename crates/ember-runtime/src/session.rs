//! Native dispatch plumbing between the VM and capability objects.
//!
//! A `Session` owns the VM handle and one `Router` per capability kind.
//! Binding a kind installs its call table under the host global; the VM
//! echoes back a `BindingId` on every native call, which resolves here to
//! a (kind, call, receiver) triple. Instance receivers travel as a packed
//! id in the table's marker entry; host singletons are fixed at bind
//! time. No part of this is ambient — everything hangs off the session
//! handle.

use hashbrown::HashMap;
use tracing::debug;

use ember_value::{Table, Value};

use crate::error::RuntimeError;
use crate::object::{instance_id, Call, CapabilityKind, ObjectCore, ObjectId, INSTANCE_KEY};
use crate::runner::RunnerId;
use crate::vm::{BindingId, BindingSpec, NativeCall, ScriptSource, ScriptVm};

/// Host global under which every dispatch table is installed.
pub const GLOBAL: &str = "__ember";

/// One installed dispatch table.
pub struct Router {
    pub kind: CapabilityKind,
    pub calls: &'static [Call],
    /// VM path of the table, e.g. `__ember.event`. Instance metatables
    /// point their `__index` here.
    pub path: String,
}

struct BindingEntry {
    kind: CapabilityKind,
    call: &'static Call,
    /// Fixed receiver for host singletons; instance kinds resolve the
    /// receiver from the marker argument instead.
    receiver: Option<ObjectId>,
}

/// A native call resolved to its target.
pub struct ResolvedCall {
    pub call: &'static Call,
    pub receiver: ObjectId,
    /// Arguments with the receiver marker stripped.
    pub args: Vec<Value>,
}

pub struct Session {
    vm: Box<dyn ScriptVm>,
    script: ScriptSource,
    worker: u32,
    routers: HashMap<CapabilityKind, Router>,
    bindings: Vec<BindingEntry>,
    opened: bool,
}

impl Session {
    pub fn new(vm: Box<dyn ScriptVm>, script: ScriptSource, worker: u32) -> Session {
        Session {
            vm,
            script,
            worker,
            routers: HashMap::new(),
            bindings: Vec::new(),
            opened: false,
        }
    }

    /// Lazy one-time VM environment setup.
    pub fn ensure_open(&mut self) -> Result<(), RuntimeError> {
        if !self.opened {
            self.vm.open(&self.script)?;
            self.opened = true;
        }
        Ok(())
    }

    pub fn vm_mut(&mut self) -> &mut dyn ScriptVm {
        self.vm.as_mut()
    }

    pub fn worker(&self) -> u32 {
        self.worker
    }

    pub fn script(&self) -> &ScriptSource {
        &self.script
    }

    /// Install the call table for a kind. Memoized: binding an already
    /// routed kind is a no-op, so every instance of a kind shares one
    /// router.
    pub fn bind(
        &mut self,
        kind: CapabilityKind,
        calls: &'static [Call],
        receiver: Option<ObjectId>,
    ) -> Result<(), RuntimeError> {
        if self.routers.contains_key(&kind) {
            return Ok(());
        }
        let mut specs = Vec::with_capacity(calls.len());
        for call in calls {
            let id = BindingId(self.bindings.len() as u32);
            self.bindings.push(BindingEntry {
                kind,
                call,
                receiver,
            });
            specs.push(BindingSpec {
                name: call.name.to_string(),
                id,
            });
        }
        self.vm.install(GLOBAL, kind.name(), &specs)?;
        debug!(kind = kind.name(), calls = calls.len(), "router installed");
        self.routers.insert(
            kind,
            Router {
                kind,
                calls,
                path: format!("{}.{}", GLOBAL, kind.name()),
            },
        );
        Ok(())
    }

    /// Resolve a surfaced native call to its target object and call.
    pub fn resolve(&self, native: NativeCall) -> Result<ResolvedCall, RuntimeError> {
        let entry = self
            .bindings
            .get(native.binding.0 as usize)
            .ok_or_else(|| RuntimeError::native("unknown binding"))?;
        let mut args = native.args;
        let receiver = match entry.receiver {
            Some(id) => id,
            None => {
                if args.is_empty() {
                    return Err(RuntimeError::NoInstance);
                }
                let id = instance_id(&args.remove(0)).ok_or(RuntimeError::NoInstance)?;
                if id.kind != entry.kind {
                    return Err(RuntimeError::NoInstance);
                }
                id
            }
        };
        Ok(ResolvedCall {
            call: entry.call,
            receiver,
            args,
        })
    }

    /// Build the instance table handed to script for an object, and
    /// assign the object to the receiving runner if it has no owner yet.
    pub fn materialize(&self, core: &mut ObjectCore, runner: RunnerId) -> Value {
        if core.assigned.is_none() {
            core.assigned = Some(runner);
        }
        let path = self
            .routers
            .get(&core.kind())
            .map(|router| router.path.clone())
            .unwrap_or_else(|| format!("{}.{}", GLOBAL, core.kind().name()));
        let mut instance = Table::new();
        instance.set(INSTANCE_KEY, Value::Number(core.id.pack()));
        let mut meta = Table::new();
        meta.set("__index", Value::from(path.as_str()));
        instance.metatable = Some(Box::new(meta));
        Value::Table(instance)
    }

    pub fn close(&mut self) {
        self.routers.clear();
        self.vm.close();
    }
}
