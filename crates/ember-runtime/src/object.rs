//! Capability object substrate: identities, arenas, and the dispatch
//! context threaded through every native call.
//!
//! Objects live in per-kind arenas with free lists; an [`ObjectId`] is a
//! (kind, slot) pair that packs losslessly into an `f64` so instance
//! tables can carry it as a plain number. At most one call is in flight
//! on an object at a time, which is what makes it sound to take the
//! object out of its arena for the duration of a call.

use std::collections::VecDeque;
use std::fmt;

use hashbrown::HashMap;
use num_enum::TryFromPrimitive;

use ember_value::{Function, Value};

use crate::error::RuntimeError;
use crate::reactor::{Delivery, EventKind, HandleId, Reactor, Routes};
use crate::runner::{ResumeToken, RunnerId, RunnerSet};
use crate::session::Session;

/// Key under which an instance table carries its packed [`ObjectId`].
pub const INSTANCE_KEY: &str = "__instance";

/// Closed set of object kinds the runtime can host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum CapabilityKind {
    Event = 0,
    Net = 1,
    Process = 2,
    Flow = 3,
    Pile = 4,
    Main = 5,
    Make = 6,
    Util = 7,
}

impl CapabilityKind {
    pub fn name(self) -> &'static str {
        match self {
            CapabilityKind::Event => "event",
            CapabilityKind::Net => "net",
            CapabilityKind::Process => "process",
            CapabilityKind::Flow => "flow",
            CapabilityKind::Pile => "pile",
            CapabilityKind::Main => "main",
            CapabilityKind::Make => "make",
            CapabilityKind::Util => "util",
        }
    }
}

/// Arena-scoped object identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId {
    pub kind: CapabilityKind,
    pub index: u32,
}

impl ObjectId {
    /// Pack into an `f64` carried by instance tables. The packed value is
    /// below 2^40 and therefore exact.
    pub fn pack(self) -> f64 {
        (((self.kind as u64) << 32) | self.index as u64) as f64
    }

    pub fn unpack(number: f64) -> Option<ObjectId> {
        if !number.is_finite() || number.fract() != 0.0 || number < 0.0 || number >= (1u64 << 48) as f64 {
            return None;
        }
        let raw = number as u64;
        let kind = CapabilityKind::try_from((raw >> 32) as u8).ok()?;
        Some(ObjectId {
            kind,
            index: raw as u32,
        })
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind.name(), self.index)
    }
}

/// One declared native call on an object kind, with the event kind that
/// resolves it when the call suspends on external input.
#[derive(Debug, PartialEq, Eq)]
pub struct Call {
    pub name: &'static str,
    pub event: Option<EventKind>,
}

impl Call {
    pub const fn plain(name: &'static str) -> Call {
        Call { name, event: None }
    }

    pub const fn resolved_by(name: &'static str, event: EventKind) -> Call {
        Call {
            name,
            event: Some(event),
        }
    }
}

/// What a native call produced.
#[derive(Debug)]
pub enum CallOutcome {
    /// Results are ready; the coroutine continues immediately.
    Return(Vec<Value>),
    /// The coroutine stays parked; results arrive through a later wake.
    Suspend,
}

/// A coroutine parked inside one of this object's calls.
#[derive(Debug, Clone, Copy)]
pub struct Parked {
    pub runner: RunnerId,
    pub token: ResumeToken,
    pub call: &'static Call,
}

/// State shared by every capability object.
#[derive(Debug)]
pub struct ObjectCore {
    pub id: ObjectId,
    /// First runner this object was handed to; its stop tears the object
    /// down.
    pub assigned: Option<RunnerId>,
    /// Runner of the call currently in flight, if any.
    pub current: Option<RunnerId>,
    pub current_call: Option<&'static Call>,
    /// Single parked-call slot for event-correlated calls. Multi-waiter
    /// objects track their waiters separately (see `wait`).
    pub parked: Option<Parked>,
}

impl ObjectCore {
    pub fn new(kind: CapabilityKind) -> ObjectCore {
        ObjectCore {
            id: ObjectId { kind, index: 0 },
            assigned: None,
            current: None,
            current_call: None,
            parked: None,
        }
    }

    pub fn kind(&self) -> CapabilityKind {
        self.id.kind
    }

    /// Event kind that would resolve the currently parked call.
    pub fn parked_event(&self) -> Option<EventKind> {
        self.parked.as_ref().and_then(|p| p.call.event)
    }

    /// Take the parked slot if the given event kind resolves it.
    pub fn take_parked(&mut self, kind: EventKind) -> Option<Parked> {
        if self.parked_event() == Some(kind) {
            self.parked.take()
        } else {
            None
        }
    }
}

/// Deferred work; processed strictly after the call that queued it
/// returns, so a release is never synchronously re-entrant.
#[derive(Debug)]
pub enum Task {
    /// Resume a runner. `from` carries the object and token a wake must
    /// present; `None` bypasses the staleness guard (exception delivery).
    Run {
        runner: RunnerId,
        from: Option<(ObjectId, ResumeToken)>,
        args: Vec<Value>,
    },
    /// Deliver a previously queued event to an object.
    Event { object: ObjectId, event: Delivery },
    /// Spawn a coroutine for `function`, then hand the waiter a tracking
    /// flow instance.
    Start {
        function: Function,
        waiter: Option<(RunnerId, ObjectId, ResumeToken)>,
    },
    /// Stop a runner (cancellation cascade).
    Stop { runner: RunnerId },
}

/// Mutable runtime surface handed to a capability for the duration of one
/// call or event delivery. The invoked object itself is held outside the
/// arenas, so `objects` only reaches the *other* objects.
pub struct Ctx<'a> {
    pub session: &'a mut Session,
    pub reactor: &'a mut dyn Reactor,
    pub runners: &'a mut RunnerSet,
    pub objects: &'a mut Objects,
    pub tasks: &'a mut VecDeque<Task>,
    pub routes: &'a mut Routes,
    pub streams: &'a mut HashMap<HandleId, ObjectId>,
    /// Runner on whose behalf the current call or delivery runs.
    pub runner: RunnerId,
    /// The invoked object.
    pub object: ObjectId,
}

impl Ctx<'_> {
    /// Park the current runner on the call in flight and mint the token a
    /// later wake must present.
    pub fn suspend(&mut self, core: &mut ObjectCore) -> Result<ResumeToken, RuntimeError> {
        let call = core
            .current_call
            .ok_or_else(|| RuntimeError::native("suspend outside a call"))?;
        let token = self.runners.suspend(self.runner, self.object, call)?;
        core.parked = Some(Parked {
            runner: self.runner,
            token,
            call,
        });
        Ok(token)
    }

    /// Queue a wake for a parked runner. Delivered through the task queue,
    /// never synchronously.
    pub fn wake(&mut self, runner: RunnerId, token: ResumeToken, args: Vec<Value>) {
        self.tasks.push_back(Task::Run {
            runner,
            from: Some((self.object, token)),
            args,
        });
    }

    /// Raise a script-visible error on a parked runner: the coroutine is
    /// resumed with an error table and then stopped.
    pub fn fail(&mut self, runner: RunnerId, detail: &str) {
        let message = self.compose_error(runner, detail);
        self.runners.set_exception(runner, message);
        self.tasks.push_back(Task::Run {
            runner,
            from: None,
            args: Vec::new(),
        });
    }

    /// Error message in the canonical `<runner>: <object>.<call> error:
    /// <detail>` shape.
    pub fn compose_error(&self, runner: RunnerId, detail: &str) -> String {
        let call = self
            .runners
            .way_call(runner)
            .map(|c| c.name)
            .unwrap_or("?");
        format!(
            "{}: {}.{} error: {}",
            runner,
            self.object.kind.name(),
            call,
            detail
        )
    }
}

/// The object behavior every capability kind implements.
pub trait Object {
    fn core(&self) -> &ObjectCore;
    fn core_mut(&mut self) -> &mut ObjectCore;

    /// Handle a declared call. `args` excludes the receiver.
    fn invoke(
        &mut self,
        call: &'static Call,
        args: Vec<Value>,
        ctx: &mut Ctx<'_>,
    ) -> Result<CallOutcome, RuntimeError>;

    /// Deliver an external event owned by this object.
    fn on_event(&mut self, _event: Delivery, _ctx: &mut Ctx<'_>) {}

    /// A bounded wait on this object expired for `runner`. Return `true`
    /// when handled; `false` raises the timeout error on that runner.
    fn on_timeout(&mut self, _runner: RunnerId, _ctx: &mut Ctx<'_>) -> bool {
        false
    }

    /// A runner stopped somewhere in the engine.
    fn on_runner_stopped(&mut self, _runner: RunnerId, _ctx: &mut Ctx<'_>) {}

    /// Release external resources. Invoked exactly once, at teardown.
    fn cleanup(&mut self, _ctx: &mut Ctx<'_>) {}
}

struct Arena<T> {
    slots: Vec<Option<T>>,
    free: Vec<u32>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Arena {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<T> Arena<T> {
    fn insert(&mut self, value: T) -> u32 {
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(value);
                index
            }
            None => {
                self.slots.push(Some(value));
                (self.slots.len() - 1) as u32
            }
        }
    }

    fn take(&mut self, index: u32) -> Option<T> {
        self.slots.get_mut(index as usize)?.take()
    }

    fn put(&mut self, index: u32, value: T) {
        self.slots[index as usize] = Some(value);
    }

    fn get(&self, index: u32) -> Option<&T> {
        self.slots.get(index as usize)?.as_ref()
    }

    fn get_mut(&mut self, index: u32) -> Option<&mut T> {
        self.slots.get_mut(index as usize)?.as_mut()
    }

    fn release(&mut self, index: u32) {
        if let Some(slot) = self.slots.get_mut(index as usize) {
            if slot.take().is_some() {
                self.free.push(index);
            }
        }
    }

    fn occupied(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| index as u32)
    }
}

/// Per-kind arenas holding every live capability object.
#[derive(Default)]
pub struct Objects {
    arenas: HashMap<CapabilityKind, Arena<crate::caps::Capability>>,
}

impl Objects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a capability, fixing its id to its slot.
    pub fn insert(&mut self, capability: crate::caps::Capability) -> ObjectId {
        let kind = capability.core().kind();
        let arena = self.arenas.entry(kind).or_default();
        let index = arena.insert(capability);
        let id = ObjectId { kind, index };
        if let Some(placed) = arena.get_mut(index) {
            placed.core_mut().id = id;
        }
        id
    }

    pub fn get(&self, id: ObjectId) -> Option<&crate::caps::Capability> {
        self.arenas.get(&id.kind)?.get(id.index)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut crate::caps::Capability> {
        self.arenas.get_mut(&id.kind)?.get_mut(id.index)
    }

    /// Take an object out for the duration of a call; pair with `put`.
    pub fn take(&mut self, id: ObjectId) -> Option<crate::caps::Capability> {
        self.arenas.get_mut(&id.kind)?.take(id.index)
    }

    pub fn put(&mut self, id: ObjectId, capability: crate::caps::Capability) {
        if let Some(arena) = self.arenas.get_mut(&id.kind) {
            arena.put(id.index, capability);
        }
    }

    /// Free a slot for reuse.
    pub fn release(&mut self, id: ObjectId) {
        if let Some(arena) = self.arenas.get_mut(&id.kind) {
            arena.release(id.index);
        }
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        let mut ids = Vec::new();
        for (kind, arena) in &self.arenas {
            ids.extend(arena.occupied().map(|index| ObjectId {
                kind: *kind,
                index,
            }));
        }
        ids
    }
}

/// Extract the receiver id from an instance table's marker entry.
pub fn instance_id(value: &Value) -> Option<ObjectId> {
    match value {
        Value::Table(table) => match table.get_str(INSTANCE_KEY) {
            Some(Value::Number(packed)) => ObjectId::unpack(*packed),
            _ => None,
        },
        _ => None,
    }
}
