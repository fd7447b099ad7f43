//! The external event source boundary.
//!
//! Timers, sockets, and subprocess pipes live behind [`Reactor`]: the
//! runtime registers interest and performs non-blocking reads/writes, and
//! the reactor implementation feeds edge-triggered [`ReactorEvent`]s back
//! into the owning engine's queue. A suspended coroutine never blocks an
//! OS thread — it waits for one of these events.

use std::time::Duration;

use hashbrown::HashMap;
use tracing::trace;

use crate::error::RuntimeError;
use crate::object::ObjectId;
use crate::runner::RunnerId;

/// Identifies one armed timer inside the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// Identifies one socket or subprocess stream resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(pub u64);

/// Which external resource to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Socket,
    Process,
}

/// Resource options parsed from the script's construction table
/// (host/port for sockets, command line for processes, and so on).
pub type ResourceOptions = Vec<(String, String)>;

/// Subprocess stream discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamChannel {
    Out,
    Err,
}

/// Remote endpoint of a connected socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub host: String,
    pub port: u16,
}

/// An edge-triggered notification from the reactor.
#[derive(Debug, Clone)]
pub enum ReactorEvent {
    /// A timer fired; `payload` is the opaque value given when arming it.
    Timer { timer: TimerId, payload: u64 },
    /// A watched socket has buffered bytes to read.
    Readable { handle: HandleId },
    /// A subprocess stream produced a chunk.
    Data {
        handle: HandleId,
        channel: StreamChannel,
        bytes: Vec<u8>,
    },
    /// The peer closed the stream.
    Closed { handle: HandleId },
    /// The subprocess exited.
    Exited { handle: HandleId, status: i32 },
}

/// Event payload as seen by a capability object, after the engine has
/// resolved which object owns the handle.
#[derive(Debug, Clone)]
pub enum Delivery {
    Readable,
    Data {
        channel: StreamChannel,
        bytes: Vec<u8>,
    },
    Closed,
    Exited {
        status: i32,
    },
}

/// Correlation key between a declared call and the event kind that
/// resolves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Readable,
    Data,
    Closed,
    Exited,
}

impl Delivery {
    pub fn kind(&self) -> EventKind {
        match self {
            Delivery::Readable => EventKind::Readable,
            Delivery::Data { .. } => EventKind::Data,
            Delivery::Closed => EventKind::Closed,
            Delivery::Exited { .. } => EventKind::Exited,
        }
    }
}

/// The opaque reactor consumed by the runtime.
///
/// `timer` with `delay == None` arms an anchor that never fires: it only
/// exists so an indefinite wait has something to cancel.
pub trait Reactor {
    fn timer(&mut self, delay: Option<Duration>, payload: u64) -> TimerId;
    fn cancel(&mut self, timer: TimerId);

    fn open(
        &mut self,
        kind: ResourceKind,
        options: &ResourceOptions,
    ) -> Result<HandleId, RuntimeError>;

    /// Register readable/closed interest on a handle.
    fn watch(&mut self, handle: HandleId);

    /// Bytes currently buffered on a socket, readable without blocking.
    fn buffered(&self, handle: HandleId) -> usize;

    /// Non-blocking read of up to `max` buffered bytes (all when zero).
    fn read(&mut self, handle: HandleId, max: usize) -> Vec<u8>;

    /// Non-blocking write.
    fn write(&mut self, handle: HandleId, bytes: &[u8]);

    fn close(&mut self, handle: HandleId);

    fn peer(&self, handle: HandleId) -> Option<Peer>;
}

/// Why an armed timer exists; routed back to its owner when it fires.
#[derive(Debug, Clone, Copy)]
pub enum Route {
    /// Anchor for an indefinite wait; a fire is a no-op.
    Anchor { object: ObjectId },
    /// Bounded wait; a fire raises a timeout unless the owner handles it.
    Timeout { object: ObjectId, runner: RunnerId },
}

struct RouteEntry {
    route: Route,
    timer: TimerId,
}

/// Timer bookkeeping: maps the opaque payload the reactor echoes back to
/// the route that armed it.
#[derive(Default)]
pub struct Routes {
    armed: HashMap<u64, RouteEntry>,
    next: u64,
}

impl Routes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer and remember its route. Returns the route key.
    pub fn arm(&mut self, reactor: &mut dyn Reactor, delay: Option<Duration>, route: Route) -> u64 {
        let key = self.next;
        self.next += 1;
        let timer = reactor.timer(delay, key);
        trace!(key, ?route, "timer armed");
        self.armed.insert(key, RouteEntry { route, timer });
        key
    }

    /// Cancel an armed timer by route key.
    pub fn disarm(&mut self, reactor: &mut dyn Reactor, key: u64) {
        if let Some(entry) = self.armed.remove(&key) {
            reactor.cancel(entry.timer);
        }
    }

    /// Resolve a fired timer. Returns `None` for timers already disarmed;
    /// the fire then races a release and loses.
    pub fn fired(&mut self, payload: u64) -> Option<Route> {
        self.armed.remove(&payload).map(|entry| entry.route)
    }
}
