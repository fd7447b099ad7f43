//! Host runtime embedding a scripting VM: cooperative coroutine
//! scheduling, native call dispatch, and the capability objects (events,
//! sockets, subprocess streams, joinable flows) scripts suspend on.
//!
//! The flow of one call: script code invokes a bound native method → the
//! VM surfaces it as a parked [`vm::Step::Call`] → [`Engine`] resolves it
//! through the [`session::Session`] to a capability object → the object
//! either returns results or suspends the runner → an external
//! [`reactor::ReactorEvent`] later correlates back to the parked call and
//! a queued wake resumes the coroutine with the event's payload.

pub mod caps;
pub mod engine;
pub mod error;
pub mod link;
pub mod object;
pub mod reactor;
pub mod runner;
pub mod session;
pub mod tin;
pub mod vm;
pub mod wait;

pub use engine::Engine;
pub use error::RuntimeError;
pub use object::{CapabilityKind, ObjectId};
pub use reactor::{HandleId, Reactor, ReactorEvent, ResourceKind, TimerId};
pub use runner::{RunnerId, Status};
pub use session::{Session, GLOBAL};
pub use vm::{BindingId, BindingSpec, NativeCall, ScriptSource, ScriptVm, Step};
