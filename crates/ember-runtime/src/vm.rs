//! The embedded VM boundary.
//!
//! The runtime consumes an opaque stack-based value machine through
//! [`ScriptVm`]. The VM never calls back into the host: when script code
//! invokes a native binding, `resume` returns [`Step::Call`] and the
//! coroutine stays parked on that call until the next `resume` delivers
//! its results. Suspension therefore needs no VM support — the host
//! simply withholds the next resume until the awaited event arrives.

use ember_value::{Function, Value};

use crate::error::RuntimeError;

/// Identifies one coroutine inside the VM.
pub type CoroutineId = u32;

/// Identifies one installed native binding. Handed out by the session at
/// install time; the VM echoes it back on every native call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingId(pub u32);

/// One call table entry to install under a global dispatch table.
#[derive(Debug, Clone)]
pub struct BindingSpec {
    pub name: String,
    pub id: BindingId,
}

/// A native call surfaced by the VM. The coroutine is parked on it until
/// the next `resume` supplies the call's results.
#[derive(Debug, Clone)]
pub struct NativeCall {
    pub binding: BindingId,
    pub args: Vec<Value>,
}

/// Outcome of driving a coroutine one step.
#[derive(Debug, Clone)]
pub enum Step {
    /// Parked on a native call; resume next with its results.
    Call(NativeCall),
    /// The coroutine returned normally.
    Done(Vec<Value>),
    /// The coroutine raised an unrecoverable script error.
    Failed(String),
}

/// Script descriptor: entry path plus argv, threaded through the session
/// rather than held in any ambient global.
#[derive(Debug, Clone, Default)]
pub struct ScriptSource {
    pub path: String,
    pub args: Vec<String>,
}

/// The opaque stack-based value machine hosting coroutines and values.
pub trait ScriptVm {
    /// One-time global environment setup: load the prelude and publish the
    /// script's argv. Performed lazily on the first run of a session.
    fn open(&mut self, script: &ScriptSource) -> Result<(), RuntimeError>;

    /// Install a dispatch table of native bindings as `global.name`,
    /// replacing any previous table of that name.
    fn install(
        &mut self,
        global: &str,
        name: &str,
        calls: &[BindingSpec],
    ) -> Result<(), RuntimeError>;

    /// Create a coroutine whose body is `start`, keeping a persistent
    /// reference so the collector cannot reclaim it while it runs.
    fn spawn(&mut self, start: Function) -> Result<CoroutineId, RuntimeError>;

    /// Drive a coroutine: deliver `args` (start arguments on the first
    /// resume, native-call results afterwards) and run until the next
    /// native call, return, or error.
    fn resume(&mut self, coroutine: CoroutineId, args: Vec<Value>) -> Result<Step, RuntimeError>;

    /// Release the persistent reference for a finished coroutine.
    fn release(&mut self, coroutine: CoroutineId);

    /// Collector safe point; invoked by the engine at runner teardown.
    fn collect(&mut self);

    /// Tear the machine down; every coroutine reference is dropped.
    fn close(&mut self);
}
