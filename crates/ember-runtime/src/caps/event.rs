//! Counter-based rendezvous capability.
//!
//! `set(n)` banks `n` releases; each banked release wakes the oldest
//! waiter, and a waiter arriving while releases are banked consumes one
//! immediately. The counter therefore never exceeds the number of sets
//! not yet matched by a wait.

use ember_value::Value;

use crate::error::RuntimeError;
use crate::object::{Call, CallOutcome, CapabilityKind, Ctx, Object, ObjectCore};
use crate::runner::RunnerId;
use crate::wait::WaitState;

pub static CALLS: &[Call] = &[
    Call::plain("wait"),
    Call::plain("set"),
    Call::plain("release"),
];

pub struct EventCap {
    core: ObjectCore,
    wait: WaitState,
    count: u32,
}

impl EventCap {
    pub fn new() -> EventCap {
        EventCap {
            core: ObjectCore::new(CapabilityKind::Event),
            wait: WaitState::new(),
            count: 0,
        }
    }

    pub fn counter(&self) -> u32 {
        self.count
    }

    /// Match banked releases against joined waiters, oldest first.
    fn drain(&mut self, ctx: &mut Ctx<'_>) {
        while self.count > 0 && self.wait.waiting() > 0 {
            let released = self.wait.release(self.count as usize, &[], ctx);
            if released == 0 {
                break;
            }
            self.count -= released as u32;
        }
    }
}

impl Default for EventCap {
    fn default() -> Self {
        EventCap::new()
    }
}

impl Object for EventCap {
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
            "wait" => {
                let outcome = self.wait.wait(&mut self.core, &args, ctx)?;
                self.drain(ctx);
                Ok(outcome)
            }
            "set" => {
                let n = match args.first() {
                    None | Some(Value::Nil) => 1,
                    Some(Value::Number(n)) if *n >= 1.0 => *n as u32,
                    Some(Value::Number(_)) => 1,
                    _ => return Err(RuntimeError::bad_argument("bad count")),
                };
                self.count += n;
                self.drain(ctx);
                Ok(CallOutcome::Return(Vec::new()))
            }
            "release" => {
                let n = match args.first() {
                    None | Some(Value::Nil) => usize::MAX,
                    Some(Value::Number(n)) if *n >= 0.0 => {
                        if *n == 0.0 {
                            usize::MAX
                        } else {
                            *n as usize
                        }
                    }
                    _ => return Err(RuntimeError::bad_argument("bad count")),
                };
                self.wait.release(n, &[], ctx);
                Ok(CallOutcome::Return(Vec::new()))
            }
            _ => Err(RuntimeError::native("unknown call")),
        }
    }

    fn on_timeout(&mut self, runner: RunnerId, ctx: &mut Ctx<'_>) -> bool {
        // A waiter still joined when its timer fires gets the timeout
        // error; a missing entry means a release won the race.
        !self.wait.timed_out(runner, ctx)
    }

    fn on_runner_stopped(&mut self, runner: RunnerId, ctx: &mut Ctx<'_>) {
        self.wait.drop_runner(runner, ctx);
    }

    fn cleanup(&mut self, ctx: &mut Ctx<'_>) {
        self.wait.clear(ctx);
    }
}
