//! Joinable handle over another runner.
//!
//! A flow tracks the runner spawned for it: `wait` parks until that
//! runner stops, `terminate` requests its stop, and the stop broadcast
//! releases every waiter as an implicit cancellation cascade.

use ember_value::{Table, Value};

use crate::error::RuntimeError;
use crate::object::{Call, CallOutcome, CapabilityKind, Ctx, Object, ObjectCore, Task};
use crate::runner::{RunnerId, Status};
use crate::wait::WaitState;

pub static CALLS: &[Call] = &[
    Call::plain("id"),
    Call::plain("wait"),
    Call::plain("terminate"),
];

pub struct FlowCap {
    core: ObjectCore,
    wait: WaitState,
    tracked: RunnerId,
    /// Final status once the tracked runner stopped.
    finished: Option<Status>,
}

impl FlowCap {
    pub fn track(runner: RunnerId) -> FlowCap {
        FlowCap {
            core: ObjectCore::new(CapabilityKind::Flow),
            wait: WaitState::new(),
            tracked: runner,
            finished: None,
        }
    }

    pub fn tracked(&self) -> RunnerId {
        self.tracked
    }

    pub fn finished(&self) -> Option<Status> {
        self.finished
    }

    fn status(&self, ctx: &Ctx<'_>) -> Status {
        match self.finished {
            Some(status) => status,
            None => ctx
                .runners
                .status(self.tracked)
                .unwrap_or(Status::Stopped),
        }
    }
}

impl Object for FlowCap {
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
            "id" => {
                let mut table = Table::new();
                table.set("id", Value::from(self.tracked.to_string().as_str()));
                table.set("status", Value::from(self.status(ctx).label()));
                Ok(CallOutcome::Return(vec![Value::Table(table)]))
            }
            "wait" => {
                if self.finished.is_some() {
                    return Ok(CallOutcome::Return(Vec::new()));
                }
                self.wait.wait(&mut self.core, &args, ctx)
            }
            "terminate" => {
                if self.finished.is_none() {
                    ctx.tasks.push_back(Task::Stop {
                        runner: self.tracked,
                    });
                }
                Ok(CallOutcome::Return(Vec::new()))
            }
            _ => Err(RuntimeError::native("unknown call")),
        }
    }

    fn on_timeout(&mut self, runner: RunnerId, ctx: &mut Ctx<'_>) -> bool {
        if !self.wait.timed_out(runner, ctx) {
            return true;
        }
        // The join timed out: request the tracked runner's stop and still
        // raise the timeout on the joiner.
        if self.finished.is_none() {
            ctx.tasks.push_back(Task::Stop {
                runner: self.tracked,
            });
        }
        false
    }

    fn on_runner_stopped(&mut self, runner: RunnerId, ctx: &mut Ctx<'_>) {
        if runner == self.tracked && self.finished.is_none() {
            self.finished = Some(
                ctx.runners
                    .status(self.tracked)
                    .unwrap_or(Status::Stopped),
            );
            self.wait.release(usize::MAX, &[], ctx);
        } else {
            self.wait.drop_runner(runner, ctx);
        }
    }

    fn cleanup(&mut self, ctx: &mut Ctx<'_>) {
        self.wait.clear(ctx);
    }
}
