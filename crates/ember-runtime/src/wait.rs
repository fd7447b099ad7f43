//! Joined-waiter bookkeeping shared by every capability that can park
//! coroutines.
//!
//! Each waiter pairs the parked runner's resume token with the timer
//! route armed for it. Indefinite waits arm a never-firing anchor so
//! release and teardown treat both shapes uniformly. Release order is
//! strictly oldest first.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::trace;

use ember_value::Value;

use crate::error::RuntimeError;
use crate::object::{CallOutcome, Ctx, ObjectCore};
use crate::reactor::Route;
use crate::runner::{ResumeToken, RunnerId};

/// Parse a wait deadline: absent or nil means wait indefinitely, a bare
/// number is seconds, a table may carry `sec`/`msec`/`usec` components.
pub fn parse_timeout(args: &[Value]) -> Result<Option<Duration>, RuntimeError> {
    let arg = match args.first() {
        None | Some(Value::Nil) => return Ok(None),
        Some(arg) => arg,
    };
    match arg {
        Value::Number(seconds) => Duration::try_from_secs_f64(*seconds)
            .map(Some)
            .map_err(|_| RuntimeError::bad_argument("bad timeout")),
        Value::Table(table) => {
            let part = |key: &str| -> Result<u64, RuntimeError> {
                match table.get_str(key) {
                    None | Some(Value::Nil) => Ok(0),
                    Some(Value::Number(n)) if n.is_finite() && *n >= 0.0 => Ok(*n as u64),
                    _ => Err(RuntimeError::bad_argument("bad timeout")),
                }
            };
            let sec = part("sec")?;
            let msec = part("msec")?;
            let usec = part("usec")?;
            let micros = sec
                .checked_mul(1_000_000)
                .and_then(|v| v.checked_add(msec.checked_mul(1_000)?))
                .and_then(|v| v.checked_add(usec))
                .ok_or_else(|| RuntimeError::bad_argument("bad timeout"))?;
            Ok(Some(Duration::from_micros(micros)))
        }
        _ => Err(RuntimeError::bad_argument("bad timeout")),
    }
}

struct Joined {
    runner: RunnerId,
    token: ResumeToken,
    route: u64,
}

/// FIFO of coroutines parked on one object.
#[derive(Default)]
pub struct WaitState {
    joined: VecDeque<Joined>,
}

impl WaitState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waiting(&self) -> usize {
        self.joined.len()
    }

    /// Park the calling runner, arming a timeout timer when the deadline
    /// is bounded and an anchor otherwise.
    pub fn wait(
        &mut self,
        core: &mut ObjectCore,
        args: &[Value],
        ctx: &mut Ctx<'_>,
    ) -> Result<CallOutcome, RuntimeError> {
        let deadline = parse_timeout(args)?;
        let route = if deadline.is_some() {
            Route::Timeout {
                object: ctx.object,
                runner: ctx.runner,
            }
        } else {
            Route::Anchor { object: ctx.object }
        };
        let route = ctx.routes.arm(ctx.reactor, deadline, route);
        let token = ctx.suspend(core)?;
        self.joined.push_back(Joined {
            runner: ctx.runner,
            token,
            route,
        });
        trace!(object = %ctx.object, runner = %ctx.runner, "waiter joined");
        Ok(CallOutcome::Suspend)
    }

    /// Wake up to `count` waiters, oldest first, with `args` as the wait
    /// call's results. Returns how many were woken.
    pub fn release(&mut self, count: usize, args: &[Value], ctx: &mut Ctx<'_>) -> usize {
        let mut released = 0;
        while released < count {
            let Some(waiter) = self.joined.pop_front() else {
                break;
            };
            ctx.routes.disarm(ctx.reactor, waiter.route);
            ctx.wake(waiter.runner, waiter.token, args.to_vec());
            released += 1;
        }
        released
    }

    /// Remove one runner's entry after its timeout fired. Returns whether
    /// it was still joined; a missing entry means the fire lost a race
    /// with a release.
    pub fn timed_out(&mut self, runner: RunnerId, ctx: &mut Ctx<'_>) -> bool {
        self.drop_runner(runner, ctx)
    }

    /// Forget a runner's entry, disarming its timer.
    pub fn drop_runner(&mut self, runner: RunnerId, ctx: &mut Ctx<'_>) -> bool {
        let Some(position) = self.joined.iter().position(|j| j.runner == runner) else {
            return false;
        };
        let Some(waiter) = self.joined.remove(position) else {
            return false;
        };
        ctx.routes.disarm(ctx.reactor, waiter.route);
        true
    }

    /// Disarm every waiter's timer without waking anyone.
    pub fn clear(&mut self, ctx: &mut Ctx<'_>) {
        for waiter in self.joined.drain(..) {
            ctx.routes.disarm(ctx.reactor, waiter.route);
        }
    }
}
