//! Coroutine scheduling units.
//!
//! A `Runner` wraps one VM coroutine with a status machine and the *way*:
//! the (object, call) pair it is currently inside, plus the resume token
//! minted when it suspended there. A wake must present a matching token;
//! anything else is a stale resume from a capability the runner has since
//! moved past, and is dropped silently.

use std::fmt;

use hashbrown::HashMap;
use tracing::trace;

use crate::error::RuntimeError;
use crate::object::{Call, ObjectId};
use crate::vm::CoroutineId;

/// Engine-scoped runner identity. Displays in hex, the form used in
/// script-visible error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunnerId(pub u32);

impl fmt::Display for RunnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Token minted at suspend time; a wake must present it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResumeToken(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Created, not yet resumed.
    Started,
    Running,
    /// Parked inside a native call, waiting for a wake.
    Suspended,
    Stopped,
    /// Stopped after an unhandled error.
    Error,
}

impl Status {
    pub fn label(self) -> &'static str {
        match self {
            Status::Started => "started",
            Status::Running => "running",
            Status::Suspended => "suspended",
            Status::Stopped => "stopped",
            Status::Error => "error",
        }
    }

    pub fn terminal(self) -> bool {
        matches!(self, Status::Stopped | Status::Error)
    }
}

/// Where the runner currently is: the native call it entered last, and
/// the token handed out if it suspended there.
#[derive(Debug, Clone, Copy)]
pub struct Way {
    pub object: ObjectId,
    pub call: &'static Call,
    pub token: Option<ResumeToken>,
}

#[derive(Debug)]
pub struct Runner {
    pub id: RunnerId,
    pub coroutine: CoroutineId,
    pub status: Status,
    pub way: Option<Way>,
    exception: Option<String>,
}

impl Runner {
    pub fn suspended(&self) -> bool {
        self.status == Status::Suspended
    }

    pub fn stopped(&self) -> bool {
        self.status.terminal()
    }

    /// Ended without error. Meaningful only once terminal.
    pub fn success(&self) -> bool {
        self.status != Status::Error
    }

    /// Whether a wake presenting `(object, token)` is current.
    pub fn accepts(&self, object: ObjectId, token: ResumeToken) -> bool {
        if !self.suspended() {
            return false;
        }
        match &self.way {
            Some(way) => way.object == object && way.token == Some(token),
            None => false,
        }
    }

    pub fn set_exception(&mut self, message: String) {
        // First error wins.
        if self.exception.is_none() {
            self.exception = Some(message);
        }
    }

    pub fn take_exception(&mut self) -> Option<String> {
        self.exception.take()
    }
}

/// All live runners, keyed by monotonically assigned id so a stopped
/// runner's id is never reused.
#[derive(Default)]
pub struct RunnerSet {
    runners: HashMap<u32, Runner>,
    next_id: u32,
    next_token: u64,
}

impl RunnerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, coroutine: CoroutineId) -> RunnerId {
        let id = RunnerId(self.next_id);
        self.next_id += 1;
        self.runners.insert(
            id.0,
            Runner {
                id,
                coroutine,
                status: Status::Started,
                way: None,
                exception: None,
            },
        );
        trace!(runner = %id, coroutine, "runner created");
        id
    }

    pub fn get(&self, id: RunnerId) -> Option<&Runner> {
        self.runners.get(&id.0)
    }

    pub fn get_mut(&mut self, id: RunnerId) -> Option<&mut Runner> {
        self.runners.get_mut(&id.0)
    }

    pub fn remove(&mut self, id: RunnerId) -> Option<Runner> {
        self.runners.remove(&id.0)
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }

    pub fn ids(&self) -> Vec<RunnerId> {
        self.runners.keys().map(|id| RunnerId(*id)).collect()
    }

    /// Record the call a runner just entered. Clears any previous token:
    /// wakes aimed at an earlier suspension become stale here.
    pub fn enter_call(&mut self, id: RunnerId, object: ObjectId, call: &'static Call) {
        if let Some(runner) = self.runners.get_mut(&id.0) {
            runner.way = Some(Way {
                object,
                call,
                token: None,
            });
        }
    }

    /// Park a runner on its current call and mint the wake token.
    pub fn suspend(
        &mut self,
        id: RunnerId,
        object: ObjectId,
        call: &'static Call,
    ) -> Result<ResumeToken, RuntimeError> {
        let token = ResumeToken(self.next_token);
        self.next_token += 1;
        let runner = self
            .runners
            .get_mut(&id.0)
            .ok_or_else(|| RuntimeError::native("suspend on a dead runner"))?;
        runner.status = Status::Suspended;
        runner.way = Some(Way {
            object,
            call,
            token: Some(token),
        });
        trace!(runner = %id, object = %object, call = call.name, "runner suspended");
        Ok(token)
    }

    pub fn set_exception(&mut self, id: RunnerId, message: String) {
        if let Some(runner) = self.runners.get_mut(&id.0) {
            runner.set_exception(message);
        }
    }

    pub fn status(&self, id: RunnerId) -> Option<Status> {
        self.get(id).map(|runner| runner.status)
    }

    /// Call named in the runner's way, for error messages.
    pub fn way_call(&self, id: RunnerId) -> Option<&'static Call> {
        self.get(id).and_then(|runner| runner.way.map(|way| way.call))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::CapabilityKind;
    use crate::reactor::EventKind;

    static WAIT: Call = Call::plain("wait");
    static READ: Call = Call::resolved_by("read", EventKind::Readable);

    fn oid(index: u32) -> ObjectId {
        ObjectId {
            kind: CapabilityKind::Event,
            index,
        }
    }

    #[test]
    fn tokens_guard_stale_wakes() {
        let mut set = RunnerSet::new();
        let id = set.create(1);
        set.enter_call(id, oid(0), &WAIT);
        let stale = set.suspend(id, oid(0), &WAIT).unwrap();

        // Runner moves on to a different call and suspends again.
        set.enter_call(id, oid(7), &READ);
        let fresh = set.suspend(id, oid(7), &READ).unwrap();

        let runner = set.get(id).unwrap();
        assert!(!runner.accepts(oid(0), stale));
        assert!(!runner.accepts(oid(7), stale));
        assert!(runner.accepts(oid(7), fresh));
    }

    #[test]
    fn entering_a_call_invalidates_previous_token() {
        let mut set = RunnerSet::new();
        let id = set.create(1);
        let token = set.suspend(id, oid(0), &WAIT).unwrap();
        set.enter_call(id, oid(0), &WAIT);
        assert!(!set.get(id).unwrap().accepts(oid(0), token));
    }

    #[test]
    fn first_exception_wins() {
        let mut set = RunnerSet::new();
        let id = set.create(1);
        set.set_exception(id, "first".into());
        set.set_exception(id, "second".into());
        assert_eq!(set.get_mut(id).unwrap().take_exception().as_deref(), Some("first"));
    }

    #[test]
    fn runner_ids_are_never_reused() {
        let mut set = RunnerSet::new();
        let a = set.create(1);
        set.remove(a);
        let b = set.create(2);
        assert_ne!(a, b);
    }
}
