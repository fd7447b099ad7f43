//! Owned reactor handle shared by the stream-backed capabilities.
//!
//! `TinState` holds the handle, proxies non-blocking I/O through the
//! reactor, and guarantees the handle closes exactly once. Its `suspend`
//! drains one already-queued event right after parking, so a call made
//! after its event arrived resolves on the next queue turn instead of
//! hanging.

use tracing::trace;

use crate::error::RuntimeError;
use crate::link::LinkState;
use crate::object::{CallOutcome, Ctx, ObjectCore, Task};
use crate::reactor::{HandleId, Peer};

#[derive(Default)]
pub struct TinState {
    handle: Option<HandleId>,
}

impl TinState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt a freshly opened handle. The constructor registers ownership
    /// in the engine's stream map.
    pub fn with_handle(handle: HandleId) -> Self {
        TinState {
            handle: Some(handle),
        }
    }

    pub fn handle(&self) -> Option<HandleId> {
        self.handle
    }

    fn require(&self) -> Result<HandleId, RuntimeError> {
        self.handle
            .ok_or_else(|| RuntimeError::native("stream is closed"))
    }

    /// Park the calling runner on the current call; if a matching event is
    /// already queued, schedule its delivery so the wake follows promptly.
    pub fn suspend(
        &mut self,
        core: &mut ObjectCore,
        link: &mut LinkState,
        ctx: &mut Ctx<'_>,
    ) -> Result<CallOutcome, RuntimeError> {
        ctx.suspend(core)?;
        if let Some(kind) = core.parked_event() {
            if let Some(event) = link.pop(kind) {
                trace!(object = %ctx.object, kind = ?kind, "replaying queued event");
                ctx.tasks.push_back(Task::Event {
                    object: ctx.object,
                    event,
                });
            }
        }
        Ok(CallOutcome::Suspend)
    }

    pub fn buffered(&self, ctx: &Ctx<'_>) -> usize {
        match self.handle {
            Some(handle) => ctx.reactor.buffered(handle),
            None => 0,
        }
    }

    pub fn read(&self, max: usize, ctx: &mut Ctx<'_>) -> Result<Vec<u8>, RuntimeError> {
        let handle = self.require()?;
        Ok(ctx.reactor.read(handle, max))
    }

    pub fn write(&self, bytes: &[u8], ctx: &mut Ctx<'_>) -> Result<(), RuntimeError> {
        let handle = self.require()?;
        ctx.reactor.write(handle, bytes);
        Ok(())
    }

    pub fn peer(&self, ctx: &Ctx<'_>) -> Option<Peer> {
        self.handle.and_then(|handle| ctx.reactor.peer(handle))
    }

    /// Close the handle. Idempotent.
    pub fn close(&mut self, ctx: &mut Ctx<'_>) {
        if let Some(handle) = self.handle.take() {
            ctx.streams.remove(&handle);
            ctx.reactor.close(handle);
        }
    }
}
