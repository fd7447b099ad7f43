//! Per-event queues for stream-backed capabilities.
//!
//! An event that arrives while its correlated call is in flight resolves
//! that call immediately; otherwise it queues here, FIFO per event kind,
//! until a matching call suspends and drains it.

use std::collections::VecDeque;

use hashbrown::HashMap;
use tracing::trace;

use crate::object::ObjectCore;
use crate::reactor::{Delivery, EventKind};

#[derive(Default)]
pub struct LinkState {
    queues: HashMap<EventKind, VecDeque<Delivery>>,
}

impl LinkState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route an incoming event: returned events resolve the parked call
    /// now, `None` means it was queued for a later call.
    pub fn offer(&mut self, core: &ObjectCore, event: Delivery) -> Option<Delivery> {
        if core.parked_event() == Some(event.kind()) {
            return Some(event);
        }
        trace!(object = %core.id, kind = ?event.kind(), "event queued");
        self.queues.entry(event.kind()).or_default().push_back(event);
        None
    }

    /// Oldest queued event of a kind.
    pub fn pop(&mut self, kind: EventKind) -> Option<Delivery> {
        self.queues.get_mut(&kind)?.pop_front()
    }

    pub fn queued(&self, kind: EventKind) -> usize {
        self.queues.get(&kind).map_or(0, VecDeque::len)
    }

    pub fn clear(&mut self) {
        self.queues.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Call, CapabilityKind};
    use crate::reactor::StreamChannel;

    #[test]
    fn events_queue_fifo_per_kind() {
        let core = ObjectCore::new(CapabilityKind::Net);
        let mut link = LinkState::new();
        let chunk = |n: u8| Delivery::Data {
            channel: StreamChannel::Out,
            bytes: vec![n],
        };
        assert!(link.offer(&core, chunk(1)).is_none());
        assert!(link.offer(&core, chunk(2)).is_none());
        assert!(link.offer(&core, Delivery::Closed).is_none());

        match link.pop(EventKind::Data) {
            Some(Delivery::Data { bytes, .. }) => assert_eq!(bytes, vec![1]),
            other => panic!("expected first chunk, got {other:?}"),
        }
        match link.pop(EventKind::Data) {
            Some(Delivery::Data { bytes, .. }) => assert_eq!(bytes, vec![2]),
            other => panic!("expected second chunk, got {other:?}"),
        }
        assert!(link.pop(EventKind::Data).is_none());
        assert_eq!(link.queued(EventKind::Closed), 1);
    }

    #[test]
    fn in_flight_call_gets_event_directly() {
        static READ: Call = Call::resolved_by("read", EventKind::Readable);
        let mut core = ObjectCore::new(CapabilityKind::Net);
        core.parked = Some(crate::object::Parked {
            runner: crate::runner::RunnerId(0),
            token: crate::runner::ResumeToken(0),
            call: &READ,
        });
        let mut link = LinkState::new();
        assert!(link.offer(&core, Delivery::Readable).is_some());
        // Non-matching kinds still queue.
        assert!(link.offer(&core, Delivery::Closed).is_none());
    }
}
