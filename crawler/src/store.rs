//! De-duplicating store for harvested events.

use nostr::{Event, EventId};
use std::collections::HashMap;

/// Events harvested across all relays, keyed by event id.
///
/// Relay contents overlap heavily, so the same event is routinely served by
/// several relays. Keying on the id keeps exactly one copy.
#[derive(Debug, Default)]
pub(crate) struct EventStore {
    events: HashMap<EventId, Event>,
}

impl EventStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert an event, returning true if its id had not been seen before.
    pub(crate) fn insert(&mut self, event: Event) -> bool {
        self.events.insert(event.id, event).is_none()
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    /// Iterate over the stored events in no particular order.
    pub(crate) fn values(&self) -> impl Iterator<Item = &Event> {
        self.events.values()
    }
}
