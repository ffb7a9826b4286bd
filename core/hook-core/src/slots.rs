//! Fixed table of event slots, one per routed event kind.
//!
//! Binding overwrites; there is never more than one consumer per slot.
//! Handlers are cloned out under the read lock and invoked after it is released,
//! so a handler may itself bind or clear slots.

use overlay_protocol::{EventKind, ProducerGroup, RoutedEvent, EVENT_KIND_COUNT};
use std::sync::{Arc, RwLock};

pub type EventHandler = Arc<dyn Fn(RoutedEvent) + Send + Sync>;

pub struct EventSlots {
    table: RwLock<[Option<EventHandler>; EVENT_KIND_COUNT]>,
}

impl Default for EventSlots {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSlots {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(std::array::from_fn(|_| None)),
        }
    }

    /// Binds `handler` to `kind`, replacing any previous binding.
    pub fn bind(&self, kind: EventKind, handler: EventHandler) {
        // Recover from poisoning - the table holds no invariants a panic could break
        let mut table = self.table.write().unwrap_or_else(|p| p.into_inner());
        table[kind.index()] = Some(handler);
    }

    pub fn unbind(&self, kind: EventKind) {
        let mut table = self.table.write().unwrap_or_else(|p| p.into_inner());
        table[kind.index()] = None;
    }

    pub fn clear_group(&self, group: ProducerGroup) {
        let mut table = self.table.write().unwrap_or_else(|p| p.into_inner());
        for kind in EventKind::ALL.iter().filter(|k| k.group() == group) {
            table[kind.index()] = None;
        }
    }

    pub fn clear_all(&self) {
        let mut table = self.table.write().unwrap_or_else(|p| p.into_inner());
        for slot in table.iter_mut() {
            *slot = None;
        }
    }

    pub fn is_bound(&self, kind: EventKind) -> bool {
        let table = self.table.read().unwrap_or_else(|p| p.into_inner());
        table[kind.index()].is_some()
    }

    pub fn bound_count(&self) -> usize {
        let table = self.table.read().unwrap_or_else(|p| p.into_inner());
        table.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn all_bound(&self) -> bool {
        self.bound_count() == EVENT_KIND_COUNT
    }

    pub fn all_clear(&self) -> bool {
        self.bound_count() == 0
    }

    /// Delivers `event` to its slot. Returns false if the slot was empty.
    pub fn emit(&self, event: RoutedEvent) -> bool {
        let kind = event.kind();
        let handler = {
            let table = self.table.read().unwrap_or_else(|p| p.into_inner());
            table[kind.index()].clone()
        };
        match handler {
            Some(handler) => {
                handler(event);
                true
            }
            None => {
                tracing::trace!(kind = %kind, "No consumer bound; event dropped");
                false
            }
        }
    }
}
