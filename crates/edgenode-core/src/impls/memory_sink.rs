//! Event sink that records everything, for tests and status introspection.

use parking_lot::Mutex;

use crate::domain::EdgeEvent;
use crate::ports::EventSink;

#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<EdgeEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EdgeEvent> {
        self.events.lock().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(EdgeEvent::name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: EdgeEvent) {
        self.events.lock().push(event);
    }
}
