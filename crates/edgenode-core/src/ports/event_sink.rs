//! EventSink port.

use crate::domain::EdgeEvent;

/// Receives every observability event the core emits.
///
/// `emit` is called from inside queue and sandbox critical sections, so
/// implementations must not block or call back into the core.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EdgeEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: EdgeEvent) {}
}
