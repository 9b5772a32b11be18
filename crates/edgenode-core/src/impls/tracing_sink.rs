//! Forwards events to `tracing`.

use tracing::{error, info, warn};

use crate::domain::{EdgeEvent, EventLevel};
use crate::ports::EventSink;

/// Default sink. Level follows `EdgeEvent::level`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: EdgeEvent) {
        let name = event.name();
        let task_id = event.task_id().map(|id| id.as_str().to_string());
        let task_id = task_id.as_deref().unwrap_or("-");

        match event.level() {
            EventLevel::Info => info!(event = name, task_id, "{event}"),
            EventLevel::Warn => warn!(event = name, task_id, "{event}"),
            EventLevel::Error => error!(event = name, task_id, "{event}"),
        }
    }
}
