//! Port implementations.
//!
//! - `TracingEventSink`: default sink, forwards to `tracing`
//! - `MemoryEventSink`: records events for tests
//! - `SystemProbe` / `FixedProbe`: host counters via `sysinfo`, or fixed values
//! - `InMemoryCoordinator`: in-process coordinator for tests and `demo`
//!
//! The HTTP coordinator lives in `client`.

pub mod inmem_coordinator;
pub mod memory_sink;
pub mod system_probe;
pub mod tracing_sink;

pub use self::inmem_coordinator::InMemoryCoordinator;
pub use self::memory_sink::MemoryEventSink;
pub use self::system_probe::{FixedProbe, SystemProbe};
pub use self::tracing_sink::TracingEventSink;
