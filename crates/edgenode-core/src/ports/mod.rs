//! Ports: the seams between the core and the outside world.
//!
//! Each trait hides one external collaborator (time, observability, the
//! remote coordinator, the host's resource counters) so the pipeline can be
//! driven entirely in-process in tests.

pub mod clock;
pub mod coordinator;
pub mod event_sink;
pub mod probe;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::coordinator::{
    Capabilities, Coordinator, Heartbeat, NodeLoad, NodeRegistration, PullRequest,
    ResultSubmission,
};
pub use self::event_sink::{EventSink, NoopEventSink};
pub use self::probe::{HostInfo, ResourceProbe, ResourceSample};
