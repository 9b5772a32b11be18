//! Resource probe port.

/// One CPU/memory observation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub memory_mb: f64,
}

impl ResourceSample {
    pub fn new(cpu_percent: f64, memory_mb: f64) -> Self {
        Self {
            cpu_percent,
            memory_mb,
        }
    }
}

/// Static facts about the host, sent on registration.
#[derive(Debug, Clone, PartialEq)]
pub struct HostInfo {
    pub hostname: String,
    pub platform: String,
    pub arch: String,
    pub cpu_cores: usize,
    pub memory_total_mb: f64,
}

/// Samples cover the node process; the probe cannot attribute usage to a
/// single handler running inside the shared runtime.
pub trait ResourceProbe: Send + Sync {
    fn sample(&self) -> ResourceSample;

    fn host_info(&self) -> HostInfo;
}
