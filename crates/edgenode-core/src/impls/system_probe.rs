//! `ResourceProbe` implementations.

use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::warn;

use crate::ports::{HostInfo, ResourceProbe, ResourceSample};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Reads this process's counters through `sysinfo`.
///
/// Handlers run inside the node process, so the process is the closest
/// boundary a sample can be attributed to. CPU is a share of the whole
/// host (0-100), computed between two refreshes; the first sample after
/// construction reads as 0%.
pub struct SystemProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
    cpu_cores: usize,
}

impl SystemProbe {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(err) => {
                warn!(error = err, "cannot resolve own pid; resource samples read as zero");
                None
            }
        };
        let probe = Self {
            system: Mutex::new(System::new()),
            pid,
            cpu_cores: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        };
        probe.refresh_process();
        probe
    }

    fn refresh_process(&self) -> ResourceSample {
        let Some(pid) = self.pid else {
            return ResourceSample::default();
        };
        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );
        match system.process(pid) {
            Some(process) => ResourceSample::new(
                f64::from(process.cpu_usage()) / self.cpu_cores as f64,
                process.memory() as f64 / BYTES_PER_MB,
            ),
            None => ResourceSample::default(),
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SystemProbe {
    fn sample(&self) -> ResourceSample {
        self.refresh_process()
    }

    fn host_info(&self) -> HostInfo {
        let mut system = self.system.lock();
        system.refresh_memory();
        HostInfo {
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            platform: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            cpu_cores: self.cpu_cores,
            memory_total_mb: system.total_memory() as f64 / BYTES_PER_MB,
        }
    }
}

/// Probe with settable readings.
#[derive(Debug)]
pub struct FixedProbe {
    sample: Mutex<ResourceSample>,
}

impl FixedProbe {
    pub fn new(cpu_percent: f64, memory_mb: f64) -> Self {
        Self {
            sample: Mutex::new(ResourceSample::new(cpu_percent, memory_mb)),
        }
    }

    pub fn set(&self, cpu_percent: f64, memory_mb: f64) {
        *self.sample.lock() = ResourceSample::new(cpu_percent, memory_mb);
    }
}

impl ResourceProbe for FixedProbe {
    fn sample(&self) -> ResourceSample {
        *self.sample.lock()
    }

    fn host_info(&self) -> HostInfo {
        HostInfo {
            hostname: "fixed-host".to_string(),
            platform: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            cpu_cores: 4,
            memory_total_mb: 8192.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_probe_reports_plausible_values() {
        let probe = SystemProbe::new();
        let sample = probe.sample();
        assert!((0.0..=100.0).contains(&sample.cpu_percent));
        assert!(sample.memory_mb > 0.0);

        let host = probe.host_info();
        assert!(host.cpu_cores >= 1);
        assert!(!host.platform.is_empty());
    }

    #[test]
    fn system_probe_measures_this_process_not_the_host() {
        let probe = SystemProbe::new();
        let host_total = probe.host_info().memory_total_mb;
        let own = probe.sample().memory_mb;
        // a test binary is far below the default 512 MB task threshold
        assert!(own < 512.0, "sampled {own} MB");
        assert!(own < host_total);
    }

    #[test]
    fn fixed_probe_returns_what_it_was_given() {
        let probe = FixedProbe::new(10.0, 256.0);
        assert_eq!(probe.sample(), ResourceSample::new(10.0, 256.0));
        probe.set(90.0, 1024.0);
        assert_eq!(probe.sample().cpu_percent, 90.0);
    }
}
