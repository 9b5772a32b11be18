//! Node configuration.
//!
//! Loaded from TOML, every field optional with a serde default. At runtime
//! the whole struct is published through a `watch` channel (`SharedConfig`);
//! loops and the pool re-read it on every tick, so a reload takes effect
//! without restarting anything.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EdgeConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub automation: AutomationConfig,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Fixed node id. Generated at startup when absent.
    #[serde(default)]
    pub node_id: Option<String>,
    /// Task types advertised on pull. Empty means "whatever is registered".
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub gpu: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_max_rate_limit_waits")]
    pub max_rate_limit_waits: u32,
    #[serde(default = "default_retry_after_secs")]
    pub default_retry_after_secs: u64,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub endpoints: Endpoints,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoints {
    #[serde(default = "default_login_path")]
    pub login: String,
    #[serde(default = "default_register_path")]
    pub register: String,
    #[serde(default = "default_heartbeat_path")]
    pub heartbeat: String,
    #[serde(default = "default_pull_path")]
    pub pull: String,
    #[serde(default = "default_submit_path")]
    pub submit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Terminal records kept per bucket before the oldest are evicted.
    #[serde(default = "default_retain_terminal")]
    pub retain_terminal: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_task_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    #[serde(default = "default_cpu_threshold")]
    pub cpu_threshold_percent: f64,
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold_mb: f64,
    /// Fail the task instead of only warning when a threshold is crossed.
    #[serde(default)]
    pub enforce_limits: bool,
    #[serde(default = "default_teardown_delay_ms")]
    pub teardown_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationConfig {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_pull_interval_ms")]
    pub pull_interval_ms: u64,
    #[serde(default = "default_max_tasks_per_pull")]
    pub max_tasks_per_pull: usize,
    /// Skip a pull while at least this many tasks are already waiting.
    #[serde(default)]
    pub max_waiting_before_pull: Option<usize>,
}

fn default_base_url() -> String {
    "http://localhost:8080/api/v1".to_string()
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_max_rate_limit_waits() -> u32 {
    10
}
fn default_retry_after_secs() -> u64 {
    5
}
fn default_login_path() -> String {
    "/auth/login".to_string()
}
fn default_register_path() -> String {
    "/compute/clients/register".to_string()
}
fn default_heartbeat_path() -> String {
    "/compute/clients/heartbeat".to_string()
}
fn default_pull_path() -> String {
    "/compute/tasks/pull".to_string()
}
fn default_submit_path() -> String {
    "/compute/tasks/result".to_string()
}
fn default_max_concurrency() -> usize {
    4
}
fn default_retain_terminal() -> usize {
    1_000
}
fn default_task_timeout_ms() -> u64 {
    300_000
}
fn default_sample_interval_ms() -> u64 {
    1_000
}
fn default_cpu_threshold() -> f64 {
    80.0
}
fn default_memory_threshold() -> f64 {
    512.0
}
fn default_teardown_delay_ms() -> u64 {
    5_000
}
fn default_heartbeat_interval_ms() -> u64 {
    30_000
}
fn default_pull_interval_ms() -> u64 {
    30_000
}
fn default_max_tasks_per_pull() -> usize {
    5
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            max_rate_limit_waits: default_max_rate_limit_waits(),
            default_retry_after_secs: default_retry_after_secs(),
            token: None,
            endpoints: Endpoints::default(),
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: default_login_path(),
            register: default_register_path(),
            heartbeat: default_heartbeat_path(),
            pull: default_pull_path(),
            submit: default_submit_path(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retain_terminal: default_retain_terminal(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_task_timeout_ms(),
            sample_interval_ms: default_sample_interval_ms(),
            cpu_threshold_percent: default_cpu_threshold(),
            memory_threshold_mb: default_memory_threshold(),
            enforce_limits: false,
            teardown_delay_ms: default_teardown_delay_ms(),
        }
    }
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            pull_interval_ms: default_pull_interval_ms(),
            max_tasks_per_pull: default_max_tasks_per_pull(),
            max_waiting_before_pull: None,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn default_retry_after(&self) -> Duration {
        Duration::from_secs(self.default_retry_after_secs)
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn teardown_delay(&self) -> Duration {
        Duration::from_millis(self.teardown_delay_ms)
    }
}

impl AutomationConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn pull_interval(&self) -> Duration {
        Duration::from_millis(self.pull_interval_ms)
    }
}

impl EdgeConfig {
    /// Load from a TOML file. A missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let config = Self::from_toml_str(&fs::read_to_string(path)?)?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "pool.max_concurrency must be at least 1".into(),
            ));
        }
        if self.sandbox.timeout_ms == 0 {
            return Err(ConfigError::Invalid("sandbox.timeout_ms must be > 0".into()));
        }
        if self.sandbox.sample_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "sandbox.sample_interval_ms must be > 0".into(),
            ));
        }
        if self.automation.heartbeat_interval_ms == 0 || self.automation.pull_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "automation intervals must be > 0".into(),
            ));
        }
        if self.automation.max_tasks_per_pull == 0 {
            return Err(ConfigError::Invalid(
                "automation.max_tasks_per_pull must be at least 1".into(),
            ));
        }
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://")
        {
            return Err(ConfigError::Invalid(format!(
                "api.base_url must be an http(s) url, got {}",
                self.api.base_url
            )));
        }
        Ok(())
    }
}

/// Runtime-updatable configuration.
///
/// Readers call `current()` (or hold a receiver from `subscribe()`) and take
/// a fresh snapshot each time they need a value.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    tx: std::sync::Arc<watch::Sender<EdgeConfig>>,
}

impl SharedConfig {
    pub fn new(config: EdgeConfig) -> Self {
        let (tx, _rx) = watch::channel(config);
        Self {
            tx: std::sync::Arc::new(tx),
        }
    }

    pub fn current(&self) -> EdgeConfig {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EdgeConfig> {
        self.tx.subscribe()
    }

    /// Validate and publish a new configuration.
    pub fn update(&self, config: EdgeConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.tx.send_replace(config);
        Ok(())
    }

    /// Apply an in-place edit, validating the result.
    pub fn modify(&self, f: impl FnOnce(&mut EdgeConfig)) -> Result<(), ConfigError> {
        let mut next = self.current();
        f(&mut next);
        self.update(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let c = EdgeConfig::default();
        assert_eq!(c.api.timeout_ms, 30_000);
        assert_eq!(c.api.max_retries, 3);
        assert_eq!(c.api.backoff_base_ms, 1_000);
        assert_eq!(c.api.default_retry_after_secs, 5);
        assert_eq!(c.pool.max_concurrency, 4);
        assert_eq!(c.sandbox.timeout_ms, 300_000);
        assert_eq!(c.sandbox.sample_interval_ms, 1_000);
        assert_eq!(c.sandbox.cpu_threshold_percent, 80.0);
        assert_eq!(c.sandbox.memory_threshold_mb, 512.0);
        assert_eq!(c.sandbox.teardown_delay_ms, 5_000);
        assert_eq!(c.automation.heartbeat_interval_ms, 30_000);
        assert_eq!(c.automation.pull_interval_ms, 30_000);
        assert_eq!(c.automation.max_tasks_per_pull, 5);
        assert_eq!(c.api.endpoints.pull, "/compute/tasks/pull");
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let c = EdgeConfig::from_toml_str(
            r#"
            [pool]
            max_concurrency = 8

            [sandbox]
            enforce_limits = true
            "#,
        )
        .unwrap();
        assert_eq!(c.pool.max_concurrency, 8);
        assert!(c.sandbox.enforce_limits);
        assert_eq!(c.sandbox.timeout_ms, 300_000);
        assert_eq!(c.api.max_retries, 3);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = EdgeConfig::from_toml_str("[pool]\nmax_concurrency = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn load_reads_file_and_missing_file_gives_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[automation]\npull_interval_ms = 500").unwrap();
        let c = EdgeConfig::load(file.path()).unwrap();
        assert_eq!(c.automation.pull_interval_ms, 500);

        let dir = tempfile::tempdir().unwrap();
        let c = EdgeConfig::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(c, EdgeConfig::default());
    }

    #[tokio::test]
    async fn shared_config_publishes_updates() {
        let shared = SharedConfig::new(EdgeConfig::default());
        let mut rx = shared.subscribe();
        shared.modify(|c| c.pool.max_concurrency = 2).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().pool.max_concurrency, 2);
        assert_eq!(shared.current().pool.max_concurrency, 2);

        let err = shared.modify(|c| c.pool.max_concurrency = 0);
        assert!(err.is_err());
        assert_eq!(shared.current().pool.max_concurrency, 2);
    }
}
