//! Worker configuration

use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File};
use optimizer_lib::continuation::ContinuationConfig;
use optimizer_lib::dispatch::DispatchConfig;
use optimizer_lib::ports::RetryPolicy;
use optimizer_lib::runtime::{BudgetPolicy, LoopConfig};
use optimizer_lib::watcher::WatcherConfig;
use optimizer_lib::OptimizationSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Worker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Name attached to lifecycle log lines
    #[serde(default = "default_worker_name")]
    pub worker_name: String,

    /// Concurrent unit workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Wall-clock budget per invocation; 0 disables the deadline
    #[serde(default = "default_execution_budget_ms")]
    pub execution_budget_ms: u64,

    /// Part of the budget reserved for writing a checkpoint
    #[serde(default = "default_safety_margin_ms")]
    pub safety_margin_ms: u64,

    #[serde(default = "default_checkpoint_ttl_secs")]
    pub checkpoint_ttl_secs: u64,

    /// In-flight messages become visible again after this long
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,

    #[serde(default)]
    pub watcher: WatcherSection,

    #[serde(default)]
    pub enqueue: EnqueueSection,

    /// Defaults for requests that carry no settings of their own
    #[serde(default)]
    pub settings: OptimizationSettings,

    /// Enables the file-backed checkpoint cache
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// API server port for health, metrics and instance status
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Request dispatched once at startup
    #[serde(default)]
    pub request_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatcherSection {
    #[serde(default = "default_watcher_delay_secs")]
    pub default_delay_secs: u64,
    #[serde(default = "default_high_volume_delay_secs")]
    pub high_volume_delay_secs: u64,
    #[serde(default = "default_high_water_depth")]
    pub high_water_depth: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Longest delay the queue accepts
    #[serde(default = "default_max_queue_delay_secs")]
    pub max_queue_delay_secs: u64,
}

impl Default for WatcherSection {
    fn default() -> Self {
        Self {
            default_delay_secs: default_watcher_delay_secs(),
            high_volume_delay_secs: default_high_volume_delay_secs(),
            high_water_depth: default_high_water_depth(),
            max_retries: default_max_retries(),
            max_queue_delay_secs: default_max_queue_delay_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnqueueSection {
    #[serde(default = "default_enqueue_attempts")]
    pub attempts: u32,
    #[serde(default = "default_enqueue_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_enqueue_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for EnqueueSection {
    fn default() -> Self {
        Self {
            attempts: default_enqueue_attempts(),
            initial_backoff_ms: default_enqueue_backoff_ms(),
            max_backoff_ms: default_enqueue_max_backoff_ms(),
        }
    }
}

fn default_worker_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "rate-plan-worker".to_string())
}

fn default_workers() -> usize {
    4
}

fn default_execution_budget_ms() -> u64 {
    15 * 60 * 1000
}

fn default_safety_margin_ms() -> u64 {
    30_000
}

fn default_checkpoint_ttl_secs() -> u64 {
    6 * 60 * 60
}

fn default_visibility_timeout_secs() -> u64 {
    15 * 60
}

fn default_idle_backoff_ms() -> u64 {
    500
}

fn default_api_port() -> u16 {
    8080
}

fn default_watcher_delay_secs() -> u64 {
    30
}

fn default_high_volume_delay_secs() -> u64 {
    120
}

fn default_high_water_depth() -> u64 {
    50
}

fn default_max_retries() -> u32 {
    10
}

fn default_max_queue_delay_secs() -> u64 {
    900
}

fn default_enqueue_attempts() -> u32 {
    3
}

fn default_enqueue_backoff_ms() -> u64 {
    200
}

fn default_enqueue_max_backoff_ms() -> u64 {
    5_000
}

impl WorkerConfig {
    /// Load from an optional file (`optimizer.toml` in the working directory
    /// unless `path` is given) overlaid with `OPTIMIZER_*` environment variables.
    /// Nested keys use `__`, e.g. `OPTIMIZER_WATCHER__MAX_RETRIES`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("optimizer").required(false),
        };
        let builder = config::Config::builder().add_source(file).add_source(
            Environment::with_prefix("OPTIMIZER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
        Self::from_builder(builder)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config = builder.build().context("failed to read worker configuration")?;
        let parsed: WorkerConfig = config
            .try_deserialize()
            .context("invalid worker configuration")?;
        if parsed.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }
        Ok(parsed)
    }

    pub fn budget(&self) -> BudgetPolicy {
        if self.execution_budget_ms == 0 {
            return BudgetPolicy::Unlimited;
        }
        BudgetPolicy::Deadline {
            total: Duration::from_millis(self.execution_budget_ms),
            safety_margin: Duration::from_millis(self.safety_margin_ms),
        }
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            budget: self.budget(),
            idle_backoff: Duration::from_millis(self.idle_backoff_ms),
        }
    }

    pub fn enqueue_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.enqueue.attempts.max(1),
            initial_backoff: Duration::from_millis(self.enqueue.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.enqueue.max_backoff_ms),
        }
    }

    pub fn continuation(&self) -> ContinuationConfig {
        ContinuationConfig {
            checkpoint_ttl: Duration::from_secs(self.checkpoint_ttl_secs),
            enqueue_retry: self.enqueue_retry(),
        }
    }

    pub fn watcher(&self) -> WatcherConfig {
        WatcherConfig {
            default_delay: Duration::from_secs(self.watcher.default_delay_secs),
            high_volume_delay: Duration::from_secs(self.watcher.high_volume_delay_secs),
            high_water_depth: self.watcher.high_water_depth,
            max_retries: self.watcher.max_retries,
            max_queue_delay: Duration::from_secs(self.watcher.max_queue_delay_secs),
            enqueue_retry: self.enqueue_retry(),
        }
    }

    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            enqueue_retry: self.enqueue_retry(),
            first_watch_delay: Duration::from_secs(self.watcher.default_delay_secs),
        }
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_toml(source: &str) -> Result<WorkerConfig> {
        WorkerConfig::from_builder(
            config::Config::builder().add_source(File::from_str(source, FileFormat::Toml)),
        )
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = from_toml("").unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.api_port, 8080);
        assert!(config.cache_dir.is_none());

        let watcher = config.watcher();
        assert_eq!(watcher.default_delay, Duration::from_secs(30));
        assert_eq!(watcher.high_volume_delay, Duration::from_secs(120));
        assert_eq!(watcher.high_water_depth, 50);
        assert_eq!(watcher.max_retries, 10);
        assert_eq!(watcher.max_queue_delay, Duration::from_secs(900));
        assert_eq!(config.settings, OptimizationSettings::default());
    }

    #[test]
    fn test_nested_sections() {
        let config = from_toml(
            r#"
            workers = 2
            execution_budget_ms = 60000
            cache_dir = "/var/lib/rpo/checkpoints"

            [watcher]
            max_retries = 3

            [settings]
            sequences_per_unit = 5
            prorate = true
            "#,
        )
        .unwrap();

        assert_eq!(config.workers, 2);
        assert_eq!(config.watcher().max_retries, 3);
        assert_eq!(config.watcher().default_delay, Duration::from_secs(30));
        assert_eq!(config.settings.sequences_per_unit, 5);
        assert!(config.settings.prorate);
        assert_eq!(
            config.budget(),
            BudgetPolicy::Deadline {
                total: Duration::from_secs(60),
                safety_margin: Duration::from_secs(30),
            }
        );
    }

    #[test]
    fn test_zero_budget_is_unlimited() {
        let config = from_toml("execution_budget_ms = 0").unwrap();
        assert_eq!(config.budget(), BudgetPolicy::Unlimited);
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(from_toml("workers = 0").is_err());
    }

    #[test]
    fn test_enqueue_retry_always_attempts_once() {
        let config = from_toml("[enqueue]\nattempts = 0").unwrap();
        assert_eq!(config.enqueue_retry().max_attempts, 1);
    }
}
