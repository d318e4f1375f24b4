use std::time::Duration;

use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};

/// Config structure with the recognized engine knobs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub sink: SinkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Sliding expiry per identifier, seconds.
    #[serde(default = "default_dedup_window_s")]
    pub dedup_window_s: u64,
    /// Sweeper cadence, seconds; must not exceed the dedup window.
    #[serde(default = "default_sweep_interval_s")]
    pub sweep_interval_s: u64,
    /// Flush cadence, seconds.
    #[serde(default = "default_aggregation_window_s")]
    pub aggregation_window_s: u64,
    /// Cap on reclamation work per sweep pass.
    #[serde(default = "default_max_evictions_per_sweep")]
    pub max_evictions_per_sweep: usize,
}

fn default_dedup_window_s() -> u64 {
    60
}

fn default_sweep_interval_s() -> u64 {
    10
}

fn default_aggregation_window_s() -> u64 {
    60
}

fn default_max_evictions_per_sweep() -> usize {
    10_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dedup_window_s: default_dedup_window_s(),
            sweep_interval_s: default_sweep_interval_s(),
            aggregation_window_s: default_aggregation_window_s(),
            max_evictions_per_sweep: default_max_evictions_per_sweep(),
        }
    }
}

impl EngineConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_s)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_s)
    }

    pub fn aggregation_window(&self) -> Duration {
        Duration::from_secs(self.aggregation_window_s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_metrics_addr() -> String {
    "127.0.0.1:9102".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            metrics_addr: default_metrics_addr(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Base URL the per-arrival `endpoint` path is joined onto.
    #[serde(default = "default_notify_base_url")]
    pub base_url: String,
    #[serde(default = "default_notify_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_notify_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_notify_timeout_ms() -> u64 {
    2_000
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            base_url: default_notify_base_url(),
            timeout_ms: default_notify_timeout_ms(),
        }
    }
}

impl NotifyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Downstream sink URL; when unset the count is only logged.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_sink_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_sink_timeout_ms() -> u64 {
    5_000
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_sink_timeout_ms(),
        }
    }
}

impl SinkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(config::File::with_name("uniqd.toml").required(false))
            .add_source(config::Environment::with_prefix("UNIQD").separator("__"))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.dedup_window_s == 0 {
            return Err(ConfigError::Message(
                "engine.dedup_window_s must be positive".to_string(),
            ));
        }
        if self.engine.aggregation_window_s == 0 {
            return Err(ConfigError::Message(
                "engine.aggregation_window_s must be positive".to_string(),
            ));
        }
        if self.engine.sweep_interval_s == 0
            || self.engine.sweep_interval_s > self.engine.dedup_window_s
        {
            return Err(ConfigError::Message(
                "engine.sweep_interval_s must be positive and no larger than engine.dedup_window_s"
                    .to_string(),
            ));
        }
        if self.engine.max_evictions_per_sweep == 0 {
            return Err(ConfigError::Message(
                "engine.max_evictions_per_sweep must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
