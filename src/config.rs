use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api: ApiConfig,
    pub rate_limit: RateLimitConfig,
    pub dispatcher: DispatcherConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Root URL every request path is appended to
    pub base_url: String,
    /// File holding the agent bearer token
    pub token_file: String,
    /// Per-request HTTP timeout in seconds
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sustained requests per second allowed by the server
    pub steady_rate_per_second: f64,
    /// Extra requests allowed on top of the steady rate
    pub burst_capacity: u32,
    /// Seconds it takes the burst allowance to refill completely
    pub burst_window_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Pending calls held before enqueue blocks
    pub queue_capacity: usize,
    /// Base delay between two dispatched calls in milliseconds
    pub tick_interval_ms: u64,
    /// Upper bound of the adaptive interval as a multiple of the base
    pub max_interval_factor: f64,
    /// Consecutive 429 responses before the interval is raised
    pub throttle_after: u32,
    /// Fraction the interval grows by when throttled (0.2 = 20%)
    pub throttle_step: f64,
    /// Consecutive successes before the interval is lowered
    pub recover_after: u32,
    /// Fraction the interval shrinks by when recovering
    pub recover_step: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Backoff before the first retry; doubles per attempt
    pub base_backoff_ms: u64,
    /// Server retry-after hints at or above this are ignored
    pub retry_after_ceiling_ms: u64,
    /// Added to the wait derived from a reset timestamp
    pub reset_buffer_ms: u64,
    /// Maximum jitter as a fraction of the computed backoff
    pub jitter_ratio: f64,
    /// Maximum jitter added to a server retry-after hint
    pub hint_jitter_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: crate::API_BASE_URL.to_string(),
            token_file: crate::AGENT_TOKEN_FILE.to_string(),
            request_timeout_seconds: 30,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            steady_rate_per_second: 2.0,
            burst_capacity: 30,
            burst_window_seconds: 60,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 500,
            tick_interval_ms: 450, // just inside 2 req/s
            max_interval_factor: 2.0,
            throttle_after: 2,
            throttle_step: 0.20,
            recover_after: 5,
            recover_step: 0.05,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff_ms: 500,
            retry_after_ceiling_ms: 5000,
            reset_buffer_ms: 100,
            jitter_ratio: 0.5,
            hint_jitter_ms: 100,
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl RateLimitConfig {
    pub fn burst_window(&self) -> Duration {
        Duration::from_secs(self.burst_window_seconds)
    }
}

impl DispatcherConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl ClientConfig {
    /// Load configuration from file, creating default if it doesn't exist
    pub fn load_or_create(config_path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config_path = config_path.as_ref();
        if config_path.exists() {
            info!(path = %config_path.display(), "loading configuration");
            let config_str =
                fs::read_to_string(config_path).map_err(|e| ConfigError::io(config_path, e))?;
            let config: ClientConfig = toml::from_str(&config_str)?;
            Ok(config)
        } else {
            info!(path = %config_path.display(), "writing default configuration");
            let config = ClientConfig::default();
            config.save(config_path)?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self, config_path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let config_path = config_path.as_ref();
        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| ConfigError::io(parent, e))?;
            }
        }

        let config_str = toml::to_string_pretty(self)?;
        fs::write(config_path, config_str).map_err(|e| ConfigError::io(config_path, e))?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.api.base_url.is_empty() {
            return invalid("api.base_url must not be empty");
        }
        if self.rate_limit.steady_rate_per_second <= 0.0 {
            return invalid("rate_limit.steady_rate_per_second must be greater than 0");
        }
        if self.rate_limit.burst_window_seconds == 0 {
            return invalid("rate_limit.burst_window_seconds must be greater than 0");
        }
        if self.dispatcher.queue_capacity == 0 {
            return invalid("dispatcher.queue_capacity must be greater than 0");
        }
        if self.dispatcher.tick_interval_ms == 0 {
            return invalid("dispatcher.tick_interval_ms must be greater than 0");
        }
        if self.dispatcher.max_interval_factor < 1.0 {
            return invalid("dispatcher.max_interval_factor must be at least 1.0");
        }
        if self.dispatcher.throttle_after == 0 || self.dispatcher.recover_after == 0 {
            return invalid("dispatcher streak thresholds must be greater than 0");
        }
        for (name, ratio) in [
            ("dispatcher.throttle_step", self.dispatcher.throttle_step),
            ("dispatcher.recover_step", self.dispatcher.recover_step),
            ("retry.jitter_ratio", self.retry.jitter_ratio),
        ] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be in (0.0, 1.0]",
                    name
                )));
            }
        }
        if self.retry.base_backoff_ms == 0 {
            return invalid("retry.base_backoff_ms must be greater than 0");
        }

        Ok(())
    }

    pub fn log_summary(&self) {
        info!(
            base_url = %self.api.base_url,
            steady_rate = self.rate_limit.steady_rate_per_second,
            burst = self.rate_limit.burst_capacity,
            tick_ms = self.dispatcher.tick_interval_ms,
            queue_capacity = self.dispatcher.queue_capacity,
            max_retries = self.retry.max_retries,
            "client configuration"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ClientConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
            [dispatcher]
            tick_interval_ms = 600

            [retry]
            max_retries = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.dispatcher.tick_interval(), Duration::from_millis(600));
        assert_eq!(config.dispatcher.queue_capacity, 500);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.rate_limit.burst_capacity, 30);
        assert_eq!(config.api.base_url, crate::API_BASE_URL);
    }

    #[test]
    fn load_or_create_writes_defaults_then_reads_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("client.toml");

        let created = ClientConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created.dispatcher.tick_interval_ms, 450);

        let mut edited = created.clone();
        edited.rate_limit.burst_capacity = 10;
        edited.save(&path).unwrap();

        let loaded = ClientConfig::load_or_create(&path).unwrap();
        assert_eq!(loaded.rate_limit.burst_capacity, 10);
    }

    #[test]
    fn rejects_nonsense_values() {
        let mut config = ClientConfig::default();
        config.dispatcher.queue_capacity = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = ClientConfig::default();
        config.retry.jitter_ratio = 1.5;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.dispatcher.max_interval_factor = 0.5;
        assert!(config.validate().is_err());
    }
}
