// ABOUTME: Rate-limit configuration - TTLs, backoff padding, special routes.
// ABOUTME: Loads from defaults, builder calls, JSON, files, or environment.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable for `inactive_timeout` (ms).
pub const ENV_INACTIVE_TIMEOUT: &str = "FLEETGATE_INACTIVE_TIMEOUT";
/// Environment variable for `request_offset` (ms).
pub const ENV_REQUEST_OFFSET: &str = "FLEETGATE_REQUEST_OFFSET";
/// Environment variable for `sweep_interval` (ms).
pub const ENV_SWEEP_INTERVAL: &str = "FLEETGATE_SWEEP_INTERVAL";

/// Tunables shared by the coordinator and every worker.
///
/// All durations are stored in milliseconds. JSON keys are camelCase, so a
/// config file looks like `{"inactiveTimeout": 240000, "requestOffset": 500}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
    /// Buckets untouched for longer than this are swept.
    pub inactive_timeout: u64,
    /// Extra padding added to every bucket timeout.
    pub request_offset: u64,
    /// Reset window applied to special routes instead of the reset header.
    pub special_route_interval: u64,
    /// How often the coordinator runs the sweep.
    pub sweep_interval: u64,
    /// Glob patterns naming routes that get the special reset computation.
    pub special_routes: Vec<String>,
    /// Capacity of the in-process message channels.
    pub channel_capacity: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            inactive_timeout: 240_000,
            request_offset: 500,
            special_route_interval: 250,
            sweep_interval: 60_000,
            special_routes: vec!["*reactions*".to_string()],
            channel_capacity: 256,
        }
    }
}

impl RateLimitConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bucket inactivity TTL.
    pub fn inactive_timeout(mut self, ttl: Duration) -> Self {
        self.inactive_timeout = ttl.as_millis() as u64;
        self
    }

    /// Set the extra backoff added to bucket timeouts.
    pub fn request_offset(mut self, offset: Duration) -> Self {
        self.request_offset = offset.as_millis() as u64;
        self
    }

    /// Set the reset window used for special routes.
    pub fn special_route_interval(mut self, interval: Duration) -> Self {
        self.special_route_interval = interval.as_millis() as u64;
        self
    }

    /// Set the sweep cadence.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval.as_millis() as u64;
        self
    }

    /// Add a special route glob pattern.
    pub fn special_route(mut self, pattern: impl Into<String>) -> Self {
        self.special_routes.push(pattern.into());
        self
    }

    /// Set the in-process channel capacity.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Parse a config from JSON. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Build a config from the `FLEETGATE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from defaults overridden by `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = lookup(ENV_INACTIVE_TIMEOUT) {
            config.inactive_timeout = parse_millis(ENV_INACTIVE_TIMEOUT, &value)?;
        }
        if let Some(value) = lookup(ENV_REQUEST_OFFSET) {
            config.request_offset = parse_millis(ENV_REQUEST_OFFSET, &value)?;
        }
        if let Some(value) = lookup(ENV_SWEEP_INTERVAL) {
            config.sweep_interval = parse_millis(ENV_SWEEP_INTERVAL, &value)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Check values that would make the coordinator misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval == 0 {
            return Err(ConfigError::Invalid {
                key: "sweepInterval".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "channelCapacity".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        for pattern in &self.special_routes {
            glob::Pattern::new(pattern).map_err(|e| ConfigError::Invalid {
                key: "specialRoutes".to_string(),
                message: format!("'{}': {}", pattern, e),
            })?;
        }
        Ok(())
    }

    /// Inactivity TTL as a `Duration`.
    pub fn inactive_ttl(&self) -> Duration {
        Duration::from_millis(self.inactive_timeout)
    }

    /// Sweep cadence as a `Duration`.
    pub fn sweep_period(&self) -> Duration {
        Duration::from_millis(self.sweep_interval)
    }
}

fn parse_millis(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        message: format!("expected milliseconds, got '{}'", value),
    })
}
