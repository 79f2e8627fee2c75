//! Transport configuration.
//!
//! Plain fields load from JSON with durations in milliseconds; execution
//! options are code-only.
//!
//! ```
//! use peerwire::Config;
//! use std::time::Duration;
//!
//! let config: Config = serde_json::from_str(r#"{"method_timeout": 250}"#).unwrap();
//! assert_eq!(config.method_timeout, Duration::from_millis(250));
//! assert_eq!(config.handshake_timeout, Duration::from_millis(3000));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;
use crate::scheduler::Execution;

/// Health monitor timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Interval between scans of all connections.
    #[serde(with = "millis")]
    pub tick_interval: Duration,
    /// Silence after which a health check is sent.
    #[serde(with = "millis")]
    pub max_quiet_time: Duration,
    /// How long an outstanding check may go unanswered before the
    /// connection is closed.
    #[serde(with = "millis")]
    pub health_check_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(500),
            max_quiet_time: Duration::from_millis(5000),
            health_check_timeout: Duration::from_millis(5000),
        }
    }
}

/// Transport configuration, fixed once the transport starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(with = "millis")]
    pub handshake_timeout: Duration,
    #[serde(with = "millis")]
    pub method_timeout: Duration,
    pub health: HealthConfig,
    /// Include backtraces in `InternalServerError` responses.
    pub respond_with_stack_trace: bool,
    /// Largest accepted frame payload in bytes.
    pub max_payload_size: usize,
    /// Default execution option for route handlers.
    #[serde(skip)]
    pub route_execution: Execution,
    /// Default execution option for response callbacks.
    #[serde(skip)]
    pub response_execution: Execution,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_millis(3000),
            method_timeout: Duration::from_millis(3000),
            health: HealthConfig::default(),
            respond_with_stack_trace: false,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            route_execution: Execution::Dispatcher,
            response_execution: Execution::Dispatcher,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn method_timeout(mut self, timeout: Duration) -> Self {
        self.method_timeout = timeout;
        self
    }

    pub fn health(mut self, health: HealthConfig) -> Self {
        self.health = health;
        self
    }

    pub fn health_tick_interval(mut self, interval: Duration) -> Self {
        self.health.tick_interval = interval;
        self
    }

    pub fn max_quiet_time(mut self, quiet: Duration) -> Self {
        self.health.max_quiet_time = quiet;
        self
    }

    pub fn health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health.health_check_timeout = timeout;
        self
    }

    pub fn respond_with_stack_trace(mut self, enabled: bool) -> Self {
        self.respond_with_stack_trace = enabled;
        self
    }

    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    pub fn route_execution(mut self, execution: Execution) -> Self {
        self.route_execution = execution;
        self
    }

    pub fn response_execution(mut self, execution: Execution) -> Self {
        self.response_execution = execution;
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
