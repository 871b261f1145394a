//! Connection configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::DEFAULT_MAX_FRAME_BYTES;
use crate::error::{AmiError, AmiResult};

/// Settings for one manager-interface session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmiConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: String,
    /// Interval between keep-alive pings; 0 disables them
    pub keepalive_interval_ms: u64,
    /// Default deadline for a reply
    pub response_timeout_ms: u64,
    /// Consecutive keep-alive failures that declare the link down
    pub keepalive_max_failures: u32,
    /// Allow several in-flight actions on the connection
    pub pipelining: bool,
    /// Re-establish the session after an unexpected link loss
    pub auto_reconnect: bool,
    /// Prefix of generated correlation tokens
    pub action_id_prefix: String,
    /// Upper bound on a single notification handler invocation; 0 = none
    pub handler_timeout_ms: u64,
    /// Largest frame the decoder buffers before dropping the link
    pub max_frame_bytes: usize,
    pub reconnect: ReconnectConfig,
}

impl Default for AmiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5038,
            username: "admin".to_string(),
            secret: "admin".to_string(),
            keepalive_interval_ms: 10_000,
            response_timeout_ms: 10_000,
            keepalive_max_failures: 3,
            pipelining: true,
            auto_reconnect: true,
            action_id_prefix: "ispbx".to_string(),
            handler_timeout_ms: 0,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl AmiConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, secret: impl Into<String>) -> Self {
        self.username = username.into();
        self.secret = secret.into();
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_ms > 0).then(|| Duration::from_millis(self.keepalive_interval_ms))
    }

    pub fn handler_timeout(&self) -> Option<Duration> {
        (self.handler_timeout_ms > 0).then(|| Duration::from_millis(self.handler_timeout_ms))
    }

    /// Reject settings that can never work
    pub fn validate(&self) -> AmiResult<()> {
        if self.host.trim().is_empty() {
            return Err(AmiError::config("host must not be empty"));
        }
        if self.port == 0 {
            return Err(AmiError::config("port must not be 0"));
        }
        if self.response_timeout_ms == 0 {
            return Err(AmiError::config("response_timeout_ms must be positive"));
        }
        if self.keepalive_max_failures == 0 {
            return Err(AmiError::config("keepalive_max_failures must be at least 1"));
        }
        if self.max_frame_bytes == 0 {
            return Err(AmiError::config("max_frame_bytes must be positive"));
        }
        if self.action_id_prefix.contains(['\r', '\n']) {
            return Err(AmiError::config("action_id_prefix must not contain line breaks"));
        }
        self.reconnect.validate()
    }
}

/// Backoff policy for re-establishing a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub use_jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl ReconnectConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    fn validate(&self) -> AmiResult<()> {
        if self.backoff_multiplier < 1.0 {
            return Err(AmiError::config("reconnect.backoff_multiplier must be >= 1.0"));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(AmiError::config("reconnect.initial_delay_ms exceeds max_delay_ms"));
        }
        Ok(())
    }
}
