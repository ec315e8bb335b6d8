/*!
 * Configuration types for the geodb client
 */

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::retry::RetryPolicy;

/// Connection configuration, immutable once a client is built
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// geodb server address, e.g. `localhost:8080` or `http://10.0.0.5:8080`
    #[serde(default = "default_host")]
    pub host: String,

    /// Shared secret; only needed when the server has basic auth enabled.
    /// Empty means unauthenticated.
    #[serde(default)]
    pub password: String,

    /// Register client-side prometheus collectors
    #[serde(default)]
    pub metrics: bool,

    /// Retry failed calls according to `retry_policy`
    #[serde(default)]
    pub retry: bool,

    #[serde(default)]
    pub retry_policy: RetryPolicy,

    /// TCP connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Log level for the CLI logger
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

fn default_host() -> String {
    "localhost:8080".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            password: String::new(),
            metrics: false,
            retry: false,
            retry_policy: RetryPolicy::default(),
            connect_timeout_secs: default_connect_timeout(),
            log_level: LogLevel::default(),
        }
    }
}

impl ClientConfig {
    /// Configuration for an unauthenticated server at `host`
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics = enabled;
        self
    }

    pub fn with_retry(mut self, enabled: bool) -> Self {
        self.retry = enabled;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = true;
        self.retry_policy = policy;
        self
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Endpoint URI with a scheme; plaintext `http` when none is given
    pub fn endpoint_uri(&self) -> String {
        let host = self.host.trim();
        if host.contains("://") {
            host.to_string()
        } else {
            format!("http://{}", host)
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let password = if self.password.is_empty() {
            ""
        } else {
            "<redacted>"
        };
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("password", &password)
            .field("metrics", &self.metrics)
            .field("retry", &self.retry)
            .field("retry_policy", &self.retry_policy)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("log_level", &self.log_level)
            .finish()
    }
}
