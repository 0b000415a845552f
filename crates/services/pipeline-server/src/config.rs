//! Configuration for the pipeline server
//!
//! Configuration can be loaded from a TOML file and/or environment variables.

use pipeline_core::{ReceiveSettings, RunnerSettings};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Largest batch a single receive may return
const MAX_RECEIVE_BATCH: i32 = 10;

/// Longest long-poll the queue accepts
const MAX_WAIT_TIME_SECS: u64 = 20;

/// Longest visibility timeout the queue accepts (12 hours)
const MAX_VISIBILITY_TIMEOUT_SECS: u64 = 43_200;

/// Main configuration for the pipeline server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Queue and storage endpoints
    #[serde(default)]
    pub aws: AwsConfig,

    /// Queue polling and broadcast tuning
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Maximum number of concurrent SSE subscribers, unlimited when unset
    #[serde(default)]
    pub max_subscribers: Option<usize>,
}

fn default_http_port() -> u16 {
    8080
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            host: default_host(),
            max_subscribers: None,
        }
    }
}

/// AWS endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    /// URL of the notification queue
    #[serde(default)]
    pub queue_url: String,

    /// Region of the queue, and of buckets whose records carry no region
    #[serde(default = "default_region")]
    pub region: String,

    /// Endpoint override for S3-compatible stores and local queues
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            queue_url: String::new(),
            region: default_region(),
            endpoint: None,
        }
    }
}

/// Polling and broadcast tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Messages per receive (1-10)
    #[serde(default = "default_max_messages")]
    pub max_messages: i32,

    /// Seconds a received message stays hidden from other consumers
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,

    /// Long-poll wait in seconds (0-20)
    #[serde(default = "default_wait_time")]
    pub wait_time_secs: u64,

    /// Sleep while nobody is subscribed, and after transient queue errors
    #[serde(default = "default_idle_sleep")]
    pub idle_sleep_secs: u64,

    /// Sleep after the queue reports it is over its limit
    #[serde(default = "default_overload_sleep")]
    pub overload_sleep_secs: u64,

    /// Seconds between heartbeat pings
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Events buffered per subscriber before new ones are dropped
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    /// `Retry-After` seconds sent with a rejected subscription
    #[serde(default = "default_retry_after")]
    pub retry_after_secs: u64,
}

fn default_max_messages() -> i32 {
    10
}

fn default_visibility_timeout() -> u64 {
    10
}

fn default_wait_time() -> u64 {
    20
}

fn default_idle_sleep() -> u64 {
    1
}

fn default_overload_sleep() -> u64 {
    10
}

fn default_heartbeat_interval() -> u64 {
    1
}

fn default_subscriber_buffer() -> usize {
    1024
}

fn default_retry_after() -> u64 {
    5
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            visibility_timeout_secs: default_visibility_timeout(),
            wait_time_secs: default_wait_time(),
            idle_sleep_secs: default_idle_sleep(),
            overload_sleep_secs: default_overload_sleep(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            subscriber_buffer: default_subscriber_buffer(),
            retry_after_secs: default_retry_after(),
        }
    }
}

impl PipelineConfig {
    pub fn receive_settings(&self) -> ReceiveSettings {
        ReceiveSettings {
            max_messages: self.max_messages,
            visibility_timeout: Duration::from_secs(self.visibility_timeout_secs),
            wait_time: Duration::from_secs(self.wait_time_secs),
        }
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            idle_sleep: Duration::from_secs(self.idle_sleep_secs),
            overload_sleep: Duration::from_secs(self.overload_sleep_secs),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let mut config = Config::default();

        // Server
        if let Ok(port) = std::env::var("PIPELINE_HTTP_PORT") {
            if let Ok(p) = port.parse() {
                config.server.http_port = p;
            }
        }
        if let Ok(host) = std::env::var("PIPELINE_HOST") {
            config.server.host = host;
        }
        if let Ok(max) = std::env::var("PIPELINE_MAX_SUBSCRIBERS") {
            if let Ok(m) = max.parse() {
                config.server.max_subscribers = Some(m);
            }
        }

        // AWS
        if let Ok(url) = std::env::var("PIPELINE_QUEUE_URL") {
            config.aws.queue_url = url;
        }
        if let Ok(region) =
            std::env::var("PIPELINE_AWS_REGION").or_else(|_| std::env::var("AWS_REGION"))
        {
            config.aws.region = region;
        }
        if let Ok(endpoint) = std::env::var("PIPELINE_AWS_ENDPOINT") {
            config.aws.endpoint = Some(endpoint);
        }

        // Pipeline
        if let Ok(max) = std::env::var("PIPELINE_MAX_MESSAGES") {
            if let Ok(m) = max.parse() {
                config.pipeline.max_messages = m;
            }
        }
        if let Ok(timeout) = std::env::var("PIPELINE_VISIBILITY_TIMEOUT") {
            if let Ok(t) = timeout.parse() {
                config.pipeline.visibility_timeout_secs = t;
            }
        }
        if let Ok(wait) = std::env::var("PIPELINE_WAIT_TIME") {
            if let Ok(w) = wait.parse() {
                config.pipeline.wait_time_secs = w;
            }
        }
        if let Ok(size) = std::env::var("PIPELINE_SUBSCRIBER_BUFFER") {
            if let Ok(s) = size.parse() {
                config.pipeline.subscriber_buffer = s;
            }
        }

        config
    }

    /// Load configuration from file if it exists, otherwise from environment
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        if let Some(p) = path {
            if p.as_ref().exists() {
                return Self::from_file(p);
            }
            tracing::warn!(
                path = %p.as_ref().display(),
                "Config file not found, using environment"
            );
        }
        Ok(Self::from_env())
    }

    /// Reject settings the queue or the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.aws.queue_url.trim().is_empty() {
            return Err(ConfigError::Invalid("aws.queue_url must be set".into()));
        }
        if !(1..=MAX_RECEIVE_BATCH).contains(&self.pipeline.max_messages) {
            return Err(ConfigError::Invalid(format!(
                "pipeline.max_messages must be between 1 and {}, got {}",
                MAX_RECEIVE_BATCH, self.pipeline.max_messages
            )));
        }
        if self.pipeline.wait_time_secs > MAX_WAIT_TIME_SECS {
            return Err(ConfigError::Invalid(format!(
                "pipeline.wait_time_secs must be at most {}, got {}",
                MAX_WAIT_TIME_SECS, self.pipeline.wait_time_secs
            )));
        }
        if self.pipeline.visibility_timeout_secs > MAX_VISIBILITY_TIMEOUT_SECS {
            return Err(ConfigError::Invalid(format!(
                "pipeline.visibility_timeout_secs must be at most {}, got {}",
                MAX_VISIBILITY_TIMEOUT_SECS, self.pipeline.visibility_timeout_secs
            )));
        }
        if self.pipeline.subscriber_buffer == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.subscriber_buffer must be greater than 0".into(),
            ));
        }
        if self.pipeline.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.heartbeat_interval_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
