// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Collector configuration.
//!
//! Sources are applied in order, later ones overriding earlier ones:
//!
//! 1. **Defaults** - see [`crate::constants`]
//! 2. **YAML file** - only when a path is given
//! 3. **Environment variables** - `BACKEND_URL`, `UDP_PORT`, `TCP_PORT`,
//!    `UDP_ENABLED`, `TCP_ENABLED`, `LOG_LEVEL`
//!
//! The merged result is validated before it is handed out.
//!
//! Durations accept either an integer number of seconds or a string with a
//! `ms`, `s`, `m` or `h` suffix (`"500ms"`, `"1s"`, `"2m"`).

/// Overwrites a config field when the source field is set.
macro_rules! merge_value {
    ($config:expr, $source:expr, $field:ident) => {
        if let Some(value) = &$source.$field {
            $config.$field = value.clone();
        }
    };
}

pub mod env;
pub mod log_level;
pub mod yaml;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::config::{env::EnvConfigSource, log_level::LogLevel, yaml::YamlConfigSource};
use crate::constants;
use crate::forwarder::HttpForwarderConfig;
use crate::queue::BatchQueueConfig;
use crate::tcp::TcpListenerConfig;
use crate::udp::UdpListenerConfig;

/// Listeners bind on every interface.
const LISTEN_HOST: &str = "0.0.0.0";

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    ParseError(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[allow(clippy::module_name_repetitions)]
pub trait ConfigSource {
    fn load(&self, config: &mut Config) -> Result<(), ConfigError>;
}

#[derive(Default)]
#[allow(clippy::module_name_repetitions)]
pub struct ConfigBuilder {
    sources: Vec<Box<dyn ConfigSource>>,
    config: Config,
}

#[allow(clippy::module_name_repetitions)]
impl ConfigBuilder {
    #[must_use]
    pub fn add_source(mut self, source: Box<dyn ConfigSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Applies every source in order and validates the result. The first
    /// source that fails aborts the build.
    pub fn build(&mut self) -> Result<Config, ConfigError> {
        for source in &self.sources {
            source.load(&mut self.config)?;
        }
        self.config.validate()?;
        debug!("Loaded config: {:?}", self.config);
        Ok(self.config.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpConfig {
    pub enabled: bool,
    pub port: u16,
    pub buffer_size: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        UdpConfig {
            enabled: true,
            port: constants::DEFAULT_SYSLOG_PORT,
            buffer_size: constants::DEFAULT_UDP_BUFFER_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpConfig {
    pub enabled: bool,
    pub port: u16,
    pub max_connections: usize,
    pub max_line_bytes: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        TcpConfig {
            enabled: true,
            port: constants::DEFAULT_SYSLOG_PORT,
            max_connections: constants::DEFAULT_TCP_MAX_CONNECTIONS,
            max_line_bytes: constants::DEFAULT_TCP_MAX_LINE_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferConfig {
    pub max_size: usize,
    pub flush_size: usize,
    pub flush_interval: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        BufferConfig {
            max_size: constants::DEFAULT_BUFFER_MAX_SIZE,
            flush_size: constants::DEFAULT_BUFFER_FLUSH_SIZE,
            flush_interval: constants::DEFAULT_BUFFER_FLUSH_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwarderConfig {
    pub backend_url: String,
    pub timeout: Duration,
    pub retry_count: u32,
    pub retry_delay: Duration,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        ForwarderConfig {
            backend_url: constants::DEFAULT_BACKEND_URL.to_string(),
            timeout: constants::DEFAULT_FORWARDER_TIMEOUT,
            retry_count: constants::DEFAULT_FORWARDER_RETRY_COUNT,
            retry_delay: constants::DEFAULT_FORWARDER_RETRY_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    #[default]
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Config {
    pub udp: UdpConfig,
    pub tcp: TcpConfig,
    pub buffer: BufferConfig,
    pub forwarder: ForwarderConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.udp.enabled && !self.tcp.enabled {
            return invalid("at least one of UDP or TCP must be enabled");
        }
        if self.udp.enabled && self.udp.buffer_size == 0 {
            return invalid("server.udp.buffer_size must be greater than 0");
        }
        if self.tcp.enabled && self.tcp.max_connections == 0 {
            return invalid("server.tcp.max_connections must be greater than 0");
        }
        if self.tcp.enabled && self.tcp.max_line_bytes == 0 {
            return invalid("server.tcp.max_line_bytes must be greater than 0");
        }
        if self.buffer.max_size == 0 {
            return invalid("buffer.max_size must be greater than 0");
        }
        if self.buffer.flush_size == 0 {
            return invalid("buffer.flush_size must be greater than 0");
        }
        if self.buffer.flush_interval.is_zero() {
            return invalid("buffer.flush_interval must be greater than 0");
        }

        let url = self.forwarder.backend_url.trim();
        if url.is_empty() {
            return invalid("forwarder.backend_url must not be empty");
        }
        match reqwest::Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
            Ok(parsed) => invalid(&format!(
                "forwarder.backend_url must use http or https, got {}",
                parsed.scheme()
            )),
            Err(e) => invalid(&format!("forwarder.backend_url {url:?} is not a URL: {e}")),
        }
    }

    #[must_use]
    pub fn udp_listener(&self) -> UdpListenerConfig {
        UdpListenerConfig {
            host: LISTEN_HOST.to_string(),
            port: self.udp.port,
            buffer_size: self.udp.buffer_size,
        }
    }

    #[must_use]
    pub fn tcp_listener(&self) -> TcpListenerConfig {
        TcpListenerConfig {
            host: LISTEN_HOST.to_string(),
            port: self.tcp.port,
            max_connections: self.tcp.max_connections,
            max_line_bytes: self.tcp.max_line_bytes,
        }
    }

    #[must_use]
    pub fn batch_queue(&self) -> BatchQueueConfig {
        BatchQueueConfig {
            max_size: self.buffer.max_size,
            flush_size: self.buffer.flush_size,
            flush_interval: self.buffer.flush_interval,
        }
    }

    #[must_use]
    pub fn http_forwarder(&self) -> HttpForwarderConfig {
        HttpForwarderConfig {
            backend_url: self.forwarder.backend_url.trim().to_string(),
            timeout: self.forwarder.timeout,
            retry_count: self.forwarder.retry_count,
            retry_delay: self.forwarder.retry_delay,
        }
    }
}

fn invalid(reason: &str) -> Result<(), ConfigError> {
    Err(ConfigError::Invalid(reason.to_string()))
}

/// Defaults, then the YAML file at `path` if any, then the environment.
pub fn get_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut builder = ConfigBuilder::default();
    if let Some(path) = path {
        builder = builder.add_source(Box::new(YamlConfigSource {
            path: path.to_path_buf(),
        }));
    }
    builder.add_source(Box::new(EnvConfigSource)).build()
}

/// Parses `"500ms"`, `"1s"`, `"2m"`, `"1h"` or a bare number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    let (digits, unit) = match input.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => input.split_at(idx),
        None => (input, "s"),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration {input:?}"))?;

    match unit.trim() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value.saturating_mul(60))),
        "h" => Ok(Duration::from_secs(value.saturating_mul(3_600))),
        other => Err(format!("invalid duration unit {other:?} in {input:?}")),
    }
}

pub fn deserialize_optional_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDuration {
        Seconds(u64),
        Text(String),
    }

    match Option::<RawDuration>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawDuration::Seconds(secs)) => Ok(Some(Duration::from_secs(secs))),
        Some(RawDuration::Text(text)) => parse_duration(&text)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
