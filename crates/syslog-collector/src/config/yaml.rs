// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! YAML file configuration.
//!
//! ```yaml
//! server:
//!   udp:
//!     enabled: true
//!     port: 514
//!     buffer_size: 65535
//!   tcp:
//!     enabled: true
//!     port: 514
//!     max_connections: 1000
//! buffer:
//!   max_size: 10000
//!   flush_size: 100
//!   flush_interval: 1s
//! forwarder:
//!   backend_url: http://localhost:3000/api/syslog/bulk
//!   timeout: 10s
//!   retry_count: 3
//!   retry_delay: 1s
//! logging:
//!   level: info
//!   format: json
//! ```

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Format, Yaml},
    Figment,
};
use serde::Deserialize;

use crate::config::{
    deserialize_optional_duration, log_level::LogLevel, Config, ConfigError, ConfigSource,
    LogFormat,
};

/// Every field is optional; whatever is absent keeps its current value.
#[derive(Debug, PartialEq, Deserialize, Clone, Default)]
#[serde(default)]
#[allow(clippy::module_name_repetitions)]
pub struct YamlConfig {
    pub server: ServerSection,
    pub buffer: BufferSection,
    pub forwarder: ForwarderSection,
    pub logging: LoggingSection,
}

#[derive(Debug, PartialEq, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ServerSection {
    pub udp: UdpSection,
    pub tcp: TcpSection,
}

#[derive(Debug, PartialEq, Deserialize, Clone, Default)]
#[serde(default)]
pub struct UdpSection {
    pub enabled: Option<bool>,
    pub port: Option<u16>,
    pub buffer_size: Option<usize>,
}

#[derive(Debug, PartialEq, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TcpSection {
    pub enabled: Option<bool>,
    pub port: Option<u16>,
    pub max_connections: Option<usize>,
    pub max_line_bytes: Option<usize>,
}

#[derive(Debug, PartialEq, Deserialize, Clone, Default)]
#[serde(default)]
pub struct BufferSection {
    pub max_size: Option<usize>,
    pub flush_size: Option<usize>,
    #[serde(deserialize_with = "deserialize_optional_duration")]
    pub flush_interval: Option<Duration>,
}

#[derive(Debug, PartialEq, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ForwarderSection {
    pub backend_url: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_duration")]
    pub timeout: Option<Duration>,
    pub retry_count: Option<u32>,
    #[serde(deserialize_with = "deserialize_optional_duration")]
    pub retry_delay: Option<Duration>,
}

#[derive(Debug, PartialEq, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LoggingSection {
    pub level: Option<LogLevel>,
    pub format: Option<LogFormat>,
}

#[allow(clippy::module_name_repetitions)]
pub struct YamlConfigSource {
    pub path: PathBuf,
}

impl ConfigSource for YamlConfigSource {
    fn load(&self, config: &mut Config) -> Result<(), ConfigError> {
        if !self.path.is_file() {
            return Err(ConfigError::ParseError(format!(
                "config file {} does not exist",
                self.path.display()
            )));
        }

        let figment = Figment::new().merge(Yaml::file(self.path.clone()));
        match figment.extract::<YamlConfig>() {
            Ok(yaml_config) => merge_config(config, &yaml_config),
            Err(e) => {
                return Err(ConfigError::ParseError(format!(
                    "failed to parse {}: {e}",
                    self.path.display()
                )));
            }
        }

        Ok(())
    }
}

fn merge_config(config: &mut Config, yaml_config: &YamlConfig) {
    let udp = &yaml_config.server.udp;
    merge_value!(config.udp, udp, enabled);
    merge_value!(config.udp, udp, port);
    merge_value!(config.udp, udp, buffer_size);

    let tcp = &yaml_config.server.tcp;
    merge_value!(config.tcp, tcp, enabled);
    merge_value!(config.tcp, tcp, port);
    merge_value!(config.tcp, tcp, max_connections);
    merge_value!(config.tcp, tcp, max_line_bytes);

    let buffer = &yaml_config.buffer;
    merge_value!(config.buffer, buffer, max_size);
    merge_value!(config.buffer, buffer, flush_size);
    merge_value!(config.buffer, buffer, flush_interval);

    let forwarder = &yaml_config.forwarder;
    merge_value!(config.forwarder, forwarder, backend_url);
    merge_value!(config.forwarder, forwarder, timeout);
    merge_value!(config.forwarder, forwarder, retry_count);
    merge_value!(config.forwarder, forwarder, retry_delay);

    let logging = &yaml_config.logging;
    merge_value!(config.logging, logging, level);
    merge_value!(config.logging, logging, format);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::get_config;
    use std::path::Path;

    #[test]
    fn test_merge_config_overrides_with_yaml_file() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "collector.yaml",
                r#"
server:
  udp:
    enabled: false
    port: 5514
    buffer_size: 8192
  tcp:
    port: 6514
    max_connections: 50
    max_line_bytes: 4096
buffer:
  max_size: 500
  flush_size: 50
  flush_interval: 250ms
forwarder:
  backend_url: "https://logs.example.com/api/syslog/bulk"
  timeout: 5
  retry_count: 0
  retry_delay: 2m
logging:
  level: DEBUG
  format: text
"#,
            )?;

            let config = get_config(Some(Path::new("collector.yaml"))).unwrap();

            assert!(!config.udp.enabled);
            assert_eq!(config.udp.port, 5514);
            assert_eq!(config.udp.buffer_size, 8192);
            assert!(config.tcp.enabled);
            assert_eq!(config.tcp.port, 6514);
            assert_eq!(config.tcp.max_connections, 50);
            assert_eq!(config.tcp.max_line_bytes, 4096);
            assert_eq!(config.buffer.max_size, 500);
            assert_eq!(config.buffer.flush_size, 50);
            assert_eq!(config.buffer.flush_interval, Duration::from_millis(250));
            assert_eq!(
                config.forwarder.backend_url,
                "https://logs.example.com/api/syslog/bulk"
            );
            assert_eq!(config.forwarder.timeout, Duration::from_secs(5));
            assert_eq!(config.forwarder.retry_count, 0);
            assert_eq!(config.forwarder.retry_delay, Duration::from_secs(120));
            assert_eq!(config.logging.level, LogLevel::Debug);
            assert_eq!(config.logging.format, LogFormat::Text);
            Ok(())
        });
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("collector.yaml", "buffer:\n  flush_size: 10\n")?;

            let config = get_config(Some(Path::new("collector.yaml"))).unwrap();
            assert_eq!(config.buffer.flush_size, 10);
            assert_eq!(config.buffer.max_size, 10_000);
            assert_eq!(config.udp.port, 514);
            Ok(())
        });
    }

    #[test]
    fn test_malformed_yaml_is_an_error() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("collector.yaml", "buffer:\n  flush_interval: soon\n")?;

            let mut config = Config::default();
            let result = YamlConfigSource {
                path: "collector.yaml".into(),
            }
            .load(&mut config);
            assert!(matches!(result, Err(ConfigError::ParseError(_))));
            assert_eq!(config, Config::default());
            Ok(())
        });
    }
}
