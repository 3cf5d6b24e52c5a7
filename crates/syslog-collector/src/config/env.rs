// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Environment variable overrides. Unset or empty variables leave the
//! configuration untouched.

use std::str::FromStr;

use tracing::warn;

use crate::config::{log_level::LogLevel, Config, ConfigError, ConfigSource};

#[allow(clippy::module_name_repetitions)]
pub struct EnvConfigSource;

impl ConfigSource for EnvConfigSource {
    fn load(&self, config: &mut Config) -> Result<(), ConfigError> {
        if let Some(url) = var("BACKEND_URL") {
            config.forwarder.backend_url = url;
        }

        if let Some(port) = var("UDP_PORT") {
            match parse_port(&port) {
                Ok(port) => config.udp.port = port,
                Err(e) => warn!("Ignoring UDP_PORT: {e}"),
            }
        }
        if let Some(port) = var("TCP_PORT") {
            match parse_port(&port) {
                Ok(port) => config.tcp.port = port,
                Err(e) => warn!("Ignoring TCP_PORT: {e}"),
            }
        }

        if let Some(enabled) = var("UDP_ENABLED") {
            config.udp.enabled = parse_enabled(&enabled);
        }
        if let Some(enabled) = var("TCP_ENABLED") {
            config.tcp.enabled = parse_enabled(&enabled);
        }

        if let Some(level) = var("LOG_LEVEL") {
            match LogLevel::from_str(&level) {
                Ok(level) => config.logging.level = level,
                Err(e) => warn!("Ignoring LOG_LEVEL: {e}"),
            }
        }

        Ok(())
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

/// Digits only, between 1 and 65535.
fn parse_port(value: &str) -> Result<u16, String> {
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("invalid port {value:?}"));
    }
    match value.parse::<u16>() {
        Ok(0) | Err(_) => Err(format!("port {value:?} out of range")),
        Ok(port) => Ok(port),
    }
}

/// Only `true` and `1` enable; any other non-empty value disables.
fn parse_enabled(value: &str) -> bool {
    value == "true" || value == "1"
}
