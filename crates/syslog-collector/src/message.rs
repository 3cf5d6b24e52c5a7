// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pipeline-internal representation of one ingested syslog line.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Application-level urgency derived from the 0-7 syslog severity code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

/// Indexed by syslog severity code.
///
/// 0 emergency, 1 alert, 2 critical, 3 error, 4 warning, 5 notice,
/// 6 informational, 7 debug.
static SEVERITY_BY_CODE: [Severity; 8] = [
    Severity::Critical,
    Severity::Critical,
    Severity::Critical,
    Severity::High,
    Severity::Medium,
    Severity::Low,
    Severity::Info,
    Severity::Info,
];

/// Indexed by syslog facility code.
static FACILITY_NAMES: [&str; 24] = [
    "kernel", "user", "mail", "daemon", "auth", "syslog", "printer", "news", "uucp", "cron",
    "authpriv", "ftp", "ntp", "audit", "alert", "clock", "local0", "local1", "local2", "local3",
    "local4", "local5", "local6", "local7",
];

pub const UNKNOWN_CATEGORY: &str = "unknown";

impl Severity {
    /// Maps a syslog severity code. Codes above 7 are treated as debug.
    #[must_use]
    pub fn from_code(code: u8) -> Self {
        SEVERITY_BY_CODE[usize::from(code.min(7))]
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category name for a facility code, or `"unknown"` outside the table.
#[must_use]
pub fn facility_name(code: u8) -> &'static str {
    FACILITY_NAMES
        .get(usize::from(code))
        .copied()
        .unwrap_or(UNKNOWN_CATEGORY)
}

/// Value stored under a metadata key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Map(BTreeMap<String, MetadataValue>),
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::String(value)
    }
}

impl From<u8> for MetadataValue {
    fn from(value: u8) -> Self {
        MetadataValue::Integer(i64::from(value))
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Integer(value)
    }
}

impl From<BTreeMap<String, MetadataValue>> for MetadataValue {
    fn from(value: BTreeMap<String, MetadataValue>) -> Self {
        MetadataValue::Map(value)
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

/// Unit flowing through the pipeline, serialized as one element of the
/// backend's JSON array.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedMessage {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub category: &'static str,
    pub source: String,
    pub message: String,
    pub raw_log: String,
    pub protocol: &'static str,
    pub metadata: Metadata,
}

/// Ordered group of messages handed to the forwarder in one call.
pub type Batch = Vec<NormalizedMessage>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::constants::PROTOCOL;
    use chrono::TimeZone;

    #[test]
    fn test_severity_table() {
        let expected = [
            "critical", "critical", "critical", "high", "medium", "low", "info", "info",
        ];
        for (code, name) in expected.iter().enumerate() {
            assert_eq!(Severity::from_code(code as u8).as_str(), *name);
        }
        assert_eq!(Severity::from_code(42), Severity::Info);
    }

    #[test]
    fn test_facility_table() {
        assert_eq!(facility_name(0), "kernel");
        assert_eq!(facility_name(1), "user");
        assert_eq!(facility_name(4), "auth");
        assert_eq!(facility_name(10), "authpriv");
        assert_eq!(facility_name(16), "local0");
        assert_eq!(facility_name(23), "local7");
        assert_eq!(facility_name(24), "unknown");
    }

    #[test]
    fn test_serialized_shape() {
        let mut structured = BTreeMap::new();
        structured.insert(
            "exampleSDID@32473".to_string(),
            MetadataValue::Map(BTreeMap::from([(
                "iut".to_string(),
                MetadataValue::from("3"),
            )])),
        );
        let mut metadata = Metadata::new();
        metadata.insert("originalFormat".to_string(), "RFC5424".into());
        metadata.insert("facility".to_string(), 4u8.into());
        metadata.insert("structuredData".to_string(), structured.into());

        let message = NormalizedMessage {
            timestamp: Utc.with_ymd_and_hms(2003, 10, 11, 22, 14, 15).unwrap(),
            severity: Severity::High,
            category: "auth",
            source: "mymachine".to_string(),
            message: "su failed".to_string(),
            raw_log: "<35>1 ...".to_string(),
            protocol: PROTOCOL,
            metadata,
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["timestamp"], "2003-10-11T22:14:15Z");
        assert_eq!(value["severity"], "high");
        assert_eq!(value["category"], "auth");
        assert_eq!(value["rawLog"], "<35>1 ...");
        assert_eq!(value["protocol"], "syslog");
        assert_eq!(value["metadata"]["facility"], 4);
        assert_eq!(value["metadata"]["originalFormat"], "RFC5424");
        assert_eq!(
            value["metadata"]["structuredData"]["exampleSDID@32473"]["iut"],
            "3"
        );
    }
}
