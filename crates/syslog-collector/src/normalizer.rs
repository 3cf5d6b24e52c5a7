// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns raw syslog bytes into [`NormalizedMessage`] records.
//!
//! Normalization never fails: input that neither grammar accepts still
//! produces a record carrying the raw text, tagged with a parse error.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::trace;

use crate::constants::PROTOCOL;
use crate::grammar::{rfc3164, rfc5424, SyslogFrame};
use crate::message::{
    facility_name, Metadata, MetadataValue, NormalizedMessage, Severity, UNKNOWN_CATEGORY,
};

/// Used when a frame parses but carries no priority.
const DEFAULT_SEVERITY_CODE: u8 = 6;
const DEFAULT_FACILITY_CODE: u8 = 1;

const PARSE_ERROR: &str = "failed to parse as RFC 3164 or RFC 5424";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginalFormat {
    Rfc5424,
    Rfc3164,
    Unknown,
}

impl OriginalFormat {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OriginalFormat::Rfc5424 => "RFC5424",
            OriginalFormat::Rfc3164 => "RFC3164",
            OriginalFormat::Unknown => "unknown",
        }
    }
}

/// Normalizes one syslog line received from `sender`.
///
/// `sender` is the peer's network address (host only) and becomes the
/// `source` whenever the line itself names no host.
#[must_use]
pub fn normalize(raw: &[u8], sender: &str) -> NormalizedMessage {
    let raw_text = String::from_utf8_lossy(raw).into_owned();

    if let Ok(frame) = rfc5424::parse(&raw_text) {
        return from_frame(frame, OriginalFormat::Rfc5424, raw_text, sender);
    }
    if let Ok(frame) = rfc3164::parse(&raw_text) {
        return from_frame(frame, OriginalFormat::Rfc3164, raw_text, sender);
    }

    trace!("Unparseable syslog line from {sender}");
    fallback(raw_text, sender)
}

fn from_frame(
    frame: SyslogFrame,
    format: OriginalFormat,
    raw_text: String,
    sender: &str,
) -> NormalizedMessage {
    let severity_code = frame.severity_code().unwrap_or(DEFAULT_SEVERITY_CODE);
    let facility_code = frame.facility_code().unwrap_or(DEFAULT_FACILITY_CODE);
    let category = facility_name(facility_code);

    let mut metadata = Metadata::new();
    metadata.insert("originalFormat".to_string(), format.as_str().into());
    metadata.insert("facility".to_string(), facility_code.into());
    metadata.insert("facilityName".to_string(), category.into());
    metadata.insert("severityLevel".to_string(), severity_code.into());

    if let Some(hostname) = &frame.hostname {
        metadata.insert("hostname".to_string(), hostname.clone().into());
    }
    if let Some(app_name) = frame.app_name {
        metadata.insert("appName".to_string(), app_name.into());
    }
    if let Some(proc_id) = frame.proc_id {
        metadata.insert("pid".to_string(), proc_id.into());
    }
    // Only the RFC 5424 grammar produces these two.
    if let Some(msg_id) = frame.msg_id {
        metadata.insert("msgId".to_string(), msg_id.into());
    }
    if let Some(structured_data) = frame.structured_data {
        let nested: BTreeMap<String, MetadataValue> = structured_data
            .into_iter()
            .map(|(id, params)| {
                let params: BTreeMap<String, MetadataValue> = params
                    .into_iter()
                    .map(|(name, value)| (name, MetadataValue::String(value)))
                    .collect();
                (id, MetadataValue::Map(params))
            })
            .collect();
        metadata.insert("structuredData".to_string(), nested.into());
    }

    NormalizedMessage {
        timestamp: frame.timestamp.unwrap_or_else(Utc::now),
        severity: Severity::from_code(severity_code),
        category,
        source: frame.hostname.unwrap_or_else(|| sender.to_string()),
        message: frame.message.unwrap_or_else(|| raw_text.clone()),
        raw_log: raw_text,
        protocol: PROTOCOL,
        metadata,
    }
}

fn fallback(raw_text: String, sender: &str) -> NormalizedMessage {
    let mut metadata = Metadata::new();
    metadata.insert(
        "originalFormat".to_string(),
        OriginalFormat::Unknown.as_str().into(),
    );
    metadata.insert("parseError".to_string(), PARSE_ERROR.into());

    NormalizedMessage {
        timestamp: Utc::now(),
        severity: Severity::Info,
        category: UNKNOWN_CATEGORY,
        source: sender.to_string(),
        message: raw_text.clone(),
        raw_log: raw_text,
        protocol: PROTOCOL,
        metadata,
    }
}
