// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Syslog wire grammars.
//!
//! Each grammar turns one line of text into a [`SyslogFrame`] or rejects it.
//! Both are lenient past the priority header: fields that are missing at the
//! end of the line are simply left unset.

pub mod rfc3164;
pub mod rfc5424;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::errors::GrammarError;

/// Highest valid PRI value (facility 23, severity 7).
const MAX_PRIORITY: u16 = 191;

/// `SD-ID -> (PARAM-NAME -> PARAM-VALUE)`.
pub type StructuredData = BTreeMap<String, BTreeMap<String, String>>;

/// Fields recovered from a syslog line. Anything the sender omitted, or sent
/// as the nil value, is `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyslogFrame {
    pub priority: Option<u8>,
    pub timestamp: Option<DateTime<Utc>>,
    pub hostname: Option<String>,
    pub app_name: Option<String>,
    pub proc_id: Option<String>,
    pub msg_id: Option<String>,
    pub structured_data: Option<StructuredData>,
    pub message: Option<String>,
}

impl SyslogFrame {
    #[must_use]
    pub fn severity_code(&self) -> Option<u8> {
        self.priority.map(|p| p % 8)
    }

    #[must_use]
    pub fn facility_code(&self) -> Option<u8> {
        self.priority.map(|p| p / 8)
    }
}

/// Splits `<PRI>` off the front of `input`.
pub(crate) fn parse_priority(input: &str) -> Result<(u8, &str), GrammarError> {
    if input.is_empty() {
        return Err(GrammarError::Empty);
    }
    let rest = input.strip_prefix('<').ok_or(GrammarError::Priority)?;
    let close = rest.find('>').ok_or(GrammarError::Priority)?;
    let digits = &rest[..close];
    if digits.is_empty() || digits.len() > 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(GrammarError::Priority);
    }
    let value: u16 = digits.parse().map_err(|_| GrammarError::Priority)?;
    if value > MAX_PRIORITY {
        return Err(GrammarError::PriorityRange(value));
    }
    // value <= 191 so the narrowing cannot truncate
    #[allow(clippy::cast_possible_truncation)]
    Ok((value as u8, &rest[close + 1..]))
}

/// Takes the next space-delimited token, consuming the delimiter.
pub(crate) fn next_token<'a>(rest: &mut &'a str) -> Option<&'a str> {
    if rest.is_empty() {
        return None;
    }
    let (token, remainder) = match rest.find(' ') {
        Some(idx) => (&rest[..idx], &rest[idx + 1..]),
        None => (*rest, ""),
    };
    *rest = remainder;
    Some(token)
}

/// Message bodies keep their text but not the line terminator.
pub(crate) fn message_body(rest: &str) -> Option<String> {
    let body = rest.trim_end_matches(['\r', '\n']);
    if body.is_empty() {
        None
    } else {
        Some(body.to_string())
    }
}
