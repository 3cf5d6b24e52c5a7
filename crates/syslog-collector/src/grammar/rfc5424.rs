// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! RFC 5424 grammar.
//!
//! `<PRI>VERSION SP TIMESTAMP SP HOSTNAME SP APP-NAME SP PROCID SP MSGID SP STRUCTURED-DATA [SP MSG]`

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::{message_body, next_token, parse_priority, StructuredData, SyslogFrame};
use crate::errors::GrammarError;

const NIL: &str = "-";
const BOM: char = '\u{feff}';

pub fn parse(input: &str) -> Result<SyslogFrame, GrammarError> {
    let (priority, mut rest) = parse_priority(input)?;
    parse_version(&mut rest)?;

    let mut frame = SyslogFrame {
        priority: Some(priority),
        ..Default::default()
    };

    let Some(timestamp) = next_token(&mut rest) else {
        return Ok(frame);
    };
    frame.timestamp = parse_timestamp(timestamp)?;

    frame.hostname = match next_token(&mut rest) {
        Some(token) => nil_or(token),
        None => return Ok(frame),
    };
    frame.app_name = match next_token(&mut rest) {
        Some(token) => nil_or(token),
        None => return Ok(frame),
    };
    frame.proc_id = match next_token(&mut rest) {
        Some(token) => nil_or(token),
        None => return Ok(frame),
    };
    frame.msg_id = match next_token(&mut rest) {
        Some(token) => nil_or(token),
        None => return Ok(frame),
    };

    if rest.is_empty() {
        return Ok(frame);
    }
    let (structured_data, after) = parse_structured_data(rest)?;
    frame.structured_data = structured_data;

    if let Some(body) = after.strip_prefix(' ') {
        frame.message = message_body(body.trim_start_matches(BOM));
    }
    Ok(frame)
}

/// Only version 1 is defined.
fn parse_version(rest: &mut &str) -> Result<(), GrammarError> {
    match next_token(rest) {
        Some("1") => Ok(()),
        _ => Err(GrammarError::Version),
    }
}

fn parse_timestamp(token: &str) -> Result<Option<DateTime<Utc>>, GrammarError> {
    if token == NIL {
        return Ok(None);
    }
    DateTime::parse_from_rfc3339(token)
        .map(|ts| Some(ts.with_timezone(&Utc)))
        .map_err(|e| GrammarError::Timestamp(format!("{token}: {e}")))
}

fn nil_or(token: &str) -> Option<String> {
    if token == NIL || token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Parses `-` or one or more `[SD-ID PARAM="VALUE" ...]` elements and
/// returns whatever follows them.
fn parse_structured_data(input: &str) -> Result<(Option<StructuredData>, &str), GrammarError> {
    if let Some(after) = input.strip_prefix(NIL) {
        return Ok((None, after));
    }
    if !input.starts_with('[') {
        return Err(GrammarError::StructuredData);
    }

    let mut elements = StructuredData::new();
    let mut rest = input;
    while let Some(body) = rest.strip_prefix('[') {
        let (id, params, after) = parse_element(body)?;
        elements.insert(id, params);
        rest = after;
    }
    Ok((Some(elements), rest))
}

type Element<'a> = (String, BTreeMap<String, String>, &'a str);

fn parse_element(input: &str) -> Result<Element<'_>, GrammarError> {
    let id_end = input
        .find([' ', ']'])
        .ok_or(GrammarError::StructuredData)?;
    let id = &input[..id_end];
    if id.is_empty() {
        return Err(GrammarError::StructuredData);
    }

    let mut params = BTreeMap::new();
    let mut rest = &input[id_end..];
    loop {
        rest = rest.trim_start_matches(' ');
        if let Some(after) = rest.strip_prefix(']') {
            return Ok((id.to_string(), params, after));
        }
        let eq = rest.find('=').ok_or(GrammarError::StructuredData)?;
        let name = &rest[..eq];
        if name.is_empty() || name.contains([' ', ']', '"']) {
            return Err(GrammarError::StructuredData);
        }
        let quoted = rest[eq + 1..]
            .strip_prefix('"')
            .ok_or(GrammarError::StructuredData)?;
        let (value, after) = parse_param_value(quoted)?;
        params.insert(name.to_string(), value);
        rest = after;
    }
}

/// Reads up to the closing unescaped `"`, resolving `\"`, `\\` and `\]`.
fn parse_param_value(input: &str) -> Result<(String, &str), GrammarError> {
    let mut value = String::new();
    let mut chars = input.char_indices();
    while let Some((idx, c)) = chars.next() {
        match c {
            '"' => return Ok((value, &input[idx + 1..])),
            '\\' => match chars.next() {
                Some((_, escaped @ ('"' | '\\' | ']'))) => value.push(escaped),
                Some((_, other)) => {
                    value.push('\\');
                    value.push(other);
                }
                None => return Err(GrammarError::StructuredData),
            },
            _ => value.push(c),
        }
    }
    Err(GrammarError::StructuredData)
}
