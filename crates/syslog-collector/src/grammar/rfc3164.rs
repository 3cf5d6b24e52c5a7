// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! RFC 3164 (BSD) grammar.
//!
//! `<PRI>[Mmm dd hh:mm:ss SP HOSTNAME SP][TAG[PID]: ]MSG`. The classic
//! timestamp carries no year: the current one is assumed, or the latest
//! earlier year in which the date exists when the current one would put it in
//! the future or has no such day (`Feb 29`).
//! An RFC 3339 timestamp in the same position is accepted as well.

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, Utc};

use super::{message_body, parse_priority, SyslogFrame};
use crate::errors::GrammarError;

/// `Mmm dd hh:mm:ss`
const BSD_TIMESTAMP_LEN: usize = 15;

/// Clock skew, in hours, tolerated before a yearless date is moved back a year.
const FUTURE_SKEW_HOURS: i64 = 24;

pub fn parse(input: &str) -> Result<SyslogFrame, GrammarError> {
    let (priority, rest) = parse_priority(input)?;
    let mut frame = SyslogFrame {
        priority: Some(priority),
        ..Default::default()
    };

    let (timestamp, mut rest) = parse_timestamp(rest);
    frame.timestamp = timestamp;

    if frame.timestamp.is_some() {
        if let Some((hostname, after)) = parse_hostname(rest) {
            frame.hostname = Some(hostname.to_string());
            rest = after;
        }
    }

    if let Some((app_name, proc_id, after)) = parse_tag(rest) {
        frame.app_name = Some(app_name.to_string());
        frame.proc_id = proc_id.map(str::to_string);
        rest = after;
    }

    frame.message = message_body(rest);
    Ok(frame)
}

fn parse_timestamp(input: &str) -> (Option<DateTime<Utc>>, &str) {
    if let Some(candidate) = input.get(..BSD_TIMESTAMP_LEN) {
        if let Some(ts) = parse_bsd_timestamp(candidate, Utc::now()) {
            let rest = &input[BSD_TIMESTAMP_LEN..];
            return (Some(ts), rest.strip_prefix(' ').unwrap_or(rest));
        }
    }

    let token_end = input.find(' ').unwrap_or(input.len());
    if let Ok(ts) = DateTime::parse_from_rfc3339(&input[..token_end]) {
        let rest = &input[token_end..];
        return (
            Some(ts.with_timezone(&Utc)),
            rest.strip_prefix(' ').unwrap_or(rest),
        );
    }

    (None, input)
}

fn parse_bsd_timestamp(candidate: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let in_year = |year: i32| {
        NaiveDateTime::parse_from_str(&format!("{year} {candidate}"), "%Y %b %e %H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc())
    };

    match in_year(now.year()) {
        Some(ts) if ts <= now + Duration::hours(FUTURE_SKEW_HOURS) => Some(ts),
        // a leap day is at most four years back
        _ => (1..=4).find_map(|back| in_year(now.year() - back)),
    }
}

/// A hostname is a single token followed by a space, which is not itself a tag.
fn parse_hostname(input: &str) -> Option<(&str, &str)> {
    let end = input.find(' ')?;
    let token = &input[..end];
    if token.is_empty() || token.ends_with(':') || token.contains('[') {
        return None;
    }
    Some((token, &input[end + 1..]))
}

/// Recognizes `app:` or `app[pid]:` at the start of the content.
fn parse_tag(input: &str) -> Option<(&str, Option<&str>, &str)> {
    let colon = input.find(':')?;
    let tag = &input[..colon];
    let after = &input[colon + 1..];
    let after = after.strip_prefix(' ').unwrap_or(after);

    let (app_name, proc_id) = match tag.find('[') {
        Some(open) => {
            let pid = tag[open + 1..].strip_suffix(']')?;
            if pid.is_empty() {
                return None;
            }
            (&tag[..open], Some(pid))
        }
        None => (tag, None),
    };

    let valid = !app_name.is_empty()
        && app_name.len() <= 48
        && app_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));
    valid.then_some((app_name, proc_id, after))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_parse_classic_message() {
        let frame = parse("<34>Oct 11 22:14:15 mymachine su: 'su root' failed for lonvick").unwrap();

        assert_eq!(frame.priority, Some(34));
        let ts = frame.timestamp.unwrap();
        assert!(ts <= Utc::now() + Duration::hours(FUTURE_SKEW_HOURS));
        assert_eq!(ts.month(), 10);
        assert_eq!(ts.day(), 11);
        assert_eq!(ts.hour(), 22);
        assert_eq!(frame.hostname.as_deref(), Some("mymachine"));
        assert_eq!(frame.app_name.as_deref(), Some("su"));
        assert_eq!(frame.proc_id, None);
        assert_eq!(
            frame.message.as_deref(),
            Some("'su root' failed for lonvick")
        );
        assert_eq!(frame.msg_id, None);
        assert_eq!(frame.structured_data, None);
    }

    #[test]
    fn test_parse_space_padded_day_and_pid() {
        let frame = parse("<13>Feb  5 17:32:18 10.0.0.99 sshd[1234]: Accepted publickey").unwrap();
        let ts = frame.timestamp.unwrap();
        assert_eq!(ts.day(), 5);
        assert_eq!(frame.hostname.as_deref(), Some("10.0.0.99"));
        assert_eq!(frame.app_name.as_deref(), Some("sshd"));
        assert_eq!(frame.proc_id.as_deref(), Some("1234"));
        assert_eq!(frame.message.as_deref(), Some("Accepted publickey"));
    }

    #[test]
    fn test_year_rolls_back_for_future_dates() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 30).unwrap();

        let ts = parse_bsd_timestamp("Dec 31 23:59:59", now).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap());

        let ts = parse_bsd_timestamp("Jan  1 00:00:10", now).unwrap();
        assert_eq!(ts.year(), 2025);

        // a sender running slightly ahead stays in the current year
        let ts = parse_bsd_timestamp("Jan  1 05:00:00", now).unwrap();
        assert_eq!(ts.year(), 2025);
    }

    #[test]
    fn test_leap_day_in_non_leap_year() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let ts = parse_bsd_timestamp("Feb 29 10:00:00", now).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 2, 29, 10, 0, 0).unwrap());

        let now = Utc.with_ymd_and_hms(2027, 6, 1, 0, 0, 0).unwrap();
        let ts = parse_bsd_timestamp("Feb 29 10:00:00", now).unwrap();
        assert_eq!(ts.year(), 2024);

        assert_eq!(parse_bsd_timestamp("Feb 30 10:00:00", now), None);
    }

    #[test]
    fn test_leap_day_keeps_hostname() {
        let frame = parse("<13>Feb 29 10:00:00 host app: msg").unwrap();
        assert!(frame.timestamp.is_some());
        assert_eq!(frame.hostname.as_deref(), Some("host"));
        assert_eq!(frame.app_name.as_deref(), Some("app"));
        assert_eq!(frame.message.as_deref(), Some("msg"));
    }

    #[test]
    fn test_parse_rfc3339_timestamp() {
        let frame = parse("<13>2024-03-01T10:00:00+02:00 web-1 nginx: GET /").unwrap();
        assert_eq!(frame.timestamp.unwrap().hour(), 8);
        assert_eq!(frame.hostname.as_deref(), Some("web-1"));
        assert_eq!(frame.app_name.as_deref(), Some("nginx"));
    }

    #[test]
    fn test_priority_only_content() {
        let frame = parse("<13>just some text").unwrap();
        assert_eq!(frame.timestamp, None);
        assert_eq!(frame.hostname, None);
        assert_eq!(frame.app_name, None);
        assert_eq!(frame.message.as_deref(), Some("just some text"));
    }

    #[test]
    fn test_tag_without_hostname() {
        let frame = parse("<13>kernel: eth0 link up").unwrap();
        assert_eq!(frame.app_name.as_deref(), Some("kernel"));
        assert_eq!(frame.message.as_deref(), Some("eth0 link up"));
    }

    #[test]
    fn test_requires_priority() {
        assert_eq!(
            parse("Oct 11 22:14:15 mymachine su: hello"),
            Err(GrammarError::Priority)
        );
        assert_eq!(parse(""), Err(GrammarError::Empty));
    }
}
