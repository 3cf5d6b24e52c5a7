// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;

/// Failure to start a listener. Fatal for the owning transport.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("failed to bind {transport} listener on {addr}: {source}")]
    Bind {
        transport: &'static str,
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read local address of {transport} listener: {source}")]
    LocalAddr {
        transport: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Reason a single syslog grammar rejected its input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GrammarError {
    #[error("empty input")]
    Empty,
    #[error("missing or malformed priority")]
    Priority,
    #[error("priority {0} out of range")]
    PriorityRange(u16),
    #[error("missing or unsupported version")]
    Version,
    #[error("malformed timestamp: {0}")]
    Timestamp(String),
    #[error("malformed structured data")]
    StructuredData,
}

/// One failed delivery attempt.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error("failed to send request: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend returned status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// Outcome of a failed [`crate::forwarder::BatchForwarder::forward`] call.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("failed to serialize batch: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("forwarding cancelled")]
    Cancelled,
    #[error("failed to forward after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: AttemptError,
    },
}
