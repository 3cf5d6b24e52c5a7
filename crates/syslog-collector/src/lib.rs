// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Syslog ingestion, batching and forwarding.
//!
//! Messages arrive over UDP datagrams or newline-framed TCP streams, are
//! normalized into [`message::NormalizedMessage`] records, accumulated in a
//! bounded [`queue::BatchQueue`] and shipped in JSON batches to an HTTP
//! backend by the [`forwarder::HttpForwarder`].
//!
//! ```text
//!   UDP / TCP listener ──> Normalizer ──> BatchQueue ──(size | timer)──> Forwarder ──> backend
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod constants;
pub mod errors;
pub mod forwarder;
pub mod grammar;
pub mod message;
pub mod normalizer;
pub mod queue;
pub mod tcp;
pub mod udp;
