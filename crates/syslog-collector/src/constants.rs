// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Tag carried in `protocol` on every normalized message.
pub const PROTOCOL: &str = "syslog";

/// Maximum number of batches being forwarded concurrently by the queue.
///
/// Once every slot is taken, a flush forwards its batch on the caller's task
/// instead, which is what pushes back on producers.
pub const MAX_CONCURRENT_FLUSHES: usize = 10;

/// Read deadline for a single TCP read cycle. Expiry only re-checks cancellation.
pub const TCP_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_SYSLOG_PORT: u16 = 514;
pub const DEFAULT_UDP_BUFFER_SIZE: usize = 65_535;
pub const DEFAULT_TCP_MAX_CONNECTIONS: usize = 1_000;
pub const DEFAULT_TCP_MAX_LINE_BYTES: usize = 64 * 1_024;

pub const DEFAULT_BUFFER_MAX_SIZE: usize = 10_000;
pub const DEFAULT_BUFFER_FLUSH_SIZE: usize = 100;
pub const DEFAULT_BUFFER_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:3000/api/syslog/bulk";
pub const DEFAULT_FORWARDER_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_FORWARDER_RETRY_COUNT: u32 = 3;
pub const DEFAULT_FORWARDER_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Placeholder recorded when a failed response body cannot be read.
pub const UNREADABLE_BODY: &str = "<unreadable>";

pub const USER_AGENT: &str = concat!("syslog-collector/", env!("CARGO_PKG_VERSION"));
