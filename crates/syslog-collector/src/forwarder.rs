// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batch delivery to the HTTP backend.
//!
//! A batch is serialized once as a JSON array and POSTed up to
//! `retry_count + 1` times. Attempts are separated by `retry_delay`; the
//! wait is abandoned as soon as the cancellation token fires.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::constants;
use crate::errors::{AttemptError, ForwardError};
use crate::message::NormalizedMessage;

/// Delivers one batch to wherever batches go.
#[async_trait]
pub trait BatchForwarder: Send + Sync {
    async fn forward(
        &self,
        batch: Vec<NormalizedMessage>,
        cancel_token: &CancellationToken,
    ) -> Result<(), ForwardError>;
}

pub struct HttpForwarderConfig {
    pub backend_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Additional attempts after the first one.
    pub retry_count: u32,
    pub retry_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
    backend_url: String,
    retry_count: u32,
    retry_delay: Duration,
}

impl HttpForwarder {
    pub fn new(config: HttpForwarderConfig) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(constants::USER_AGENT));

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        Ok(HttpForwarder {
            client,
            backend_url: config.backend_url,
            retry_count: config.retry_count,
            retry_delay: config.retry_delay,
        })
    }

    #[must_use]
    pub fn backend_url(&self) -> &str {
        &self.backend_url
    }

    async fn send(&self, body: Vec<u8>) -> Result<(), AttemptError> {
        let response = self.client.post(&self.backend_url).body(body).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to read backend response body: {e}");
                constants::UNREADABLE_BODY.to_string()
            }
        };
        Err(AttemptError::Status { status, body })
    }
}

#[async_trait]
impl BatchForwarder for HttpForwarder {
    async fn forward(
        &self,
        batch: Vec<NormalizedMessage>,
        cancel_token: &CancellationToken,
    ) -> Result<(), ForwardError> {
        if batch.is_empty() {
            return Ok(());
        }

        let payload = serde_json::to_vec(&batch)?;
        let total_attempts = self.retry_count.saturating_add(1);
        let mut last_error = None;

        for attempt in 1..=total_attempts {
            if attempt > 1 {
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        debug!("Forwarding cancelled before attempt {attempt}/{total_attempts}");
                        return Err(ForwardError::Cancelled);
                    }
                    () = tokio::time::sleep(self.retry_delay) => {}
                }
                debug!("Retrying forward (attempt {attempt}/{total_attempts})");
            }

            let start = Instant::now();
            match self.send(payload.clone()).await {
                Ok(()) => {
                    debug!(
                        "Successfully forwarded {} messages in {} ms",
                        batch.len(),
                        start.elapsed().as_millis()
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!("Forward attempt {attempt}/{total_attempts} failed: {e}");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(last) => {
                error!(
                    "Dropping batch of {} messages after {total_attempts} attempts: {last}",
                    batch.len()
                );
                Err(ForwardError::Exhausted {
                    attempts: total_attempts,
                    last,
                })
            }
            // total_attempts is at least one, so a failure is always recorded
            None => Ok(()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::normalizer::normalize;
    use mockito::Server;
    use tracing_test::traced_test;

    fn forwarder(url: String, retry_count: u32, retry_delay: Duration) -> HttpForwarder {
        HttpForwarder::new(HttpForwarderConfig {
            backend_url: url,
            timeout: Duration::from_secs(2),
            retry_count,
            retry_delay,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/bulk")
            .with_status(200)
            .expect(0)
            .create_async()
            .await;

        let fwd = forwarder(format!("{}/bulk", server.url()), 3, Duration::ZERO);
        fwd.forward(Vec::new(), &CancellationToken::new())
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_posts_json_array() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/bulk")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::Regex(r#"^\[\{.*\}\]$"#.to_string()),
                mockito::Matcher::Regex(r#""rawLog":"hello""#.to_string()),
                mockito::Matcher::Regex(r#""category":"unknown""#.to_string()),
            ]))
            .with_status(202)
            .expect(1)
            .create_async()
            .await;

        let fwd = forwarder(format!("{}/bulk", server.url()), 3, Duration::ZERO);
        fwd.forward(vec![normalize(b"hello", "10.0.0.1")], &CancellationToken::new())
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    #[traced_test]
    async fn test_retries_until_exhausted() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/bulk")
            .with_status(503)
            .with_body("backend unavailable")
            .expect(3)
            .create_async()
            .await;

        let fwd = forwarder(format!("{}/bulk", server.url()), 2, Duration::from_millis(50));
        let start = Instant::now();
        let result = fwd
            .forward(vec![normalize(b"<13>hi", "h")], &CancellationToken::new())
            .await;

        mock.assert_async().await;
        assert!(start.elapsed() >= Duration::from_millis(100));
        match result {
            Err(ForwardError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                match last {
                    AttemptError::Status { status, body } => {
                        assert_eq!(status.as_u16(), 503);
                        assert_eq!(body, "backend unavailable");
                    }
                    other => panic!("unexpected attempt error: {other:?}"),
                }
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(logs_contain("Forward attempt 3/3 failed"));
    }

    #[tokio::test]
    async fn test_cancellation_short_circuits_retry_wait() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/bulk")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let fwd = forwarder(format!("{}/bulk", server.url()), 5, Duration::from_secs(30));
        let cancel_token = CancellationToken::new();
        let canceller = cancel_token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let result = fwd
            .forward(vec![normalize(b"<13>hi", "h")], &cancel_token)
            .await;

        assert!(matches!(result, Err(ForwardError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(5));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_transport_failure_is_retried() {
        // Nothing listens on this port once the listener is dropped.
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let fwd = forwarder(format!("http://{addr}/bulk"), 1, Duration::from_millis(10));

        let result = fwd
            .forward(vec![normalize(b"<13>hi", "h")], &CancellationToken::new())
            .await;

        match result {
            Err(ForwardError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 2);
                assert!(matches!(last, AttemptError::Transport(_)));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
