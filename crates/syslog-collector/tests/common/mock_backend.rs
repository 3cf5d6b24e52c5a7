// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bulk endpoint that fails a fixed number of times before accepting.

use axum::{
    body::Bytes,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BULK_PATH: &str = "/api/syslog/bulk";

#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct CapturedRequest {
    pub content_type: Option<String>,
    pub user_agent: Option<String>,
    pub body: serde_json::Value,
}

#[derive(Clone)]
pub struct FailingMockBackend {
    /// Requests that were accepted
    pub captured_requests: Arc<Mutex<Vec<CapturedRequest>>>,
    /// Every call, failed or not
    pub call_count: Arc<AtomicUsize>,
    /// How many calls fail before the backend starts accepting
    fail_count: usize,
}

#[allow(dead_code)]
impl FailingMockBackend {
    pub fn new(fail_count: usize) -> Self {
        Self {
            captured_requests: Arc::new(Mutex::new(Vec::new())),
            call_count: Arc::new(AtomicUsize::new(0)),
            fail_count,
        }
    }

    async fn handler(self, headers: HeaderMap, body: Bytes) -> (StatusCode, &'static str) {
        let count = self.call_count.fetch_add(1, Ordering::SeqCst);
        if count < self.fail_count {
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
        }

        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        self.captured_requests.lock().unwrap().push(CapturedRequest {
            content_type: header("content-type"),
            user_agent: header("user-agent"),
            body: serde_json::from_slice(&body).expect("backend received invalid JSON"),
        });

        (StatusCode::ACCEPTED, "{}")
    }

    /// Serves on an ephemeral port and returns the bulk endpoint URL.
    pub async fn start(&self) -> String {
        let backend = self.clone();
        let app = Router::new().route(
            BULK_PATH,
            post(move |headers, body| {
                let backend = backend.clone();
                async move { backend.handler(headers, body).await }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind failing mock backend");
        let addr: SocketAddr = listener.local_addr().expect("no local address");

        tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .expect("Failing mock backend server failed");
        });

        format!("http://{addr}{BULK_PATH}")
    }

    pub fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every message accepted so far, in arrival order.
    pub fn messages(&self) -> Vec<serde_json::Value> {
        self.captured_requests
            .lock()
            .unwrap()
            .iter()
            .flat_map(|request| request.body.as_array().cloned().unwrap_or_default())
            .collect()
    }

    pub async fn wait_for_messages(&self, count: usize) -> Vec<serde_json::Value> {
        for _ in 0..500 {
            let messages = self.messages();
            if messages.len() >= count {
                return messages;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("backend received {} of {count} messages", self.messages().len());
    }
}
