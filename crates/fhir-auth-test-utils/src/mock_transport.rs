//! Scriptable in-memory transport
//!
//! [`MockTransport`] answers token requests with freshly minted JWTs and all
//! other requests with scripted statuses, recording everything it sees.

use crate::token_builders::{token_error_response, token_response, TestTokenBuilder};
use async_trait::async_trait;
use fhir_auth::error::Result;
use fhir_auth::{AuthError, Transport, Url};
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A request seen by [`MockTransport`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

impl RecordedRequest {
    /// The `Authorization` header value, if any
    pub fn authorization(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
    }
}

/// How the mock answers token requests
#[derive(Debug, Clone)]
enum TokenBehavior {
    Issue { lifetime_secs: i64 },
    Reject { status: StatusCode, error: String },
}

/// Mock transport for unit and integration tests.
pub struct MockTransport {
    token_url: Url,
    token_behavior: TokenBehavior,
    token_delay: Option<Duration>,
    api_statuses: Vec<u16>,
    token_count: AtomicUsize,
    api_count: AtomicUsize,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    /// Mock issuing one-hour tokens on `token_url` and 200 everywhere else.
    pub fn new(token_url: &str) -> Self {
        Self {
            token_url: Url::parse(token_url).expect("token URL must parse"),
            token_behavior: TokenBehavior::Issue { lifetime_secs: 3600 },
            token_delay: None,
            api_statuses: Vec::new(),
            token_count: AtomicUsize::new(0),
            api_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Issue tokens expiring `seconds` from issuance (negative for expired).
    pub fn with_token_lifetime(mut self, seconds: i64) -> Self {
        self.token_behavior = TokenBehavior::Issue {
            lifetime_secs: seconds,
        };
        self
    }

    /// Reject every token request with `status` and an OAuth `error`.
    pub fn rejecting_tokens(mut self, status: u16, error: &str) -> Self {
        self.token_behavior = TokenBehavior::Reject {
            status: StatusCode::from_u16(status).expect("valid status"),
            error: error.to_string(),
        };
        self
    }

    /// Delay every token response.
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = Some(delay);
        self
    }

    /// Statuses for non-token requests, cycled in order.
    pub fn with_api_statuses(mut self, statuses: Vec<u16>) -> Self {
        self.api_statuses = statuses;
        self
    }

    /// Number of token requests received.
    pub fn token_requests(&self) -> usize {
        self.token_count.load(Ordering::SeqCst)
    }

    /// Number of non-token requests received.
    pub fn api_requests(&self) -> usize {
        self.api_count.load(Ordering::SeqCst)
    }

    /// Snapshot of all recorded requests, in arrival order.
    pub fn recorded(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("request log poisoned").clone()
    }

    /// Recorded non-token requests.
    pub fn api_recorded(&self) -> Vec<RecordedRequest> {
        self.recorded()
            .into_iter()
            .filter(|r| r.url != self.token_url)
            .collect()
    }

    fn record(&self, request: &reqwest::Request) {
        let body = request
            .body()
            .and_then(reqwest::Body::as_bytes)
            .map(|b| String::from_utf8_lossy(b).into_owned());
        self.requests
            .lock()
            .expect("request log poisoned")
            .push(RecordedRequest {
                method: request.method().clone(),
                url: request.url().clone(),
                headers: request.headers().clone(),
                body,
            });
    }

    async fn token_response(&self) -> reqwest::Response {
        let sequence = self.token_count.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.token_delay {
            tokio::time::sleep(delay).await;
        }

        match &self.token_behavior {
            TokenBehavior::Issue { lifetime_secs } => {
                let jwt = TestTokenBuilder::new()
                    .expires_in(*lifetime_secs)
                    .with_claim("jti", format!("token-{sequence}"))
                    .build();
                json_response(StatusCode::OK, &token_response(&jwt))
            }
            TokenBehavior::Reject { status, error } => json_response(
                *status,
                &token_error_response(error, "Rejected by mock transport"),
            ),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        self.record(&request);

        if request.url() == &self.token_url {
            return Ok(self.token_response().await);
        }

        let count = self.api_count.fetch_add(1, Ordering::SeqCst);
        if self.api_statuses.is_empty() {
            return Ok(empty_response(StatusCode::OK));
        }

        // Cycle through statuses
        let status = self.api_statuses[count % self.api_statuses.len()];
        let status = StatusCode::from_u16(status).map_err(|e| AuthError::Transport {
            status: None,
            message: e.to_string(),
        })?;
        Ok(empty_response(status))
    }
}

fn json_response(status: StatusCode, body: &serde_json::Value) -> reqwest::Response {
    reqwest::Response::from(
        http::Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(body.to_string())
            .expect("valid response"),
    )
}

fn empty_response(status: StatusCode) -> reqwest::Response {
    reqwest::Response::from(
        http::Response::builder()
            .status(status)
            .body(String::new())
            .expect("valid response"),
    )
}
