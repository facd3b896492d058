//! Test server harness for end-to-end testing
//!
//! Provides [`TestFhirServer`]: a wiremock server playing both the FHIR
//! server (capability statement, resources) and its OAuth token endpoint.

use crate::capability_fixtures::capability_statement_with_token;
use crate::test_ids::{TEST_CLIENT_ID, TEST_CLIENT_SECRET};
use crate::token_builders::{
    test_credentials, token_error_response, token_response, TestTokenBuilder,
};
use fhir_auth::{ClientCredentials, Url};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Path of the token endpoint on the test server
pub const TOKEN_PATH: &str = "/oauth2/token";

/// Path of the capability statement on the test server
pub const METADATA_PATH: &str = "/metadata";

/// Mints a new JWT for every token request
struct TokenResponder {
    issued: AtomicUsize,
    lifetime_secs: i64,
    delay: Option<Duration>,
}

impl Respond for TokenResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let sequence = self.issued.fetch_add(1, Ordering::SeqCst);
        let jwt = TestTokenBuilder::new()
            .expires_in(self.lifetime_secs)
            .with_claim("jti", format!("token-{sequence}"))
            .build();
        let template = ResponseTemplate::new(200).set_body_json(token_response(&jwt));
        match self.delay {
            Some(delay) => template.set_delay(delay),
            None => template,
        }
    }
}

/// Harness options
#[derive(Debug, Clone)]
pub struct TestFhirServerOptions {
    pub token_lifetime_secs: i64,
    pub token_delay: Option<Duration>,
    pub advertise_token_endpoint: bool,
}

impl Default for TestFhirServerOptions {
    fn default() -> Self {
        Self {
            token_lifetime_secs: 3600,
            token_delay: None,
            advertise_token_endpoint: true,
        }
    }
}

/// Test harness for a FHIR server with an OAuth token endpoint
///
/// The token endpoint only accepts [`TEST_CLIENT_ID`] with
/// [`TEST_CLIENT_SECRET`]; anything else gets a 400 `invalid_client`.
///
/// # Example
/// ```rust,ignore
/// let server = TestFhirServer::start().await;
/// let discovery = EndpointDiscovery::new(&HttpSettings::default())?;
/// let endpoints = discovery
///     .discover_endpoints(&server.base_url(), &CancellationToken::new())
///     .await?;
/// assert_eq!(endpoints.token, server.token_url());
/// ```
pub struct TestFhirServer {
    server: MockServer,
}

impl TestFhirServer {
    /// Start a server with default options
    pub async fn start() -> Self {
        Self::start_with(TestFhirServerOptions::default()).await
    }

    /// Start a server with custom options
    pub async fn start_with(options: TestFhirServerOptions) -> Self {
        let server = MockServer::start().await;
        let token_url = format!("{}{TOKEN_PATH}", server.uri());

        let statement = if options.advertise_token_endpoint {
            capability_statement_with_token(&token_url)
        } else {
            crate::capability_fixtures::CapabilityStatementBuilder::new()
                .with_authorize(&format!("{}/oauth2/authorize", server.uri()))
                .build()
        };

        Mock::given(method("GET"))
            .and(path(METADATA_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(statement))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains(format!("client_id={TEST_CLIENT_ID}")))
            .and(body_string_contains(format!(
                "client_secret={TEST_CLIENT_SECRET}"
            )))
            .respond_with(TokenResponder {
                issued: AtomicUsize::new(0),
                lifetime_secs: options.token_lifetime_secs,
                delay: options.token_delay,
            })
            .with_priority(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_json(token_error_response(
                "invalid_client",
                "Client authentication failed",
            )))
            .with_priority(10)
            .mount(&server)
            .await;

        Self { server }
    }

    /// The underlying mock server, for mounting extra resources
    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Base URL as a string
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Base URL of the FHIR server
    pub fn base_url(&self) -> Url {
        Url::parse(&self.server.uri()).expect("mock server URI must parse")
    }

    /// URL of the token endpoint
    pub fn token_url(&self) -> Url {
        self.url(TOKEN_PATH)
    }

    /// Absolute URL for `path` on this server
    pub fn url(&self, path: &str) -> Url {
        Url::parse(&format!("{}{path}", self.server.uri())).expect("test URL must parse")
    }

    /// Credentials accepted by the token endpoint
    pub fn credentials(&self) -> ClientCredentials {
        test_credentials(&self.server.uri())
    }

    /// Mount a resource answering `GET path` with `status`
    ///
    /// Only requests carrying a bearer token match; others fall through to
    /// wiremock's 404.
    pub async fn mount_resource(&self, resource_path: &str, status: u16) {
        Mock::given(method("GET"))
            .and(path(resource_path))
            .and(wiremock::matchers::header_exists("authorization"))
            .respond_with(ResponseTemplate::new(status).set_body_json(serde_json::json!({
                "resourceType": "Patient",
                "id": "example"
            })))
            .mount(&self.server)
            .await;
    }

    /// Number of token requests received so far
    pub async fn token_requests(&self) -> usize {
        self.requests_to(TOKEN_PATH).await.len()
    }

    /// Number of capability statement requests received so far
    pub async fn metadata_requests(&self) -> usize {
        self.requests_to(METADATA_PATH).await.len()
    }

    /// Received requests whose path is `request_path`
    pub async fn requests_to(&self, request_path: &str) -> Vec<Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path() == request_path)
            .collect()
    }

    /// `Authorization` headers sent to `request_path`, in arrival order
    pub async fn authorizations_to(&self, request_path: &str) -> Vec<String> {
        self.requests_to(request_path)
            .await
            .iter()
            .filter_map(|r| r.headers.get("authorization"))
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect()
    }
}
