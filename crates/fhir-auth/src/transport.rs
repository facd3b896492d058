//! The HTTP transport seam.
//!
//! Everything this crate sends after discovery (token requests and forwarded
//! requests) goes through a [`Transport`]. Production code uses
//! [`ReqwestTransport`]; tests substitute fakes that record requests and return
//! canned responses.

use crate::config::HttpSettings;
use crate::error::Result;
use async_trait::async_trait;

/// Executes one HTTP request.
///
/// Implementations must not retry and must not alter the request.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` and return the response, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Transport` for network failures and timeouts.
    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response>;
}

/// [`Transport`] backed by a `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport with the given timeouts.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the HTTP client cannot be built.
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        Ok(Self::with_client(settings.build_client()?))
    }

    /// Wrap an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// The underlying client.
    #[must_use]
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        Ok(self.client.execute(request).await?)
    }
}
