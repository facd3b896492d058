//! Authenticating request handler.
//!
//! [`AuthenticatingHandler`] decorates every outbound request with a bearer
//! token obtained through the client-credentials grant. It owns a single
//! cached token:
//!
//! - A present, unexpired token is reused.
//! - Otherwise a new token is generated while holding the cache lock, so
//!   concurrent callers wait for one generation instead of starting their own.
//! - A 401 from the server clears the cache (if it still holds the token that
//!   was rejected); the 401 is returned to the caller unchanged, never retried.
//!
//! # Example
//!
//! ```rust,ignore
//! use fhir_auth::{AuthenticatingHandler, ClientCredentials, EndpointDiscovery, HttpSettings};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! let discovery = EndpointDiscovery::new(&HttpSettings::default())?;
//! let endpoints = discovery.resolve_endpoints(&credentials, &cancel).await?;
//!
//! let handler = AuthenticatingHandler::with_reqwest(
//!     Arc::new(credentials),
//!     Arc::new(endpoints),
//!     &HttpSettings::default(),
//! )?;
//!
//! let request = reqwest::Request::new(reqwest::Method::GET, patient_url);
//! let response = handler.send(request, &cancel).await?;
//! ```

use crate::config::HttpSettings;
use crate::credentials::ClientCredentials;
use crate::endpoints::FhirEndpoints;
use crate::error::{AuthError, Result};
use crate::token::BearerToken;
use crate::token_generator::TokenGenerator;
use crate::transport::{ReqwestTransport, Transport};
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Sends requests with a cached client-credentials bearer token attached.
pub struct AuthenticatingHandler {
    credentials: Arc<ClientCredentials>,
    endpoints: Arc<FhirEndpoints>,
    transport: Arc<dyn Transport>,
    generator: TokenGenerator,
    cached: Mutex<Option<Arc<BearerToken>>>,
}

impl AuthenticatingHandler {
    /// Create a handler forwarding through `transport`.
    ///
    /// Token requests go through the same transport.
    #[must_use]
    pub fn new(
        credentials: Arc<ClientCredentials>,
        endpoints: Arc<FhirEndpoints>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let generator = TokenGenerator::with_transport(Arc::clone(&transport));
        Self {
            credentials,
            endpoints,
            transport,
            generator,
            cached: Mutex::new(None),
        }
    }

    /// Create a handler with a reqwest transport built from `settings`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the HTTP client cannot be built.
    pub fn with_reqwest(
        credentials: Arc<ClientCredentials>,
        endpoints: Arc<FhirEndpoints>,
        settings: &HttpSettings,
    ) -> Result<Self> {
        let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(settings)?);
        Ok(Self::new(credentials, endpoints, transport))
    }

    /// Credentials this handler authenticates with.
    #[must_use]
    pub fn credentials(&self) -> &ClientCredentials {
        &self.credentials
    }

    /// Endpoints this handler requests tokens from.
    #[must_use]
    pub fn endpoints(&self) -> &FhirEndpoints {
        &self.endpoints
    }

    /// Send `request` with a bearer token and the static credential headers.
    ///
    /// Static headers already present on the request are left as they are.
    ///
    /// # Errors
    ///
    /// - `AuthError::Cancelled` if `cancel` fires while waiting for the
    ///   cache, generating a token, or forwarding
    /// - Token generation errors (`Authentication`, `Deserialization`,
    ///   `Configuration`)
    /// - Transport errors, unchanged
    #[instrument(skip_all, fields(method = %request.method(), url = %request.url()))]
    pub async fn send(
        &self,
        mut request: reqwest::Request,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response> {
        let token = self.token(cancel).await?;
        self.decorate(&mut request, &token)?;

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(target: "fhir_auth.handler", "Request cancelled while forwarding");
                return Err(AuthError::Cancelled);
            }
            result = self.transport.execute(request) => result,
        };

        match result {
            Ok(response) => {
                if response.status() == StatusCode::UNAUTHORIZED {
                    self.invalidate_if_current(&token, cancel).await?;
                }
                Ok(response)
            }
            Err(e) => {
                if e.is_unauthorized() {
                    self.invalidate_if_current(&token, cancel).await?;
                }
                Err(e)
            }
        }
    }

    /// Clear the cached token unconditionally.
    pub async fn invalidate(&self) {
        if self.cached.lock().await.take().is_some() {
            tracing::debug!(target: "fhir_auth.handler", "Cached token invalidated");
        }
    }

    /// The cached token, without refreshing it.
    pub async fn current_token(&self) -> Option<Arc<BearerToken>> {
        self.cached.lock().await.clone()
    }

    /// Generate a token now and cache it, replacing any cached token.
    ///
    /// Used at startup to fail fast on bad credentials.
    ///
    /// # Errors
    ///
    /// Same as token generation, plus `AuthError::Cancelled`.
    pub async fn validate_credentials(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<BearerToken>> {
        let mut slot = self.lock_cache(cancel).await?;
        let token = self.generate(cancel).await?;
        *slot = Some(Arc::clone(&token));
        tracing::info!(
            target: "fhir_auth.handler",
            application = %self.credentials.application(),
            expires_at = ?token.expires_at(),
            "Credentials validated"
        );
        Ok(token)
    }

    /// A valid token, generating one under the cache lock when needed.
    async fn token(&self, cancel: &CancellationToken) -> Result<Arc<BearerToken>> {
        let mut slot = self.lock_cache(cancel).await?;

        if let Some(token) = slot.as_ref() {
            if !token.is_expired() {
                return Ok(Arc::clone(token));
            }
            tracing::debug!(target: "fhir_auth.handler", "Cached token expired, refreshing");
            *slot = None;
        }

        let token = self.generate(cancel).await?;
        *slot = Some(Arc::clone(&token));
        Ok(token)
    }

    async fn lock_cache(
        &self,
        cancel: &CancellationToken,
    ) -> Result<MutexGuard<'_, Option<Arc<BearerToken>>>> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(target: "fhir_auth.handler", "Cancelled while waiting for token cache");
                Err(AuthError::Cancelled)
            }
            guard = self.cached.lock() => Ok(guard),
        }
    }

    async fn generate(&self, cancel: &CancellationToken) -> Result<Arc<BearerToken>> {
        let token = self
            .generator
            .generate_token(&self.credentials, &self.endpoints.token, cancel)
            .await
            .map_err(|e| {
                if !e.is_cancelled() {
                    tracing::warn!(
                        target: "fhir_auth.handler",
                        application = %self.credentials.application(),
                        error = %e,
                        "Token generation failed"
                    );
                }
                e
            })?;
        Ok(Arc::new(token))
    }

    /// Clear the cache only if it still holds `used`.
    ///
    /// A token stored by a concurrent refresh is kept. If `cancel` fires
    /// while waiting for the cache, the slot is left untouched.
    async fn invalidate_if_current(
        &self,
        used: &Arc<BearerToken>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut slot = self.lock_cache(cancel).await?;
        if slot.as_ref().is_some_and(|cached| Arc::ptr_eq(cached, used)) {
            *slot = None;
            tracing::info!(
                target: "fhir_auth.handler",
                application = %self.credentials.application(),
                "Server rejected token, cache invalidated"
            );
        } else {
            tracing::debug!(
                target: "fhir_auth.handler",
                "Server rejected a token that is no longer cached"
            );
        }
        Ok(())
    }

    fn decorate(&self, request: &mut reqwest::Request, token: &BearerToken) -> Result<()> {
        let mut authorization = HeaderValue::from_str(&token.authorization_header_value())
            .map_err(|_| AuthError::authentication("Issued token is not a valid header value"))?;
        authorization.set_sensitive(true);

        let headers = request.headers_mut();
        headers.insert(AUTHORIZATION, authorization);

        for header in self.credentials.header_values() {
            let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(|e| {
                AuthError::Configuration(format!("Invalid header name '{}': {e}", header.name))
            })?;
            if headers.contains_key(&name) {
                continue;
            }
            let value = HeaderValue::from_str(&header.value).map_err(|e| {
                AuthError::Configuration(format!("Invalid value for header '{}': {e}", header.name))
            })?;
            headers.insert(name, value);
        }

        Ok(())
    }
}
