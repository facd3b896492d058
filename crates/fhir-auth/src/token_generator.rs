//! OAuth 2.0 client-credentials token generation.
//!
//! [`TokenGenerator`] performs one form-encoded POST against a token endpoint
//! and turns the response into a [`BearerToken`] or a typed [`AuthError`].
//! It does no caching; the handler decides when a new token is needed.
//!
//! Requests go through the same [`Transport`] as forwarded traffic, so a fake
//! transport sees (and can count) token requests too.

use crate::config::HttpSettings;
use crate::credentials::ClientCredentials;
use crate::error::{AuthError, Result};
use crate::secret::{truncate, ExposeSecret};
use crate::token::BearerToken;
use crate::transport::{ReqwestTransport, Transport};
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Grant type sent with every token request.
pub const GRANT_TYPE: &str = "client_credentials";

/// Form fields the generator always sends itself.
pub const MANDATORY_FIELDS: [&str; 4] = ["grant_type", "client_id", "client_secret", "resource"];

/// Characters of a token printed in debug logs.
const TOKEN_LOG_PREFIX_CHARS: usize = 8;

/// Token endpoint response body.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Issues client-credentials token requests.
#[derive(Clone)]
pub struct TokenGenerator {
    transport: Arc<dyn Transport>,
}

impl TokenGenerator {
    /// Create a generator with its own reqwest transport.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the HTTP client cannot be built.
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        Ok(Self::with_transport(Arc::new(ReqwestTransport::new(settings)?)))
    }

    /// Create a generator sending through `transport`.
    #[must_use]
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Request a token for `credentials` from `token_url`.
    ///
    /// # Errors
    ///
    /// - `AuthError::Configuration` if the scope has no usable authority
    /// - `AuthError::Cancelled` if `cancel` fires before a response is read
    /// - `AuthError::Deserialization` if the response body is not JSON
    /// - `AuthError::Authentication` if no token was issued or the request
    ///   itself failed
    #[instrument(skip_all, fields(client_id = %credentials.client_id(), token_url = %token_url))]
    pub async fn generate_token(
        &self,
        credentials: &ClientCredentials,
        token_url: &Url,
        cancel: &CancellationToken,
    ) -> Result<BearerToken> {
        let fields = request_fields(credentials)?;

        tracing::debug!(
            target: "fhir_auth.token",
            application = %credentials.application(),
            field_count = fields.len(),
            "Requesting token"
        );

        let request = build_request(token_url, &fields)?;
        let exchange = async {
            let response = self.transport.execute(request).await?;
            let status = response.status();
            let body = response.text().await.map_err(AuthError::from)?;
            Ok::<_, AuthError>((status, body))
        };

        let (status, body) = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(target: "fhir_auth.token", "Token request cancelled");
                return Err(AuthError::Cancelled);
            }
            result = exchange => result.map_err(|e| {
                tracing::warn!(target: "fhir_auth.token", error = %e, "Token request failed");
                AuthError::authentication_with_source(
                    format!(
                        "Token request to {token_url} failed. Request fields: {}",
                        describe_fields(&fields)
                    ),
                    e,
                )
            })?,
        };

        parse_token_response(status, &body)
    }
}

/// Form fields for `credentials`: the mandatory grant fields, then the
/// pass-through fields that do not collide with them.
fn request_fields(credentials: &ClientCredentials) -> Result<Vec<(String, String)>> {
    let resource = credentials.resource()?;

    let mut fields = vec![
        ("grant_type".to_string(), GRANT_TYPE.to_string()),
        ("client_id".to_string(), credentials.client_id().to_string()),
        (
            "client_secret".to_string(),
            credentials.client_secret().expose_secret().to_string(),
        ),
        ("resource".to_string(), resource),
    ];

    for (name, value) in credentials.token_request_fields() {
        if MANDATORY_FIELDS.contains(&name.as_str()) {
            tracing::warn!(
                target: "fhir_auth.token",
                field = %name,
                "Ignoring token request field that overrides a grant field"
            );
            continue;
        }
        fields.push((name.clone(), value.clone()));
    }

    Ok(fields)
}

fn build_request(token_url: &Url, fields: &[(String, String)]) -> Result<reqwest::Request> {
    let body = serde_urlencoded::to_string(fields).map_err(|e| {
        AuthError::Configuration(format!("Token request fields cannot be encoded: {e}"))
    })?;

    let mut request = reqwest::Request::new(Method::POST, token_url.clone());
    request.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/x-www-form-urlencoded"),
    );
    request
        .headers_mut()
        .insert(ACCEPT, HeaderValue::from_static("application/json"));
    *request.body_mut() = Some(body.into());
    Ok(request)
}

/// `name=value` pairs for error messages, with the client secret redacted.
fn describe_fields(fields: &[(String, String)]) -> String {
    fields
        .iter()
        .map(|(name, value)| {
            if name == "client_secret" {
                format!("{name}=[REDACTED]")
            } else {
                format!("{name}={value}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_token_response(status: StatusCode, body: &str) -> Result<BearerToken> {
    let response: TokenResponse = serde_json::from_str(body).map_err(|e| {
        tracing::warn!(
            target: "fhir_auth.token",
            status = %status,
            error = %e,
            "Failed to parse token response"
        );
        AuthError::Deserialization(format!(
            "Token endpoint returned {status} with an unreadable body: {e}"
        ))
    })?;

    match response.access_token {
        Some(token) if !token.is_empty() => {
            tracing::debug!(
                target: "fhir_auth.token",
                status = %status,
                token_prefix = %truncate(&token, TOKEN_LOG_PREFIX_CHARS),
                "Token acquired"
            );
            Ok(BearerToken::new(token))
        }
        _ => {
            let reason = status.canonical_reason().unwrap_or("Unknown");
            let error = response.error.as_deref().unwrap_or("no error reported");
            let message = match response.error_description.as_deref() {
                Some(description) => format!(
                    "Token request rejected: {} {reason}: {error} ({description})",
                    status.as_u16()
                ),
                None => format!(
                    "Token request rejected: {} {reason}: {error}",
                    status.as_u16()
                ),
            };
            tracing::warn!(
                target: "fhir_auth.token",
                status = %status,
                error = %error,
                "Token endpoint did not issue a token"
            );
            Err(AuthError::authentication(message))
        }
    }
}
