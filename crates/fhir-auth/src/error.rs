//! Error types for FHIR authentication.
//!
//! Every failure surfaced by discovery, token generation, or the
//! authenticating handler is an [`AuthError`]. Callers branch on the variant
//! instead of inspecting messages.

use reqwest::StatusCode;
use thiserror::Error;

/// Boxed error used as the cause of an authentication failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while discovering endpoints, acquiring tokens, or
/// sending authenticated requests.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Capability document unreachable or missing the OAuth endpoints.
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Token endpoint reachable but no usable token was issued.
    #[error("Authentication error: {message}")]
    Authentication {
        /// Diagnostic message (status, reason, server error, request fields).
        message: String,
        /// Underlying cause, when the failure was not a rejected response.
        #[source]
        source: Option<BoxError>,
    },

    /// Token endpoint response body could not be parsed.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Network or HTTP failure while forwarding a request.
    #[error("Transport error: {message}")]
    Transport {
        /// HTTP status associated with the failure, if any.
        status: Option<StatusCode>,
        /// Description of the failure.
        message: String,
    },

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid credentials or settings detected before any network call.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl AuthError {
    /// Authentication failure from a rejected token response.
    pub(crate) fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
            source: None,
        }
    }

    /// Authentication failure wrapping an unexpected cause.
    pub(crate) fn authentication_with_source(
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Authentication {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Whether this error is a deliberate cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// HTTP status carried by a transport error.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }

    /// Whether this is a transport error caused by a 401 response.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport {
            status: err.status(),
            message: err.to_string(),
        }
    }
}

/// Result type alias using `AuthError`
pub type Result<T> = std::result::Result<T, AuthError>;
