//! Custom test assertions for expressive tests
//!
//! Provides trait-based assertions for issued tokens and authentication
//! errors.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use fhir_auth::secret::ExposeSecret;
use fhir_auth::{AuthError, BearerToken};
use serde_json::Value;

/// Custom assertions for bearer tokens
///
/// # Example
/// ```rust,ignore
/// token
///     .assert_valid_jwt()
///     .assert_not_expired()
///     .assert_expires_within(3600);
/// ```
pub trait TokenAssertions {
    /// Assert that the token is a three-part JWT with a JSON payload
    fn assert_valid_jwt(&self) -> &Self;

    /// Assert that the token is not expired now
    fn assert_not_expired(&self) -> &Self;

    /// Assert that the token is expired now
    fn assert_expired(&self) -> &Self;

    /// Assert that the token expires within the specified seconds
    fn assert_expires_within(&self, seconds: i64) -> &Self;

    /// Assert that the token carries `claim` with `expected`
    fn assert_claim(&self, claim: &str, expected: &Value) -> &Self;
}

fn payload(token: &BearerToken) -> Value {
    let raw = token.secret().expose_secret();
    let parts: Vec<_> = raw.split('.').collect();
    assert_eq!(
        parts.len(),
        3,
        "JWT must have 3 parts (header.payload.signature), got {}",
        parts.len()
    );

    let bytes = URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .expect("Failed to base64 decode JWT payload");
    serde_json::from_slice(&bytes).expect("Failed to parse JWT claims JSON")
}

impl TokenAssertions for BearerToken {
    fn assert_valid_jwt(&self) -> &Self {
        let claims = payload(self);
        assert!(claims.is_object(), "JWT payload must be a JSON object");
        self
    }

    fn assert_not_expired(&self) -> &Self {
        assert!(
            !self.is_expired(),
            "Token expected to be valid, expires_at = {:?}",
            self.expires_at()
        );
        self
    }

    fn assert_expired(&self) -> &Self {
        assert!(
            self.is_expired(),
            "Token expected to be expired, expires_at = {:?}",
            self.expires_at()
        );
        self
    }

    fn assert_expires_within(&self, seconds: i64) -> &Self {
        let expires_at = self.expires_at().expect("Token has no readable exp claim");
        let remaining = (expires_at - Utc::now()).num_seconds();
        assert!(
            remaining <= seconds,
            "Token expires in {remaining}s, expected within {seconds}s"
        );
        self
    }

    fn assert_claim(&self, claim: &str, expected: &Value) -> &Self {
        let claims = payload(self);
        assert_eq!(
            claims.get(claim),
            Some(expected),
            "Claim '{claim}' mismatch in {claims}"
        );
        self
    }
}

/// Custom assertions for authentication results
pub trait AuthErrorAssertions {
    /// Assert an `Authentication` error whose message contains every fragment
    fn assert_authentication_error(&self, fragments: &[&str]);

    /// Assert a `Discovery` error
    fn assert_discovery_error(&self);

    /// Assert a `Cancelled` error
    fn assert_cancelled(&self);
}

impl<T: std::fmt::Debug> AuthErrorAssertions for Result<T, AuthError> {
    fn assert_authentication_error(&self, fragments: &[&str]) {
        match self {
            Err(err @ AuthError::Authentication { .. }) => {
                let message = err.to_string();
                for fragment in fragments {
                    assert!(
                        message.contains(fragment),
                        "Expected '{fragment}' in error message: {message}"
                    );
                }
            }
            other => panic!("Expected Authentication error, got {other:?}"),
        }
    }

    fn assert_discovery_error(&self) {
        assert!(
            matches!(self, Err(AuthError::Discovery(_))),
            "Expected Discovery error, got {self:?}"
        );
    }

    fn assert_cancelled(&self) {
        assert!(
            matches!(self, Err(AuthError::Cancelled)),
            "Expected Cancelled error, got {self:?}"
        );
    }
}
