//! Builder patterns for test data construction
//!
//! Provides fluent APIs for minting test JWTs and client credentials.

use crate::test_ids::{
    TEST_APPLICATION, TEST_CLIENT_ID, TEST_CLIENT_SECRET, TEST_SCOPE, TEST_SIGNING_SECRET,
};
use chrono::{Duration, Utc};
use fhir_auth::secret::SecretString;
use fhir_auth::{BearerToken, ClientCredentials, Url};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Map, Value};

/// Builder for signed test JWTs
///
/// Tokens are signed with HS256 and [`TEST_SIGNING_SECRET`]; the client never
/// verifies signatures, so the key only has to produce a well-formed token.
///
/// # Example
/// ```rust,ignore
/// let token = TestTokenBuilder::new()
///     .for_subject("fhir-test-client")
///     .expires_in(3600)
///     .build();
/// ```
pub struct TestTokenBuilder {
    sub: String,
    exp: Option<i64>,
    iat: i64,
    extra: Map<String, Value>,
}

impl TestTokenBuilder {
    /// Create a new token builder expiring in one hour
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            sub: TEST_CLIENT_ID.to_string(),
            exp: Some((now + Duration::seconds(3600)).timestamp()),
            iat: now.timestamp(),
            extra: Map::new(),
        }
    }

    /// Set the subject
    pub fn for_subject(mut self, subject: &str) -> Self {
        self.sub = subject.to_string();
        self
    }

    /// Set expiration in seconds from now (negative for already expired)
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = Some((Utc::now() + Duration::seconds(seconds)).timestamp());
        self
    }

    /// Set an absolute expiration timestamp
    pub fn expires_at(mut self, timestamp: i64) -> Self {
        self.exp = Some(timestamp);
        self
    }

    /// Omit the `exp` claim
    pub fn without_exp(mut self) -> Self {
        self.exp = None;
        self
    }

    /// Add an arbitrary claim, e.g. a `jti` to tell tokens apart
    pub fn with_claim(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(name.to_string(), value.into());
        self
    }

    /// Build the claims as a JSON value
    pub fn claims(&self) -> Value {
        let mut claims = self.extra.clone();
        claims.insert("sub".to_string(), json!(self.sub));
        claims.insert("iat".to_string(), json!(self.iat));
        if let Some(exp) = self.exp {
            claims.insert("exp".to_string(), json!(exp));
        }
        Value::Object(claims)
    }

    /// Mint the signed compact JWT
    pub fn build(self) -> String {
        encode(
            &Header::default(),
            &self.claims(),
            &EncodingKey::from_secret(TEST_SIGNING_SECRET),
        )
        .expect("HS256 encoding of JSON claims cannot fail")
    }

    /// Mint the JWT and wrap it as a [`BearerToken`]
    pub fn build_token(self) -> BearerToken {
        BearerToken::new(self.build())
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Client credentials using the fixed test identity against `server_url`
pub fn test_credentials(server_url: &str) -> ClientCredentials {
    ClientCredentials::new(
        TEST_APPLICATION,
        TEST_CLIENT_ID,
        SecretString::from(TEST_CLIENT_SECRET),
        Url::parse(server_url).expect("test server URL must parse"),
        TEST_SCOPE,
    )
}

/// Token endpoint success body carrying `access_token`
pub fn token_response(access_token: &str) -> Value {
    json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": 3600
    })
}

/// Token endpoint error body, as returned for a wrong client secret
pub fn token_error_response(error: &str, description: &str) -> Value {
    json!({
        "error": error,
        "error_description": description
    })
}
