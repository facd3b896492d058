//! Bearer tokens and unverified expiry decoding.
//!
//! A [`BearerToken`] wraps the raw `access_token` string issued by the token
//! endpoint. Its expiry is read from the JWT `exp` claim without verifying
//! the signature: the server remains the authority on validity, this crate only
//! needs to know when to stop presenting a token.
//!
//! # Expiry rules
//!
//! A token is expired when any of the following holds:
//! - the token is larger than [`MAX_JWT_SIZE_BYTES`]
//! - the payload segment is not base64url-encoded JSON
//! - there is no numeric `exp` claim
//! - `exp` is not strictly after the evaluation time
//!
//! Decoding failures are never errors; they only make the token expired.

use crate::secret::{ExposeSecret, SecretString};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::OnceLock;

/// Maximum token size decoded, in bytes (8KB).
///
/// Larger tokens are not decoded at all and are therefore always expired.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// An issued bearer token with lazily decoded expiry.
///
/// Tokens are immutable. The decoded expiry is computed on first access and
/// memoized for the lifetime of the value.
#[derive(Clone)]
pub struct BearerToken {
    value: SecretString,
    expires_at: OnceLock<Option<DateTime<Utc>>>,
}

impl BearerToken {
    /// Wrap a raw token string.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: SecretString::from(value.into()),
            expires_at: OnceLock::new(),
        }
    }

    /// The raw token.
    #[must_use]
    pub fn secret(&self) -> &SecretString {
        &self.value
    }

    /// Header value for `Authorization`: `Bearer <token>`.
    #[must_use]
    pub fn authorization_header_value(&self) -> String {
        format!("Bearer {}", self.value.expose_secret())
    }

    /// Expiry decoded from the `exp` claim, if one could be read.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        *self
            .expires_at
            .get_or_init(|| decode_expiry(self.value.expose_secret()))
    }

    /// Whether the token must no longer be presented.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Expiry check against an explicit evaluation time.
    ///
    /// A token expiring exactly at `now` is expired.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(exp) => exp <= now,
            None => true,
        }
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at.get())
            .finish()
    }
}

/// Read the `exp` claim from a JWT without verifying its signature.
fn decode_expiry(token: &str) -> Option<DateTime<Utc>> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "fhir_auth.token",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token not decoded: size exceeds maximum allowed"
        );
        return None;
    }

    // JWT format: header.payload.signature
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_signature)) =
        (parts.next(), parts.next(), parts.next())
    else {
        tracing::debug!(target: "fhir_auth.token", "Token not decoded: not a JWT");
        return None;
    };

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| {
            tracing::debug!(target: "fhir_auth.token", error = %e, "Failed to decode JWT payload base64");
        })
        .ok()?;

    let claims: serde_json::Value = serde_json::from_slice(&payload_bytes)
        .map_err(|e| {
            tracing::debug!(target: "fhir_auth.token", error = %e, "Failed to parse JWT claims JSON");
        })
        .ok()?;

    let exp = claims.get("exp")?;
    // NumericDate may carry a fractional part
    #[allow(clippy::cast_possible_truncation)]
    let seconds = exp
        .as_i64()
        .or_else(|| exp.as_f64().map(|f| f.floor() as i64))?;

    DateTime::from_timestamp(seconds, 0)
}
