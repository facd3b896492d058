//! Secret types for client secrets and bearer tokens.
//!
//! Re-exports the [`secrecy`] types used throughout the crate. `SecretString`
//! implements `Debug` with redaction, so structs that hold one can derive or
//! hand-write `Debug` without leaking the value into logs.
//!
//! ```rust
//! use fhir_auth::secret::{ExposeSecret, SecretString};
//!
//! let secret = SecretString::from("client-secret");
//! assert!(format!("{secret:?}").contains("REDACTED"));
//! assert_eq!(secret.expose_secret(), "client-secret");
//! ```
//!
//! Use `SecretString` for OAuth client secrets and bearer tokens. Values are
//! zeroized on drop.

pub use secrecy::{ExposeSecret, SecretString};

/// Keep at most `max_chars` characters of a sensitive value for log output.
///
/// Used when a token prefix helps correlate log lines without exposing the
/// whole credential.
#[must_use]
pub fn truncate(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => value.get(..idx).unwrap_or(value),
        None => value,
    }
}
