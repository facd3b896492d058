//! Client credentials for a FHIR server.
//!
//! [`ClientCredentials`] is the immutable identity a handler authenticates
//! with. Equality and hashing follow the identity a token cache keys on:
//! application, client id, client secret and scope compare case-insensitively,
//! the server URL compares by value. Static headers, the token URL override and
//! token request fields are configuration, not identity.

use crate::error::{AuthError, Result};
use crate::secret::{ExposeSecret, SecretString};
use reqwest::Url;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Extra token request field asking the server to process bundles in parallel.
pub const BUNDLE_PROCESSING_FIELD: (&str, &str) = ("x-bundle-processing-logic", "parallel");

/// Extra token request field enabling profile validation.
pub const PROFILE_VALIDATION_FIELD: (&str, &str) = ("x-ms-profile-validation", "true");

/// A static header attached to every authenticated request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HeaderNameValue {
    /// Header name.
    pub name: String,
    /// Header value.
    pub value: String,
}

impl HeaderNameValue {
    /// Create a header pair.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// OAuth client credentials for one FHIR server.
#[derive(Clone)]
pub struct ClientCredentials {
    application: String,
    client_id: String,
    client_secret: SecretString,
    server_url: Url,
    scope: String,
    header_values: Vec<HeaderNameValue>,
    token_url: Option<Url>,
    token_request_fields: Vec<(String, String)>,
}

impl ClientCredentials {
    /// Create credentials without static headers or overrides.
    ///
    /// # Arguments
    ///
    /// * `application` - Label identifying this client in logs
    /// * `client_id` - OAuth client id
    /// * `client_secret` - OAuth client secret
    /// * `server_url` - FHIR server base URL
    /// * `scope` - Scope URI; its scheme and authority become the `resource`
    #[must_use]
    pub fn new(
        application: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: SecretString,
        server_url: Url,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            application: application.into(),
            client_id: client_id.into(),
            client_secret,
            server_url,
            scope: scope.into(),
            header_values: Vec::new(),
            token_url: None,
            token_request_fields: Vec::new(),
        }
    }

    /// Add a static header sent with every authenticated request.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.header_values.push(HeaderNameValue::new(name, value));
        self
    }

    /// Use an explicit token URL instead of discovering it.
    #[must_use]
    pub fn with_token_url(mut self, token_url: Url) -> Self {
        self.token_url = Some(token_url);
        self
    }

    /// Add a pass-through field to the token request body.
    ///
    /// Fields named like a mandatory grant field are ignored when the request
    /// is built.
    #[must_use]
    pub fn with_token_request_field(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.token_request_fields.push((name.into(), value.into()));
        self
    }

    /// Add the Azure API for FHIR token request fields.
    #[must_use]
    pub fn with_azure_token_fields(self) -> Self {
        self.with_token_request_field(BUNDLE_PROCESSING_FIELD.0, BUNDLE_PROCESSING_FIELD.1)
            .with_token_request_field(PROFILE_VALIDATION_FIELD.0, PROFILE_VALIDATION_FIELD.1)
    }

    /// Application label.
    #[must_use]
    pub fn application(&self) -> &str {
        &self.application
    }

    /// OAuth client id.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// OAuth client secret.
    #[must_use]
    pub fn client_secret(&self) -> &SecretString {
        &self.client_secret
    }

    /// FHIR server base URL.
    #[must_use]
    pub fn server_url(&self) -> &Url {
        &self.server_url
    }

    /// Scope URI.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Static headers.
    #[must_use]
    pub fn header_values(&self) -> &[HeaderNameValue] {
        &self.header_values
    }

    /// Token URL override, if configured.
    #[must_use]
    pub fn token_url(&self) -> Option<&Url> {
        self.token_url.as_ref()
    }

    /// Pass-through token request fields.
    #[must_use]
    pub fn token_request_fields(&self) -> &[(String, String)] {
        &self.token_request_fields
    }

    /// The `resource` sent with the token request: scheme and authority of
    /// the scope URI, without path or query.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the scope is not an absolute URI
    /// with a host.
    pub fn resource(&self) -> Result<String> {
        let scope = Url::parse(&self.scope)
            .map_err(|e| AuthError::Configuration(format!("Scope is not a valid URI: {e}")))?;

        let host = scope
            .host_str()
            .ok_or_else(|| AuthError::Configuration("Scope URI has no authority".to_string()))?;

        Ok(match scope.port() {
            Some(port) => format!("{}://{host}:{port}", scope.scheme()),
            None => format!("{}://{host}", scope.scheme()),
        })
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<&str> = self.header_values.iter().map(|h| h.name.as_str()).collect();
        f.debug_struct("ClientCredentials")
            .field("application", &self.application)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("server_url", &self.server_url.as_str())
            .field("scope", &self.scope)
            .field("header_names", &header_names)
            .field("token_url", &self.token_url.as_ref().map(Url::as_str))
            .finish()
    }
}

impl fmt::Display for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (client {} at {})",
            self.application, self.client_id, self.server_url
        )
    }
}

impl PartialEq for ClientCredentials {
    fn eq(&self, other: &Self) -> bool {
        eq_ignore_case(&self.application, &other.application)
            && eq_ignore_case(&self.client_id, &other.client_id)
            && eq_ignore_case(
                self.client_secret.expose_secret(),
                other.client_secret.expose_secret(),
            )
            && self.server_url == other.server_url
            && eq_ignore_case(&self.scope, &other.scope)
    }
}

impl Eq for ClientCredentials {}

impl Hash for ClientCredentials {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.application.to_lowercase().hash(state);
        self.client_id.to_lowercase().hash(state);
        self.client_secret.expose_secret().to_lowercase().hash(state);
        self.server_url.hash(state);
        self.scope.to_lowercase().hash(state);
    }
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn credentials(
        application: &str,
        client_id: &str,
        secret: &str,
        scope: &str,
    ) -> ClientCredentials {
        ClientCredentials::new(
            application,
            client_id,
            SecretString::from(secret),
            Url::parse("https://fhir.example.com/").unwrap(),
            scope,
        )
    }

    #[test]
    fn test_identity_ignores_case() {
        let a = credentials("Loader", "ABC-123", "Secret", "https://fhir.example.com/.default");
        let b = credentials("loader", "abc-123", "sECRET", "HTTPS://FHIR.EXAMPLE.COM/.default");

        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_identity_excludes_headers_and_overrides() {
        let a = credentials("app", "id", "secret", "https://fhir.example.com");
        let b = a
            .clone()
            .with_header("x-tenant", "t1")
            .with_token_url(Url::parse("https://login.example.com/token").unwrap())
            .with_azure_token_fields();

        assert_eq!(a, b);
    }

    #[test]
    fn test_identity_compares_server_url() {
        let a = credentials("app", "id", "secret", "https://fhir.example.com");
        let b = ClientCredentials::new(
            "app",
            "id",
            SecretString::from("secret"),
            Url::parse("https://other.example.com/").unwrap(),
            "https://fhir.example.com",
        );

        assert_ne!(a, b);
    }

    #[test]
    fn test_identity_compares_secret() {
        let a = credentials("app", "id", "secret", "https://fhir.example.com");
        let b = credentials("app", "id", "different", "https://fhir.example.com");
        assert_ne!(a, b);
    }

    #[test]
    fn test_resource_strips_path_and_query() {
        let creds = credentials("app", "id", "s", "https://fhir.example.com/.default?x=1");
        assert_eq!(creds.resource().unwrap(), "https://fhir.example.com");
    }

    #[test]
    fn test_resource_keeps_explicit_port() {
        let creds = credentials("app", "id", "s", "http://localhost:8080/fhir/user.read");
        assert_eq!(creds.resource().unwrap(), "http://localhost:8080");
    }

    #[test]
    fn test_resource_rejects_relative_scope() {
        let creds = credentials("app", "id", "s", "system/*.read");
        assert!(matches!(creds.resource(), Err(AuthError::Configuration(_))));
    }

    #[test]
    fn test_resource_rejects_scope_without_host() {
        let creds = credentials("app", "id", "s", "urn:fhir:scope");
        assert!(matches!(creds.resource(), Err(AuthError::Configuration(_))));
    }

    #[test]
    fn test_azure_token_fields() {
        let creds =
            credentials("app", "id", "s", "https://fhir.example.com").with_azure_token_fields();
        let fields = creds.token_request_fields();

        assert_eq!(fields.len(), 2);
        assert!(fields.contains(&(
            "x-bundle-processing-logic".to_string(),
            "parallel".to_string()
        )));
        assert!(fields.contains(&("x-ms-profile-validation".to_string(), "true".to_string())));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = credentials("app", "id", "super-secret-value", "https://fhir.example.com")
            .with_header("x-api-key", "header-secret");
        let debug_str = format!("{creds:?}");

        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("super-secret-value"));
        assert!(!debug_str.contains("header-secret"));
        assert!(debug_str.contains("x-api-key"));
    }
}
