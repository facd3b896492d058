//! OAuth endpoint discovery from the FHIR capability statement.
//!
//! FHIR servers secured with SMART-on-FHIR advertise their OAuth endpoints in
//! the capability statement (`GET [base]/metadata`) under
//! `rest[].security.extension[]`, in an extension whose URL ends with
//! `oauth-uris`:
//!
//! ```json
//! {
//!   "resourceType": "CapabilityStatement",
//!   "rest": [{
//!     "security": {
//!       "extension": [{
//!         "url": "http://fhir-registry.smarthealthit.org/StructureDefinition/oauth-uris",
//!         "extension": [
//!           { "url": "token", "valueUri": "https://login.example.com/token" },
//!           { "url": "authorize", "valueUri": "https://login.example.com/authorize" }
//!         ]
//!       }]
//!     }
//!   }]
//! }
//! ```
//!
//! [`EndpointDiscovery`] fetches and caches capability statements per server
//! and extracts [`FhirEndpoints`] from them. The SMART well-known configuration
//! document is supported as an alternative source.

use crate::config::HttpSettings;
use crate::credentials::ClientCredentials;
use crate::endpoints::FhirEndpoints;
use crate::error::{AuthError, Result};
use reqwest::header::ACCEPT;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Suffix identifying the SMART OAuth URIs extension.
pub const OAUTH_URIS_SUFFIX: &str = "oauth-uris";

/// Relative path of the capability statement.
const METADATA_PATH: &str = "metadata";

/// Relative path of the SMART configuration document.
const SMART_CONFIGURATION_PATH: &str = ".well-known/smart-configuration";

/// Media type requested for FHIR resources.
const FHIR_JSON: &str = "application/fhir+json";

// =============================================================================
// Capability Statement Types
// =============================================================================

/// The subset of a FHIR `CapabilityStatement` needed for discovery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityStatement {
    /// Resource type; `CapabilityStatement` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,

    /// Canonical URL of the statement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// REST capabilities.
    #[serde(default)]
    pub rest: Vec<CapabilityRest>,
}

/// One `rest` entry of a capability statement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilityRest {
    /// `server` or `client`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    /// Security information, including the OAuth extensions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<CapabilitySecurity>,
}

/// The `security` block of a `rest` entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilitySecurity {
    /// Security extensions.
    #[serde(default)]
    pub extension: Vec<Extension>,
}

/// A FHIR extension, possibly nesting further extensions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extension {
    /// Identifying URL (or simple name for nested extensions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Nested extensions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,

    /// `valueUri` payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_uri: Option<String>,

    /// `valueUrl` payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_url: Option<String>,

    /// `valueString` payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,
}

impl Extension {
    /// The extension's URL-like value.
    #[must_use]
    pub fn value(&self) -> Option<&str> {
        self.value_uri
            .as_deref()
            .or(self.value_url.as_deref())
            .or(self.value_string.as_deref())
    }

    /// Value of the nested extension named `name`.
    #[must_use]
    pub fn child_value(&self, name: &str) -> Option<&str> {
        self.extension
            .iter()
            .find(|ext| ext.url.as_deref() == Some(name))
            .and_then(Extension::value)
            .filter(|value| !value.is_empty())
    }
}

/// SMART App Launch `.well-known/smart-configuration` document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmartConfiguration {
    /// Token endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,

    /// Authorization endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,

    /// Revocation endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_endpoint: Option<String>,

    /// Introspection endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introspection_endpoint: Option<String>,
}

// =============================================================================
// URL Helpers
// =============================================================================

/// Capability statement URL: `[base]/metadata?_summary=false`.
///
/// # Errors
///
/// Returns `AuthError::Discovery` if the URL cannot be built.
pub fn metadata_url(base: &Url) -> Result<Url> {
    let mut url = join_base(base, METADATA_PATH)?;
    url.query_pairs_mut().append_pair("_summary", "false");
    Ok(url)
}

/// SMART configuration URL: `[base]/.well-known/smart-configuration`.
///
/// # Errors
///
/// Returns `AuthError::Discovery` if the URL cannot be built.
pub fn smart_configuration_url(base: &Url) -> Result<Url> {
    join_base(base, SMART_CONFIGURATION_PATH)
}

/// Join `relative` under `base`, treating `base` as a directory.
fn join_base(base: &Url, relative: &str) -> Result<Url> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(relative)
        .map_err(|e| AuthError::Discovery(format!("Invalid discovery URL under {base}: {e}")))
}

fn parse_url(value: &str, name: &str) -> Result<Url> {
    Url::parse(value)
        .map_err(|e| AuthError::Discovery(format!("Invalid {name} endpoint URL '{value}': {e}")))
}

fn parse_optional_url(value: Option<&str>, name: &str) -> Result<Option<Url>> {
    value.map(|v| parse_url(v, name)).transpose()
}

fn ends_with_ignore_ascii_case(value: &str, suffix: &str) -> bool {
    value
        .len()
        .checked_sub(suffix.len())
        .and_then(|start| value.get(start..))
        .is_some_and(|tail| tail.eq_ignore_ascii_case(suffix))
}

// =============================================================================
// Extraction
// =============================================================================

/// Extract the OAuth endpoints from a capability statement.
///
/// Searches the security extensions of every `rest` entry, in order, for the
/// first `oauth-uris` extension.
///
/// # Errors
///
/// Returns `AuthError::Discovery` if there is no security extension, no
/// `oauth-uris` extension, no `token` value, or an endpoint is not a URL.
pub fn parse_endpoints(public: &Url, statement: &CapabilityStatement) -> Result<FhirEndpoints> {
    let mut extensions = statement
        .rest
        .iter()
        .filter_map(|rest| rest.security.as_ref())
        .flat_map(|security| security.extension.iter())
        .peekable();

    if extensions.peek().is_none() {
        return Err(AuthError::Discovery(format!(
            "FHIR server {public} has no security extensions in its capability statement"
        )));
    }

    let oauth_uris = extensions
        .find(|ext| {
            ext.url
                .as_deref()
                .is_some_and(|url| ends_with_ignore_ascii_case(url, OAUTH_URIS_SUFFIX))
        })
        .ok_or_else(|| {
            AuthError::Discovery(format!(
                "FHIR server {public} does not advertise an {OAUTH_URIS_SUFFIX} extension"
            ))
        })?;

    let token = oauth_uris.child_value("token").ok_or_else(|| {
        let server = statement.url.as_deref().unwrap_or(public.as_str());
        AuthError::Discovery(format!(
            "Cannot access FHIR server {server}: it has no token endpoint"
        ))
    })?;

    Ok(FhirEndpoints {
        public: public.clone(),
        token: parse_url(token, "token")?,
        revoke: parse_optional_url(oauth_uris.child_value("revoke"), "revoke")?,
        introspect: parse_optional_url(oauth_uris.child_value("introspect"), "introspect")?,
        authorize: parse_optional_url(oauth_uris.child_value("authorize"), "authorize")?,
    })
}

/// Extract the OAuth endpoints from a SMART configuration document.
///
/// # Errors
///
/// Returns `AuthError::Discovery` if `token_endpoint` is missing or an
/// endpoint is not a URL.
pub fn parse_smart_endpoints(public: &Url, config: &SmartConfiguration) -> Result<FhirEndpoints> {
    let token = config
        .token_endpoint
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            AuthError::Discovery(format!(
                "SMART configuration of {public} has no token_endpoint"
            ))
        })?;

    Ok(FhirEndpoints {
        public: public.clone(),
        token: parse_url(token, "token")?,
        revoke: parse_optional_url(config.revocation_endpoint.as_deref(), "revoke")?,
        introspect: parse_optional_url(config.introspection_endpoint.as_deref(), "introspect")?,
        authorize: parse_optional_url(config.authorization_endpoint.as_deref(), "authorize")?,
    })
}

// =============================================================================
// Discovery Client
// =============================================================================

/// Fetches capability statements and resolves OAuth endpoints.
///
/// Successfully fetched capability statements are cached per server URL for
/// the lifetime of the client; failures are not cached.
pub struct EndpointDiscovery {
    http_client: reqwest::Client,
    statements: Arc<RwLock<HashMap<Url, Arc<CapabilityStatement>>>>,
}

impl EndpointDiscovery {
    /// Create a discovery client with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the HTTP client cannot be built.
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        Ok(Self::with_client(settings.build_client()?))
    }

    /// Create a discovery client sharing an existing HTTP client.
    #[must_use]
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            statements: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Read the server's capability statement, using the cache when possible.
    ///
    /// # Errors
    ///
    /// - `AuthError::Cancelled` if `cancel` fires first
    /// - `AuthError::Discovery` if the fetch fails or returns no statement
    #[instrument(skip_all, fields(server = %server))]
    pub async fn capability_statement(
        &self,
        server: &Url,
        cancel: &CancellationToken,
    ) -> Result<Arc<CapabilityStatement>> {
        if let Some(statement) = self.statements.read().await.get(server) {
            tracing::debug!(target: "fhir_auth.discovery", "Capability statement cache hit");
            return Ok(Arc::clone(statement));
        }

        let url = metadata_url(server)?;
        let statement: CapabilityStatement = self.fetch_json(&url, FHIR_JSON, cancel).await?;

        if let Some(resource_type) = statement.resource_type.as_deref() {
            if resource_type != "CapabilityStatement" {
                tracing::warn!(
                    target: "fhir_auth.discovery",
                    resource_type = %resource_type,
                    "Metadata endpoint returned an unexpected resource"
                );
                return Err(AuthError::Discovery(format!(
                    "Could not get capability statement for {server}: got {resource_type}"
                )));
            }
        }

        let statement = Arc::new(statement);
        self.statements
            .write()
            .await
            .insert(server.clone(), Arc::clone(&statement));

        Ok(statement)
    }

    /// Discover the OAuth endpoints advertised in the capability statement.
    ///
    /// # Errors
    ///
    /// - `AuthError::Cancelled` if `cancel` fires first
    /// - `AuthError::Discovery` if the statement cannot be read or lacks a
    ///   token endpoint
    pub async fn discover_endpoints(
        &self,
        server: &Url,
        cancel: &CancellationToken,
    ) -> Result<FhirEndpoints> {
        let statement = self.capability_statement(server, cancel).await?;

        if cancel.is_cancelled() {
            return Err(AuthError::Cancelled);
        }

        let endpoints = parse_endpoints(server, &statement)?;
        tracing::info!(
            target: "fhir_auth.discovery",
            server = %server,
            token = %endpoints.token,
            has_revoke = endpoints.revoke.is_some(),
            has_introspect = endpoints.introspect.is_some(),
            has_authorize = endpoints.authorize.is_some(),
            "Discovered OAuth endpoints"
        );
        Ok(endpoints)
    }

    /// Discover the OAuth endpoints from the SMART configuration document.
    ///
    /// # Errors
    ///
    /// - `AuthError::Cancelled` if `cancel` fires first
    /// - `AuthError::Discovery` if the document cannot be read or lacks a
    ///   token endpoint
    #[instrument(skip_all, fields(server = %server))]
    pub async fn discover_smart_endpoints(
        &self,
        server: &Url,
        cancel: &CancellationToken,
    ) -> Result<FhirEndpoints> {
        let url = smart_configuration_url(server)?;
        let config: SmartConfiguration = self.fetch_json(&url, "application/json", cancel).await?;
        parse_smart_endpoints(server, &config)
    }

    /// Endpoints for `credentials`: the token URL override when configured,
    /// otherwise discovery against the credentials' server.
    ///
    /// # Errors
    ///
    /// Same as [`EndpointDiscovery::discover_endpoints`].
    pub async fn resolve_endpoints(
        &self,
        credentials: &ClientCredentials,
        cancel: &CancellationToken,
    ) -> Result<FhirEndpoints> {
        if let Some(token_url) = credentials.token_url() {
            tracing::debug!(
                target: "fhir_auth.discovery",
                token = %token_url,
                "Using configured token URL, skipping discovery"
            );
            return Ok(FhirEndpoints::new(
                credentials.server_url().clone(),
                token_url.clone(),
            ));
        }
        self.discover_endpoints(credentials.server_url(), cancel).await
    }

    /// GET `url` and decode the JSON body, racing against `cancel`.
    async fn fetch_json<T: DeserializeOwned>(
        &self,
        url: &Url,
        accept: &str,
        cancel: &CancellationToken,
    ) -> Result<T> {
        tracing::debug!(target: "fhir_auth.discovery", url = %url, "Fetching discovery document");

        let request = self.http_client.get(url.clone()).header(ACCEPT, accept).send();
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AuthError::Cancelled),
            response = request => response.map_err(|e| {
                tracing::warn!(target: "fhir_auth.discovery", error = %e, "Discovery request failed");
                AuthError::Discovery(format!("Failed to fetch {url}: {e}"))
            })?,
        };

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(
                target: "fhir_auth.discovery",
                status = %status,
                "Discovery endpoint returned error"
            );
            return Err(AuthError::Discovery(format!(
                "Failed to fetch {url}: status {status}"
            )));
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(AuthError::Cancelled),
            body = response.json::<T>() => body.map_err(|e| {
                tracing::warn!(target: "fhir_auth.discovery", error = %e, "Failed to parse discovery document");
                AuthError::Discovery(format!("No usable document at {url}: {e}"))
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const OAUTH_URIS: &str = "http://fhir-registry.smarthealthit.org/StructureDefinition/oauth-uris";

    fn server() -> Url {
        Url::parse("https://fhir.example.com/r4").unwrap()
    }

    fn statement(children: serde_json::Value) -> CapabilityStatement {
        serde_json::from_value(json!({
            "resourceType": "CapabilityStatement",
            "rest": [{
                "mode": "server",
                "security": {
                    "extension": [{ "url": OAUTH_URIS, "extension": children }]
                }
            }]
        }))
        .unwrap()
    }

    // -------------------------------------------------------------------------
    // URL helpers
    // -------------------------------------------------------------------------

    #[test]
    fn test_metadata_url_keeps_base_path() {
        let url = metadata_url(&server()).unwrap();
        assert_eq!(url.as_str(), "https://fhir.example.com/r4/metadata?_summary=false");
    }

    #[test]
    fn test_metadata_url_with_trailing_slash() {
        let base = Url::parse("https://fhir.example.com/").unwrap();
        let url = metadata_url(&base).unwrap();
        assert_eq!(url.as_str(), "https://fhir.example.com/metadata?_summary=false");
    }

    #[test]
    fn test_smart_configuration_url() {
        let url = smart_configuration_url(&server()).unwrap();
        assert_eq!(
            url.as_str(),
            "https://fhir.example.com/r4/.well-known/smart-configuration"
        );
    }

    #[test]
    fn test_suffix_match_ignores_case() {
        assert!(ends_with_ignore_ascii_case("http://x/OAuth-URIs", "oauth-uris"));
        assert!(!ends_with_ignore_ascii_case("uris", "oauth-uris"));
        assert!(!ends_with_ignore_ascii_case("http://x/oauth-uris/extra", "oauth-uris"));
    }

    // -------------------------------------------------------------------------
    // parse_endpoints
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_all_endpoints() {
        let statement = statement(json!([
            { "url": "token", "valueUri": "https://login.example.com/token" },
            { "url": "revoke", "valueUri": "https://login.example.com/revoke" },
            { "url": "introspect", "valueUri": "https://login.example.com/introspect" },
            { "url": "authorize", "valueUri": "https://login.example.com/authorize" }
        ]));

        let endpoints = parse_endpoints(&server(), &statement).unwrap();

        assert_eq!(endpoints.public, server());
        assert_eq!(endpoints.token.as_str(), "https://login.example.com/token");
        assert_eq!(endpoints.revoke.unwrap().as_str(), "https://login.example.com/revoke");
        assert_eq!(
            endpoints.introspect.unwrap().as_str(),
            "https://login.example.com/introspect"
        );
        assert_eq!(
            endpoints.authorize.unwrap().as_str(),
            "https://login.example.com/authorize"
        );
    }

    #[test]
    fn test_parse_token_only() {
        let statement = statement(json!([
            { "url": "token", "valueUri": "https://login.example.com/token" }
        ]));

        let endpoints = parse_endpoints(&server(), &statement).unwrap();

        assert!(endpoints.revoke.is_none());
        assert!(endpoints.introspect.is_none());
        assert!(endpoints.authorize.is_none());
    }

    #[test]
    fn test_parse_value_url_and_string() {
        let statement = statement(json!([
            { "url": "token", "valueUrl": "https://login.example.com/token" },
            { "url": "authorize", "valueString": "https://login.example.com/authorize" }
        ]));

        let endpoints = parse_endpoints(&server(), &statement).unwrap();
        assert_eq!(endpoints.token.as_str(), "https://login.example.com/token");
        assert!(endpoints.authorize.is_some());
    }

    #[test]
    fn test_parse_missing_token_fails() {
        let statement = statement(json!([
            { "url": "authorize", "valueUri": "https://login.example.com/authorize" }
        ]));

        let result = parse_endpoints(&server(), &statement);
        assert!(matches!(result, Err(AuthError::Discovery(msg)) if msg.contains("no token endpoint")));
    }

    #[test]
    fn test_parse_missing_oauth_uris_fails() {
        let statement: CapabilityStatement = serde_json::from_value(json!({
            "resourceType": "CapabilityStatement",
            "rest": [{
                "security": {
                    "extension": [{ "url": "http://example.com/other-extension" }]
                }
            }]
        }))
        .unwrap();

        let result = parse_endpoints(&server(), &statement);
        assert!(matches!(result, Err(AuthError::Discovery(msg)) if msg.contains("oauth-uris")));
    }

    #[test]
    fn test_parse_missing_security_fails() {
        let statement: CapabilityStatement = serde_json::from_value(json!({
            "resourceType": "CapabilityStatement",
            "rest": [{ "mode": "server" }]
        }))
        .unwrap();

        assert!(matches!(
            parse_endpoints(&server(), &statement),
            Err(AuthError::Discovery(_))
        ));
    }

    #[test]
    fn test_parse_uses_first_rest_with_security() {
        let statement: CapabilityStatement = serde_json::from_value(json!({
            "rest": [
                { "mode": "client" },
                { "mode": "server", "security": { "extension": [{
                    "url": OAUTH_URIS,
                    "extension": [{ "url": "token", "valueUri": "https://login.example.com/token" }]
                }]}}
            ]
        }))
        .unwrap();

        assert!(parse_endpoints(&server(), &statement).is_ok());
    }

    #[test]
    fn test_parse_skips_secured_rest_without_oauth_uris() {
        let statement: CapabilityStatement = serde_json::from_value(json!({
            "rest": [
                { "mode": "client", "security": { "cors": true } },
                { "mode": "client", "security": { "extension": [
                    { "url": "http://example.com/other-extension" }
                ]}},
                { "mode": "server", "security": { "extension": [{
                    "url": OAUTH_URIS,
                    "extension": [{ "url": "token", "valueUri": "https://login.example.com/token" }]
                }]}}
            ]
        }))
        .unwrap();

        let endpoints = parse_endpoints(&server(), &statement).unwrap();
        assert_eq!(endpoints.token.as_str(), "https://login.example.com/token");
    }

    #[test]
    fn test_parse_invalid_token_url_fails() {
        let statement = statement(json!([{ "url": "token", "valueUri": "not a url" }]));
        assert!(matches!(
            parse_endpoints(&server(), &statement),
            Err(AuthError::Discovery(_))
        ));
    }

    #[test]
    fn test_parse_smart_configuration() {
        let config: SmartConfiguration = serde_json::from_value(json!({
            "token_endpoint": "https://login.example.com/token",
            "authorization_endpoint": "https://login.example.com/authorize",
            "capabilities": ["client-confidential-symmetric"]
        }))
        .unwrap();

        let endpoints = parse_smart_endpoints(&server(), &config).unwrap();
        assert_eq!(endpoints.token.as_str(), "https://login.example.com/token");
        assert!(endpoints.authorize.is_some());
        assert!(endpoints.revoke.is_none());
    }

    #[test]
    fn test_parse_smart_configuration_without_token_fails() {
        let config = SmartConfiguration::default();
        assert!(matches!(
            parse_smart_endpoints(&server(), &config),
            Err(AuthError::Discovery(_))
        ));
    }

    // -------------------------------------------------------------------------
    // EndpointDiscovery
    // -------------------------------------------------------------------------

    fn statement_body() -> serde_json::Value {
        json!({
            "resourceType": "CapabilityStatement",
            "rest": [{ "security": { "extension": [{
                "url": OAUTH_URIS,
                "extension": [{ "url": "token", "valueUri": "https://login.example.com/token" }]
            }]}}]
        })
    }

    #[tokio::test]
    async fn test_discover_endpoints_fetches_metadata() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/metadata"))
            .and(query_param("_summary", "false"))
            .and(header("accept", FHIR_JSON))
            .respond_with(ResponseTemplate::new(200).set_body_json(statement_body()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let discovery = EndpointDiscovery::new(&HttpSettings::default()).unwrap();
        let base = Url::parse(&mock_server.uri()).unwrap();

        let endpoints = discovery
            .discover_endpoints(&base, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(endpoints.token.as_str(), "https://login.example.com/token");
    }

    #[tokio::test]
    async fn test_capability_statement_is_cached() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/metadata"))
            .respond_with(ResponseTemplate::new(200).set_body_json(statement_body()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let discovery = EndpointDiscovery::new(&HttpSettings::default()).unwrap();
        let base = Url::parse(&mock_server.uri()).unwrap();
        let cancel = CancellationToken::new();

        discovery.discover_endpoints(&base, &cancel).await.unwrap();
        discovery.discover_endpoints(&base, &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/metadata"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/metadata"))
            .respond_with(ResponseTemplate::new(200).set_body_json(statement_body()))
            .mount(&mock_server)
            .await;

        let discovery = EndpointDiscovery::new(&HttpSettings::default()).unwrap();
        let base = Url::parse(&mock_server.uri()).unwrap();
        let cancel = CancellationToken::new();

        let first = discovery.discover_endpoints(&base, &cancel).await;
        assert!(matches!(first, Err(AuthError::Discovery(_))));

        assert!(discovery.discover_endpoints(&base, &cancel).await.is_ok());
    }

    #[tokio::test]
    async fn test_non_json_metadata_fails() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/metadata"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
            .mount(&mock_server)
            .await;

        let discovery = EndpointDiscovery::new(&HttpSettings::default()).unwrap();
        let base = Url::parse(&mock_server.uri()).unwrap();

        let result = discovery
            .discover_endpoints(&base, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(AuthError::Discovery(_))));
    }

    #[tokio::test]
    async fn test_wrong_resource_type_fails() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/metadata"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resourceType": "OperationOutcome",
                "issue": []
            })))
            .mount(&mock_server)
            .await;

        let discovery = EndpointDiscovery::new(&HttpSettings::default()).unwrap();
        let base = Url::parse(&mock_server.uri()).unwrap();

        let result = discovery
            .discover_endpoints(&base, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(AuthError::Discovery(msg)) if msg.contains("OperationOutcome")));
    }

    #[tokio::test]
    async fn test_cancelled_discovery() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/metadata"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(statement_body())
                    .set_delay(std::time::Duration::from_secs(5)),
            )
            .mount(&mock_server)
            .await;

        let discovery = EndpointDiscovery::new(&HttpSettings::default()).unwrap();
        let base = Url::parse(&mock_server.uri()).unwrap();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let result = discovery.discover_endpoints(&base, &cancel).await;
        assert!(matches!(result, Err(AuthError::Cancelled)));
    }

    #[tokio::test]
    async fn test_discover_smart_endpoints() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/.well-known/smart-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token_endpoint": "https://login.example.com/token",
                "revocation_endpoint": "https://login.example.com/revoke"
            })))
            .mount(&mock_server)
            .await;

        let discovery = EndpointDiscovery::new(&HttpSettings::default()).unwrap();
        let base = Url::parse(&mock_server.uri()).unwrap();

        let endpoints = discovery
            .discover_smart_endpoints(&base, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(endpoints.token.as_str(), "https://login.example.com/token");
        assert!(endpoints.revoke.is_some());
    }

    #[tokio::test]
    async fn test_resolve_endpoints_uses_token_url_override() {
        // No mock server: the override must not touch the network
        let discovery = EndpointDiscovery::new(&HttpSettings::default()).unwrap();
        let credentials = ClientCredentials::new(
            "app",
            "id",
            crate::secret::SecretString::from("secret"),
            Url::parse("http://127.0.0.1:1/fhir").unwrap(),
            "https://fhir.example.com",
        )
        .with_token_url(Url::parse("https://login.example.com/token").unwrap());

        let endpoints = discovery
            .resolve_endpoints(&credentials, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(endpoints.token.as_str(), "https://login.example.com/token");
        assert_eq!(endpoints.public, *credentials.server_url());
    }
}
