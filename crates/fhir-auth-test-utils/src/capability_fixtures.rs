//! Capability statement fixtures
//!
//! Builds `GET [base]/metadata` bodies with or without the SMART OAuth URIs
//! extension.

use crate::test_ids::OAUTH_URIS_EXTENSION;
use serde_json::{json, Value};

/// Which value field carries an endpoint URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Uri,
    Url,
    String,
}

impl ValueKind {
    fn field(self) -> &'static str {
        match self {
            ValueKind::Uri => "valueUri",
            ValueKind::Url => "valueUrl",
            ValueKind::String => "valueString",
        }
    }
}

/// Builder for capability statement JSON
///
/// # Example
/// ```rust,ignore
/// let body = CapabilityStatementBuilder::new()
///     .with_token("https://login.example.com/token")
///     .with_authorize("https://login.example.com/authorize")
///     .build();
/// ```
pub struct CapabilityStatementBuilder {
    endpoints: Vec<(String, String)>,
    value_kind: ValueKind,
    extension_url: String,
    include_security: bool,
}

impl CapabilityStatementBuilder {
    /// Statement with an empty `oauth-uris` extension
    pub fn new() -> Self {
        Self {
            endpoints: Vec::new(),
            value_kind: ValueKind::Uri,
            extension_url: OAUTH_URIS_EXTENSION.to_string(),
            include_security: true,
        }
    }

    /// Add the `token` child extension
    pub fn with_token(self, url: &str) -> Self {
        self.with_endpoint("token", url)
    }

    /// Add the `revoke` child extension
    pub fn with_revoke(self, url: &str) -> Self {
        self.with_endpoint("revoke", url)
    }

    /// Add the `introspect` child extension
    pub fn with_introspect(self, url: &str) -> Self {
        self.with_endpoint("introspect", url)
    }

    /// Add the `authorize` child extension
    pub fn with_authorize(self, url: &str) -> Self {
        self.with_endpoint("authorize", url)
    }

    /// Add an arbitrary child extension
    pub fn with_endpoint(mut self, name: &str, url: &str) -> Self {
        self.endpoints.push((name.to_string(), url.to_string()));
        self
    }

    /// Carry endpoint URLs in `valueUrl` or `valueString` instead of `valueUri`
    pub fn with_value_kind(mut self, kind: ValueKind) -> Self {
        self.value_kind = kind;
        self
    }

    /// Replace the extension URL (e.g. to omit `oauth-uris`)
    pub fn with_extension_url(mut self, url: &str) -> Self {
        self.extension_url = url.to_string();
        self
    }

    /// Omit the `security` block entirely
    pub fn without_security(mut self) -> Self {
        self.include_security = false;
        self
    }

    /// Build the statement JSON
    pub fn build(self) -> Value {
        let field = self.value_kind.field();
        let children: Vec<Value> = self
            .endpoints
            .iter()
            .map(|(name, url)| {
                let mut child = serde_json::Map::new();
                child.insert("url".to_string(), json!(name));
                child.insert(field.to_string(), json!(url));
                Value::Object(child)
            })
            .collect();

        let mut rest = json!({ "mode": "server" });
        if self.include_security {
            rest["security"] = json!({
                "extension": [{ "url": self.extension_url, "extension": children }]
            });
        }

        json!({
            "resourceType": "CapabilityStatement",
            "status": "active",
            "kind": "instance",
            "fhirVersion": "4.0.1",
            "format": ["json"],
            "rest": [rest]
        })
    }
}

impl Default for CapabilityStatementBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Statement advertising only `token_url`
pub fn capability_statement_with_token(token_url: &str) -> Value {
    CapabilityStatementBuilder::new().with_token(token_url).build()
}

/// SMART configuration document advertising `token_url`
pub fn smart_configuration(token_url: &str) -> Value {
    json!({
        "token_endpoint": token_url,
        "grant_types_supported": ["client_credentials"],
        "capabilities": ["client-confidential-symmetric"]
    })
}
