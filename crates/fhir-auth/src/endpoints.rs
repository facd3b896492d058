//! OAuth endpoints published by a FHIR server.

use reqwest::Url;

/// The OAuth endpoints of a FHIR server.
///
/// The token URL is mandatory; the others are recorded when the server
/// advertises them but are not used by this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FhirEndpoints {
    /// Public FHIR server base URL.
    pub public: Url,
    /// Token endpoint for the client-credentials grant.
    pub token: Url,
    /// Token revocation endpoint.
    pub revoke: Option<Url>,
    /// Token introspection endpoint.
    pub introspect: Option<Url>,
    /// Authorization endpoint.
    pub authorize: Option<Url>,
}

impl FhirEndpoints {
    /// Endpoints with only a token URL.
    #[must_use]
    pub fn new(public: Url, token: Url) -> Self {
        Self {
            public,
            token,
            revoke: None,
            introspect: None,
            authorize: None,
        }
    }
}
