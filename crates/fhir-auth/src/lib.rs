//! OAuth 2.0 client-credentials authentication for FHIR servers.
//!
//! Discovers a server's token endpoint from its capability statement, issues
//! client-credentials token requests, and sends requests with a cached bearer
//! token attached.

#![warn(clippy::pedantic)]

/// Module for authentication error types
pub mod error;

/// Module for HTTP client settings
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for bearer tokens and expiry decoding
pub mod token;

/// Module for client credentials
pub mod credentials;

/// Module for OAuth endpoint URLs
pub mod endpoints;

/// Module for capability statement discovery
pub mod discovery;

/// Module for the HTTP transport seam
pub mod transport;

/// Module for client-credentials token requests
pub mod token_generator;

/// Module for the authenticating request handler
pub mod handler;

pub use config::HttpSettings;
pub use credentials::{ClientCredentials, HeaderNameValue};
pub use discovery::EndpointDiscovery;
pub use endpoints::FhirEndpoints;
pub use error::{AuthError, Result};
pub use handler::AuthenticatingHandler;
pub use token::BearerToken;
pub use token_generator::TokenGenerator;
pub use transport::{ReqwestTransport, Transport};
pub use reqwest::Url;
