//! The credential check: discover, authenticate, probe.

use crate::config::Config;
use chrono::{DateTime, Utc};
use fhir_auth::{AuthError, AuthenticatingHandler, EndpointDiscovery, FhirEndpoints, Url};
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::{Method, StatusCode};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Errors from a credential check.
#[derive(Debug, Error)]
pub enum CheckError {
    /// Discovery, token generation or forwarding failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// `FHIR_PROBE_PATH` does not resolve against the server URL.
    #[error("Invalid probe path '{path}': {reason}")]
    InvalidProbePath { path: String, reason: String },

    /// The probe request returned a non-success status.
    #[error("Probe request returned {0}")]
    ProbeFailed(StatusCode),
}

/// Outcome of a successful check.
#[derive(Debug)]
pub struct CheckReport {
    /// Endpoints used for authentication.
    pub endpoints: FhirEndpoints,
    /// Expiry of the issued token, if it carries one.
    pub token_expires_at: Option<DateTime<Utc>>,
    /// Status of the probe request, when one was configured.
    pub probe_status: Option<StatusCode>,
}

/// Resolve endpoints, validate the credentials and run the optional probe.
///
/// # Errors
///
/// Returns `CheckError::Auth` for discovery or token failures (including
/// cancellation) and `CheckError::ProbeFailed` if the probe is not a success.
pub async fn run(config: &Config, cancel: &CancellationToken) -> Result<CheckReport, CheckError> {
    let settings = config.http_settings();
    let credentials = Arc::new(config.credentials());

    let discovery = EndpointDiscovery::new(&settings)?;
    let endpoints = discovery.resolve_endpoints(&credentials, cancel).await?;
    info!(
        target: "fhir_auth_check",
        token_url = %endpoints.token,
        "Token endpoint resolved"
    );

    let handler = AuthenticatingHandler::with_reqwest(
        Arc::clone(&credentials),
        Arc::new(endpoints.clone()),
        &settings,
    )?;

    let token = handler.validate_credentials(cancel).await?;
    let token_expires_at = token.expires_at();
    if token_expires_at.is_none() {
        warn!(
            target: "fhir_auth_check",
            "Issued token has no readable expiry; every request will fetch a new token"
        );
    }

    let probe_status = match &config.probe_path {
        Some(path) => Some(probe(&handler, &config.server_url, path, cancel).await?),
        None => None,
    };

    Ok(CheckReport {
        endpoints,
        token_expires_at,
        probe_status,
    })
}

/// Resolve `path` under the server base URL.
fn probe_url(base: &Url, path: &str) -> Result<Url, CheckError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path.trim_start_matches('/'))
        .map_err(|e| CheckError::InvalidProbePath {
            path: path.to_string(),
            reason: e.to_string(),
        })
}

async fn probe(
    handler: &AuthenticatingHandler,
    base: &Url,
    path: &str,
    cancel: &CancellationToken,
) -> Result<StatusCode, CheckError> {
    let url = probe_url(base, path)?;
    info!(target: "fhir_auth_check", url = %url, "Probing FHIR server");

    let mut request = reqwest::Request::new(Method::GET, url);
    request
        .headers_mut()
        .insert(ACCEPT, HeaderValue::from_static("application/fhir+json"));

    let status = handler.send(request, cancel).await?.status();
    if !status.is_success() {
        return Err(CheckError::ProbeFailed(status));
    }
    Ok(status)
}
