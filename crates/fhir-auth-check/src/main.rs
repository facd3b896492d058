//! FHIR Auth Check
//!
//! Validates client credentials against a FHIR server.
//!
//! # Flow
//!
//! 1. Load configuration from environment
//! 2. Resolve the token endpoint (override or capability statement discovery)
//! 3. Acquire a token with the client-credentials grant
//! 4. Optionally GET `FHIR_PROBE_PATH` through the authenticating handler
//!
//! Ctrl+C cancels whichever step is in flight.

#![warn(clippy::pedantic)]

use fhir_auth_check::{run, Config};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fhir_auth=debug,fhir_auth_check=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        application = %config.application,
        server_url = %config.server_url,
        client_id = %config.client_id,
        token_url_override = config.token_url.is_some(),
        static_headers = config.static_headers.len(),
        azure_token_fields = config.azure_token_fields,
        "Configuration loaded successfully"
    );

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupted, cancelling check");
                canceller.cancel();
            }
            Err(e) => error!(error = %e, "Failed to install Ctrl+C handler"),
        }
    });

    let report = run(&config, &cancel).await.map_err(|e| {
        error!(error = %e, "Credential check failed");
        e
    })?;

    info!(
        token_url = %report.endpoints.token,
        token_expires_at = ?report.token_expires_at,
        probe_status = ?report.probe_status.map(|s| s.as_u16()),
        "Credential check passed"
    );

    Ok(())
}
