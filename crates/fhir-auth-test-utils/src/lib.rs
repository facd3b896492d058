//! # FHIR Auth Test Utilities
//!
//! Shared test utilities for the `fhir-auth` crates.
//!
//! This crate provides:
//! - Test data builders (`TestTokenBuilder`, `test_credentials`)
//! - Capability statement fixtures (`CapabilityStatementBuilder`)
//! - An in-memory transport (`MockTransport`)
//! - A wiremock server harness (`TestFhirServer`)
//! - Fixed test identities
//! - Custom assertions (`TokenAssertions`, `AuthErrorAssertions`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fhir_auth_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let server = TestFhirServer::start().await;
//!     let handler = AuthenticatingHandler::with_reqwest(
//!         Arc::new(server.credentials()),
//!         Arc::new(FhirEndpoints::new(server.base_url(), server.token_url())),
//!         &HttpSettings::default(),
//!     )?;
//!
//!     let token = handler.validate_credentials(&CancellationToken::new()).await?;
//!     token.assert_valid_jwt().assert_not_expired();
//! }
//! ```

pub mod assertions;
pub mod capability_fixtures;
pub mod mock_transport;
pub mod server_harness;
pub mod test_ids;
pub mod token_builders;

// Re-export commonly used items
pub use assertions::*;
pub use capability_fixtures::*;
pub use mock_transport::*;
pub use server_harness::*;
pub use test_ids::*;
pub use token_builders::*;
