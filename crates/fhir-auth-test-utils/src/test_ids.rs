//! Fixed test identities for deterministic tests
//!
//! Every fixture uses these values so assertions can match request bodies
//! without threading configuration through each test.

// Applications
pub const TEST_APPLICATION: &str = "fhir-loader-test";
pub const TEST_APPLICATION_2: &str = "fhir-export-test";

// Client IDs
pub const TEST_CLIENT_ID: &str = "fhir-test-client";
pub const TEST_CLIENT_ID_2: &str = "fhir-test-client-2";

// Test secrets
pub const TEST_CLIENT_SECRET: &str = "test-secret-do-not-use-in-production";

// Scopes and the resource derived from them
pub const TEST_SCOPE: &str = "https://fhir.test.example.com/.default";
pub const TEST_RESOURCE: &str = "https://fhir.test.example.com";

// HMAC key for minted test tokens
pub const TEST_SIGNING_SECRET: &[u8] = b"fhir-auth-test-signing-secret";

// Capability statement extension URL
pub const OAUTH_URIS_EXTENSION: &str =
    "http://fhir-registry.smarthealthit.org/StructureDefinition/oauth-uris";
