//! Operator tool for FHIR client credentials.
//!
//! Loads configuration from the environment, resolves the server's token
//! endpoint, acquires a token and optionally sends one authenticated request.

#![warn(clippy::pedantic)]

pub mod check;
pub mod config;

pub use check::{run, CheckError, CheckReport};
pub use config::{Config, ConfigError};
