//! Operator tool configuration.
//!
//! Configuration is loaded from environment variables. The client secret is
//! redacted in Debug output.

use fhir_auth::secret::SecretString;
use fhir_auth::{ClientCredentials, HeaderNameValue, HttpSettings, Url};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default application label.
pub const DEFAULT_APPLICATION: &str = "fhir-auth-check";

/// Default transport timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 10;

/// Operator tool configuration.
#[derive(Clone)]
pub struct Config {
    /// FHIR server base URL.
    pub server_url: Url,

    /// OAuth client id.
    pub client_id: String,

    /// OAuth client secret.
    /// Protected by `SecretString` to prevent accidental logging.
    pub client_secret: SecretString,

    /// Scope URI; the token request `resource` is derived from it.
    pub scope: String,

    /// Application label used in logs (default: "fhir-auth-check").
    pub application: String,

    /// Token URL override; skips discovery when set.
    pub token_url: Option<Url>,

    /// Static headers sent with every authenticated request.
    pub static_headers: Vec<HeaderNameValue>,

    /// Whether to send the Azure API for FHIR token request fields.
    pub azure_token_fields: bool,

    /// Transport timeout (default: 10s).
    pub http_timeout: Duration,

    /// Relative path to GET through the handler after validation.
    pub probe_path: Option<String>,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<&str> = self.static_headers.iter().map(|h| h.name.as_str()).collect();
        f.debug_struct("Config")
            .field("server_url", &self.server_url.as_str())
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("scope", &self.scope)
            .field("application", &self.application)
            .field("token_url", &self.token_url.as_ref().map(Url::as_str))
            .field("static_headers", &header_names)
            .field("azure_token_fields", &self.azure_token_fields)
            .field("http_timeout", &self.http_timeout)
            .field("probe_path", &self.probe_path)
            .finish()
    }
}

/// Errors loading [`Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is unset or blank.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// A variable is set but cannot be parsed.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

fn required<'a>(vars: &'a HashMap<String, String>, name: &str) -> Result<&'a str, ConfigError> {
    vars.get(name)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn parse_url(name: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidValue(format!("{name}: {e}")))
}

/// Parse `Name: value` pairs separated by `;`.
fn parse_headers(value: &str) -> Result<Vec<HeaderNameValue>, ConfigError> {
    value
        .split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once(':').ok_or_else(|| {
                ConfigError::InvalidValue(format!(
                    "FHIR_STATIC_HEADERS: expected 'Name: value', got '{pair}'"
                ))
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(ConfigError::InvalidValue(
                    "FHIR_STATIC_HEADERS: empty header name".to_string(),
                ));
            }
            Ok(HeaderNameValue::new(name, value.trim()))
        })
        .collect()
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_vars`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// - `ConfigError::MissingEnvVar` if `FHIR_SERVER_URL`, `FHIR_CLIENT_ID`,
    ///   `FHIR_CLIENT_SECRET` or `FHIR_SCOPE` is unset or blank
    /// - `ConfigError::InvalidValue` if a URL, header list, timeout or flag
    ///   cannot be parsed, or the scope has no usable resource
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let server_url = parse_url("FHIR_SERVER_URL", required(vars, "FHIR_SERVER_URL")?)?;
        let client_id = required(vars, "FHIR_CLIENT_ID")?.to_string();
        let client_secret = SecretString::from(required(vars, "FHIR_CLIENT_SECRET")?.to_string());
        let scope = required(vars, "FHIR_SCOPE")?.to_string();

        let application = vars
            .get("FHIR_APPLICATION")
            .cloned()
            .unwrap_or_else(|| DEFAULT_APPLICATION.to_string());

        let token_url = vars
            .get("FHIR_TOKEN_URL")
            .filter(|v| !v.trim().is_empty())
            .map(|v| parse_url("FHIR_TOKEN_URL", v))
            .transpose()?;

        let static_headers = vars
            .get("FHIR_STATIC_HEADERS")
            .map(|v| parse_headers(v))
            .transpose()?
            .unwrap_or_default();

        let azure_token_fields = match vars.get("FHIR_AZURE_TOKEN_FIELDS") {
            Some(v) => v.parse().map_err(|_| {
                ConfigError::InvalidValue(format!(
                    "FHIR_AZURE_TOKEN_FIELDS: expected true or false, got '{v}'"
                ))
            })?,
            None => false,
        };

        let http_timeout_seconds: u64 = match vars.get("FHIR_HTTP_TIMEOUT_SECONDS") {
            Some(v) => v.parse().map_err(|e| {
                ConfigError::InvalidValue(format!("FHIR_HTTP_TIMEOUT_SECONDS: {e}"))
            })?,
            None => DEFAULT_HTTP_TIMEOUT_SECONDS,
        };
        if http_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "FHIR_HTTP_TIMEOUT_SECONDS must be greater than 0".to_string(),
            ));
        }

        let probe_path = vars
            .get("FHIR_PROBE_PATH")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let config = Config {
            server_url,
            client_id,
            client_secret,
            scope,
            application,
            token_url,
            static_headers,
            azure_token_fields,
            http_timeout: Duration::from_secs(http_timeout_seconds),
            probe_path,
        };

        // Fail early on a scope the token request could not use
        config
            .credentials()
            .resource()
            .map_err(|e| ConfigError::InvalidValue(format!("FHIR_SCOPE: {e}")))?;

        Ok(config)
    }

    /// Client credentials described by this configuration.
    #[must_use]
    pub fn credentials(&self) -> ClientCredentials {
        let mut credentials = ClientCredentials::new(
            self.application.clone(),
            self.client_id.clone(),
            self.client_secret.clone(),
            self.server_url.clone(),
            self.scope.clone(),
        );
        for header in &self.static_headers {
            credentials = credentials.with_header(header.name.clone(), header.value.clone());
        }
        if let Some(token_url) = &self.token_url {
            credentials = credentials.with_token_url(token_url.clone());
        }
        if self.azure_token_fields {
            credentials = credentials.with_azure_token_fields();
        }
        credentials
    }

    /// HTTP settings for discovery and the handler.
    #[must_use]
    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings::default().with_timeout(self.http_timeout)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use fhir_auth::secret::ExposeSecret;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            (
                "FHIR_SERVER_URL".to_string(),
                "https://fhir.example.com/r4".to_string(),
            ),
            ("FHIR_CLIENT_ID".to_string(), "loader".to_string()),
            ("FHIR_CLIENT_SECRET".to_string(), "s3cr3t".to_string()),
            (
                "FHIR_SCOPE".to_string(),
                "https://fhir.example.com/.default".to_string(),
            ),
        ])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&base_vars()).expect("Config should load successfully");

        assert_eq!(config.server_url.as_str(), "https://fhir.example.com/r4");
        assert_eq!(config.client_id, "loader");
        assert_eq!(config.client_secret.expose_secret(), "s3cr3t");
        assert_eq!(config.application, DEFAULT_APPLICATION);
        assert!(config.token_url.is_none());
        assert!(config.static_headers.is_empty());
        assert!(!config.azure_token_fields);
        assert_eq!(
            config.http_timeout,
            Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECONDS)
        );
        assert!(config.probe_path.is_none());
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = base_vars();
        vars.insert("FHIR_APPLICATION".to_string(), "nightly-export".to_string());
        vars.insert(
            "FHIR_TOKEN_URL".to_string(),
            "https://login.example.com/token".to_string(),
        );
        vars.insert(
            "FHIR_STATIC_HEADERS".to_string(),
            "x-tenant: contoso; Prefer: return=minimal;".to_string(),
        );
        vars.insert("FHIR_AZURE_TOKEN_FIELDS".to_string(), "true".to_string());
        vars.insert("FHIR_HTTP_TIMEOUT_SECONDS".to_string(), "30".to_string());
        vars.insert("FHIR_PROBE_PATH".to_string(), "Patient?_count=1".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.application, "nightly-export");
        assert_eq!(
            config.token_url.unwrap().as_str(),
            "https://login.example.com/token"
        );
        assert_eq!(
            config.static_headers,
            vec![
                HeaderNameValue::new("x-tenant", "contoso"),
                HeaderNameValue::new("Prefer", "return=minimal"),
            ]
        );
        assert!(config.azure_token_fields);
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert_eq!(config.probe_path.as_deref(), Some("Patient?_count=1"));
    }

    #[test]
    fn test_from_vars_missing_required() {
        for name in [
            "FHIR_SERVER_URL",
            "FHIR_CLIENT_ID",
            "FHIR_CLIENT_SECRET",
            "FHIR_SCOPE",
        ] {
            let mut vars = base_vars();
            vars.remove(name);

            let result = Config::from_vars(&vars);
            assert!(
                matches!(result, Err(ConfigError::MissingEnvVar(ref v)) if v == name),
                "expected MissingEnvVar({name})"
            );
        }
    }

    #[test]
    fn test_from_vars_invalid_server_url() {
        let mut vars = base_vars();
        vars.insert("FHIR_SERVER_URL".to_string(), "not a url".to_string());

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_from_vars_invalid_scope() {
        let mut vars = base_vars();
        vars.insert("FHIR_SCOPE".to_string(), "system/*.read".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(ref msg)) if msg.contains("FHIR_SCOPE")));
    }

    #[test]
    fn test_from_vars_invalid_timeout() {
        let mut vars = base_vars();
        vars.insert("FHIR_HTTP_TIMEOUT_SECONDS".to_string(), "0".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));

        vars.insert("FHIR_HTTP_TIMEOUT_SECONDS".to_string(), "ten".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_from_vars_invalid_headers() {
        let mut vars = base_vars();
        vars.insert("FHIR_STATIC_HEADERS".to_string(), "no-colon-here".to_string());

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_credentials_carry_options() {
        let mut vars = base_vars();
        vars.insert("FHIR_STATIC_HEADERS".to_string(), "x-tenant: contoso".to_string());
        vars.insert("FHIR_AZURE_TOKEN_FIELDS".to_string(), "true".to_string());
        let config = Config::from_vars(&vars).unwrap();

        let credentials = config.credentials();

        assert_eq!(credentials.application(), DEFAULT_APPLICATION);
        assert_eq!(credentials.header_values().len(), 1);
        assert_eq!(credentials.token_request_fields().len(), 2);
        assert_eq!(credentials.resource().unwrap(), "https://fhir.example.com");
    }

    #[test]
    fn test_debug_redacts_sensitive_fields() {
        let config = Config::from_vars(&base_vars()).unwrap();
        let debug_str = format!("{config:?}");

        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("s3cr3t"));
    }
}
