//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The client secret is loaded from ANALYTICS_CLIENT_SECRET or
//! client_secret_file, never stored in the TOML directly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use analytics_auth::{
    ANALYTICS_READONLY_SCOPE, ClientIdentity, DEFAULT_AUTH_ENDPOINT, DEFAULT_REDIRECT_PORTS,
    DEFAULT_TOKEN_ENDPOINT,
};
use analytics_report::{DEFAULT_API_BASE, ReportRequest};
use common::Secret;
use serde::Deserialize;

/// Env var carrying the OAuth client secret
pub const CLIENT_SECRET_ENV: &str = "ANALYTICS_CLIENT_SECRET";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub client: ClientConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub consent: ConsentConfig,
    pub report: ReportConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// OAuth client registration
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// Path to a file containing the client secret (alternative to the env var)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    #[serde(default = "default_auth_endpoint")]
    pub auth_endpoint: String,
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,
    /// Loopback ports tried in order for the consent redirect; 0 lets the OS pick
    #[serde(default = "default_redirect_ports")]
    pub redirect_ports: Vec<u16>,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct ConsentConfig {
    /// Seconds to wait for the browser redirect; 0 waits indefinitely
    #[serde(default = "default_consent_timeout")]
    pub timeout_secs: u64,
}

/// Report to run when no other action is requested
#[derive(Debug, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    pub property_id: String,
    #[serde(default)]
    pub dimensions: Vec<String>,
    pub metrics: Vec<String>,
    #[serde(default = "default_start_date")]
    pub start_date: String,
    #[serde(default = "default_end_date")]
    pub end_date: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct MetricsConfig {
    /// Prometheus textfile written on exit
    #[serde(default)]
    pub textfile: Option<PathBuf>,
}

fn default_auth_endpoint() -> String {
    DEFAULT_AUTH_ENDPOINT.to_string()
}

fn default_token_endpoint() -> String {
    DEFAULT_TOKEN_ENDPOINT.to_string()
}

fn default_redirect_ports() -> Vec<u16> {
    DEFAULT_REDIRECT_PORTS.to_vec()
}

fn default_scopes() -> Vec<String> {
    vec![ANALYTICS_READONLY_SCOPE.to_string()]
}

fn default_store_path() -> PathBuf {
    PathBuf::from("analytics-token.json")
}

fn default_max_requests() -> usize {
    100
}

fn default_window_secs() -> u64 {
    60
}

fn default_consent_timeout() -> u64 {
    300
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_start_date() -> String {
    "7daysAgo".to_string()
}

fn default_end_date() -> String {
    "today".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

impl Default for ConsentConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_consent_timeout(),
        }
    }
}

fn require_http(field: &str, value: &str) -> common::Result<()> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(common::Error::Config(format!(
            "{field} must start with http:// or https://, got: {value}"
        )))
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Client secret resolution order:
    /// 1. ANALYTICS_CLIENT_SECRET env var
    /// 2. client_secret_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        if let Ok(secret) = std::env::var(CLIENT_SECRET_ENV) {
            config.client.client_secret = Some(Secret::new(secret));
        } else if let Some(ref secret_file) = config.client.client_secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read client_secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            let secret = secret.trim().to_owned();
            if !secret.is_empty() {
                config.client.client_secret = Some(Secret::new(secret));
            }
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if self.client.client_id.trim().is_empty() {
            return Err(common::Error::Config("client_id must not be empty".into()));
        }
        require_http("auth_endpoint", &self.client.auth_endpoint)?;
        require_http("token_endpoint", &self.client.token_endpoint)?;
        require_http("api_base", &self.report.api_base)?;

        if self.client.redirect_ports.is_empty() {
            return Err(common::Error::Config(
                "redirect_ports must not be empty".into(),
            ));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(common::Error::Config(
                "max_requests must be greater than 0".into(),
            ));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(common::Error::Config(
                "window_secs must be greater than 0".into(),
            ));
        }
        if self.report.property_id.trim().is_empty() {
            return Err(common::Error::Config("property_id must not be empty".into()));
        }
        if self.report.metrics.is_empty() {
            return Err(common::Error::Config(
                "report.metrics must list at least one metric".into(),
            ));
        }
        Ok(())
    }

    /// Client identity for the credential manager. Fails when no secret
    /// was resolved.
    pub fn identity(&self) -> common::Result<ClientIdentity> {
        let client_secret = self.client.client_secret.clone().ok_or_else(|| {
            common::Error::Config(format!(
                "client secret missing: set {CLIENT_SECRET_ENV} or client_secret_file"
            ))
        })?;
        Ok(ClientIdentity {
            client_id: self.client.client_id.clone(),
            client_secret,
            auth_endpoint: self.client.auth_endpoint.clone(),
            token_endpoint: self.client.token_endpoint.clone(),
            redirect_candidates: self.client.redirect_ports.clone(),
            scopes: self.client.scopes.clone(),
        })
    }

    pub fn consent_timeout(&self) -> Option<Duration> {
        match self.consent.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit.window_secs)
    }

    /// The configured report as a request.
    pub fn report_request(&self) -> ReportRequest {
        let mut request = ReportRequest::new(&self.report.property_id)
            .date_range(&self.report.start_date, &self.report.end_date);
        request.dimensions = self.report.dimensions.clone();
        request.metrics = self.report.metrics.clone();
        request
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("analytics-report.toml")
    }
}
