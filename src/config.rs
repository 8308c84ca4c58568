//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::{net::IpAddr, path::PathBuf, time::Duration};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub admin: AdminConfig,
    pub federation: FederationConfig,
    pub timeline: TimelineConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "social.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://social.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }

    /// Actor URI of a local user
    pub fn actor_uri(&self, username: &str) -> String {
        format!("{}/users/{}", self.base_url(), username)
    }

    /// Local username if `actor_uri` names an actor on this instance
    pub fn local_username<'a>(&self, actor_uri: &'a str) -> Option<&'a str> {
        let prefix = format!("{}/users/", self.base_url());
        let rest = actor_uri.strip_prefix(prefix.as_str())?;
        let username = rest.trim_end_matches('/');
        (!username.is_empty() && !username.contains('/')).then_some(username)
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Bootstrap account created on first start
#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    /// Admin username (default: "admin")
    #[serde(default = "default_admin_username")]
    pub username: String,
    /// Admin display name (default: "Admin")
    #[serde(default = "default_admin_display_name")]
    pub display_name: String,
    /// Admin bio
    pub summary: Option<String>,
    /// RSA modulus size for generated account keys
    #[serde(default = "default_key_bits")]
    pub key_bits: usize,
}

fn default_admin_username() -> String {
    "admin".to_string()
}

fn default_admin_display_name() -> String {
    "Admin".to_string()
}

fn default_key_bits() -> usize {
    2048
}

/// Federation behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Accept inbound activities without checking HTTP signatures.
    ///
    /// Only honoured for local development domains.
    #[serde(default)]
    pub skip_signature_verification: bool,
    /// Use plain http for discovery and allow loopback/private peers.
    ///
    /// Only honoured for local development domains.
    #[serde(default)]
    pub insecure_transport: bool,
    /// Timeout for each outbound request, in seconds
    pub fetch_timeout_secs: u64,
    /// Maximum number of remote outboxes fetched at once
    pub max_concurrent_fetches: usize,
    /// Allowed clock skew on the signed Date header, in seconds
    pub max_date_skew_secs: i64,
    /// User-Agent sent with every outbound request
    pub user_agent: String,
}

impl FederationConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Scheme used for WebFinger discovery
    pub fn discovery_scheme(&self) -> &'static str {
        if self.insecure_transport { "http" } else { "https" }
    }
}

/// Timeline limits
#[derive(Debug, Clone, Deserialize)]
pub struct TimelineConfig {
    /// Posts returned by the local timeline
    pub local_limit: i64,
    /// Local posts considered when building a following timeline
    pub following_local_limit: i64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (AERVYN__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.domain", "localhost")?
            .set_default("server.protocol", "http")?
            .set_default("database.path", "data/aervyn.db")?
            .set_default("admin.key_bits", 2048)?
            .set_default("federation.skip_signature_verification", false)?
            .set_default("federation.insecure_transport", false)?
            .set_default("federation.fetch_timeout_secs", 10)?
            .set_default("federation.max_concurrent_fetches", 8)?
            .set_default("federation.max_date_skew_secs", 300)?
            .set_default(
                "federation.user_agent",
                format!("Aervyn/{}", env!("CARGO_PKG_VERSION")),
            )?
            .set_default("timeline.local_limit", 50)?
            .set_default("timeline.following_local_limit", 200)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (AERVYN__*)
            .add_source(
                Environment::with_prefix("AERVYN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn is_local_deployment(&self) -> bool {
        is_local_server_domain(&self.server.domain)
    }

    pub(crate) fn validate(&self) -> Result<(), crate::error::AppError> {
        use crate::error::AppError;

        let local = self.is_local_deployment();

        if self.federation.skip_signature_verification {
            if !local {
                return Err(AppError::Config(
                    "federation.skip_signature_verification is only allowed for local server domains"
                        .to_string(),
                ));
            }
            tracing::warn!("Inbound signature verification is DISABLED");
        }

        if self.federation.insecure_transport {
            if !local {
                return Err(AppError::Config(
                    "federation.insecure_transport is only allowed for local server domains"
                        .to_string(),
                ));
            }
            tracing::warn!("Federation is using insecure transport for local development");
        }

        if !local && !self.server.protocol.eq_ignore_ascii_case("https") {
            return Err(AppError::Config(
                "server.protocol must be https for non-local server domains".to_string(),
            ));
        }

        if self.federation.fetch_timeout_secs == 0 {
            return Err(AppError::Config(
                "federation.fetch_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.federation.max_concurrent_fetches == 0 {
            return Err(AppError::Config(
                "federation.max_concurrent_fetches must be greater than 0".to_string(),
            ));
        }

        if self.timeline.local_limit <= 0 || self.timeline.following_local_limit <= 0 {
            return Err(AppError::Config(
                "timeline limits must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn normalized_server_host(domain: &str) -> String {
    let trimmed = domain.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

fn is_local_server_domain(domain: &str) -> bool {
    let host = normalized_server_host(domain);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}
