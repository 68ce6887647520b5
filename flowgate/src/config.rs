//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `FLOWGATE_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `FLOWGATE_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `FLOWGATE_COOKIES__DOMAIN=dev.flowssync.com` sets the `cookies.domain` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use flowgate::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Guard will bind to {}", config.bind_address());
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port` - HTTP server binding configuration
//! - **Upstream**: `upstream.url` - page server that receives gated requests
//! - **Auth API**: `auth_api.base_url` and endpoint paths - identity lookup and token reissue
//! - **Cookies**: `cookies.*` - names, domain, attributes and lifetimes of the session cookies
//! - **Paths**: `paths.*` - bypass and admin-restricted path rules
//! - **Refresh**: `refresh.*` - coalescing of concurrent refresh exchanges
//! - **Features**: `enable_metrics`, `enable_otel_export` - Optional feature toggles
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! FLOWGATE_PORT=8080
//! FLOWGATE_AUTH_API__BASE_URL="https://api.flowssync.com"
//! FLOWGATE_COOKIES__SECURE=false
//! FLOWGATE_ENABLE_METRICS=true
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use url::Url;

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "FLOWGATE_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have defaults, so an empty config file yields a guard for `flowssync.com` that
/// forwards to a page server on `localhost:3000`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Page server that renders the dashboard
    pub upstream: UpstreamConfig,
    /// Backend service that resolves identities and reissues tokens
    pub auth_api: AuthApiConfig,
    /// Session cookie configuration
    pub cookies: CookieConfig,
    /// Path classification rules
    pub paths: PathConfig,
    /// Refresh exchange coalescing
    pub refresh: RefreshConfig,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

/// Upstream page server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Base URL of the page server
    pub url: Url,
    /// Connect timeout, and the longest wait for the next chunk of a forwarded response
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Largest request body that will be buffered and forwarded
    pub max_body_bytes: usize,
}

/// Identity and token service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthApiConfig {
    /// Base URL of the backend API
    pub base_url: Url,
    /// Path of the identity lookup endpoint (GET, access token as cookie)
    pub user_info_path: String,
    /// Path of the token reissue endpoint (POST, refresh token as cookie)
    pub reissue_path: String,
    /// Path of the backend logout endpoint (POST, access token as cookie)
    pub logout_path: String,
    /// Request timeout for every call to the backend
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

/// SameSite cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SameSite::Strict => write!(f, "Strict"),
            SameSite::Lax => write!(f, "Lax"),
            SameSite::None => write!(f, "None"),
        }
    }
}

/// Session cookie configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CookieConfig {
    /// Cookie name for the access token
    pub access_name: String,
    /// Cookie name for the refresh token
    pub refresh_name: String,
    /// Domain attribute; omitted from `Set-Cookie` when unset
    pub domain: Option<String>,
    /// Set Secure flag on cookies (HTTPS only)
    pub secure: bool,
    /// SameSite cookie attribute
    pub same_site: SameSite,
    /// Lifetime of a freshly minted access cookie
    #[serde(with = "humantime_serde")]
    pub access_max_age: Duration,
    /// Lifetime of a freshly minted refresh cookie
    #[serde(with = "humantime_serde")]
    pub refresh_max_age: Duration,
}

/// Path classification rules.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathConfig {
    /// Prefixes that are never guarded (framework assets, static files)
    pub bypass_prefixes: Vec<String>,
    /// Exact paths that are never guarded
    pub bypass_exact: Vec<String>,
    /// Prefixes that require the ADMIN role
    pub admin_prefixes: Vec<String>,
    /// Where unauthenticated callers are sent
    pub login_path: String,
    /// Where callers lacking a role are sent
    pub home_path: String,
}

/// Coalescing of concurrent refresh exchanges for the same refresh token.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RefreshConfig {
    /// How long a successful exchange is shared with later callers presenting the same token
    #[serde(with = "humantime_serde")]
    pub coalesce_window: Duration,
    /// Upper bound on remembered exchanges
    pub max_entries: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            upstream: UpstreamConfig::default(),
            auth_api: AuthApiConfig::default(),
            cookies: CookieConfig::default(),
            paths: PathConfig::default(),
            refresh: RefreshConfig::default(),
            enable_metrics: true,
            enable_otel_export: false,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: Url::parse("http://localhost:3000").unwrap(),
            timeout: Duration::from_secs(30),
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Default for AuthApiConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("http://localhost:8080").unwrap(),
            user_info_path: "/auth/user-info".to_string(),
            reissue_path: "/auth/reissue".to_string(),
            logout_path: "/logout".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            access_name: "access".to_string(),
            refresh_name: "refresh".to_string(),
            domain: Some("flowssync.com".to_string()),
            secure: true,
            same_site: SameSite::None,
            access_max_age: Duration::from_secs(30 * 60),     // 30 minutes
            refresh_max_age: Duration::from_secs(24 * 60 * 60), // 24 hours
        }
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            bypass_prefixes: vec!["/_next/".to_string(), "/static/".to_string()],
            bypass_exact: vec!["/favicon.ico".to_string(), "/robots.txt".to_string(), "/login".to_string()],
            admin_prefixes: vec!["/admin".to_string()],
            login_path: "/login".to_string(),
            home_path: "/".to_string(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            coalesce_window: Duration::from_secs(10),
            max_entries: 10_000,
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        let cookies = &self.cookies;
        if cookies.access_name.is_empty() || cookies.refresh_name.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: cookie names cannot be empty".to_string(),
            });
        }

        if cookies.access_name == cookies.refresh_name {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: access and refresh cookies must have different names (both are '{}')",
                    cookies.access_name
                ),
            });
        }

        if cookies.access_max_age.is_zero() || cookies.refresh_max_age.is_zero() {
            return Err(Error::Internal {
                operation: "Config validation: cookie lifetimes must be positive".to_string(),
            });
        }

        if cookies.refresh_max_age < cookies.access_max_age {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: refresh_max_age ({:?}) cannot be shorter than access_max_age ({:?})",
                    cookies.refresh_max_age, cookies.access_max_age
                ),
            });
        }

        // Browsers drop SameSite=None cookies that are not Secure
        if cookies.same_site == SameSite::None && !cookies.secure {
            return Err(Error::Internal {
                operation: "Config validation: SameSite=None requires secure cookies".to_string(),
            });
        }

        for (name, path) in [("login_path", &self.paths.login_path), ("home_path", &self.paths.home_path)] {
            if !path.starts_with('/') {
                return Err(Error::Internal {
                    operation: format!("Config validation: {name} must start with '/' (got '{path}')"),
                });
            }
        }

        if self.paths.admin_prefixes.iter().any(|p| p.is_empty()) {
            return Err(Error::Internal {
                operation: "Config validation: admin_prefixes cannot contain an empty prefix".to_string(),
            });
        }

        if self.auth_api.timeout.is_zero() || self.upstream.timeout.is_zero() {
            return Err(Error::Internal {
                operation: "Config validation: request timeouts must be positive".to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            // (FLOWGATE_CONFIG names the file itself and is consumed by clap)
            .merge(Env::prefixed("FLOWGATE_").ignore(&["config"]).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
