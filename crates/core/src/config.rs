//! Configuration management for the blogx API gateway

use crate::CoreResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable prefix, e.g. `BLOGX_BASE_URL` or `BLOGX_CSRF__HEADER_NAME`
pub const ENV_PREFIX: &str = "BLOGX";

/// Main gateway configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL every request path is resolved against
    pub base_url: String,

    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,

    /// Seconds before `access_expiry` at which a token is treated as expired
    pub refresh_skew_secs: u64,

    /// Access token lifetime assumed when the server reports no expiry
    pub default_access_ttl_secs: u64,

    /// Tear the session down after this many idle seconds
    #[serde(default)]
    pub session_idle_timeout_secs: Option<u64>,

    /// Where the navigation facility is sent when the session ends
    pub login_redirect_path: String,

    /// Storage key the credential is persisted under
    pub storage_key: String,

    /// User agent sent with every request
    pub user_agent: String,

    /// Authentication endpoints
    pub endpoints: AuthEndpoints,

    /// Anti-forgery token settings
    pub csrf: CsrfConfig,
}

/// Paths of the authentication endpoints, relative to `base_url`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthEndpoints {
    pub login: String,
    pub refresh: String,
    pub logout: String,
}

/// Anti-forgery token settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrfConfig {
    /// Cookie the token is read from
    pub cookie_name: String,

    /// Header the token is sent in on mutating requests
    pub header_name: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/".to_string(),
            request_timeout_ms: 10_000,
            refresh_skew_secs: 30,
            default_access_ttl_secs: 300,
            session_idle_timeout_secs: None,
            login_redirect_path: "/login".to_string(),
            storage_key: "blogx.credential".to_string(),
            user_agent: format!("blogx-client/{}", env!("CARGO_PKG_VERSION")),
            endpoints: AuthEndpoints::default(),
            csrf: CsrfConfig::default(),
        }
    }
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            login: "auth/token/".to_string(),
            refresh: "auth/token/refresh/".to_string(),
            logout: "auth/logout/".to_string(),
        }
    }
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            cookie_name: "csrftoken".to_string(),
            header_name: "X-CSRFToken".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from file, overlaid with `BLOGX_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be read or parsed
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> CoreResult<Self> {
        let settings = Self::with_defaults(config::Config::builder())?
            .add_source(config::File::from(path.as_ref()))
            .add_source(Self::environment())
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Load configuration with defaults and environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables cannot be parsed
    pub fn from_env() -> CoreResult<Self> {
        let settings = Self::with_defaults(config::Config::builder())?
            .add_source(Self::environment())
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
    }

    fn with_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> CoreResult<config::ConfigBuilder<config::builder::DefaultState>> {
        let defaults = Self::default();

        Ok(builder
            .set_default("base_url", defaults.base_url)?
            .set_default("request_timeout_ms", defaults.request_timeout_ms)?
            .set_default("refresh_skew_secs", defaults.refresh_skew_secs)?
            .set_default("default_access_ttl_secs", defaults.default_access_ttl_secs)?
            .set_default("login_redirect_path", defaults.login_redirect_path)?
            .set_default("storage_key", defaults.storage_key)?
            .set_default("user_agent", defaults.user_agent)?
            .set_default("endpoints.login", defaults.endpoints.login)?
            .set_default("endpoints.refresh", defaults.endpoints.refresh)?
            .set_default("endpoints.logout", defaults.endpoints.logout)?
            .set_default("csrf.cookie_name", defaults.csrf.cookie_name)?
            .set_default("csrf.header_name", defaults.csrf.header_name)?)
    }

    /// Per-request timeout
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Expiry skew as a signed duration
    pub fn refresh_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.refresh_skew_secs).unwrap_or(i64::MAX))
    }

    /// Assumed access token lifetime
    pub fn default_access_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.default_access_ttl_secs).unwrap_or(i64::MAX))
    }

    /// Idle timeout, if enabled
    pub fn session_idle_timeout(&self) -> Option<chrono::Duration> {
        self.session_idle_timeout_secs
            .map(|secs| chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX)))
    }
}
