//! Client configuration structs
//!
//! Loads configuration from environment variables (and an optional `.env` file).

use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub app: AppSettings,
    pub api: ApiConfig,
    pub gateway: GatewayConfig,
    pub rate_limit: RateLimitConfig,
    pub reconnect: ReconnectConfig,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub env: Environment,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "production" => Some(Self::Production),
            "staging" => Some(Self::Staging),
            "development" => Some(Self::Development),
            _ => None,
        }
    }
}

/// REST API settings used to locate the gateway
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    /// Fixed gateway URL; when set the REST lookup is skipped
    #[serde(default)]
    pub gateway_url: Option<String>,
}

/// Gateway handshake and buffering settings
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u8,
    #[serde(default = "default_large_threshold")]
    pub large_threshold: u32,
    #[serde(default)]
    pub compress: bool,
    pub properties: ConnectionProperties,
    /// Capacity of the decoded-event channel feeding subscribers
    #[serde(default = "default_dispatch_buffer")]
    pub dispatch_buffer: usize,
    /// Capacity of the raw transport event channel
    #[serde(default = "default_transport_buffer")]
    pub transport_buffer: usize,
}

/// Client properties reported in Identify
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ConnectionProperties {
    pub os: String,
    pub browser: String,
    #[serde(default)]
    pub referrer: String,
    #[serde(default)]
    pub referring_domain: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            os: default_os(),
            browser: default_browser(),
            referrer: String::new(),
            referring_domain: String::new(),
        }
    }
}

/// Outbound gateway send budget
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_charges")]
    pub max_charges: usize,
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
}

impl RateLimitConfig {
    #[must_use]
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// Backoff applied before re-identifying after an invalid session
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_backoff_min_ms")]
    pub invalid_session_backoff_min_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub invalid_session_backoff_max_ms: u64,
}

// Default value functions
fn default_app_name() -> String {
    "chat-gateway-client".to_string()
}

fn default_env() -> Environment {
    Environment::Development
}

fn default_api_base_url() -> String {
    "https://discordapp.com/api".to_string()
}

fn default_protocol_version() -> u8 {
    6
}

fn default_large_threshold() -> u32 {
    250
}

fn default_os() -> String {
    env::consts::OS.to_string()
}

fn default_browser() -> String {
    "chat-gateway-client".to_string()
}

fn default_dispatch_buffer() -> usize {
    1024
}

fn default_transport_buffer() -> usize {
    256
}

fn default_max_charges() -> usize {
    120
}

fn default_period_ms() -> u64 {
    60_000
}

fn default_backoff_min_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    5_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            app: AppSettings {
                name: default_app_name(),
                env: default_env(),
            },
            api: ApiConfig {
                base_url: default_api_base_url(),
                gateway_url: None,
            },
            gateway: GatewayConfig {
                protocol_version: default_protocol_version(),
                large_threshold: default_large_threshold(),
                compress: false,
                properties: ConnectionProperties::default(),
                dispatch_buffer: default_dispatch_buffer(),
                transport_buffer: default_transport_buffer(),
            },
            rate_limit: RateLimitConfig {
                max_charges: default_max_charges(),
                period_ms: default_period_ms(),
            },
            reconnect: ReconnectConfig {
                invalid_session_backoff_min_ms: default_backoff_min_ms(),
                invalid_session_backoff_max_ms: default_backoff_max_ms(),
            },
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if a variable is present but cannot be parsed
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    ///
    /// Every key is optional; absent keys fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: String| lookup(key).unwrap_or(default);

        let config = Self {
            app: AppSettings {
                name: text("APP_NAME", default_app_name()),
                env: match lookup("APP_ENV") {
                    Some(raw) => Environment::parse(&raw)
                        .ok_or(ConfigError::InvalidValue("APP_ENV", raw))?,
                    None => default_env(),
                },
            },
            api: ApiConfig {
                base_url: text("API_BASE_URL", default_api_base_url()),
                gateway_url: lookup("GATEWAY_URL").filter(|url| !url.trim().is_empty()),
            },
            gateway: GatewayConfig {
                protocol_version: parse_var(
                    &lookup,
                    "GATEWAY_PROTOCOL_VERSION",
                    default_protocol_version,
                )?,
                large_threshold: parse_var(
                    &lookup,
                    "GATEWAY_LARGE_THRESHOLD",
                    default_large_threshold,
                )?,
                compress: parse_var(&lookup, "GATEWAY_COMPRESS", || false)?,
                properties: ConnectionProperties {
                    os: text("GATEWAY_CLIENT_OS", default_os()),
                    browser: text("GATEWAY_CLIENT_BROWSER", default_browser()),
                    referrer: text("GATEWAY_CLIENT_REFERRER", String::new()),
                    referring_domain: text("GATEWAY_CLIENT_REFERRING_DOMAIN", String::new()),
                },
                dispatch_buffer: parse_var(
                    &lookup,
                    "GATEWAY_DISPATCH_BUFFER",
                    default_dispatch_buffer,
                )?,
                transport_buffer: parse_var(
                    &lookup,
                    "GATEWAY_TRANSPORT_BUFFER",
                    default_transport_buffer,
                )?,
            },
            rate_limit: RateLimitConfig {
                max_charges: parse_var(&lookup, "GATEWAY_RATE_LIMIT_CHARGES", default_max_charges)?,
                period_ms: parse_var(&lookup, "GATEWAY_RATE_LIMIT_PERIOD_MS", default_period_ms)?,
            },
            reconnect: ReconnectConfig {
                invalid_session_backoff_min_ms: parse_var(
                    &lookup,
                    "GATEWAY_INVALID_SESSION_BACKOFF_MIN_MS",
                    default_backoff_min_ms,
                )?,
                invalid_session_backoff_max_ms: parse_var(
                    &lookup,
                    "GATEWAY_INVALID_SESSION_BACKOFF_MAX_MS",
                    default_backoff_max_ms,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit.max_charges == 0 {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_RATE_LIMIT_CHARGES",
                "must be at least 1".to_string(),
            ));
        }
        if self.gateway.dispatch_buffer == 0 || self.gateway.transport_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_DISPATCH_BUFFER",
                "channel capacities must be at least 1".to_string(),
            ));
        }
        if self.reconnect.invalid_session_backoff_min_ms
            > self.reconnect.invalid_session_backoff_max_ms
        {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_INVALID_SESSION_BACKOFF_MIN_MS",
                format!(
                    "{} exceeds maximum {}",
                    self.reconnect.invalid_session_backoff_min_ms,
                    self.reconnect.invalid_session_backoff_max_ms
                ),
            ));
        }
        Ok(())
    }
}

fn parse_var<T, F, D>(lookup: &F, key: &'static str, default: D) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
    D: FnOnce() -> T,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key, raw)),
        None => Ok(default()),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
