//! Configuration types.
//!
//! Everything is read from the environment once at startup. Missing gateway
//! secrets are not fatal: the relay starts in an unconfigured state and
//! reports which secrets are absent.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

pub const ENV_ACCESS_TOKEN: &str = "WHATSAPP_ACCESS_TOKEN";
pub const ENV_PHONE_NUMBER_ID: &str = "WHATSAPP_PHONE_NUMBER_ID";
pub const ENV_VERIFY_TOKEN: &str = "WHATSAPP_VERIFY_TOKEN";

const DEFAULT_API_BASE: &str = "https://graph.facebook.com";
const DEFAULT_API_VERSION: &str = "v18.0";
const DEFAULT_LANGUAGE: &str = "en_US";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DB_PATH: &str = "./data/whatsapp-relay.db";

/// Messaging provider gateway settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bearer credential for the provider API.
    pub access_token: Option<SecretString>,
    /// Sender identifier (the business phone number id).
    pub phone_number_id: Option<String>,
    /// Token the provider echoes during the webhook handshake.
    pub verify_token: Option<SecretString>,
    pub api_base: String,
    pub api_version: String,
    pub request_timeout: Duration,
}

impl GatewayConfig {
    /// Names of the required secrets that are not set.
    pub fn missing(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if self.access_token.is_none() {
            missing.push(ENV_ACCESS_TOKEN.to_string());
        }
        if self.phone_number_id.is_none() {
            missing.push(ENV_PHONE_NUMBER_ID.to_string());
        }
        if self.verify_token.is_none() {
            missing.push(ENV_VERIFY_TOKEN.to_string());
        }
        missing
    }

    pub fn is_configured(&self) -> bool {
        self.missing().is_empty()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            phone_number_id: None,
            verify_token: None,
            api_base: DEFAULT_API_BASE.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Full relay configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    /// HTTP + WebSocket listen port.
    pub port: u16,
    /// libSQL database file.
    pub db_path: PathBuf,
    /// Optional JSON rule table; overrides persisted rules when set.
    pub rules_path: Option<PathBuf>,
    /// Language code used when a template request omits one.
    pub default_language: String,
    /// How long a message lifecycle stays tracked after its last update.
    pub status_retention: Duration,
    /// Optional directory for rolling log files.
    pub log_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            port: DEFAULT_PORT,
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            rules_path: None,
            default_language: DEFAULT_LANGUAGE.to_string(),
            status_retention: Duration::from_secs(86_400),
            log_dir: None,
        }
    }
}

impl AppConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup.
    ///
    /// Blank values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let gateway = GatewayConfig {
            access_token: get(ENV_ACCESS_TOKEN).map(SecretString::from),
            phone_number_id: get(ENV_PHONE_NUMBER_ID),
            verify_token: get(ENV_VERIFY_TOKEN).map(SecretString::from),
            api_base: get("WHATSAPP_API_BASE")
                .map(|b| b.trim_end_matches('/').to_string())
                .unwrap_or(defaults.gateway.api_base),
            api_version: get("WHATSAPP_API_VERSION").unwrap_or(defaults.gateway.api_version),
            request_timeout: match get("WHATSAPP_TIMEOUT_SECS") {
                Some(raw) => Duration::from_secs(parse_number("WHATSAPP_TIMEOUT_SECS", &raw)?),
                None => defaults.gateway.request_timeout,
            },
        };

        let port = match get("RELAY_PORT") {
            Some(raw) => parse_number("RELAY_PORT", &raw)?,
            None => defaults.port,
        };

        let status_retention = match get("RELAY_STATUS_RETENTION_SECS") {
            Some(raw) => Duration::from_secs(parse_number("RELAY_STATUS_RETENTION_SECS", &raw)?),
            None => defaults.status_retention,
        };

        Ok(Self {
            gateway,
            port,
            db_path: get("RELAY_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            rules_path: get("RELAY_RULES_PATH").map(PathBuf::from),
            default_language: get("RELAY_DEFAULT_LANGUAGE").unwrap_or(defaults.default_language),
            status_retention,
            log_dir: get("RELAY_LOG_DIR").map(PathBuf::from),
        })
    }
}

fn parse_number<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{raw:?}: {e}"),
    })
}
