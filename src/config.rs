use secrecy::{ExposeSecret, SecretBox};
use std::env;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5000";
pub const DEFAULT_LOCALE: &str = "en";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RESPONSE_TIMEOUT_SECS: u64 = 90;
const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;
const DEFAULT_MAX_POLL_FAILURES: u32 = 3;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue { var: String, reason: String },
    #[error("Invalid server URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Environment error: {0}")]
    EnvError(#[from] env::VarError),
}

/// Connection settings for the reasoning service
#[derive(Debug)]
pub struct ServiceConfig {
    pub server_url: Url,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
    pub poll_interval: Duration,
    pub max_poll_failures: u32,
    pub locale: String,
    api_token: Option<SecretBox<String>>,
}

impl ServiceConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        let server_url = Self::parse_url(
            &env::var("PULSE_SERVER_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string()),
        )?;
        let connect_timeout = Duration::from_secs(Self::load_number(
            "PULSE_CONNECT_TIMEOUT_SECS",
            DEFAULT_CONNECT_TIMEOUT_SECS,
        )?);
        let response_timeout = Duration::from_secs(Self::load_number(
            "PULSE_RESPONSE_TIMEOUT_SECS",
            DEFAULT_RESPONSE_TIMEOUT_SECS,
        )?);
        let poll_interval = Duration::from_millis(Self::load_number(
            "PULSE_POLL_INTERVAL_MS",
            DEFAULT_POLL_INTERVAL_MS,
        )?);
        let max_poll_failures =
            Self::load_number("PULSE_MAX_POLL_FAILURES", u64::from(DEFAULT_MAX_POLL_FAILURES))?;
        let max_poll_failures =
            u32::try_from(max_poll_failures).map_err(|_| ConfigError::InvalidValue {
                var: "PULSE_MAX_POLL_FAILURES".to_string(),
                reason: "value too large".to_string(),
            })?;
        let locale = Self::load_locale()?;

        let api_token = match env::var("PULSE_API_TOKEN") {
            Ok(token) if !token.trim().is_empty() => Some(SecretBox::new(Box::new(token))),
            _ => None,
        };

        Ok(Self {
            server_url,
            connect_timeout,
            response_timeout,
            poll_interval,
            max_poll_failures,
            locale,
            api_token,
        })
    }

    /// Bearer token for the reasoning service (use only when making API calls)
    pub fn api_token(&self) -> Option<&str> {
        self.api_token.as_ref().map(|t| t.expose_secret().as_str())
    }

    /// Replace the server URL, e.g. from a command line override
    pub fn set_server_url(&mut self, raw: &str) -> Result<(), ConfigError> {
        self.server_url = Self::parse_url(raw)?;
        Ok(())
    }

    fn parse_url(raw: &str) -> Result<Url, ConfigError> {
        let url = Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigError::InvalidUrl {
                url: raw.to_string(),
                reason: format!("unsupported scheme '{}'", other),
            }),
        }
    }

    fn load_number(var: &str, default: u64) -> Result<u64, ConfigError> {
        let raw = match env::var(var) {
            Ok(raw) => raw,
            Err(env::VarError::NotPresent) => return Ok(default),
            Err(e) => return Err(e.into()),
        };
        let value: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            var: var.to_string(),
            reason: format!("'{}' is not a whole number", raw),
        })?;
        if value == 0 {
            return Err(ConfigError::InvalidValue {
                var: var.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(value)
    }

    fn load_locale() -> Result<String, ConfigError> {
        let raw = env::var("PULSE_LOCALE").unwrap_or_else(|_| DEFAULT_LOCALE.to_string());
        validate_locale(&raw).map_err(|reason| ConfigError::InvalidValue {
            var: "PULSE_LOCALE".to_string(),
            reason,
        })
    }
}

/// Normalise a language tag such as "FI" or "en-US"
pub fn validate_locale(raw: &str) -> Result<String, String> {
    let tag = raw.trim();
    if tag.is_empty() {
        return Err("locale cannot be empty".to_string());
    }
    if !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(format!("'{}' is not a language tag", tag));
    }
    Ok(tag.replace('_', "-").to_ascii_lowercase())
}

/// Load configuration with helpful error messages for development
pub fn load_config() -> Result<ServiceConfig, ConfigError> {
    match ServiceConfig::load() {
        Ok(config) => {
            log::info!(
                "Loaded service configuration (server: {}, poll every {:?})",
                config.server_url,
                config.poll_interval
            );
            Ok(config)
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            log::error!("Check the PULSE_* variables in your environment or .env file");
            Err(e)
        }
    }
}
