//! Service configuration.
//!
//! Values come from the environment (after `.env` is loaded by the binary)
//! or from the builder methods. Unset optional values fall back to defaults.

use crate::error::ConfigError;
use crate::moderation::DEFAULT_CHAR_LIMIT;
use crate::upstream::DEFAULT_INSTRUCTION;
use std::net::SocketAddr;
use std::time::Duration;

pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_BASE_URL: &str = "OPENAI_BASE_URL";
pub const ENV_MODEL: &str = "OPENAI_MODEL";
pub const ENV_BIND_ADDR: &str = "BFF_BIND_ADDR";
pub const ENV_CHAR_LIMIT: &str = "BFF_CHAR_LIMIT";
pub const ENV_UPSTREAM_TIMEOUT: &str = "BFF_UPSTREAM_TIMEOUT_SECS";
pub const ENV_VALIDATE_KEY: &str = "BFF_VALIDATE_KEY";

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8081";

/// Configuration for the moderation service.
#[derive(Clone)]
pub struct BffConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub bind_addr: SocketAddr,
    pub char_limit: usize,
    pub upstream_timeout: Duration,
    pub validate_api_key: bool,
    pub instruction: String,
}

impl BffConfig {
    /// Create a config with defaults for everything but the API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            model: None,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            char_limit: DEFAULT_CHAR_LIMIT,
            upstream_timeout: Duration::from_secs(60),
            validate_api_key: true,
            instruction: DEFAULT_INSTRUCTION.to_string(),
        }
    }

    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get(ENV_API_KEY).ok_or(ConfigError::Missing(ENV_API_KEY))?;
        let mut config = Self::new(api_key);
        config.base_url = get(ENV_BASE_URL);
        config.model = get(ENV_MODEL);

        let bind = get(ENV_BIND_ADDR).unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        config.bind_addr = parse(ENV_BIND_ADDR, &bind)?;

        if let Some(raw) = get(ENV_CHAR_LIMIT) {
            config.char_limit = parse(ENV_CHAR_LIMIT, &raw)?;
            if config.char_limit == 0 {
                return Err(invalid(ENV_CHAR_LIMIT, &raw, "must be greater than zero"));
            }
        }
        if let Some(raw) = get(ENV_UPSTREAM_TIMEOUT) {
            let secs: u64 = parse(ENV_UPSTREAM_TIMEOUT, &raw)?;
            if secs == 0 {
                return Err(invalid(ENV_UPSTREAM_TIMEOUT, &raw, "must be greater than zero"));
            }
            config.upstream_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = get(ENV_VALIDATE_KEY) {
            config.validate_api_key = parse_flag(&raw)
                .ok_or_else(|| invalid(ENV_VALIDATE_KEY, &raw, "expected true or false"))?;
        }

        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_char_limit(mut self, limit: usize) -> Self {
        self.char_limit = limit;
        self
    }

    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    pub fn with_validate_api_key(mut self, validate: bool) -> Self {
        self.validate_api_key = validate;
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    /// Build the API client described by this config.
    pub fn openai_client(&self) -> openai::OpenAi {
        let mut client = openai::OpenAi::new(self.api_key.clone()).with_timeout(self.upstream_timeout);
        if let Some(url) = &self.base_url {
            client = client.with_base_url(url.clone());
        }
        if let Some(model) = &self.model {
            client = client.with_model(model.clone());
        }
        client
    }
}

impl std::fmt::Debug for BffConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BffConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("bind_addr", &self.bind_addr)
            .field("char_limit", &self.char_limit)
            .field("upstream_timeout", &self.upstream_timeout)
            .field("validate_api_key", &self.validate_api_key)
            .finish_non_exhaustive()
    }
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| invalid(key, raw, &e.to_string()))
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
