use std::{env, fmt, net::SocketAddr, time::Duration};

use super::{database_url, server_bind_address};

const DEFAULT_CACHE_TTL_SECS: u64 = 30;
const DEFAULT_CACHE_MAX_ENTRIES: usize = 10_000;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Settings of the read-through operations cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub max_entries: usize,
}

impl CacheSettings {
    /// A zero TTL turns the cache off.
    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero() && self.max_entries > 0
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
        }
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub seed_on_start: bool,
    pub cache: CacheSettings,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;
        let seed_on_start = read_flag("APP_SEED", true)?;
        let cache = CacheSettings {
            ttl: Duration::from_secs(read_number("APP_CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS)?),
            max_entries: read_number("APP_CACHE_MAX_ENTRIES", DEFAULT_CACHE_MAX_ENTRIES)?,
        };

        Ok(Self {
            bind_addr,
            environment,
            database_url: database_url(),
            seed_on_start,
            cache,
        })
    }
}

fn read_flag(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    let Ok(value) = env::var(name) else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidFlag { name, value }),
    }
}

fn read_number<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    let Ok(value) = env::var(name) else {
        return Ok(default);
    };
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber { name, value })
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    InvalidFlag { name: &'static str, value: String },
    InvalidNumber { name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::InvalidFlag { name, value } => {
                write!(f, "{name} must be a boolean such as 'true' or 'false' (got {value})")
            }
            Self::InvalidNumber { name, value } => {
                write!(f, "{name} must be a non-negative integer (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
