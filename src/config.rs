//! Adapter configuration from the environment.

use crate::error::ConfigError;

pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/adapter";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_LIMIT: u64 = 100;

#[derive(Clone, Debug, PartialEq)]
pub struct AdapterConfig {
    pub database_url: String,
    pub max_connections: u32,
    /// Enables destructive table operations (`drop_table`, `clear_table`).
    pub test_mode: bool,
    /// Row limit applied by `find` when the caller gives none.
    pub default_limit: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        AdapterConfig {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            test_mode: false,
            default_limit: DEFAULT_LIMIT,
        }
    }
}

impl AdapterConfig {
    /// Read `DATABASE_URL`, `DB_MAX_CONNECTIONS`, `ADAPTER_TEST_MODE` and `ADAPTER_DEFAULT_LIMIT`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = AdapterConfig::default();
        let database_url = lookup("DATABASE_URL")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.database_url);
        let max_connections = match lookup("DB_MAX_CONNECTIONS") {
            Some(v) => parse_number("DB_MAX_CONNECTIONS", &v)?,
            None => defaults.max_connections,
        };
        let test_mode = lookup("ADAPTER_TEST_MODE").map(|v| parse_flag(&v)).unwrap_or(false);
        let default_limit = match lookup("ADAPTER_DEFAULT_LIMIT") {
            Some(v) => parse_number("ADAPTER_DEFAULT_LIMIT", &v)?,
            None => defaults.default_limit,
        };
        Ok(AdapterConfig {
            database_url,
            max_connections,
            test_mode,
            default_limit,
        })
    }

    pub fn with_test_mode(mut self, on: bool) -> Self {
        self.test_mode = on;
        self
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        message: format!("'{}': {}", raw, e),
    })
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}
