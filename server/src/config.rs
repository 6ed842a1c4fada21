//! Server configuration parsed from environment variables.
//!
//! Required:
//! - `DATABASE_URL`
//! - `AUTH_SECRET` (shared HMAC secret for session tokens)
//!
//! Optional:
//! - `PORT`: default 1999
//! - `DB_MAX_CONNECTIONS`: default 5
//! - `RELAY_QUEUE_CAPACITY`: default 1024
//! - `CONNECTION_QUEUE_CAPACITY`: default 256
//! - `SUBSCRIBE_REQUIRES_MEMBERSHIP`: default false
//! - `DEV_TOKEN_ISSUER`: default false
//! - `TOKEN_TTL_SECS`: default 3600

pub const DEFAULT_PORT: u16 = 1999;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_RELAY_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_CONNECTION_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} required")]
    Missing(&'static str),
    #[error("invalid {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Runtime knobs consulted by request and connection handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Bounded outbound queue per live connection.
    pub connection_queue_capacity: usize,
    /// Check guild membership before accepting a `subscribe`.
    pub subscribe_requires_membership: bool,
    /// Expose `POST /api/dev/token`.
    pub dev_token_issuer: bool,
    /// Lifetime of tokens minted by the dev issuer.
    pub token_ttl_secs: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connection_queue_capacity: DEFAULT_CONNECTION_QUEUE_CAPACITY,
            subscribe_requires_membership: false,
            dev_token_issuer: false,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub database_url: String,
    pub auth_secret: String,
    pub port: u16,
    pub db_max_connections: u32,
    pub relay_queue_capacity: usize,
    pub settings: Settings,
}

impl ServerConfig {
    /// Build typed config from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required variable is missing or `PORT`
    /// does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build typed config from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`ServerConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = required(&lookup, "DATABASE_URL")?;
        let auth_secret = required(&lookup, "AUTH_SECRET")?;

        let port = match lookup("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid { var: "PORT", value: raw })?,
            None => DEFAULT_PORT,
        };

        let settings = Settings {
            connection_queue_capacity: parse_or(&lookup, "CONNECTION_QUEUE_CAPACITY", DEFAULT_CONNECTION_QUEUE_CAPACITY)
                .max(1),
            subscribe_requires_membership: lookup("SUBSCRIBE_REQUIRES_MEMBERSHIP")
                .as_deref()
                .and_then(parse_bool)
                .unwrap_or(false),
            dev_token_issuer: lookup("DEV_TOKEN_ISSUER")
                .as_deref()
                .and_then(parse_bool)
                .unwrap_or(false),
            token_ttl_secs: parse_or(&lookup, "TOKEN_TTL_SECS", DEFAULT_TOKEN_TTL_SECS),
        };

        Ok(Self {
            database_url,
            auth_secret,
            port,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            relay_queue_capacity: parse_or(&lookup, "RELAY_QUEUE_CAPACITY", DEFAULT_RELAY_QUEUE_CAPACITY).max(1),
            settings,
        })
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<String, ConfigError> {
    lookup(var)
        .filter(|value| !value.trim().is_empty())
        .ok_or(ConfigError::Missing(var))
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Parse a loose boolean: `1/true/yes/on` or `0/false/no/off`.
pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
