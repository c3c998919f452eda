//! Server configuration, read from the environment (and `.env`).

use std::net::SocketAddr;

use anyhow::Context;

use crate::matcher::MatcherConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub db_max_connections: u32,
    /// Buffered changes per feed subscriber before it starts lagging.
    pub feed_capacity: usize,
    pub matcher: MatcherConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_owned(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            db_max_connections: 16,
            feed_capacity: 256,
            matcher: MatcherConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let matcher = MatcherConfig {
            interest_scan_limit: var_or("INTEREST_SCAN_LIMIT", defaults.matcher.interest_scan_limit)?,
            fallback_scan_limit: var_or("FALLBACK_SCAN_LIMIT", defaults.matcher.fallback_scan_limit)?,
        };

        Ok(Self {
            database_url: dotenv::var("DATABASE_URL").unwrap_or(defaults.database_url),
            bind_addr: var_or("BIND_ADDR", defaults.bind_addr)?,
            db_max_connections: var_or("DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            feed_capacity: var_or("FEED_CAPACITY", defaults.feed_capacity)?,
            matcher,
        })
    }
}

fn var_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match dotenv::var(key) {
        Ok(raw) => raw.parse().with_context(|| format!("{key}={raw:?}")),
        Err(_) => Ok(default),
    }
}
