use std::{str::FromStr, time::Duration};

use anyhow::{anyhow, Context};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl BrokerConfig {
    pub fn url(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/%2f",
            self.user, self.password, self.host, self.port
        )
    }
}

/// Argon2 cost parameters. Defaults match `argon2::Params::DEFAULT`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HashConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database: DatabaseConfig,
    pub broker: BrokerConfig,
    pub hash: HashConfig,
    pub publish_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Required keys that are missing
    /// or empty, and values that fail to parse into their target type, are
    /// errors.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| get(key).ok_or_else(|| anyhow!("env var {key} not set"));

        let defaults = HashConfig::default();

        Ok(Self {
            host: get("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_value("APP_PORT", required("APP_PORT")?)?,
            database: DatabaseConfig {
                host: required("DB_HOST")?,
                port: parse_value("DB_PORT", required("DB_PORT")?)?,
                name: required("DB_NAME")?,
                user: get("DB_USER").unwrap_or_else(|| "postgres".into()),
                password: get("DB_PASSWORD").unwrap_or_else(|| "postgres".into()),
                max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", 10)?,
            },
            broker: BrokerConfig {
                host: required("RABBIT_HOST")?,
                port: parse_value("RABBIT_PORT", required("RABBIT_PORT")?)?,
                user: get("RABBIT_USER").unwrap_or_else(|| "guest".into()),
                password: get("RABBIT_PASSWORD").unwrap_or_else(|| "guest".into()),
            },
            hash: HashConfig {
                memory_kib: parse_or(&get, "PASSWORD_HASH_MEMORY_KIB", defaults.memory_kib)?,
                iterations: parse_or(&get, "PASSWORD_HASH_ITERATIONS", defaults.iterations)?,
                parallelism: parse_or(&get, "PASSWORD_HASH_PARALLELISM", defaults.parallelism)?,
            },
            publish_timeout: Duration::from_secs(parse_or(&get, "PUBLISH_TIMEOUT_SECS", 5)?),
        })
    }
}

fn parse_value<T>(key: &str, raw: String) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("env var {key} has an invalid value: {raw}"))
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> anyhow::Result<T>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => parse_value(key, raw),
        None => Ok(default),
    }
}
