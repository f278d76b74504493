use std::str::FromStr;

use anyhow::{bail, Context};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub access_secret: Option<String>,
    pub refresh_secret: Option<String>,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

/// Argon2 cost parameters. Raise them as hardware gets faster.
#[derive(Debug, Clone, Deserialize)]
pub struct HashingConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub db: DbConfig,
    pub jwt: JwtConfig,
    pub hashing: HashingConfig,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db = DbConfig {
            url: lookup("DATABASE_URL").context("DATABASE_URL is not set")?,
            max_connections: parsed(&lookup, "DB_MAX_CONNECTIONS", 25)?,
            min_connections: parsed(&lookup, "DB_MIN_CONNECTIONS", 5)?,
        };
        if db.max_connections == 0 || db.min_connections > db.max_connections {
            bail!(
                "DB_MIN_CONNECTIONS ({}) must not exceed DB_MAX_CONNECTIONS ({}), which must be positive",
                db.min_connections,
                db.max_connections
            );
        }

        let jwt = JwtConfig {
            access_secret: non_empty("JWT_ACCESS_SECRET"),
            refresh_secret: non_empty("JWT_REFRESH_SECRET"),
            access_ttl_minutes: ttl_minutes(&lookup, "JWT_ACCESS_TTL_MINUTES", 15)?,
            refresh_ttl_minutes: ttl_minutes(&lookup, "JWT_REFRESH_TTL_MINUTES", 60 * 24 * 7)?,
        };

        let defaults = HashingConfig::default();
        let hashing = HashingConfig {
            memory_kib: parsed(&lookup, "ARGON2_MEMORY_KIB", defaults.memory_kib)?,
            iterations: parsed(&lookup, "ARGON2_ITERATIONS", defaults.iterations)?,
            parallelism: parsed(&lookup, "ARGON2_PARALLELISM", defaults.parallelism)?,
        };

        let port = lookup("APP_PORT").unwrap_or_else(|| "8080".into());

        Ok(Self {
            host: lookup("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: port
                .parse::<u16>()
                .with_context(|| format!("APP_PORT must be a port number, got {port:?}"))?,
            environment: lookup("APP_ENV").unwrap_or_else(|| "development".into()),
            db,
            jwt,
            hashing,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

/// Upper bound for token lifetimes: ten years.
const MAX_TTL_MINUTES: i64 = 60 * 24 * 365 * 10;

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(v) => v.trim().parse::<T>().with_context(|| {
            format!(
                "{key} must be an integer in range for {}, got {v:?}",
                std::any::type_name::<T>()
            )
        }),
        None => Ok(default),
    }
}

fn ttl_minutes<F>(lookup: &F, key: &str, default: i64) -> anyhow::Result<i64>
where
    F: Fn(&str) -> Option<String>,
{
    let minutes: i64 = parsed(lookup, key, default)?;
    if !(1..=MAX_TTL_MINUTES).contains(&minutes) {
        bail!("{key} must be between 1 and {MAX_TTL_MINUTES} minutes, got {minutes}");
    }
    Ok(minutes)
}
