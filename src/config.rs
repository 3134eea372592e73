use anyhow::{anyhow, Context, Result};
use chrono::{FixedOffset, Offset, Utc};
use std::env;
use std::str::FromStr;

/// Knobs the progression engine needs at request time.
#[derive(Debug, Clone)]
pub struct Settings {
    pub default_passing_score: u8,
    pub max_retries: u32,
    /// Offset that defines a "calendar day" for streaks.
    pub streak_offset: FixedOffset,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_passing_score: 70,
            max_retries: 3,
            streak_offset: Utc.fix(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub max_connections: u32,
    pub log_filter: String,
    pub settings: Settings,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL not set")?;
        let defaults = Settings::default();

        let default_passing_score: u8 =
            parse_var("DEFAULT_PASSING_SCORE", defaults.default_passing_score)?;
        if default_passing_score > 100 {
            return Err(anyhow!(
                "DEFAULT_PASSING_SCORE must be within 0..=100, got {default_passing_score}"
            ));
        }

        let streak_offset = streak_offset(parse_var("STREAK_UTC_OFFSET_MINUTES", 0)?)?;

        Ok(Self {
            database_url,
            port: parse_var("PORT", 8081)?,
            max_connections: parse_var("DB_MAX_CONNECTIONS", 10)?,
            log_filter: env::var("RUST_LOG")
                .unwrap_or_else(|_| "learnpath=info,axum=info".into()),
            settings: Settings {
                default_passing_score,
                max_retries: parse_var("TX_MAX_RETRIES", defaults.max_retries)?,
                streak_offset,
            },
        })
    }
}

fn streak_offset(minutes: i32) -> Result<FixedOffset> {
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| anyhow!("STREAK_UTC_OFFSET_MINUTES out of range: {minutes}"))
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid {key}={raw:?}: {e}")),
        Err(_) => Ok(default),
    }
}
