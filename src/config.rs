use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

/// Validated runtime configuration, built once at startup and passed by
/// reference everywhere.
#[derive(Debug, Clone)]
pub struct Config {
    pub telegram_token: String,
    pub ai_api_key: String,
    pub weather_api_key: Option<String>,
    pub holiday_api_key: Option<String>,
    pub log_level: String,
    pub data_dir: PathBuf,
    pub tick_interval_seconds: u64,
    pub feed_parallelism: usize,
    pub per_host_parallelism: usize,
    pub delivery_parallelism: usize,
    pub dedup_retention_days: i64,
    pub market_dead_volume_floor_usd: f64,
}

impl Config {
    /// Loads an optional `.env` file (local-dev convenience), then reads the
    /// fixed option set below from the process environment.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let telegram_token =
            env::var("TELEGRAM_TOKEN").context("TELEGRAM_TOKEN env var is required")?;
        let ai_api_key = env::var("AI_API_KEY").context("AI_API_KEY env var is required")?;
        let weather_api_key = env::var("WEATHER_API_KEY").ok();
        let holiday_api_key = env::var("HOLIDAY_API_KEY").ok();

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string());

        let data_dir = env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let tick_interval_seconds = parse_or_default("TICK_INTERVAL_SECONDS", 60)?;
        let feed_parallelism = parse_or_default("FEED_PARALLELISM", 16)?;
        let per_host_parallelism = parse_or_default("FEED_PER_HOST_PARALLELISM", 2)?;
        let delivery_parallelism = parse_or_default("DELIVERY_PARALLELISM", 8)?;
        let dedup_retention_days = parse_or_default("DEDUP_RETENTION_DAYS", 7)?;
        let market_dead_volume_floor_usd =
            parse_or_default("MARKET_DEAD_VOLUME_FLOOR_USD", 1_000_000.0)?;

        Ok(Self {
            telegram_token,
            ai_api_key,
            weather_api_key,
            holiday_api_key,
            log_level,
            data_dir,
            tick_interval_seconds,
            feed_parallelism,
            per_host_parallelism,
            delivery_parallelism,
            dedup_retention_days,
            market_dead_volume_floor_usd,
        })
    }

    pub fn dedup_db_path(&self) -> PathBuf {
        self.data_dir.join("dedup.sqlite3")
    }
}

fn parse_or_default<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} must be numeric: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_all() {
        for key in [
            "TELEGRAM_TOKEN",
            "AI_API_KEY",
            "WEATHER_API_KEY",
            "HOLIDAY_API_KEY",
            "LOG_LEVEL",
            "DATA_DIR",
            "TICK_INTERVAL_SECONDS",
            "FEED_PARALLELISM",
            "FEED_PER_HOST_PARALLELISM",
            "DELIVERY_PARALLELISM",
            "DEDUP_RETENTION_DAYS",
            "MARKET_DEAD_VOLUME_FLOOR_USD",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn missing_required_fails() {
        clear_all();
        assert!(Config::from_env().is_err());
        clear_all();
    }

    #[test]
    fn defaults_apply_when_optional_vars_absent() {
        clear_all();
        env::set_var("TELEGRAM_TOKEN", "tok");
        env::set_var("AI_API_KEY", "key");

        let cfg = Config::from_env().expect("config should parse with required vars set");
        assert_eq!(cfg.tick_interval_seconds, 60);
        assert_eq!(cfg.feed_parallelism, 16);
        assert_eq!(cfg.delivery_parallelism, 8);
        assert_eq!(cfg.dedup_retention_days, 7);
        assert_eq!(cfg.data_dir, PathBuf::from("./data"));

        clear_all();
    }

    #[test]
    fn overrides_are_honored() {
        clear_all();
        env::set_var("TELEGRAM_TOKEN", "tok");
        env::set_var("AI_API_KEY", "key");
        env::set_var("TICK_INTERVAL_SECONDS", "30");
        env::set_var("DEDUP_RETENTION_DAYS", "14");

        let cfg = Config::from_env().expect("config should parse");
        assert_eq!(cfg.tick_interval_seconds, 30);
        assert_eq!(cfg.dedup_retention_days, 14);

        clear_all();
    }
}
