//! Runtime configuration.
//!
//! Layered with figment: built-in defaults, then an optional `slapi.toml`,
//! then `SLAPI_*` environment variables. Durations accept human strings such
//! as `10s` or `500ms`.

use anyhow::Context;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::PathBuf;
use std::time::Duration;

pub const CONFIG_FILE: &str = "slapi.toml";
pub const ENV_PREFIX: &str = "SLAPI_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Tracing level for the `slapi` target; `RUST_LOG` overrides it entirely.
    pub log_level: String,
    pub upstream_base_url: String,

    pub cache_dir: PathBuf,
    pub cache_retention_minutes: u64,
    /// How often expired cache entries are pruned from memory and disk.
    #[serde(with = "duration_str")]
    pub cache_sweep_interval: Duration,

    #[serde(with = "duration_str")]
    pub request_timeout: Duration,
    /// Minimum spacing between two upstream requests.
    #[serde(with = "duration_str")]
    pub min_request_interval: Duration,
    pub retry_attempts: u32,
    #[serde(with = "duration_str")]
    pub retry_base_delay: Duration,

    /// Upper bound on result pages per legacy search run.
    pub max_pages: u32,
    #[serde(with = "duration_str")]
    pub fetch_deadline: Duration,
    #[serde(with = "duration_str")]
    pub inflight_watchdog: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            upstream_base_url: crate::teamsl::DEFAULT_BASE_URL.to_string(),
            cache_dir: PathBuf::from(".cache/slapi"),
            cache_retention_minutes: 30,
            cache_sweep_interval: Duration::from_secs(5 * 60),
            request_timeout: Duration::from_secs(10),
            min_request_interval: Duration::from_millis(500),
            retry_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            max_pages: 50,
            fetch_deadline: Duration::from_secs(120),
            inflight_watchdog: Duration::from_secs(180),
        }
    }
}

impl Config {
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    pub fn load() -> anyhow::Result<Self> {
        let config: Config = Self::figment()
            .extract()
            .context("Failed to load config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn cache_retention(&self) -> Duration {
        Duration::from_secs(self.cache_retention_minutes.saturating_mul(60))
    }

    fn validate(&self) -> anyhow::Result<()> {
        url::Url::parse(&self.upstream_base_url)
            .with_context(|| format!("Invalid upstream_base_url: {}", self.upstream_base_url))?;
        anyhow::ensure!(self.max_pages > 0, "max_pages must be at least 1");
        anyhow::ensure!(
            !self.fetch_deadline.is_zero(),
            "fetch_deadline must be greater than zero"
        );
        anyhow::ensure!(
            self.inflight_watchdog >= self.fetch_deadline,
            "inflight_watchdog must not be shorter than fetch_deadline"
        );
        Ok(())
    }
}

/// Duration fields as strings (`"90s"`, `"2m"`, `"250ms"`); bare numbers are seconds.
mod duration_str {
    use super::*;
    use std::sync::LazyLock;

    static PARSER: LazyLock<DurationParser> = LazyLock::new(|| {
        DurationParser::with_time_units(&[
            TimeUnit::MilliSecond,
            TimeUnit::Second,
            TimeUnit::Minute,
            TimeUnit::Hour,
        ])
    });

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    pub fn parse(text: &str) -> Result<Duration, String> {
        let parsed = PARSER
            .parse(text.trim())
            .map_err(|e| format!("invalid duration {text:?}: {e}"))?;
        Duration::try_from(parsed).map_err(|e| format!("invalid duration {text:?}: {e}"))
    }

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{}ms", value.as_millis()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => parse(&text).map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_round_trip_through_figment() {
        Jail::expect_with(|_| {
            let config: Config = Config::figment().extract()?;
            assert_eq!(config, Config::default());
            assert_eq!(config.cache_retention(), Duration::from_secs(30 * 60));
            Ok(())
        });
    }

    #[test]
    fn test_environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE,
                r#"
                    max_pages = 5
                    request_timeout = "20s"
                "#,
            )?;
            jail.set_env("SLAPI_MAX_PAGES", "7");
            jail.set_env("SLAPI_MIN_REQUEST_INTERVAL", "250ms");
            jail.set_env("SLAPI_FETCH_DEADLINE", "2m");

            let config: Config = Config::figment().extract()?;
            assert_eq!(config.max_pages, 7);
            assert_eq!(config.request_timeout, Duration::from_secs(20));
            assert_eq!(config.min_request_interval, Duration::from_millis(250));
            assert_eq!(config.fetch_deadline, Duration::from_secs(120));
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(duration_str::parse("soon").is_err());

        let config = Config {
            upstream_base_url: "not a url".into(),
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            inflight_watchdog: Duration::from_secs(1),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
