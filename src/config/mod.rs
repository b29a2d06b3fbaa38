//! Configuration module for the crawler control plane.
//!
//! Handles loading and parsing configuration from environment variables using the
//! figment crate. Supports flexible duration parsing that accepts both numeric
//! values (interpreted as seconds) and duration strings with units.

use crate::catalog::{Catalog, DEFAULT_CATALOG};
use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Main application configuration.
#[derive(Deserialize)]
pub struct Config {
    /// Log level for this application's target specifically.
    ///
    /// e.g. "debug" behaves like "warn,poicrawl=debug,...". Defaults to "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Port for the control API (default: 8080).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database connection URL.
    pub database_url: String,

    /// Graceful shutdown timeout. Accepts both numeric seconds and duration strings.
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,

    /// Base URL of the upstream POI search API.
    pub amap_base_url: String,

    /// Per-request timeout when calling the upstream API.
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub request_timeout: Duration,

    /// Forward upstream calls through this proxy URL when `proxy_enabled` is set.
    #[serde(default = "default_custom_proxy_url")]
    pub custom_proxy_url: String,

    /// Whether to route upstream calls through `custom_proxy_url`.
    #[serde(default)]
    pub proxy_enabled: bool,

    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,

    /// IANA timezone used for the credential pool's daily reset boundary.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Local hour (0-23) at which credential usage counters reset each day.
    #[serde(default = "default_key_reset_hour")]
    pub key_reset_hour: u32,

    /// `label:code|code;label2:code3` catalog of POI categories to crawl.
    #[serde(default = "default_poi_types")]
    pub poi_types: String,

    /// Maximum number of jobs the executor runs concurrently.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Directory result CSV files are written under.
    #[serde(default = "default_results_dir")]
    pub results_dir: String,

    /// How long a `running` job may go without progress before it's considered stalled.
    #[serde(
        default = "default_stall_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub stall_timeout: Duration,
}

impl Config {
    pub fn catalog(&self) -> Result<Catalog, crate::catalog::CatalogError> {
        Catalog::parse(&self.poi_types)
    }

    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone
            .parse()
            .unwrap_or(chrono_tz::Asia::Shanghai)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_custom_proxy_url() -> String {
    "http://localhost:5000/amap".to_string()
}

fn default_timezone() -> String {
    "Asia/Shanghai".to_string()
}

fn default_key_reset_hour() -> u32 {
    1
}

fn default_poi_types() -> String {
    DEFAULT_CATALOG.to_string()
}

fn default_max_workers() -> usize {
    3
}

fn default_results_dir() -> String {
    "./results".to_string()
}

fn default_stall_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

/// Duration parser configured to handle various time units with seconds as default.
///
/// Supports seconds, milliseconds and minutes; does not support fractions, exponents,
/// or infinity values; allows whitespace between the number and unit and allows
/// multiple units to be summed (e.g. "10s 2m" = 130 seconds).
const DURATION_PARSER: DurationParser<'static> = DurationParser::builder()
    .time_units(&[TimeUnit::Second, TimeUnit::MilliSecond, TimeUnit::Minute])
    .parse_multiple(None)
    .allow_time_unit_delimiter()
    .disable_infinity()
    .disable_fraction()
    .disable_exponent()
    .default_unit(TimeUnit::Second)
    .build();

/// Accepts unsigned/signed integers (seconds) or duration strings like `"30s"`/`"2m"`.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Visitor;

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a duration string or number")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            DURATION_PARSER
                .parse(value)
                .map_err(|e| {
                    serde::de::Error::custom(format!(
                        "invalid duration '{}': {}. examples: '5', '3500ms', '30s', '2m'",
                        value, e
                    ))
                })?
                .try_into()
                .map_err(|e| serde::de::Error::custom(format!("duration conversion error: {}", e)))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if value < 0 {
                return Err(serde::de::Error::custom("duration cannot be negative"));
            }
            Ok(Duration::from_secs(value as u64))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_default_catalog() {
        let cfg_json = serde_json::json!({
            "database_url": "postgres://localhost/test",
            "amap_base_url": "https://example.com",
        });
        let cfg: Config = serde_json::from_value(cfg_json).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.key_reset_hour, 1);
        assert!(cfg.catalog().unwrap().len() > 0);
    }

    #[test]
    fn duration_accepts_plain_seconds() {
        let cfg_json = serde_json::json!({
            "database_url": "postgres://localhost/test",
            "amap_base_url": "https://example.com",
            "shutdown_timeout": 30,
        });
        let cfg: Config = serde_json::from_value(cfg_json).unwrap();
        assert_eq!(cfg.shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn duration_accepts_unit_suffix() {
        let cfg_json = serde_json::json!({
            "database_url": "postgres://localhost/test",
            "amap_base_url": "https://example.com",
            "shutdown_timeout": "2m",
        });
        let cfg: Config = serde_json::from_value(cfg_json).unwrap();
        assert_eq!(cfg.shutdown_timeout, Duration::from_secs(120));
    }

    #[test]
    fn rejects_negative_duration() {
        let cfg_json = serde_json::json!({
            "database_url": "postgres://localhost/test",
            "amap_base_url": "https://example.com",
            "shutdown_timeout": -5,
        });
        assert!(serde_json::from_value::<Config>(cfg_json).is_err());
    }
}
