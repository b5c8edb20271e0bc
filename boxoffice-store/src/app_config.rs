use serde::Deserialize;
use std::collections::HashMap;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    pub locks: LockConfig,
    pub pricing: PricingConfig,
    #[serde(default)]
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub resiliency: ResiliencyConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

/// No url means bookings and shows live in memory only.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RedisConfig {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LockConfig {
    #[serde(default)]
    pub backend: LockBackend,
    #[serde(default = "default_ttl")]
    pub default_ttl_seconds: u64,
    #[serde(default = "default_max_ttl")]
    pub max_ttl_seconds: u64,
    #[serde(default = "default_max_seats")]
    pub max_seats_per_request: usize,
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_seconds: u64,
    /// How long finished reservations stay queryable.
    #[serde(default = "default_retention")]
    pub reservation_retention_seconds: u64,
}

fn default_ttl() -> u64 { 300 }
fn default_max_ttl() -> u64 { 900 }
fn default_max_seats() -> usize { 10 }
fn default_reaper_interval() -> u64 { 30 }
fn default_retention() -> u64 { 3600 }

/// Category names are matched case-insensitively; environment overrides
/// arrive lowercased.
#[derive(Debug, Deserialize, Clone)]
pub struct PricingConfig {
    pub currency: String,
    pub prices: HashMap<String, i64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct KafkaConfig {
    pub brokers: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResiliencyConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_timeout")]
    pub reset_timeout_seconds: u64,
}

fn default_failure_threshold() -> u32 { 5 }
fn default_reset_timeout() -> u64 { 30 }

impl Default for ResiliencyConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_seconds: default_reset_timeout(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from("config")
    }

    /// Layers `<dir>/default`, `<dir>/<RUN_MODE>` and `<dir>/local`, then
    /// `BOXOFFICE__*` environment variables.
    pub fn load_from(dir: &str) -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name(&format!("{}/default", dir)))
            .add_source(config::File::with_name(&format!("{}/{}", dir, run_mode)).required(false))
            // Not checked in.
            .add_source(config::File::with_name(&format!("{}/local", dir)).required(false))
            // e.g. `BOXOFFICE__LOCKS__BACKEND=redis`
            .add_source(config::Environment::with_prefix("BOXOFFICE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config = Config::load_from(concat!(env!("CARGO_MANIFEST_DIR"), "/../config")).unwrap();

        assert_eq!(config.locks.backend, LockBackend::Memory);
        assert_eq!(config.locks.default_ttl_seconds, 300);
        assert_eq!(config.locks.max_seats_per_request, 10);
        assert_eq!(config.pricing.currency, "EUR");
        assert_eq!(config.pricing.prices.len(), 3);
        assert!(config.database.url.is_none());
    }

    #[test]
    fn test_lock_section_defaults() {
        let locks: LockConfig = serde_json::from_str(r#"{ "backend": "redis" }"#).unwrap();

        assert_eq!(locks.backend, LockBackend::Redis);
        assert_eq!(locks.max_ttl_seconds, 900);
        assert_eq!(locks.reaper_interval_seconds, 30);
    }
}
