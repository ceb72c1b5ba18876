use serde::Deserialize;
use std::env;
use std::time::Duration;
use turnstile_core::SalePolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub auth: AuthConfig,
    pub store: StoreConfig,
    pub business_rules: BusinessRules,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    pub seat_hold_seconds: u64,
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_sweep_batch")]
    pub sweep_batch_size: usize,
    #[serde(default)]
    pub sale_policy: SalePolicy,
    /// Hold attempts allowed per user per window.
    pub hold_rate_limit: i64,
    pub hold_rate_window_seconds: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_sweep_batch() -> usize {
    500
}

fn default_currency() -> String {
    "AOA".to_string()
}

impl BusinessRules {
    pub fn hold_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.seat_hold_seconds as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }
}

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            seat_hold_seconds: 900,
            sweep_interval_seconds: 30,
            sweep_batch_size: default_sweep_batch(),
            sale_policy: SalePolicy::RequireHold,
            hold_rate_limit: 30,
            hold_rate_window_seconds: 60,
            currency: default_currency(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    /// Unset disables hold rate limiting.
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub seat_topic: String,
    pub order_topic: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,
}

fn default_feed_capacity() -> usize {
    1024
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Optional per-environment overrides, then an uncommitted local file.
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. TURNSTILE_BUSINESS_RULES__SEAT_HOLD_SECONDS=600
            .add_source(config::Environment::with_prefix("TURNSTILE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
