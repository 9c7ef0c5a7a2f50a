use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub auth: AuthConfig,
    pub payment: PaymentConfig,
    #[serde(default)]
    pub checkout: CheckoutConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
}

/// Gateway credentials and the widget's presentation settings.
#[derive(Deserialize, Clone)]
pub struct PaymentConfig {
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_merchant_name")]
    pub merchant_name: String,
    #[serde(default = "default_theme_color")]
    pub theme_color: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Use the in-process gateway instead of Razorpay (local runs only)
    #[serde(default)]
    pub sandbox: bool,
}

impl PaymentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// Secrets stay out of logs
impl std::fmt::Debug for PaymentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentConfig")
            .field("key_id", &self.key_id)
            .field("currency", &self.currency)
            .field("merchant_name", &self.merchant_name)
            .field("theme_color", &self.theme_color)
            .field("timeout_ms", &self.timeout_ms)
            .field("api_base_url", &self.api_base_url)
            .field("sandbox", &self.sandbox)
            .finish_non_exhaustive()
    }
}

fn default_currency() -> String {
    "INR".to_string()
}

fn default_merchant_name() -> String {
    "Doree".to_string()
}

fn default_theme_color() -> String {
    "#B8860B".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_api_base_url() -> String {
    crate::razorpay::DEFAULT_API_BASE_URL.to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CheckoutConfig {
    /// Flat shipping in paise
    #[serde(default)]
    pub shipping_amount: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconciliationConfig {
    pub interval_seconds: u64,
    pub stale_after_seconds: u64,
    pub batch_size: usize,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 300,
            stale_after_seconds: 900,
            batch_size: 50,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    pub requests_per_window: i64,
    pub window_seconds: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 100,
            window_seconds: 60,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Untracked developer overrides
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `DOREE__PAYMENT__KEY_SECRET=...`
            .add_source(config::Environment::with_prefix("DOREE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
