use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub booking: BookingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Postgres connection string, or "memory" for the in-process store.
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BookingConfig {
    /// The product's "hold room" window.
    #[serde(default = "default_hold_ttl_hours")]
    pub hold_ttl_hours: i64,
    /// Also the documented maximum overshoot past a hold deadline.
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_max_connections() -> u32 {
    5
}

fn default_hold_ttl_hours() -> i64 {
    24
}

fn default_sweep_interval_seconds() -> u64 {
    15
}

fn default_currency() -> String {
    "EUR".to_string()
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(config::File::with_name("config/local").required(false))
            // Eg. `DORMA__BOOKING__HOLD_TTL_HOURS=12`
            .add_source(config::Environment::with_prefix("DORMA").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
