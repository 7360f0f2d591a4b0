use std::net::IpAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    /// When set, trigger and stats routes require `Authorization: Bearer <token>`.
    pub trigger_token: Option<String>,
    /// Interval for the built-in scheduler. `None` leaves triggering to callers.
    pub run_interval: Option<Duration>,
    pub runner: RunnerConfig,
    pub whatsapp: WhatsAppConfig,
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub batch_size: i64,
    pub max_attempts: i32,
    pub backoff_base: Duration,
    pub row_delay: Duration,
    pub claim_lease: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_attempts: 5,
            backoff_base: Duration::from_secs(5 * 60),
            row_delay: Duration::from_millis(100),
            claim_lease: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub access_token: Option<String>,
    pub phone_number_id: Option<String>,
    pub api_base: String,
    pub api_version: String,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            phone_number_id: None,
            api_base: "https://graph.facebook.com".to_string(),
            api_version: "v18.0".to_string(),
        }
    }
}

impl WhatsAppConfig {
    pub fn is_configured(&self) -> bool {
        self.access_token.is_some() && self.phone_number_id.is_some()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = env_required("DATABASE_URL")?;

        let host: IpAddr = env_or("COURIER_HOST", "0.0.0.0")
            .parse()
            .map_err(|e| format!("Invalid COURIER_HOST: {e}"))?;

        let port: u16 = env_or("COURIER_PORT", "3000")
            .parse()
            .map_err(|e| format!("Invalid COURIER_PORT: {e}"))?;

        let log_level = env_or("COURIER_LOG_LEVEL", "info");

        let trigger_token = env_optional("COURIER_TRIGGER_TOKEN");

        let run_interval_secs: u64 = env_or("COURIER_RUN_INTERVAL_SECS", "0")
            .parse()
            .map_err(|e| format!("Invalid COURIER_RUN_INTERVAL_SECS: {e}"))?;
        let run_interval = (run_interval_secs > 0).then(|| Duration::from_secs(run_interval_secs));

        let batch_size: i64 = env_or("COURIER_BATCH_SIZE", "100")
            .parse()
            .map_err(|e| format!("Invalid COURIER_BATCH_SIZE: {e}"))?;
        if batch_size < 1 {
            return Err("COURIER_BATCH_SIZE must be at least 1".to_string());
        }

        let max_attempts: i32 = env_or("COURIER_MAX_ATTEMPTS", "5")
            .parse()
            .map_err(|e| format!("Invalid COURIER_MAX_ATTEMPTS: {e}"))?;
        if max_attempts < 1 {
            return Err("COURIER_MAX_ATTEMPTS must be at least 1".to_string());
        }

        let backoff_base_secs: u64 = env_or("COURIER_BACKOFF_BASE_SECS", "300")
            .parse()
            .map_err(|e| format!("Invalid COURIER_BACKOFF_BASE_SECS: {e}"))?;

        let row_delay_ms: u64 = env_or("COURIER_ROW_DELAY_MS", "100")
            .parse()
            .map_err(|e| format!("Invalid COURIER_ROW_DELAY_MS: {e}"))?;

        let claim_lease_secs: u64 = env_or("COURIER_CLAIM_LEASE_SECS", "300")
            .parse()
            .map_err(|e| format!("Invalid COURIER_CLAIM_LEASE_SECS: {e}"))?;

        let whatsapp_defaults = WhatsAppConfig::default();
        let whatsapp = WhatsAppConfig {
            access_token: env_optional("WHATSAPP_ACCESS_TOKEN"),
            phone_number_id: env_optional("WHATSAPP_PHONE_NUMBER_ID"),
            api_base: env_or("WHATSAPP_API_BASE", &whatsapp_defaults.api_base),
            api_version: env_or("WHATSAPP_API_VERSION", &whatsapp_defaults.api_version),
        };

        Ok(Config {
            database_url,
            host,
            port,
            log_level,
            trigger_token,
            run_interval,
            runner: RunnerConfig {
                batch_size,
                max_attempts,
                backoff_base: Duration::from_secs(backoff_base_secs),
                row_delay: Duration::from_millis(row_delay_ms),
                claim_lease: Duration::from_secs(claim_lease_secs),
            },
            whatsapp,
        })
    }
}

fn env_required(key: &str) -> Result<String, String> {
    std::env::var(key).map_err(|_| format!("Missing required environment variable: {key}"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
