use std::net::IpAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL when set, in-memory store otherwise.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub host: IpAddr,
    pub port: u16,
    pub max_body_size: usize,
    pub log_level: String,
    pub queue: QueueConfig,
    pub whatsapp: Option<WhatsAppConfig>,
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub tick_interval: Duration,
    pub send_timeout: Duration,
    pub stuck_after: Duration,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub max_batch: u32,
    pub process_wait: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(15),
            send_timeout: Duration::from_secs(30),
            stuck_after: Duration::from_secs(600),
            retry_base: Duration::from_secs(30),
            retry_max: Duration::from_secs(3600),
            max_batch: 50,
            process_wait: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub api_url: String,
    pub api_token: String,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub from: String,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty());
        let jwt_secret = env_required("JWT_SECRET")?;

        let host: IpAddr = env_or("OUTREACH_HOST", "0.0.0.0")
            .parse()
            .map_err(|e| format!("Invalid OUTREACH_HOST: {e}"))?;

        let port: u16 = env_parse("OUTREACH_PORT", "3000")?;
        let max_body_size: usize = env_parse("OUTREACH_MAX_BODY_SIZE", "1048576")?;
        let log_level = env_or("OUTREACH_LOG_LEVEL", "info");

        let queue = QueueConfig {
            tick_interval: Duration::from_secs(env_parse("OUTREACH_TICK_INTERVAL_SECS", "15")?),
            send_timeout: Duration::from_secs(env_parse("OUTREACH_SEND_TIMEOUT_SECS", "30")?),
            stuck_after: Duration::from_secs(env_parse("OUTREACH_STUCK_AFTER_SECS", "600")?),
            retry_base: Duration::from_secs(env_parse("OUTREACH_RETRY_BASE_SECS", "30")?),
            retry_max: Duration::from_secs(env_parse("OUTREACH_RETRY_MAX_SECS", "3600")?),
            max_batch: env_parse("OUTREACH_MAX_BATCH", "50")?,
            process_wait: Duration::from_secs(env_parse("OUTREACH_PROCESS_WAIT_SECS", "5")?),
        };

        if queue.tick_interval.is_zero() {
            return Err("OUTREACH_TICK_INTERVAL_SECS must be greater than zero".to_string());
        }
        if queue.stuck_after <= queue.send_timeout {
            return Err(
                "OUTREACH_STUCK_AFTER_SECS must be greater than OUTREACH_SEND_TIMEOUT_SECS"
                    .to_string(),
            );
        }
        if queue.max_batch == 0 {
            return Err("OUTREACH_MAX_BATCH must be greater than zero".to_string());
        }

        let whatsapp = match (
            std::env::var("OUTREACH_WHATSAPP_API_URL").ok(),
            std::env::var("OUTREACH_WHATSAPP_API_TOKEN").ok(),
        ) {
            (Some(api_url), Some(api_token)) => Some(WhatsAppConfig { api_url, api_token }),
            _ => None,
        };

        let smtp = match (
            std::env::var("OUTREACH_SMTP_HOST").ok(),
            std::env::var("OUTREACH_SMTP_PORT").ok(),
            std::env::var("OUTREACH_SMTP_USER").ok(),
            std::env::var("OUTREACH_SMTP_PASS").ok(),
            std::env::var("OUTREACH_SMTP_FROM").ok(),
        ) {
            (Some(host), Some(port), Some(user), Some(pass), Some(from)) => Some(SmtpConfig {
                host,
                port: port
                    .parse()
                    .map_err(|e| format!("Invalid OUTREACH_SMTP_PORT: {e}"))?,
                user,
                pass,
                from,
            }),
            _ => None,
        };

        Ok(Config {
            database_url,
            jwt_secret,
            host,
            port,
            max_body_size,
            log_level,
            queue,
            whatsapp,
            smtp,
        })
    }
}

fn env_required(key: &str) -> Result<String, String> {
    std::env::var(key).map_err(|_| format!("Missing required environment variable: {key}"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: &str) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    env_or(key, default)
        .parse()
        .map_err(|e| format!("Invalid {key}: {e}"))
}
