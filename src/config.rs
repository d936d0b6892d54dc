use std::env;
use std::str::FromStr;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub neynar: NeynarConfig,
    pub notifications: NotificationConfig,
    pub lifecycle: LifecycleConfig,
    pub admin: AdminConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origin allowed by CORS (the Mini App front-end).
    pub frontend_url: String,
    /// Public URL of the Mini App; notification target URLs are built from it.
    pub app_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NeynarConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    /// Shared secret used to verify `X-Neynar-Signature` on incoming webhooks.
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationProvider {
    /// Publish through Neynar's managed notification API.
    Neynar,
    /// Post straight to the Farcaster client URLs stored from webhook events.
    Direct,
}

impl FromStr for NotificationProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "neynar" => Ok(NotificationProvider::Neynar),
            "direct" => Ok(NotificationProvider::Direct),
            _ => Err(ConfigError::InvalidValue("NOTIFICATION_PROVIDER".to_string())),
        }
    }
}

impl NotificationProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationProvider::Neynar => "neynar",
            NotificationProvider::Direct => "direct",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    pub provider: NotificationProvider,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    /// How early (minutes) an organizer may take an event live before its start time.
    pub live_window_minutes: i64,
    /// How far ahead (minutes) of the start time reminders are sent.
    pub reminder_lead_minutes: i64,
    /// Interval of the in-process scheduler worker. `0` disables it (cron endpoint only).
    pub scheduler_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    /// Bearer secret for `/api/cron/*` and `/api/admin/*`.
    pub cron_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for webhook endpoints
    pub webhook_per_second: u32,
    /// Burst size for webhook endpoints
    pub webhook_burst: u32,
}

/// `default` when `raw` is unset or blank, otherwise the parsed value.
fn parse_value<T: FromStr>(name: &str, raw: Option<&str>, default: T) -> Result<T, ConfigError> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
    }
}

fn parse_or<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    parse_value(name, env::var(name).ok().as_deref(), default)
}

fn minutes_or(name: &str, default: i64) -> Result<i64, ConfigError> {
    let minutes = parse_or(name, default)?;
    if minutes < 0 {
        return Err(ConfigError::InvalidValue(name.to_string()));
    }
    Ok(minutes)
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let neynar_api_key = non_empty("NEYNAR_API_KEY");

        let provider = match env::var("NOTIFICATION_PROVIDER") {
            Ok(v) => v.parse()?,
            Err(_) if neynar_api_key.is_some() => NotificationProvider::Neynar,
            Err(_) => NotificationProvider::Direct,
        };

        if provider == NotificationProvider::Neynar && neynar_api_key.is_none() {
            return Err(ConfigError::MissingEnv("NEYNAR_API_KEY".to_string()));
        }

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                frontend_url: env::var("FRONTEND_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
                app_url: env::var("APP_URL").unwrap_or_else(|_| "http://localhost:3000".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/gamelink.db".to_string()),
                max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 5)?,
            },
            jwt: JwtConfig {
                secret: non_empty("JWT_SECRET")
                    .ok_or_else(|| ConfigError::MissingEnv("JWT_SECRET".to_string()))?,
            },
            neynar: NeynarConfig {
                api_key: neynar_api_key,
                base_url: env::var("NEYNAR_BASE_URL")
                    .unwrap_or_else(|_| "https://api.neynar.com".to_string()),
                webhook_secret: non_empty("NEYNAR_WEBHOOK_SECRET"),
            },
            notifications: NotificationConfig { provider },
            lifecycle: LifecycleConfig {
                live_window_minutes: minutes_or("EVENT_LIVE_WINDOW_MINUTES", 30)?,
                reminder_lead_minutes: minutes_or("EVENT_REMINDER_LEAD_MINUTES", 60)?,
                scheduler_interval_seconds: parse_or("SCHEDULER_INTERVAL_SECONDS", 60)?,
            },
            admin: AdminConfig {
                cron_secret: non_empty("CRON_SECRET"),
            },
            rate_limit: RateLimitConfig {
                webhook_per_second: parse_or("RATE_LIMIT_WEBHOOKS_PER_SECOND", 10)?,
                webhook_burst: parse_or("RATE_LIMIT_WEBHOOKS_BURST", 50)?,
            },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                frontend_url: "http://localhost:3000".to_string(),
                app_url: "http://localhost:3000".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/gamelink.db".to_string(),
                max_connections: 5,
            },
            jwt: JwtConfig {
                secret: String::new(),
            },
            neynar: NeynarConfig {
                api_key: None,
                base_url: "https://api.neynar.com".to_string(),
                webhook_secret: None,
            },
            notifications: NotificationConfig {
                provider: NotificationProvider::Direct,
            },
            lifecycle: LifecycleConfig {
                live_window_minutes: 30,
                reminder_lead_minutes: 60,
                scheduler_interval_seconds: 60,
            },
            admin: AdminConfig { cron_secret: None },
            rate_limit: RateLimitConfig {
                webhook_per_second: 10,
                webhook_burst: 50,
            },
        }
    }
}
