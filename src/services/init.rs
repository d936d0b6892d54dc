//! Initialization helpers for the application:
//! - database connection + migrations
//! - Neynar client and notification provider selection
//! - background worker spawn helpers

use std::{path::Path, sync::Arc};

use anyhow::Result;

use crate::config::{Config, NotificationProvider};
use crate::services::neynar::NeynarClient;
use crate::services::notifications::{DirectNotifier, NeynarNotifier, Notifier};
use crate::services::scheduler::SchedulerService;

/// Redact potentially sensitive information from a database URL before logging.
///
/// Attempts to parse the URL and remove userinfo (username:password) components.
/// Falls back to removing everything before '@' or returning "(redacted)".
pub fn redact_db_url(db_url: &str) -> String {
    if let Ok(url) = url::Url::parse(db_url) {
        let host = url.host_str().unwrap_or("");
        let port_part = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
        format!("{}://{}{}{}", url.scheme(), host, port_part, url.path())
    } else if let Some(at_pos) = db_url.find('@') {
        format!("(redacted){}", &db_url[at_pos + 1..])
    } else {
        "(redacted)".to_string()
    }
}

/// Open the SQLite pool (creating the file and its directory) and run migrations.
pub async fn init_db(config: &Config) -> Result<sqlx::SqlitePool> {
    let db_url = &config.database.url;
    tracing::info!("Connecting to database: {}", redact_db_url(db_url));

    let db_path = db_url.strip_prefix("sqlite://").unwrap_or(db_url);
    let db_file_path = Path::new(db_path);

    if let Some(parent) = db_file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                )
            })?;
        }
    }

    let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(connect_options)
        .await?;

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Build the Neynar client when an API key is configured.
pub fn init_neynar(config: &Config) -> Result<Option<NeynarClient>> {
    match config.neynar.api_key.as_deref() {
        Some(key) => Ok(Some(NeynarClient::new(key, &config.neynar.base_url)?)),
        None => {
            tracing::warn!("NEYNAR_API_KEY not set; profile sync and mutuals are unavailable");
            Ok(None)
        }
    }
}

/// Warn when webhook bodies will be accepted unsigned. Returns whether they are verified.
pub fn check_webhook_secret(config: &Config) -> bool {
    let verified = config.neynar.webhook_secret.is_some();
    if !verified {
        tracing::warn!(
            "NEYNAR_WEBHOOK_SECRET not set; /webhooks accepts unsigned events and anyone can change notification tokens"
        );
    }
    verified
}

/// Pick the push provider named by the configuration.
pub fn init_notifier(
    config: &Config,
    neynar: Option<&NeynarClient>,
    pool: &sqlx::SqlitePool,
) -> Result<Arc<dyn Notifier>> {
    let notifier: Arc<dyn Notifier> = match (config.notifications.provider, neynar) {
        (NotificationProvider::Neynar, Some(client)) => Arc::new(NeynarNotifier::new(client.clone())),
        (NotificationProvider::Neynar, None) => {
            anyhow::bail!("Neynar notifications selected but no Neynar client is configured")
        }
        (NotificationProvider::Direct, _) => Arc::new(DirectNotifier::new(pool.clone())?),
    };
    tracing::info!("Notification provider: {}", notifier.provider());
    Ok(notifier)
}

/// Spawn background workers. Currently the event scheduler, when
/// `SCHEDULER_INTERVAL_SECONDS` is non-zero.
///
/// Returns the `JoinHandle`s so callers can await shutdown. Each worker
/// listens for a shutdown notification on the broadcast channel.
pub fn spawn_background_workers(
    state: Arc<crate::AppState>,
    shutdown: tokio::sync::broadcast::Sender<()>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    let interval = state.config.lifecycle.scheduler_interval_seconds;
    if interval == 0 {
        tracing::info!("In-process scheduler disabled; rely on POST /api/cron/scheduler");
        return handles;
    }

    let mut shutdown_rx = shutdown.subscribe();
    handles.push(tokio::spawn(async move {
        loop {
            if let Err(e) = SchedulerService::tick(&state, chrono::Utc::now()).await {
                tracing::warn!("Scheduler tick failed: {:?}", e);
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Scheduler worker shutting down");
                    break;
                }
                _ = tokio::time::sleep(std::time::Duration::from_secs(interval)) => {}
            }
        }
    }));

    handles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_credentials() {
        assert_eq!(
            redact_db_url("postgres://user:pw@db:5432/app"),
            "postgres://db:5432/app"
        );
        assert!(!redact_db_url("sqlite://data/gamelink.db").contains('@'));
    }

    #[test]
    fn webhook_secret_check() {
        let mut config = Config::default();
        assert!(!check_webhook_secret(&config));
        config.neynar.webhook_secret = Some("s".to_string());
        assert!(check_webhook_secret(&config));
    }

    #[tokio::test]
    async fn neynar_provider_requires_client() {
        let pool = crate::db::test_pool().await;
        let mut config = Config::default();
        config.notifications.provider = NotificationProvider::Neynar;
        assert!(init_notifier(&config, None, &pool).is_err());

        config.notifications.provider = NotificationProvider::Direct;
        let notifier = init_notifier(&config, None, &pool).unwrap();
        assert_eq!(notifier.provider(), "direct");
    }
}
