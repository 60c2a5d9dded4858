//! Background task that prunes expired sessions and single-use tokens.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::db::{sessions, tokens, DbPool};

#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// How often to prune (default: 1 hour)
    pub interval: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
        }
    }
}

impl CleanupConfig {
    pub fn from_env() -> Self {
        Self::from_interval_var(std::env::var("CLEANUP_INTERVAL_SECS").ok().as_deref())
    }

    /// Zero or unparsable values keep the default interval.
    fn from_interval_var(raw: Option<&str>) -> Self {
        match raw.and_then(|s| s.trim().parse::<u64>().ok()) {
            Some(secs) if secs > 0 => Self {
                interval: Duration::from_secs(secs),
            },
            _ => Self::default(),
        }
    }
}

pub async fn start_cleanup_task(pool: DbPool) {
    let config = CleanupConfig::from_env();

    tracing::info!("Starting cleanup task (interval: {:?})", config.interval);

    loop {
        if let Err(e) = run_cleanup_cycle(&pool).await {
            tracing::error!("Cleanup cycle failed: {:?}", e);
        }

        tokio::time::sleep(config.interval).await;
    }
}

async fn run_cleanup_cycle(pool: &DbPool) -> Result<()> {
    let mut conn = pool.get().await.context("Failed to get DB connection")?;
    let now = Utc::now();

    let expired_sessions = sessions::delete_expired(&mut conn, now)
        .await
        .context("Failed to delete expired sessions")?;
    let expired_tokens = tokens::delete_expired(&mut conn, now)
        .await
        .context("Failed to delete expired tokens")?;

    if expired_sessions > 0 || expired_tokens > 0 {
        tracing::info!(
            "Pruned {} expired sessions and {} expired tokens",
            expired_sessions,
            expired_tokens
        );
    } else {
        tracing::debug!("Nothing to prune");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_from_env_value() {
        let default = CleanupConfig::default().interval;
        assert_eq!(default, Duration::from_secs(3600));

        assert_eq!(
            CleanupConfig::from_interval_var(Some("120")).interval,
            Duration::from_secs(120)
        );
        assert_eq!(CleanupConfig::from_interval_var(Some("0")).interval, default);
        assert_eq!(CleanupConfig::from_interval_var(Some("soon")).interval, default);
        assert_eq!(CleanupConfig::from_interval_var(None).interval, default);
    }
}
