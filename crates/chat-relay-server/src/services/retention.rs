use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::RetentionConfig;
use crate::logging::{ActivityLog, ActivityLogger, ActivityType};
use crate::services::conversation::HistoryStore;
use crate::utils::error::PersistenceError;

/// Deletes stored turns older than the retention age
#[derive(Clone)]
pub struct RetentionSweeper {
    store: Arc<dyn HistoryStore>,
    max_age: ChronoDuration,
    interval: Duration,
    logger: Option<ActivityLogger>,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn HistoryStore>, max_age: ChronoDuration, interval: Duration) -> Self {
        Self {
            store,
            max_age,
            interval,
            logger: None,
        }
    }

    pub fn from_config(store: Arc<dyn HistoryStore>, config: &RetentionConfig) -> Self {
        Self::new(
            store,
            ChronoDuration::hours(config.max_age_hours as i64),
            Duration::from_secs(config.sweep_interval_seconds.max(1)),
        )
    }

    pub fn with_logger(mut self, logger: ActivityLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.max_age
    }

    /// One sweep relative to `now`
    pub async fn purge_once(&self, now: DateTime<Utc>) -> Result<u64, PersistenceError> {
        let cutoff = self.cutoff(now);
        let deleted = self.store.delete_created_before(cutoff).await?;
        info!("Deleted {} old turns (created before {})", deleted, cutoff);

        if let Some(logger) = &self.logger {
            logger.log(
                ActivityLog::builder("*", ActivityType::RecordsPurged)
                    .history_len(deleted as usize)
                    .message(format!("cutoff={}", cutoff))
                    .build(),
            );
        }
        Ok(deleted)
    }

    /// Sweep on a fixed interval until the task is aborted
    pub fn spawn(self) -> JoinHandle<()> {
        info!(
            "Retention sweeper started: max_age={}h, interval={:?}",
            self.max_age.num_hours(),
            self.interval
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.purge_once(Utc::now()).await {
                    error!("Retention sweep failed: {}", e);
                }
            }
        })
    }
}
