use anyhow::Result;
use async_trait::async_trait;
use flume::{bounded, Receiver, Sender};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::types::ActivityLog;

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Queue capacity (max logs in memory before backpressure)
    pub queue_capacity: usize,

    /// Batch size per flush
    pub batch_size: usize,

    /// Max wait time before flushing batch (milliseconds)
    pub batch_timeout_ms: u64,

    pub worker_count: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            batch_size: 100,
            batch_timeout_ms: 1000,
            worker_count: 2,
        }
    }
}

/// Destination of flushed activity batches
#[async_trait]
pub trait ActivitySink: Send + Sync {
    async fn write_batch(&self, logs: &[ActivityLog]) -> Result<usize>;
}

/// Emits every activity as a structured `tracing` event
pub struct TracingSink;

#[async_trait]
impl ActivitySink for TracingSink {
    async fn write_batch(&self, logs: &[ActivityLog]) -> Result<usize> {
        for log in logs {
            info!(
                target: "chat_relay_server::activity",
                conversation_id = %log.conversation_id,
                activity = log.activity_type.as_str(),
                status = log.activity_status.as_str(),
                history_len = log.history_len,
                attempts = log.attempts,
                processing_time_ms = log.processing_time_ms,
                error_type = log.error_type.as_deref(),
                error = log.error_message.as_deref(),
                created_at = %log.created_at,
                "activity"
            );
        }
        Ok(logs.len())
    }
}

/// Batch insert into `relay_activity_logs`
pub struct PgActivitySink {
    pool: PgPool,
}

impl PgActivitySink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS relay_activity_logs (
                id BIGSERIAL PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                activity_type TEXT NOT NULL,
                activity_status TEXT NOT NULL,
                message_content TEXT,
                response_content TEXT,
                history_len INTEGER,
                attempts INTEGER,
                processing_time_ms BIGINT,
                error_message TEXT,
                error_type TEXT,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ActivitySink for PgActivitySink {
    async fn write_batch(&self, logs: &[ActivityLog]) -> Result<usize> {
        let mut query_builder = sqlx::QueryBuilder::new(
            r#"
            INSERT INTO relay_activity_logs (
                conversation_id, activity_type, activity_status,
                message_content, response_content, history_len,
                attempts, processing_time_ms, error_message, error_type, created_at
            )
            "#,
        );

        query_builder.push_values(logs, |mut b, log| {
            b.push_bind(&log.conversation_id)
                .push_bind(log.activity_type.as_str())
                .push_bind(log.activity_status.as_str())
                .push_bind(&log.message_content)
                .push_bind(&log.response_content)
                .push_bind(log.history_len)
                .push_bind(log.attempts)
                .push_bind(log.processing_time_ms)
                .push_bind(&log.error_message)
                .push_bind(&log.error_type)
                .push_bind(log.created_at);
        });

        let result = query_builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected() as usize)
    }
}

/// Async activity logger with queue mechanism
#[derive(Clone)]
pub struct ActivityLogger {
    sender: Sender<ActivityLog>,
}

impl ActivityLogger {
    /// Initialize logger with background workers
    pub fn new(sink: Arc<dyn ActivitySink>, config: LoggerConfig) -> Self {
        let (sender, receiver) = bounded(config.queue_capacity.max(1));

        info!(
            "Initializing ActivityLogger: queue={}, batch={}, timeout={}ms, workers={}",
            config.queue_capacity, config.batch_size, config.batch_timeout_ms, config.worker_count
        );

        for worker_id in 0..config.worker_count.max(1) {
            let sink = sink.clone();
            let receiver = receiver.clone();
            let config = config.clone();

            tokio::spawn(async move {
                Self::worker_loop(worker_id, sink, receiver, config).await;
            });
        }

        Self { sender }
    }

    /// Logger whose entries only go to `tracing`
    pub fn tracing_only() -> Self {
        Self::new(Arc::new(TracingSink), LoggerConfig::default())
    }

    /// Log activity (non-blocking, fire-and-forget)
    pub fn log(&self, activity: ActivityLog) {
        if let Err(e) = self.sender.try_send(activity) {
            warn!("Failed to enqueue activity log (queue full?): {}", e);
        }
    }

    async fn worker_loop(
        worker_id: usize,
        sink: Arc<dyn ActivitySink>,
        receiver: Receiver<ActivityLog>,
        config: LoggerConfig,
    ) {
        debug!("Activity worker {} started", worker_id);

        let mut batch: Vec<ActivityLog> = Vec::with_capacity(config.batch_size);
        let batch_timeout = Duration::from_millis(config.batch_timeout_ms);

        loop {
            // Block for the first entry, then collect until the batch fills or times out
            match receiver.recv_async().await {
                Ok(log) => batch.push(log),
                Err(_) => {
                    debug!("Activity worker {} shutting down (channel closed)", worker_id);
                    return;
                }
            }

            let deadline = tokio::time::Instant::now() + batch_timeout;
            let mut closed = false;
            while batch.len() < config.batch_size {
                match tokio::time::timeout_at(deadline, receiver.recv_async()).await {
                    Ok(Ok(log)) => batch.push(log),
                    Ok(Err(_)) => {
                        closed = true;
                        break;
                    }
                    Err(_) => break,
                }
            }

            Self::flush_batch(sink.as_ref(), &batch, worker_id).await;
            batch.clear();

            if closed {
                debug!("Activity worker {} shutting down (channel closed)", worker_id);
                return;
            }
        }
    }

    async fn flush_batch(sink: &dyn ActivitySink, batch: &[ActivityLog], worker_id: usize) {
        let start = std::time::Instant::now();

        match sink.write_batch(batch).await {
            Ok(written) => {
                debug!(
                    "Worker {} flushed {} activity logs in {:?}",
                    worker_id,
                    written,
                    start.elapsed()
                );
            }
            Err(e) => {
                error!("Worker {} failed to flush activity batch: {}", worker_id, e);
            }
        }
    }
}
