use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Activity type categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    RequestReceived,      // User message accepted for relay
    GreetingReturned,     // First interaction answered without upstream
    MessageSent,          // Assistant reply returned and committed
    UpstreamRetry,
    UpstreamError,
    ExtractionError,
    PersistenceError,
    SlidingWindowEnforced,
    RecordsPurged,
}

impl ActivityType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::RequestReceived => "request_received",
            Self::GreetingReturned => "greeting_returned",
            Self::MessageSent => "message_sent",
            Self::UpstreamRetry => "upstream_retry",
            Self::UpstreamError => "upstream_error",
            Self::ExtractionError => "extraction_error",
            Self::PersistenceError => "persistence_error",
            Self::SlidingWindowEnforced => "sliding_window_enforced",
            Self::RecordsPurged => "records_purged",
        }
    }
}

/// Activity status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Success,
    Error,
    Warning,
    Info,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

/// Complete activity log entry
#[derive(Debug, Clone)]
pub struct ActivityLog {
    pub conversation_id: String,

    // Activity
    pub activity_type: ActivityType,
    pub activity_status: ActivityStatus,

    // Context
    pub message_content: Option<String>,
    pub response_content: Option<String>,
    pub history_len: Option<i32>,

    // Performance
    pub attempts: Option<i32>,
    pub processing_time_ms: Option<i64>,

    // Error
    pub error_message: Option<String>,
    pub error_type: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl ActivityLog {
    /// Create builder for fluent API
    pub fn builder(conversation_id: impl Into<String>, activity_type: ActivityType) -> ActivityLogBuilder {
        ActivityLogBuilder::new(conversation_id.into(), activity_type)
    }
}

/// Builder pattern for ActivityLog
pub struct ActivityLogBuilder {
    log: ActivityLog,
}

impl ActivityLogBuilder {
    pub fn new(conversation_id: String, activity_type: ActivityType) -> Self {
        Self {
            log: ActivityLog {
                conversation_id,
                activity_type,
                activity_status: ActivityStatus::Success,
                message_content: None,
                response_content: None,
                history_len: None,
                attempts: None,
                processing_time_ms: None,
                error_message: None,
                error_type: None,
                created_at: Utc::now(),
            },
        }
    }

    pub fn status(mut self, status: ActivityStatus) -> Self {
        self.log.activity_status = status;
        self
    }

    pub fn message(mut self, content: impl Into<String>) -> Self {
        self.log.message_content = Some(content.into());
        self
    }

    pub fn response(mut self, content: impl Into<String>) -> Self {
        self.log.response_content = Some(content.into());
        self
    }

    pub fn history_len(mut self, len: usize) -> Self {
        self.log.history_len = Some(len as i32);
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.log.attempts = Some(attempts as i32);
        self
    }

    pub fn processing_time(mut self, ms: u128) -> Self {
        self.log.processing_time_ms = Some(ms as i64);
        self
    }

    pub fn error(mut self, message: impl Into<String>, error_type: impl Into<String>) -> Self {
        self.log.error_message = Some(message.into());
        self.log.error_type = Some(error_type.into());
        self.log.activity_status = ActivityStatus::Error;
        self
    }

    pub fn build(self) -> ActivityLog {
        self.log
    }
}
