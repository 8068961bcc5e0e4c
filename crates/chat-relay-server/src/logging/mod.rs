//! Logging: tracing subscriber setup and the async activity log queue

mod logger;
mod telemetry;
pub mod types;

pub use logger::{ActivityLogger, ActivitySink, LoggerConfig, PgActivitySink, TracingSink};
pub use telemetry::init_telemetry;
pub use types::{ActivityLog, ActivityStatus, ActivityType};
