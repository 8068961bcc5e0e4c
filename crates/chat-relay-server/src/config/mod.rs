pub mod settings;

pub use settings::{
    BackoffKind, CompletionSettings, ConversationConfig, LoggingConfig, RetentionConfig,
    ServerConfig, Settings, StorageBackend, StorageConfig, UpstreamConfig,
};
