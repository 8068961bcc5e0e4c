use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_UPSTREAM_ENDPOINT: &str = "http://localhost:8000/v1/chat/completions";

/// Flat deployment variables, mapped onto config keys
const LEGACY_VARS: &[(&str, &str)] = &[
    ("LOCAL_AI_ENDPOINT", "upstream.endpoint"),
    ("AI_MODEL_NAME", "completion.model"),
    ("AI_TEMPERATURE", "completion.temperature"),
    ("AI_MAX_TOKENS", "completion.max_tokens"),
    ("AI_TOP_P", "completion.top_p"),
    ("AI_FREQUENCY_PENALTY", "completion.frequency_penalty"),
    ("AI_PRESENCE_PENALTY", "completion.presence_penalty"),
];

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub completion: CompletionSettings,
    pub conversation: ConversationConfig,
    pub storage: StorageConfig,
    pub retention: RetentionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UpstreamConfig {
    pub endpoint: Option<String>,
    pub strict_endpoint: bool,
    pub timeout_seconds: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub backoff: BackoffKind,
}

impl UpstreamConfig {
    pub fn endpoint_url(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(DEFAULT_UPSTREAM_ENDPOINT)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Sampling parameters; unset fields fall back to the request builder defaults
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct CompletionSettings {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub stop: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ConversationConfig {
    pub history_limit: usize,
    pub greeting_enabled: bool,
    pub greeting_text: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_url: Option<String>,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetentionConfig {
    pub enabled: bool,
    pub max_age_hours: u64,
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub json: bool,
    pub directory: Option<String>,
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars().collect(), Some("config/settings"))
    }

    /// Layer defaults, an optional settings file, `APP__*` variables and the
    /// legacy flat variables (highest precedence) from `vars`.
    pub fn from_vars(vars: HashMap<String, String>, file: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("upstream.strict_endpoint", false)?
            .set_default("upstream.timeout_seconds", 180)?
            .set_default("upstream.max_attempts", 3)?
            .set_default("upstream.retry_delay_ms", 500)?
            .set_default("upstream.max_retry_delay_ms", 8000)?
            .set_default("upstream.backoff", "fixed")?
            .set_default("conversation.history_limit", 5)?
            .set_default("conversation.greeting_enabled", false)?
            .set_default("conversation.greeting_text", "Hello! How can I help you today?")?
            .set_default("storage.backend", "memory")?
            .set_default("storage.pool_max_size", 10)?
            .set_default("storage.pool_timeout_seconds", 5)?
            .set_default("retention.enabled", false)?
            .set_default("retention.max_age_hours", 24)?
            .set_default("retention.sweep_interval_seconds", 3600)?
            .set_default("logging.json", true)?;

        if let Some(path) = file {
            builder = builder.add_source(File::with_name(path).required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true)
                .source(Some(vars.clone())),
        );

        for (var, key) in LEGACY_VARS {
            let value = vars.get(*var).filter(|v| !v.trim().is_empty()).cloned();
            builder = builder.set_override_option(*key, value)?;
        }
        if let Some(raw) = vars.get("AI_STOP") {
            builder = builder.set_override("completion.stop", parse_stop_list(raw)?)?;
        }

        let settings: Settings = builder
            .build()?
            .try_deserialize()
            .context("Invalid configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.upstream.strict_endpoint && self.upstream.endpoint.is_none() {
            bail!("LOCAL_AI_ENDPOINT must be set when upstream.strict_endpoint is enabled");
        }
        if self.upstream.max_attempts == 0 {
            bail!("upstream.max_attempts must be at least 1");
        }
        if self.conversation.history_limit == 0 {
            bail!("conversation.history_limit must be at least 1");
        }
        if self.storage.backend == StorageBackend::Postgres && self.storage.database_url.is_none() {
            bail!("storage.database_url is required for the postgres backend");
        }
        Ok(())
    }
}

/// `AI_STOP` is either a JSON array of strings or one literal stop sequence
pub fn parse_stop_list(raw: &str) -> Result<Vec<String>> {
    if raw.trim_start().starts_with('[') {
        let stop: Vec<String> =
            serde_json::from_str(raw).context("AI_STOP must be a JSON array of strings")?;
        if stop.is_empty() {
            bail!("AI_STOP must list at least one stop sequence");
        }
        return Ok(stop);
    }
    // Unescape the common "\n" spelling used in .env files
    Ok(vec![raw.replace("\\n", "\n")])
}
