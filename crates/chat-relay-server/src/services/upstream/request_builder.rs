use serde::Serialize;

use crate::config::CompletionSettings;
use crate::models::chat::{ConversationHistory, Turn};

pub const DEFAULT_MODEL: &str = "default-model";
pub const DEFAULT_TEMPERATURE: f32 = 0.5;
pub const DEFAULT_MAX_TOKENS: u32 = 100;
pub const DEFAULT_TOP_P: f32 = 1.0;
pub const DEFAULT_FREQUENCY_PENALTY: f32 = 0.0;
pub const DEFAULT_PRESENCE_PENALTY: f32 = 0.0;

/// Outbound payload for the chat completions endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub messages: Vec<Turn>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub stop: Vec<String>,
    pub stream: bool,
    pub model: String,
}

pub fn default_stop() -> Vec<String> {
    vec!["\n".to_string()]
}

/// Assemble the request from the current window; unset sampling fields take
/// the defaults above.
pub fn build(history: &ConversationHistory, settings: &CompletionSettings) -> CompletionRequest {
    CompletionRequest {
        messages: history.turns().to_vec(),
        temperature: settings.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        max_tokens: settings.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        top_p: settings.top_p.unwrap_or(DEFAULT_TOP_P),
        frequency_penalty: settings.frequency_penalty.unwrap_or(DEFAULT_FREQUENCY_PENALTY),
        presence_penalty: settings.presence_penalty.unwrap_or(DEFAULT_PRESENCE_PENALTY),
        stop: settings.stop.clone().unwrap_or_else(default_stop),
        stream: false,
        model: settings
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
    }
}
