use serde_json::Value;

use super::client::CompletionResponse;
use crate::models::chat::{Role, Turn};
use crate::utils::error::ExtractionError;

/// Pull the assistant turn out of `choices[0].message`.
///
/// A missing `role` is read as assistant; `content` must be a string.
pub fn extract(response: &CompletionResponse) -> Result<Turn, ExtractionError> {
    let choice = response
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or(ExtractionError::MissingChoices)?;

    let message = choice
        .get("message")
        .and_then(Value::as_object)
        .ok_or(ExtractionError::MissingMessage)?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .ok_or(ExtractionError::MissingContent)?;

    match message.get("role") {
        None | Some(Value::Null) => {}
        Some(role) => match role.as_str().and_then(Role::parse) {
            Some(Role::Assistant) => {}
            _ => return Err(ExtractionError::UnexpectedRole(role.to_string())),
        },
    }

    Ok(Turn::assistant(content))
}
