use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::debug;

use crate::models::chat::{
    ChatOutcome, ChatParams, ConversationId, HistoryParams, HistoryResponse, OutcomeStatus,
};
use crate::services::ConversationOrchestrator;
use crate::utils::error::RelayError;

pub const CONVERSATION_ID_HEADER: HeaderName = HeaderName::from_static("x-conversation-id");

/// `GET|POST /chat`
///
/// `message` and `conversation_id` come from the JSON body or, failing that,
/// the query string. The `x-conversation-id` header wins over both. A caller
/// without an id gets a fresh one back in the same header.
pub async fn chat_handler(
    State(orchestrator): State<Arc<ConversationOrchestrator>>,
    headers: HeaderMap,
    query: Result<Query<ChatParams>, QueryRejection>,
    body: Bytes,
) -> Response {
    let params = match merge_params(query, &body) {
        Ok(params) => params,
        Err(e) => return e.into_response(),
    };

    let id = match resolve_conversation_id(&headers, params.conversation_id.as_deref()) {
        Ok(Some(id)) => id,
        Ok(None) => {
            let id = ConversationId::generate();
            debug!("No conversation id supplied, assigned {}", id);
            id
        }
        Err(e) => return e.into_response(),
    };

    let result = orchestrator.handle(&id, params.message.as_deref()).await;
    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err(e) => e.status_code(),
    };
    let mut response = (status, Json(ChatOutcome::from(&result))).into_response();

    if let Ok(value) = HeaderValue::from_str(id.as_str()) {
        response.headers_mut().insert(CONVERSATION_ID_HEADER, value);
    }
    response
}

/// `GET /chat/history`
pub async fn history_handler(
    State(orchestrator): State<Arc<ConversationOrchestrator>>,
    headers: HeaderMap,
    query: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Json<HistoryResponse>, RelayError> {
    let Query(params) = query.map_err(|e| RelayError::Validation(e.body_text()))?;

    // Unknown caller: nothing stored yet
    let history = match resolve_conversation_id(&headers, params.conversation_id.as_deref())? {
        Some(id) => orchestrator.history(&id).await?.into_turns(),
        None => Vec::new(),
    };

    Ok(Json(HistoryResponse {
        status: OutcomeStatus::Success,
        history,
    }))
}

fn merge_params(
    query: Result<Query<ChatParams>, QueryRejection>,
    body: &Bytes,
) -> Result<ChatParams, RelayError> {
    let Query(query) = query.map_err(|e| RelayError::Validation(e.body_text()))?;

    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(query);
    }

    let from_body: ChatParams = serde_json::from_slice(body)
        .map_err(|e| RelayError::Validation(format!("Invalid JSON body: {}", e)))?;

    Ok(ChatParams {
        message: from_body.message.or(query.message),
        conversation_id: from_body.conversation_id.or(query.conversation_id),
    })
}

fn resolve_conversation_id(
    headers: &HeaderMap,
    fallback: Option<&str>,
) -> Result<Option<ConversationId>, RelayError> {
    let from_header = headers
        .get(&CONVERSATION_ID_HEADER)
        .map(|v| {
            v.to_str()
                .map_err(|_| RelayError::Validation("conversation id header is not valid text".to_string()))
        })
        .transpose()?;

    from_header
        .or(fallback)
        .map(ConversationId::parse)
        .transpose()
}
