use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::models::chat::ConversationId;
use crate::services::ConversationOrchestrator;

const READINESS_PROBE_ID: &str = "__readiness_probe__";

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
}

pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// Ready once the history store answers a read
pub async fn readiness_check(
    State(orchestrator): State<Arc<ConversationOrchestrator>>,
) -> StatusCode {
    let Ok(probe) = ConversationId::parse(READINESS_PROBE_ID) else {
        return StatusCode::SERVICE_UNAVAILABLE;
    };

    match orchestrator.store().load(&probe).await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            warn!("Readiness check failed: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
