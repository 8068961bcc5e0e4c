use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::{CompletionSettings, ConversationConfig};
use crate::logging::{ActivityLog, ActivityLogger, ActivityStatus, ActivityType};
use crate::models::chat::{ConversationHistory, ConversationId, Turn};
use crate::services::upstream::{extractor, request_builder, UpstreamClient};
use crate::utils::error::RelayError;

use super::history::HistoryStore;
use super::locks::ConversationLocks;

/// Progress of one exchange; on failure the last stage reached is logged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeStage {
    Idle,
    HistoryLoaded,
    RequestSent,
    ResponseExtracted,
    HistoryUpdated,
    Completed,
    Failed,
}

/// Coordinates one user message through history, upstream and back.
///
/// The user turn is never written on its own: it is committed together with
/// the assistant turn in a single `append_all`, so a failed exchange leaves
/// the stored history exactly as it was.
pub struct ConversationOrchestrator {
    store: Arc<dyn HistoryStore>,
    upstream: UpstreamClient,
    completion: CompletionSettings,
    greeting: Option<String>,
    locks: ConversationLocks,
    logger: ActivityLogger,
}

impl ConversationOrchestrator {
    pub fn new(
        store: Arc<dyn HistoryStore>,
        upstream: UpstreamClient,
        completion: CompletionSettings,
        conversation: &ConversationConfig,
        logger: ActivityLogger,
    ) -> Self {
        let greeting = conversation
            .greeting_enabled
            .then(|| conversation.greeting_text.clone());

        Self {
            store,
            upstream,
            completion,
            greeting,
            locks: ConversationLocks::new(),
            logger,
        }
    }

    /// Relay one user message and return the assistant's reply
    pub async fn handle(&self, id: &ConversationId, text: Option<&str>) -> Result<Turn, RelayError> {
        let start = Instant::now();
        let message = validate_message(text)?;

        self.logger.log(
            ActivityLog::builder(id.as_str(), ActivityType::RequestReceived)
                .message(message)
                .status(ActivityStatus::Info)
                .build(),
        );

        // Held across the whole round trip: same-conversation requests queue here
        let _guard = self.locks.acquire(id).await;

        let mut stage = ExchangeStage::Idle;
        let result = self.exchange(id, message, &mut stage).await;

        match &result {
            Ok(reply) => {
                info!(
                    "Exchange for {} completed in {}ms",
                    id,
                    start.elapsed().as_millis()
                );
                self.logger.log(
                    ActivityLog::builder(id.as_str(), ActivityType::MessageSent)
                        .response(reply.content.clone())
                        .processing_time(start.elapsed().as_millis())
                        .build(),
                );
            }
            Err(e) => {
                warn!(
                    "Exchange for {} went {:?} -> {:?}: {}",
                    id,
                    stage,
                    ExchangeStage::Failed,
                    e
                );
                self.logger.log(
                    ActivityLog::builder(id.as_str(), failure_activity(e))
                        .processing_time(start.elapsed().as_millis())
                        .error(e.to_string(), error_type(e))
                        .build(),
                );
            }
        }

        result
    }

    /// Current window for a conversation
    pub async fn history(&self, id: &ConversationId) -> Result<ConversationHistory, RelayError> {
        Ok(self.store.load(id).await?)
    }

    pub fn store(&self) -> &Arc<dyn HistoryStore> {
        &self.store
    }

    async fn exchange(
        &self,
        id: &ConversationId,
        message: &str,
        stage: &mut ExchangeStage,
    ) -> Result<Turn, RelayError> {
        let history = self.store.load(id).await?;
        *stage = ExchangeStage::HistoryLoaded;

        let user_turn = Turn::user(message);

        if history.is_empty() {
            if let Some(greeting) = &self.greeting {
                return self.greet(id, user_turn, greeting, stage).await;
            }
        }

        // Request over the window as it will look once the user turn lands;
        // the store itself is not touched until the reply is in hand
        let mut window = history.clone();
        window.push(user_turn.clone());
        let request = request_builder::build(&window, &self.completion);

        *stage = ExchangeStage::RequestSent;
        let outcome = self.upstream.send(&request).await;
        if outcome.attempts > 1 {
            self.logger.log(
                ActivityLog::builder(id.as_str(), ActivityType::UpstreamRetry)
                    .attempts(outcome.attempts)
                    .status(ActivityStatus::Warning)
                    .build(),
            );
        }
        let response = outcome.result?;

        // An unusable reply fails at this stage, not at RequestSent
        *stage = ExchangeStage::ResponseExtracted;
        let reply = extractor::extract(&response).map_err(|e| {
            error!(body = %response, "Unusable completion response for {}: {}", id, e);
            e
        })?;

        let overflows = history.len() + 2 > self.store.history_limit();
        let updated = self
            .store
            .append_all(id, vec![user_turn, reply.clone()])
            .await?;
        *stage = ExchangeStage::HistoryUpdated;

        if overflows {
            self.logger.log(
                ActivityLog::builder(id.as_str(), ActivityType::SlidingWindowEnforced)
                    .history_len(updated.len())
                    .status(ActivityStatus::Info)
                    .build(),
            );
        }

        *stage = ExchangeStage::Completed;
        Ok(reply)
    }

    /// First interaction with greeting enabled: answer locally, no upstream call
    async fn greet(
        &self,
        id: &ConversationId,
        user_turn: Turn,
        greeting: &str,
        stage: &mut ExchangeStage,
    ) -> Result<Turn, RelayError> {
        let reply = Turn::assistant(greeting);
        *stage = ExchangeStage::ResponseExtracted;

        self.store
            .append_all(id, vec![user_turn, reply.clone()])
            .await?;
        *stage = ExchangeStage::HistoryUpdated;

        self.logger.log(
            ActivityLog::builder(id.as_str(), ActivityType::GreetingReturned)
                .status(ActivityStatus::Info)
                .build(),
        );

        *stage = ExchangeStage::Completed;
        Ok(reply)
    }
}

fn validate_message(text: Option<&str>) -> Result<&str, RelayError> {
    match text {
        Some(message) if !message.trim().is_empty() => Ok(message),
        Some(_) => Err(RelayError::Validation("The message field must not be empty.".to_string())),
        None => Err(RelayError::Validation("The message field is required.".to_string())),
    }
}

fn failure_activity(error: &RelayError) -> ActivityType {
    match error {
        RelayError::Validation(_) => ActivityType::RequestReceived,
        RelayError::Upstream(_) => ActivityType::UpstreamError,
        RelayError::Extraction(_) => ActivityType::ExtractionError,
        RelayError::Persistence(_) => ActivityType::PersistenceError,
    }
}

fn error_type(error: &RelayError) -> &'static str {
    match error {
        RelayError::Validation(_) => "validation",
        RelayError::Upstream(e) => e.kind(),
        RelayError::Extraction(_) => "extraction",
        RelayError::Persistence(_) => "persistence",
    }
}
