use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chat_relay_server::build_router;
use chat_relay_server::config::{BackoffKind, CompletionSettings, ConversationConfig};
use chat_relay_server::logging::ActivityLogger;
use chat_relay_server::services::{
    ConversationOrchestrator, HttpTransport, InMemoryHistoryStore, RetryPolicy, UpstreamClient,
};
use chat_relay_server::state::AppState;

const COMPLETIONS: &str = "/v1/chat/completions";

fn conversation(greeting_enabled: bool) -> ConversationConfig {
    ConversationConfig {
        history_limit: 5,
        greeting_enabled,
        greeting_text: "Welcome!".to_string(),
    }
}

fn app(server: &MockServer, timeout: Duration, greeting_enabled: bool) -> Router {
    let transport = HttpTransport::new(format!("{}{}", server.uri(), COMPLETIONS), timeout)
        .expect("http client");
    let upstream = UpstreamClient::new(
        Arc::new(transport),
        RetryPolicy::new(3, Duration::ZERO, BackoffKind::Fixed),
    );
    let orchestrator = ConversationOrchestrator::new(
        Arc::new(InMemoryHistoryStore::new(5)),
        upstream,
        CompletionSettings::default(),
        &conversation(greeting_enabled),
        ActivityLogger::tracing_only(),
    );
    build_router(AppState::new(orchestrator))
}

fn completion(content: &str) -> Value {
    json!({
        "choices": [{"message": {"role": "assistant", "content": content}}]
    })
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Option<String>, Value) {
    let response = app.clone().oneshot(request).await.expect("router");
    let status = response.status();
    let conversation_id = response
        .headers()
        .get("x-conversation-id")
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, conversation_id, body)
}

fn post_chat(conversation_id: &str, payload: Value) -> Request<Body> {
    Request::post("/chat")
        .header("content-type", "application/json")
        .header("x-conversation-id", conversation_id)
        .body(Body::from(payload.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_chat_round_trip_updates_history() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS))
        .and(body_partial_json(json!({
            "messages": [{"role": "user", "content": "Hi"}],
            "stream": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Hello!")))
        .expect(1)
        .mount(&server)
        .await;
    let app = app(&server, Duration::from_secs(5), false);

    let (status, id, body) = send(&app, post_chat("c1", json!({"message": "Hi"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(id.as_deref(), Some("c1"));
    assert_eq!(
        body,
        json!({"status": "success", "messages": {"role": "assistant", "content": "Hello!"}})
    );

    let (status, _, body) = send(&app, get("/chat/history?conversation_id=c1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "status": "success",
            "history": [
                {"role": "user", "content": "Hi"},
                {"role": "assistant", "content": "Hello!"}
            ]
        })
    );
}

#[tokio::test]
async fn test_query_string_message_is_accepted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("pong")))
        .mount(&server)
        .await;
    let app = app(&server, Duration::from_secs(5), false);

    let (status, _, body) = send(&app, get("/chat?message=ping&conversation_id=q1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["messages"]["content"], "pong");
}

#[tokio::test]
async fn test_missing_id_gets_generated_one() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
        .mount(&server)
        .await;
    let app = app(&server, Duration::from_secs(5), false);

    let request = Request::post("/chat")
        .header("content-type", "application/json")
        .body(Body::from(json!({"message": "hello"}).to_string()))
        .unwrap();
    let (status, id, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);

    let id = id.expect("generated conversation id");
    assert!(uuid::Uuid::parse_str(&id).is_ok());

    let (_, _, body) = send(&app, get(&format!("/chat/history?conversation_id={}", id))).await;
    assert_eq!(body["history"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_upstream_timeout_returns_504_and_keeps_history() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("too late"))
                .set_delay(Duration::from_secs(2)),
        )
        .expect(3)
        .mount(&server)
        .await;
    let app = app(&server, Duration::from_millis(100), false);

    let (status, _, body) = send(&app, post_chat("slow", json!({"message": "Hi"}))).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["status"], "error");
    assert!(body["message"].is_string());

    let (_, _, body) = send(&app, get("/chat/history?conversation_id=slow")).await;
    assert_eq!(body["history"], json!([]));
}

#[tokio::test]
async fn test_upstream_failure_returns_500() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(3)
        .mount(&server)
        .await;
    let app = app(&server, Duration::from_secs(5), false);

    let (status, _, body) = send(&app, post_chat("down", json!({"message": "Hi"}))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], "error");
    // Upstream body stays in the logs
    assert!(!body["message"].as_str().unwrap().contains("overloaded"));
}

#[tokio::test]
async fn test_missing_message_never_reaches_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("unused")))
        .expect(0)
        .mount(&server)
        .await;
    let app = app(&server, Duration::from_secs(5), false);

    let (status, _, body) = send(&app, post_chat("v1", json!({}))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body,
        json!({"status": "error", "message": "The message field is required."})
    );

    let (status, _, _) = send(&app, post_chat("v1", json!({"message": 7}))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_greeting_short_circuits_first_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("second")))
        .expect(1)
        .mount(&server)
        .await;
    let app = app(&server, Duration::from_secs(5), true);

    let (_, _, body) = send(&app, post_chat("g1", json!({"message": "hello"}))).await;
    assert_eq!(body["messages"]["content"], "Welcome!");

    let (_, _, body) = send(&app, post_chat("g1", json!({"message": "again"}))).await;
    assert_eq!(body["messages"]["content"], "second");
}

#[tokio::test]
async fn test_concurrent_posts_keep_pairs_together() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("reply"))
                .set_delay(Duration::from_millis(20)),
        )
        .mount(&server)
        .await;
    let app = app(&server, Duration::from_secs(5), false);

    let requests = (0..4).map(|i| send(&app, post_chat("busy", json!({"message": format!("q{}", i)}))));
    for (status, _, _) in futures::future::join_all(requests).await {
        assert_eq!(status, StatusCode::OK);
    }

    let (_, _, body) = send(&app, get("/chat/history?conversation_id=busy")).await;
    let history = body["history"].as_array().unwrap();
    // Window of 5 after 8 turns: newest five, still alternating
    assert_eq!(history.len(), 5);
    assert_eq!(history[4]["role"], "assistant");
    for pair in history.windows(2) {
        assert_ne!(pair[0]["role"], pair[1]["role"]);
    }
}

#[tokio::test]
async fn test_health_endpoints() {
    let server = MockServer::start().await;
    let app = app(&server, Duration::from_secs(5), false);

    let (status, _, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, _, _) = send(&app, get("/health/ready")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_history_without_id_is_empty() {
    let server = MockServer::start().await;
    let app = app(&server, Duration::from_secs(5), false);

    let (status, _, body) = send(&app, get("/chat/history")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "success", "history": []}));
}
