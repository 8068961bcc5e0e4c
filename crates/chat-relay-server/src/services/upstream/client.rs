use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

use super::request_builder::CompletionRequest;
use super::retry::{RetryOutcome, RetryPolicy};
use crate::config::UpstreamConfig;
use crate::utils::error::UpstreamError;

/// Opaque upstream payload; only `choices[0].message` is interpreted
pub type CompletionResponse = Value;

/// Exactly one call to the completion endpoint, no retries
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    async fn send_once(&self, request: &CompletionRequest) -> Result<CompletionResponse, UpstreamError>;
}

/// reqwest-backed transport with a per-attempt timeout
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_config(config: &UpstreamConfig) -> Result<Self, reqwest::Error> {
        Self::new(config.endpoint_url(), config.timeout())
    }
}

#[async_trait]
impl UpstreamTransport for HttpTransport {
    async fn send_once(&self, request: &CompletionRequest) -> Result<CompletionResponse, UpstreamError> {
        debug!(
            "POST {} with {} messages (model={})",
            self.endpoint,
            request.messages.len(),
            request.model
        );

        let response = self.client.post(&self.endpoint).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::HttpError {
                status: status.as_u16(),
                body,
            });
        }

        // Body read can still time out; a 2xx body that is not JSON counts as a failed attempt
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            UpstreamError::Unknown(format!("undecodable response body ({}): {}", e, body))
        })
    }
}

/// Completion endpoint client: transport + retry policy
#[derive(Clone)]
pub struct UpstreamClient {
    transport: Arc<dyn UpstreamTransport>,
    policy: RetryPolicy,
}

impl UpstreamClient {
    pub fn new(transport: Arc<dyn UpstreamTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Every failure kind is retried; only a decoded 2xx response stops early
    pub fn is_retryable(error: &UpstreamError) -> bool {
        matches!(
            error,
            UpstreamError::Timeout
                | UpstreamError::ConnectionFailed(_)
                | UpstreamError::HttpError { .. }
                | UpstreamError::Unknown(_)
        )
    }

    pub async fn send(
        &self,
        request: &CompletionRequest,
    ) -> RetryOutcome<CompletionResponse, UpstreamError> {
        let start = Instant::now();
        let outcome = self
            .policy
            .run(
                |attempt| {
                    let transport = self.transport.clone();
                    async move {
                        debug!("Upstream attempt {}", attempt);
                        transport.send_once(request).await
                    }
                },
                Self::is_retryable,
            )
            .await;

        match &outcome.result {
            Ok(_) => debug!(
                "Upstream call succeeded after {} attempt(s) in {:?}",
                outcome.attempts,
                start.elapsed()
            ),
            // Raw status and body are for diagnostics only, never returned to callers
            Err(UpstreamError::HttpError { status, body }) => error!(
                kind = "http_error",
                upstream_status = *status,
                upstream_body = %body,
                "Upstream call failed after {} attempt(s) in {:?}",
                outcome.attempts,
                start.elapsed()
            ),
            Err(e) => error!(
                kind = e.kind(),
                "Upstream call failed after {} attempt(s) in {:?}: {}",
                outcome.attempts,
                start.elapsed(),
                e
            ),
        }
        outcome
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedTransport;
    use super::*;
    use crate::config::{BackoffKind, CompletionSettings};
    use crate::models::chat::{ConversationHistory, Turn};
    use crate::services::upstream::request_builder;
    use crate::services::upstream::retry::testing::RecordingSleeper;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> CompletionRequest {
        let history = ConversationHistory::from_turns([Turn::user("hi")], 5);
        request_builder::build(&history, &CompletionSettings::default())
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(500), BackoffKind::Fixed)
            .with_sleeper(Arc::new(RecordingSleeper::default()))
    }

    fn reply() -> Value {
        json!({"choices": [{"message": {"role": "assistant", "content": "hello"}}]})
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(UpstreamError::ConnectionFailed("refused".into())),
            Err(UpstreamError::HttpError { status: 503, body: "busy".into() }),
            Ok(reply()),
        ]));
        let client = UpstreamClient::new(transport.clone(), fast_policy());

        let outcome = client.send(&request()).await;
        assert_eq!(outcome.result, Ok(reply()));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_surfaces_last_error() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(UpstreamError::ConnectionFailed("refused".into())),
            Err(UpstreamError::ConnectionFailed("refused".into())),
            Err(UpstreamError::Timeout),
        ]));
        let client = UpstreamClient::new(transport.clone(), fast_policy());

        let outcome = client.send(&request()).await;
        assert_eq!(outcome.result, Err(UpstreamError::Timeout));
        assert_eq!(transport.calls(), 3);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[tokio::test]
    async fn test_final_http_error_logs_status_and_body() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let failure = || {
            Err(UpstreamError::HttpError {
                status: 502,
                body: "model runner crashed: CUDA OOM".into(),
            })
        };
        let transport = Arc::new(ScriptedTransport::new(vec![failure(), failure(), failure()]));
        let client = UpstreamClient::new(transport, fast_policy());

        let outcome = client.send(&request()).await;
        assert!(matches!(outcome.result, Err(UpstreamError::HttpError { status: 502, .. })));

        let output = logs.contents();
        assert!(output.contains("upstream_status=502"), "{}", output);
        assert!(output.contains("model runner crashed: CUDA OOM"), "{}", output);
    }

    #[tokio::test]
    async fn test_http_transport_posts_wire_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({
                "messages": [{"role": "user", "content": "hi"}],
                "stream": false,
                "model": "default-model",
                "max_tokens": 100
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply()))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(
            format!("{}/v1/chat/completions", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap();

        let response = transport.send_once(&request()).await.unwrap();
        assert_eq!(response, reply());
    }

    #[tokio::test]
    async fn test_http_transport_captures_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(server.uri(), Duration::from_secs(5)).unwrap();
        let err = transport.send_once(&request()).await.unwrap_err();
        assert_eq!(
            err,
            UpstreamError::HttpError {
                status: 502,
                body: "bad gateway".into()
            }
        );
    }

    #[tokio::test]
    async fn test_http_transport_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(reply())
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let transport = HttpTransport::new(server.uri(), Duration::from_millis(50)).unwrap();
        let err = transport.send_once(&request()).await.unwrap_err();
        assert_eq!(err, UpstreamError::Timeout);
    }

    #[tokio::test]
    async fn test_http_transport_undecodable_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(server.uri(), Duration::from_secs(5)).unwrap();
        let err = transport.send_once(&request()).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Unknown(_)));
    }

    #[tokio::test]
    async fn test_http_transport_connection_refused() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new(format!("http://{}", addr), Duration::from_secs(5)).unwrap();
        let err = transport.send_once(&request()).await.unwrap_err();
        assert!(matches!(err, UpstreamError::ConnectionFailed(_)), "{:?}", err);
    }
}
