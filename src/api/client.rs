//! reqwest-backed streaming client for `/chat/completions`.

use super::retry::RetryPolicy;
use super::sse::{parse_chunk_payload, SseDecoder, StreamEvent};
use super::{ChunkStream, ModelClient};
use crate::config::ModelConfig;
use crate::error::ApiError;
use crate::types::{ChatRequest, StreamChunk};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, ACCEPT, RETRY_AFTER};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// Buffered chunks between the network reader task and the consumer.
const STREAM_BUFFER: usize = 64;

/// Client for OpenAI-compatible model APIs.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    /// Bound on waiting for response headers and on gaps between body reads.
    idle_timeout: Duration,
    retry_policy: RetryPolicy,
}

impl ApiClient {
    /// Build a client from resolved model configuration.
    pub fn new(config: &ModelConfig, timeout: Duration) -> Self {
        Self::new_with_retry_policy(config, timeout, RetryPolicy::default())
    }

    fn new_with_retry_policy(
        config: &ModelConfig,
        timeout: Duration,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            http: build_http_client(timeout),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.trim().to_string(),
            idle_timeout: timeout,
            retry_policy,
        }
    }

    /// Open a streaming completion and return its chunks.
    ///
    /// Transient failures are retried until the response headers arrive. After
    /// that, body errors are delivered through the stream.
    pub async fn stream_chat(&self, request: &ChatRequest) -> Result<ChunkStream, ApiError> {
        let response = self.open_stream_with_retries(request).await?;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(pump_stream(response, tx, self.idle_timeout));
        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<reqwest::Response, ApiError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut body = request.clone();
        body.stream = true;

        let mut builder = self
            .http
            .post(&url)
            .header(ACCEPT, "text/event-stream")
            .json(&body);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let response = timeout(self.idle_timeout, builder.send())
            .await
            .map_err(|_| {
                ApiError::InvalidResponse(format!(
                    "no response headers from {url} within {:?}",
                    self.idle_timeout
                ))
            })??;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after_secs = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::status(status.as_u16(), body, retry_after_secs))
    }

    async fn open_stream_with_retries(
        &self,
        request: &ChatRequest,
    ) -> Result<reqwest::Response, ApiError> {
        let mut attempt: u32 = 0;
        loop {
            match self.open_stream(request).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if !self.retry_policy.should_retry(&err, attempt) {
                        return Err(err);
                    }
                    let delay = self.retry_policy.retry_delay_for(attempt, &err);
                    warn!(attempt, ?delay, error = %err, "model request failed, retrying");
                    attempt = attempt.saturating_add(1);
                    sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl ModelClient for ApiClient {
    async fn stream_chat(&self, request: &ChatRequest) -> Result<ChunkStream, ApiError> {
        ApiClient::stream_chat(self, request).await
    }
}

/// Build an HTTP client. Only the connect phase is bounded here; streamed
/// bodies are bounded per read in [`pump_stream`].
fn build_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// `Retry-After` as delta-seconds or an HTTP-date. Dates in the past yield `None`.
fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse() {
        return Some(secs);
    }
    let at = httpdate::parse_http_date(value).ok()?;
    at.duration_since(SystemTime::now())
        .ok()
        .map(|wait| wait.as_secs().max(1))
}

/// Read the response body, decode SSE frames, and forward chunks until
/// `[DONE]`, end of body, the first error, or the receiver going away.
async fn pump_stream(
    response: reqwest::Response,
    tx: mpsc::Sender<Result<StreamChunk, ApiError>>,
    idle_timeout: Duration,
) {
    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::new();
    loop {
        let next = match timeout(idle_timeout, body.next()).await {
            Ok(next) => next,
            Err(_) => {
                let _ = tx
                    .send(Err(ApiError::InvalidResponse(format!(
                        "stream idle for more than {idle_timeout:?}"
                    ))))
                    .await;
                return;
            }
        };
        let (payloads, finished) = match next {
            Some(Ok(bytes)) => (decoder.push(&bytes), false),
            Some(Err(err)) => {
                let _ = tx.send(Err(ApiError::Http(err))).await;
                return;
            }
            None => (decoder.finish().into_iter().collect(), true),
        };

        for payload in payloads {
            let item = match parse_chunk_payload(&payload) {
                Ok(StreamEvent::Chunk(chunk)) => Ok(chunk),
                Ok(StreamEvent::Ignored) => continue,
                Ok(StreamEvent::Done) => return,
                Err(err) => Err(err),
            };
            let is_err = item.is_err();
            if tx.send(item).await.is_err() {
                debug!("stream consumer dropped, abandoning response body");
                return;
            }
            if is_err {
                return;
            }
        }
        if finished {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::{sse_data_block, sse_done_block};
    use crate::types::Message;
    use axum::extract::State;
    use axum::http::{HeaderMap as AxumHeaders, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeProvider {
        responses: Mutex<VecDeque<(StatusCode, String)>>,
        hits: AtomicUsize,
        last_body: Mutex<Option<Value>>,
        last_auth: Mutex<Option<String>>,
    }

    async fn completions(
        State(provider): State<Arc<FakeProvider>>,
        headers: AxumHeaders,
        Json(body): Json<Value>,
    ) -> Response {
        provider.hits.fetch_add(1, Ordering::SeqCst);
        *provider.last_body.lock().unwrap() = Some(body);
        *provider.last_auth.lock().unwrap() = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let (status, body) = provider
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((StatusCode::INTERNAL_SERVER_ERROR, "exhausted".into()));
        (status, [("content-type", "text/event-stream")], body).into_response()
    }

    async fn spawn_provider(responses: Vec<(StatusCode, String)>) -> (String, Arc<FakeProvider>) {
        let provider = Arc::new(FakeProvider {
            responses: Mutex::new(responses.into()),
            ..FakeProvider::default()
        });
        let app = Router::new()
            .route("/v1/chat/completions", post(completions))
            .with_state(provider.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}/v1/"), provider)
    }

    fn client_for(base_url: String) -> ApiClient {
        let config = ModelConfig {
            base_url,
            api_key: "test-key".into(),
            model: "dummy-model".into(),
            ..ModelConfig::default()
        };
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            ..RetryPolicy::default()
        };
        ApiClient::new_with_retry_policy(&config, Duration::from_secs(5), policy)
    }

    fn request() -> ChatRequest {
        ChatRequest {
            model: "dummy-model".into(),
            messages: vec![Message::user("hello")],
            tools: None,
            temperature: None,
            stream: false,
        }
    }

    fn chunk_json(delta: Value) -> String {
        sse_data_block(&json!({"choices": [{"index": 0, "delta": delta}]}).to_string())
    }

    #[tokio::test]
    async fn streams_chunks_until_done() {
        let body = format!(
            ": keepalive\n\n{}{}{}{}",
            chunk_json(json!({"role": "assistant", "content": "Hel"})),
            chunk_json(json!({"content": "lo"})),
            sse_data_block(r#"{"choices":[],"usage":{"total_tokens":9}}"#),
            sse_done_block()
        );
        let (base, provider) = spawn_provider(vec![(StatusCode::OK, body)]).await;
        let client = client_for(base);

        let chunks: Vec<_> = client.stream_chat(&request()).await.unwrap().collect().await;
        let texts: Vec<_> = chunks
            .into_iter()
            .map(|c| c.unwrap().text_delta.unwrap_or_default())
            .collect();
        assert_eq!(texts, vec!["Hel", "lo"]);

        let sent = provider.last_body.lock().unwrap().clone().unwrap();
        assert_eq!(sent["stream"], json!(true));
        assert_eq!(sent["model"], json!("dummy-model"));
        assert_eq!(
            provider.last_auth.lock().unwrap().as_deref(),
            Some("Bearer test-key")
        );
    }

    #[tokio::test]
    async fn retries_transient_status_before_stream_starts() {
        let body = format!("{}{}", chunk_json(json!({"content": "ok"})), sse_done_block());
        let (base, provider) = spawn_provider(vec![
            (StatusCode::SERVICE_UNAVAILABLE, "busy".into()),
            (StatusCode::OK, body),
        ])
        .await;
        let client = client_for(base);

        let chunks: Vec<_> = client.stream_chat(&request()).await.unwrap().collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(provider.hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let (base, provider) =
            spawn_provider(vec![(StatusCode::BAD_REQUEST, "bad model".into())]).await;
        let client = client_for(base);

        let err = match client.stream_chat(&request()).await {
            Ok(_) => panic!("expected status error"),
            Err(err) => err,
        };
        assert_eq!(err.status_code(), Some(400));
        assert!(err.to_string().contains("bad model"));
        assert_eq!(provider.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn provider_error_mid_stream_ends_the_stream() {
        let body = format!(
            "{}{}{}",
            chunk_json(json!({"content": "par"})),
            sse_data_block(r#"{"error":{"message":"overloaded"}}"#),
            chunk_json(json!({"content": "never"}))
        );
        let (base, _provider) = spawn_provider(vec![(StatusCode::OK, body)]).await;
        let client = client_for(base);

        let chunks: Vec<_> = client.stream_chat(&request()).await.unwrap().collect().await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].is_ok());
        assert!(chunks[1].as_ref().unwrap_err().to_string().contains("overloaded"));
    }

    #[test]
    fn retry_after_header_is_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "7".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(7));
        headers.insert(RETRY_AFTER, "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(RETRY_AFTER, "soon".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn retry_after_http_date_in_the_future_counts_down() {
        let later = SystemTime::now() + Duration::from_secs(120);
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, httpdate::fmt_http_date(later).parse().unwrap());
        let secs = parse_retry_after(&headers).unwrap();
        assert!((100..=120).contains(&secs), "secs = {secs}");
    }
}
