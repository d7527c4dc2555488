//! HTTP transport for the protocol session.
//!
//! One endpoint (default `/mcp`) takes JSON-RPC over `POST`, an SSE push
//! channel over `GET`, and session termination over `DELETE`. Every response
//! carries permissive CORS headers and, once a session exists, its
//! `Mcp-Session-Id`.

use crate::config::ServerConfig;
use crate::rpc::types::{
    JsonRpcResponse, RequestId, RpcError, EXECUTION_TIMEOUT, INVALID_PARAMS,
    INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR, SERVER_BUSY,
};
use crate::rpc::{ProtocolSession, RpcReply};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{
    ACCEPT, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, AUTHORIZATION, RETRY_AFTER,
    WWW_AUTHENTICATE,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream::{self, StreamExt};
use serde_json::json;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

pub const SESSION_HEADER: &str = "mcp-session-id";
pub const HEALTH_ENDPOINT: &str = "/health";

const ALLOW_METHODS: &str = "GET, POST, DELETE, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type, Authorization, Mcp-Session-Id, Accept";
const EXPOSE_HEADERS: &str = "Mcp-Session-Id";

/// Transport options resolved from `[server]`.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub endpoint: String,
    pub auth_token: Option<String>,
    pub keepalive: Duration,
}

impl ServerSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            auth_token: config
                .auth_token
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            keepalive: config.keepalive(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

struct AppState {
    session: Arc<ProtocolSession>,
    settings: ServerSettings,
}

/// Build the axum router for `session`.
pub fn build_router(session: Arc<ProtocolSession>, settings: ServerSettings) -> Router {
    let endpoint = settings.endpoint.clone();
    let state = Arc::new(AppState { session, settings });
    Router::new()
        .route(HEALTH_ENDPOINT, get(handle_health))
        .route(
            &endpoint,
            get(handle_stream)
                .post(handle_post)
                .delete(handle_delete)
                .options(handle_preflight),
        )
        .layer(middleware::map_response_with_state(
            Arc::clone(&state),
            decorate_response,
        ))
        .with_state(state)
}

/// Serve `session` on an already-bound listener until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    session: Arc<ProtocolSession>,
    settings: ServerSettings,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let endpoint = settings.endpoint.clone();
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, %endpoint, auth = settings.auth_token.is_some(), "protocol server listening");
    }
    let app = build_router(session, settings);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn handle_post(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(rejection) = authorize(&state.settings, &headers) {
        return rejection;
    }

    match state.session.handle_payload(&body).await {
        RpcReply::Accepted => StatusCode::ACCEPTED.into_response(),
        RpcReply::Batch(responses) => (StatusCode::OK, Json(responses)).into_response(),
        RpcReply::Single(response) => {
            let status = status_for(&response);
            let mut out = (status, Json(response)).into_response();
            if status == StatusCode::TOO_MANY_REQUESTS {
                out.headers_mut()
                    .insert(RETRY_AFTER, HeaderValue::from_static("1"));
            }
            out
        }
    }
}

async fn handle_stream(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(rejection) = authorize(&state.settings, &headers) {
        return rejection;
    }
    if !accepts_event_stream(&headers) {
        return (
            StatusCode::NOT_ACCEPTABLE,
            Json(JsonRpcResponse::error(
                RequestId::Null,
                RpcError::invalid_request("GET requires Accept: text/event-stream"),
            )),
        )
            .into_response();
    }

    debug!("push stream opened");
    let guard = PushStreamGuard;
    // Nothing is pushed yet; the stream only carries keepalive comments.
    let events = stream::pending::<Result<Event, Infallible>>().map(move |event| {
        let _open = &guard;
        event
    });
    Sse::new(events)
        .keep_alive(KeepAlive::new().interval(state.settings.keepalive))
        .into_response()
}

async fn handle_delete(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(rejection) = authorize(&state.settings, &headers) {
        return rejection;
    }
    let terminated = state.session.terminate();
    match &terminated {
        Some(handle) => info!(session = %handle, "session terminated by client"),
        None => debug!("DELETE without an active session"),
    }
    (
        StatusCode::OK,
        Json(json!({ "terminated": terminated.is_some() })),
    )
        .into_response()
}

async fn handle_preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "session": state.session.state().as_str(),
            "gate_busy": state.session.gate_busy(),
        })),
    )
        .into_response()
}

/// CORS and session headers on every response, including rejections.
async fn decorate_response(State(state): State<Arc<AppState>>, mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers.insert(
        ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(EXPOSE_HEADERS),
    );
    if let Some(handle) = state.session.session_handle() {
        if let Ok(value) = HeaderValue::from_str(handle.as_str()) {
            headers.insert(SESSION_HEADER, value);
        }
    }
    response
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Logs when a client drops its push stream.
struct PushStreamGuard;

impl Drop for PushStreamGuard {
    fn drop(&mut self) {
        debug!("push stream closed by client");
    }
}

fn authorize(settings: &ServerSettings, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = settings.auth_token.as_deref() else {
        return Ok(());
    };
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    if presented == Some(expected) {
        return Ok(());
    }

    warn!(
        credentials = presented.is_some(),
        "rejecting request with missing or wrong bearer token"
    );
    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(JsonRpcResponse::error(
            RequestId::Null,
            RpcError::invalid_request("missing or invalid bearer token"),
        )),
    )
        .into_response();
    response
        .headers_mut()
        .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    Err(response)
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains("text/event-stream"))
}

/// HTTP status for a single (non-batch) response.
fn status_for(response: &JsonRpcResponse) -> StatusCode {
    match response.error_code() {
        None => StatusCode::OK,
        Some(PARSE_ERROR | INVALID_REQUEST | INVALID_PARAMS | METHOD_NOT_FOUND) => {
            StatusCode::BAD_REQUEST
        }
        Some(SERVER_BUSY) => StatusCode::TOO_MANY_REQUESTS,
        Some(EXECUTION_TIMEOUT) => StatusCode::GATEWAY_TIMEOUT,
        Some(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
