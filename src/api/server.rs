//! Axum HTTP server for the conversation bridge.
//!
//! Three routes: the healthcheck, the conversation round trip, and
//! conversation deletion. Bridge errors come back as 200 responses with an
//! `error` field so callers never have to parse two body shapes.

use crate::api::state::ApiState;

use anyhow::Context as _;
use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tower_http::cors::{Any, CorsLayer};

/// Simple sliding-window rate limiter.
///
/// Tracks the number of requests in the current window and resets when the
/// window expires. Not per-IP, which is fine for a single-team bridge, but
/// it keeps a runaway caller from flooding the chat platform.
pub struct RateLimiter {
    /// Requests remaining in the current window.
    remaining: AtomicU64,
    /// Epoch second when the current window started.
    window_start: AtomicU64,
    /// Maximum requests per window.
    max_requests: u64,
    /// Window duration in seconds.
    window_secs: u64,
}

impl RateLimiter {
    pub fn new(max_requests: u64, window_secs: u64) -> Self {
        Self {
            remaining: AtomicU64::new(max_requests),
            window_start: AtomicU64::new(epoch_secs()),
            max_requests,
            window_secs,
        }
    }

    /// Try to consume one request. Returns `true` if allowed, `false` if
    /// rate limited.
    pub fn check(&self) -> bool {
        let now = epoch_secs();

        let window = self.window_start.load(Ordering::Relaxed);
        if now.saturating_sub(window) >= self.window_secs {
            self.window_start.store(now, Ordering::Relaxed);
            self.remaining
                .store(self.max_requests.saturating_sub(1), Ordering::Relaxed);
            // A zero budget admits nothing, fresh window or not.
            return self.max_requests > 0;
        }

        loop {
            let current = self.remaining.load(Ordering::Relaxed);
            if current == 0 {
                return false;
            }
            if self
                .remaining
                .compare_exchange_weak(current, current - 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// -- Response types --

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ConversationResponse {
    response: String,
}

#[derive(Serialize)]
struct DeleteResponse {
    response: &'static str,
    success: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Deserialize)]
struct ConversationQuery {
    message: Option<String>,
    #[serde(rename = "conversationID")]
    conversation_id: Option<String>,
}

/// Start the HTTP server on the given address.
///
/// The returned handle resolves once a shutdown signal arrives on
/// `shutdown_rx` and all in-flight requests have drained.
pub async fn start_http_server(
    bind: SocketAddr,
    state: Arc<ApiState>,
    cors_origin: Option<String>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    // Without a configured origin the layer stays empty and emits no CORS
    // headers at all, which browsers treat as cross-origin denial.
    let cors = match cors_origin {
        Some(origin) => {
            let origin = origin
                .parse::<HeaderValue>()
                .with_context(|| format!("invalid CORS origin '{origin}'"))?;
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::new(),
    };

    let app = Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/", get(converse).delete(delete_conversation))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "HTTP server listening");

    let handle = tokio::spawn(async move {
        let mut shutdown = shutdown_rx;
        if let Err(error) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|v| *v).await;
            })
            .await
        {
            tracing::error!(%error, "HTTP server exited with error");
        }
    });

    Ok(handle)
}

// -- API handlers --

async fn healthcheck(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    let status = if state.connection.borrow().is_ready() {
        "ok"
    } else {
        "not ready"
    };
    Json(HealthResponse { status })
}

async fn converse(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ConversationQuery>,
) -> Response {
    if let Some(reject) = check_rate_limit(&state) {
        return reject;
    }

    let result = state
        .gateway
        .send_and_await(query.message.as_deref(), query.conversation_id.as_deref())
        .await;

    match result {
        Ok(response) => Json(ConversationResponse { response }).into_response(),
        Err(error) => error_body(error),
    }
}

async fn delete_conversation(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ConversationQuery>,
) -> Response {
    if let Some(reject) = check_rate_limit(&state) {
        return reject;
    }

    match state.gateway.delete(query.conversation_id.as_deref()).await {
        Ok(()) => Json(DeleteResponse {
            response: "Conversation deleted",
            success: true,
        })
        .into_response(),
        Err(error) => error_body(error),
    }
}

fn check_rate_limit(state: &ApiState) -> Option<Response> {
    let limiter = state.rate_limiter.as_ref()?;
    if limiter.check() {
        None
    } else {
        Some(
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ErrorResponse {
                    error: "Rate limit exceeded. Try again shortly.".into(),
                }),
            )
                .into_response(),
        )
    }
}

/// Bridge errors are reported in-band: a 200 response whose body carries the
/// error text, matching what conversation callers expect.
fn error_body(error: crate::Error) -> Response {
    tracing::debug!(%error, "request failed");
    Json(ErrorResponse {
        error: error.to_string(),
    })
    .into_response()
}
