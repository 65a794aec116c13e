//! Shared state for the HTTP API.

use crate::ConnectionState;
use crate::api::server::RateLimiter;
use crate::gateway::ConversationGateway;

use std::sync::Arc;
use tokio::sync::watch;

/// State shared across all API handlers.
pub struct ApiState {
    /// Request orchestrator behind the conversation endpoints.
    pub gateway: Arc<ConversationGateway>,
    /// Transport lifecycle feed for the healthcheck.
    pub connection: watch::Receiver<ConnectionState>,
    /// Shared limiter for the conversation endpoints. None disables limiting.
    pub rate_limiter: Option<RateLimiter>,
}

impl ApiState {
    pub fn new(
        gateway: Arc<ConversationGateway>,
        connection: watch::Receiver<ConnectionState>,
        ratelimit_max_rps: Option<u32>,
    ) -> Self {
        Self {
            gateway,
            connection,
            rate_limiter: ratelimit_max_rps.map(|rps| RateLimiter::new(rps as u64, 1)),
        }
    }
}
