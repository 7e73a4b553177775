use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use cleverchatty_core::config::CleverChattyConfig;
use cleverchatty_protocol::a2a::Task;
use cleverchatty_sessions::SessionManager;

use crate::stream::SubscriberRegistry;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: CleverChattyConfig,
    pub sessions: Arc<SessionManager>,
    pub subscribers: Arc<SubscriberRegistry>,
    /// Terminal results served back to `tasks/get` pollers.
    pub tasks: DashMap<String, Task>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: CleverChattyConfig,
        sessions: Arc<SessionManager>,
        subscribers: Arc<SubscriberRegistry>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            sessions,
            subscribers,
            tasks: DashMap::new(),
            shutdown,
        }
    }
}

/// Assemble the A2A front-end router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            cleverchatty_protocol::a2a::AGENT_CARD_PATH,
            get(crate::card::agent_card_handler),
        )
        .route("/", post(crate::rpc::rpc_handler))
        .route("/health", get(crate::card::health_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
