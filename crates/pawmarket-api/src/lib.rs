pub mod conversations;
pub mod error;
pub mod messages;
pub mod middleware;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use pawmarket_gateway::ChatService;

pub type AppState = ChatService;

/// Fallback API routes. Every route requires a bearer credential, resolved
/// into a [`middleware::Caller`] before the handler runs.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/chats",
            post(conversations::start_conversation).get(conversations::list_conversations),
        )
        .route(
            "/api/chats/{chat_id}",
            get(conversations::get_conversation).delete(conversations::delete_conversation),
        )
        .route("/api/chats/{chat_id}/messages", get(messages::get_messages))
        .route("/api/chats/{chat_id}/send", post(messages::send_message))
        .route("/api/chats/{chat_id}/messages/send", post(messages::send_message))
        .route_layer(axum_middleware::from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state)
}

#[cfg(test)]
mod tests;
