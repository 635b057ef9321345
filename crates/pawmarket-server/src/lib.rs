pub mod config;

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use pawmarket_db::Database;
use pawmarket_gateway::connection::{self, GatewayConfig};
use pawmarket_gateway::{ChatService, DbNotifier, GroupRegistry, JwtIdentity};
use pawmarket_types::models::ConversationId;

#[derive(Clone)]
struct ServerState {
    service: ChatService,
    gateway: GatewayConfig,
}

/// Wire the store, registry, identity provider and notifier into one service.
pub fn build_service(db: Arc<Database>, jwt_secret: &str) -> ChatService {
    ChatService::new(
        db.clone(),
        GroupRegistry::new(),
        Arc::new(JwtIdentity::new(jwt_secret, db.clone())),
        Arc::new(DbNotifier::new(db)),
    )
}

pub fn build_router(service: ChatService, gateway: GatewayConfig) -> Router {
    let state = ServerState {
        service: service.clone(),
        gateway,
    };

    let ws_route = Router::new()
        .route("/ws/chat/{chat_id}", get(ws_upgrade))
        .with_state(state);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(pawmarket_api::router(service))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn ws_upgrade(
    State(state): State<ServerState>,
    Path(chat_id): Path<ConversationId>,
    Query(query): Query<HashMap<String, String>>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let credential = query
        .get("token")
        .filter(|t| !t.is_empty())
        .cloned()
        .or_else(|| bearer.map(|TypedHeader(Authorization(bearer))| bearer.token().to_string()));

    connection::accept(ws, state.service, chat_id, credential, state.gateway).await
}
