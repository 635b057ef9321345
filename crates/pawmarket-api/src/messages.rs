use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;

use pawmarket_db::models::MessageRow;
use pawmarket_types::api::{MessageQuery, MessageResponse, SendMessageRequest};
use pawmarket_types::models::ConversationId;

use crate::AppState;
use crate::error::ApiError;
use crate::middleware::Caller;

/// Same rules as the live path; the stored message is also pushed to any
/// live connections in the conversation.
pub async fn send_message(
    State(state): State<AppState>,
    WithRejection(Path(chat_id), _): WithRejection<Path<ConversationId>, ApiError>,
    Extension(Caller(caller)): Extension<Caller>,
    WithRejection(Json(req), _): WithRejection<Json<SendMessageRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state.send_message(chat_id, caller.user_id, &req.text).await?;
    Ok((StatusCode::CREATED, Json(message.response())))
}

/// Oldest first. `?after=<id>&limit=<n>` fetches only what a reconnecting
/// client missed.
pub async fn get_messages(
    State(state): State<AppState>,
    WithRejection(Path(chat_id), _): WithRejection<Path<ConversationId>, ApiError>,
    WithRejection(Query(query), _): WithRejection<Query<MessageQuery>, ApiError>,
    Extension(Caller(caller)): Extension<Caller>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    let messages = state
        .get_messages(chat_id, caller.user_id, query.after, query.limit)
        .await?;
    Ok(Json(messages.iter().map(MessageRow::response).collect()))
}
