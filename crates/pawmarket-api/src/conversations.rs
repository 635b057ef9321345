use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;

use pawmarket_types::api::{ConversationResponse, StartConversationRequest};
use pawmarket_types::models::ConversationId;

use crate::AppState;
use crate::error::ApiError;
use crate::middleware::Caller;

/// `POST /api/chats`: 201 when created, 200 when the pair already had one.
pub async fn start_conversation(
    State(state): State<AppState>,
    Extension(Caller(caller)): Extension<Caller>,
    WithRejection(Json(req), _): WithRejection<Json<StartConversationRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let (conversation, created) = state
        .start_conversation(caller.user_id, req.receiver_id)
        .await?;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(conversation)))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(Caller(caller)): Extension<Caller>,
) -> Result<Json<Vec<ConversationResponse>>, ApiError> {
    Ok(Json(state.list_my_conversations(caller.user_id).await?))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    WithRejection(Path(chat_id), _): WithRejection<Path<ConversationId>, ApiError>,
    Extension(Caller(caller)): Extension<Caller>,
) -> Result<Json<ConversationResponse>, ApiError> {
    Ok(Json(state.get_conversation(chat_id, caller.user_id).await?))
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    WithRejection(Path(chat_id), _): WithRejection<Path<ConversationId>, ApiError>,
    Extension(Caller(caller)): Extension<Caller>,
) -> Result<StatusCode, ApiError> {
    state.delete_conversation(chat_id, caller.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
