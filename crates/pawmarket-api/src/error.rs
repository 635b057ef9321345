use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;
use tracing::{error, warn};

use pawmarket_db::StoreError;
use pawmarket_gateway::ChatError;
use pawmarket_types::api::{ErrorBody, ErrorEnvelope};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal error")]
    Internal,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::Unauthorized => "unauthorized",
            ApiError::Forbidden => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Internal => "internal_error",
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Auth(reason) => {
                warn!("Authentication failed: {}", reason);
                ApiError::Unauthorized
            }
            ChatError::Store(StoreError::NotParticipant { conversation_id, user_id }) => {
                warn!("User {} denied access to conversation {}", user_id, conversation_id);
                ApiError::Forbidden
            }
            ChatError::Store(StoreError::InvalidPair) => {
                ApiError::Validation("cannot start a conversation with yourself".into())
            }
            ChatError::Store(StoreError::EmptyText) => ApiError::Validation("text is required".into()),
            ChatError::Store(StoreError::ConversationNotFound(id)) => {
                ApiError::NotFound(format!("conversation {}", id))
            }
            ChatError::Store(StoreError::UserNotFound(id)) => ApiError::NotFound(format!("user {}", id)),
            other => {
                error!("Chat operation failed: {}", other);
                ApiError::Internal
            }
        }
    }
}

// Extractor rejections become validation errors so every malformed request
// gets the same envelope.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorEnvelope {
            error: ErrorBody {
                code: self.error_code().to_string(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}
