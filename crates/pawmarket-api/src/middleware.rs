use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};

use pawmarket_gateway::Identity;

use crate::AppState;
use crate::error::ApiError;

/// The authenticated caller, inserted as a request extension.
#[derive(Debug, Clone)]
pub struct Caller(pub Identity);

/// Resolve the bearer token through the identity provider.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(ApiError::Unauthorized)?;

    let identity = state.authenticate(bearer.token()).await?;

    req.extensions_mut().insert(Caller(identity));
    Ok(next.run(req).await)
}
