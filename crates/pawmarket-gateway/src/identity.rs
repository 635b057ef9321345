use std::sync::Arc;

use futures_util::future::BoxFuture;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};

use pawmarket_db::Database;
use pawmarket_types::api::Claims;
use pawmarket_types::models::UserId;

use crate::ChatError;

/// A resolved caller. Passed explicitly into every chat operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
}

/// Resolves an opaque bearer credential to a user.
pub trait IdentityProvider: Send + Sync {
    fn resolve<'a>(&'a self, credential: &'a str) -> BoxFuture<'a, Result<Identity, ChatError>>;
}

/// HS256 JWTs whose subject must still exist in the users table.
pub struct JwtIdentity {
    secret: String,
    db: Arc<Database>,
}

impl JwtIdentity {
    pub fn new(secret: impl Into<String>, db: Arc<Database>) -> Self {
        Self {
            secret: secret.into(),
            db,
        }
    }
}

impl IdentityProvider for JwtIdentity {
    fn resolve<'a>(&'a self, credential: &'a str) -> BoxFuture<'a, Result<Identity, ChatError>> {
        Box::pin(async move {
            let claims = decode::<Claims>(
                credential,
                &DecodingKey::from_secret(self.secret.as_bytes()),
                &Validation::default(),
            )
            .map_err(|e| ChatError::Auth(e.to_string()))?
            .claims;

            let db = self.db.clone();
            let user = tokio::task::spawn_blocking(move || db.get_user(claims.user_id)).await??;

            match user {
                Some(user) => Ok(Identity {
                    user_id: user.id,
                    username: user.username,
                }),
                None => Err(ChatError::Auth(format!("unknown user {}", claims.user_id))),
            }
        })
    }
}

/// Issue a token the way the accounts system does. Used for seeding and tests.
pub fn issue_token(
    secret: &str,
    user_id: UserId,
    username: &str,
    ttl: chrono::Duration,
) -> anyhow::Result<String> {
    let claims = Claims {
        user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + ttl).timestamp().max(0) as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
