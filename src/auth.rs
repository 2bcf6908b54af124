//! Bearer-token authentication.
//!
//! The identity provider is a thin collaborator: a token row mapping to a
//! user supplies `{user_id, role}`. Handlers declare an [`Actor`] parameter
//! and the extractor rejects tokenless or unknown-token requests with 401.

use crate::errors::AppError;
use crate::models::user::{Actor, User};
use crate::state::AppState;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};

impl FromRequestParts<AppState> for Actor {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| AppError::Unauthenticated("missing bearer token".into()))?;

        let user: Option<User> = sqlx::query_as(
            "SELECT u.id, u.name, u.role, u.created_at FROM users u
             JOIN auth_tokens t ON t.user_id = u.id
             WHERE t.token = ?",
        )
        .bind(token)
        .fetch_optional(&*state.db)
        .await?;

        let user =
            user.ok_or_else(|| AppError::Unauthenticated("unknown or expired token".into()))?;
        Ok(Actor {
            user_id: user.id,
            role: user.role,
        })
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
