use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::engine::identity::{bearer_token, Identity};
use crate::error::AppError;
use crate::AppState;

/// Authenticated caller, resolved from `Authorization: Bearer <token>`.
pub struct Caller(pub Identity);

impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::AuthFailed("missing bearer token".into()))?;
        let token = bearer_token(header).ok_or_else(|| AppError::AuthFailed("malformed authorization header".into()))?;
        let identity = state.identity.validate(token).await?;
        Ok(Caller(identity))
    }
}
