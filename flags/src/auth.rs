use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use crate::api::FlagError;
use crate::router;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Any valid token may evaluate flags.
pub async fn require_auth(
    State(state): State<router::State>,
    request: Request,
    next: Next,
) -> Result<Response, FlagError> {
    let token = bearer_token(request.headers()).ok_or(FlagError::Unauthenticated)?;
    if token != state.config.api_token && token != state.config.admin_token {
        return Err(FlagError::Unauthenticated);
    }
    Ok(next.run(request).await)
}

/// Admin routes are rejected before any store access: 401 for an unknown
/// caller, 403 for a known caller without the admin token.
pub async fn require_admin(
    State(state): State<router::State>,
    request: Request,
    next: Next,
) -> Result<Response, FlagError> {
    let token = bearer_token(request.headers()).ok_or(FlagError::Unauthenticated)?;
    if token == state.config.admin_token {
        Ok(next.run(request).await)
    } else if token == state.config.api_token {
        Err(FlagError::Forbidden)
    } else {
        Err(FlagError::Unauthenticated)
    }
}
