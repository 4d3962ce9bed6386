//! Authentication middleware for Axum.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::warn;

use craftcloud_common::UserRecord;

use super::session::extract_token;
use crate::error::ApiError;
use crate::server::AppState;

/// Extension that holds the signed-in user
#[derive(Clone)]
pub struct AuthenticatedUser(pub UserRecord);

/// Middleware that requires a live session
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = extract_token(request.headers()) else {
        return ApiError::unauthorized().into_response();
    };

    match state.sessions.resolve(&token) {
        Ok(Some(user)) => {
            request.extensions_mut().insert(AuthenticatedUser(user));
            next.run(request).await
        }
        Ok(None) => ApiError::unauthorized().into_response(),
        Err(e) => {
            warn!("Session lookup failed: {}", e);
            ApiError::unauthorized().into_response()
        }
    }
}
