//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.
//!
//! Sessions are owned by the external auth provider. The fronting proxy
//! validates the session and forwards the numeric user id as `x-user-id`.

use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use coin_ledger_core::UserId;
use tracing::warn;

use crate::web::protocol::ErrorBody;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Middleware that reads the authenticated user id and stores it in the
/// request extensions for handlers. Missing or malformed ids get a 401.
pub async fn require_user(mut req: Request, next: Next) -> Response {
    let Some(user_id) = user_id_from_headers(req.headers()) else {
        warn!(path = %req.uri().path(), "Rejected request without a valid user id");
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody::new("Unauthorized")),
        )
            .into_response();
    };

    req.extensions_mut().insert(user_id);
    next.run(req).await
}

fn user_id_from_headers(headers: &HeaderMap) -> Option<UserId> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|id| *id > 0)
        .map(UserId)
}

/// The caller's address as reported by the proxy, used to key anonymous limits.
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
        .unwrap_or("unknown")
        .to_string()
}
