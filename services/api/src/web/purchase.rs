//! services/api/src/web/purchase.rs
//!
//! The episode purchase endpoint.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use coin_ledger_core::UserId;
use std::sync::Arc;
use tracing::warn;

use crate::web::protocol::{ErrorBody, PurchaseBody, PurchaseResponse};
use crate::web::responses::{enforce_rate_limit, error_response};
use crate::web::state::AppState;

/// Purchase one or more episodes with coins.
///
/// Either all requested episodes are bought or none are.
#[utoipa::path(
    post,
    path = "/api/episodes/purchase",
    request_body = PurchaseBody,
    responses(
        (status = 200, description = "Episodes purchased", body = PurchaseResponse),
        (status = 400, description = "Invalid request, already owned or insufficient balance", body = ErrorBody),
        (status = 401, description = "Missing user id"),
        (status = 404, description = "Episode not found", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody)
    ),
    params(
        ("x-user-id" = i64, Header, description = "The authenticated user's id.")
    )
)]
pub async fn purchase_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<UserId>,
    body: Result<Json<PurchaseBody>, JsonRejection>,
) -> Response {
    // 1. Throttle before touching the ledger
    if let Err(response) = enforce_rate_limit(
        state.rate_limiter.as_ref(),
        &state.purchase_policy(),
        &user_id.to_string(),
    )
    .await
    {
        return response;
    }

    // 2. Normalize either request shape into one command
    let request = match body {
        Ok(Json(body)) => body.into_request(),
        Err(rejection) => {
            warn!("Rejected purchase body: {}", rejection.body_text());
            Err("Invalid request body".to_string())
        }
    };
    let request = match request {
        Ok(request) => request,
        Err(msg) => return (StatusCode::BAD_REQUEST, Json(ErrorBody::new(msg))).into_response(),
    };

    let command = match state.purchases.normalize(request).await {
        Ok(command) => command,
        Err(e) => return error_response(e),
    };

    // 3. Debit and grant
    match state.purchases.purchase(user_id, &command).await {
        Ok(receipt) => (StatusCode::OK, Json(PurchaseResponse::from(receipt))).into_response(),
        Err(e) => error_response(e),
    }
}
