//! services/api/src/web/topup.rs
//!
//! Endpoints for ledger accounts, balances, top-up packages and recording
//! pending top-ups.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use coin_ledger_core::UserId;
use std::sync::Arc;
use tracing::info;

use crate::web::middleware::client_ip;
use crate::web::protocol::{
    BalanceResponse, ErrorBody, InitiateTopupBody, TopupPackageView, TopupTransactionView,
};
use crate::web::responses::{enforce_rate_limit, error_response};
use crate::web::state::AppState;

/// List the coin packages on sale, cheapest first.
#[utoipa::path(
    get,
    path = "/api/topup/packages",
    responses(
        (status = 200, description = "Visible packages", body = [TopupPackageView]),
        (status = 500, description = "Internal server error", body = ErrorBody)
    )
)]
pub async fn list_packages_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.topups.packages().await {
        Ok(packages) => {
            let views: Vec<TopupPackageView> = packages
                .iter()
                .enumerate()
                .map(|(position, package)| TopupPackageView::listed(position, package))
                .collect();
            Json(views).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// Record a pending top-up for a package under the gateway's payment reference.
#[utoipa::path(
    post,
    path = "/api/topup/transactions",
    request_body = InitiateTopupBody,
    responses(
        (status = 201, description = "Pending transaction recorded", body = TopupTransactionView),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 404, description = "Package not found", body = ErrorBody),
        (status = 409, description = "Reference already recorded", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody)
    ),
    params(
        ("x-user-id" = i64, Header, description = "The authenticated user's id.")
    )
)]
pub async fn initiate_topup_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<UserId>,
    body: Result<Json<InitiateTopupBody>, JsonRejection>,
) -> Response {
    if let Err(response) = enforce_rate_limit(
        state.rate_limiter.as_ref(),
        &state.topup_policy(),
        &user_id.to_string(),
    )
    .await
    {
        return response;
    }

    let Ok(Json(body)) = body else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody::new("Invalid request body")),
        )
            .into_response();
    };

    // The ledger row must exist before a transaction can reference it.
    if let Err(e) = state.topups.open_account(user_id).await {
        return error_response(e);
    }

    match state
        .topups
        .initiate(user_id, body.package_id, &body.gateway_ref)
        .await
    {
        Ok(tx) => (StatusCode::CREATED, Json(TopupTransactionView::from(tx))).into_response(),
        Err(e) => error_response(e),
    }
}

/// The caller's current coin balance.
#[utoipa::path(
    get,
    path = "/api/me/balance",
    responses(
        (status = 200, description = "Current balance", body = BalanceResponse),
        (status = 404, description = "No ledger account", body = ErrorBody)
    ),
    params(
        ("x-user-id" = i64, Header, description = "The authenticated user's id.")
    )
)]
pub async fn balance_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<UserId>,
) -> Response {
    match state.topups.balance(user_id).await {
        Ok(entry) => Json(BalanceResponse::from(entry)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Open the caller's ledger account with a zero balance.
///
/// Called once after signup. Repeated calls return the existing account.
#[utoipa::path(
    post,
    path = "/api/accounts",
    responses(
        (status = 201, description = "Account ready", body = BalanceResponse),
        (status = 429, description = "Rate limited", body = ErrorBody)
    ),
    params(
        ("x-user-id" = i64, Header, description = "The authenticated user's id.")
    )
)]
pub async fn open_account_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<UserId>,
    headers: HeaderMap,
) -> Response {
    let ip = client_ip(&headers);
    if let Err(response) =
        enforce_rate_limit(state.rate_limiter.as_ref(), &state.signup_policy(), &ip).await
    {
        return response;
    }

    match state.topups.open_account(user_id).await {
        Ok(entry) => {
            info!(user_id = %user_id, "Ledger account opened");
            (StatusCode::CREATED, Json(BalanceResponse::from(entry))).into_response()
        }
        Err(e) => error_response(e),
    }
}
