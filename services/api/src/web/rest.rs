//! services/api/src/web/rest.rs
//!
//! Builds the HTTP router and holds the master definition for the OpenAPI
//! specification.

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::web::{
    middleware::require_user,
    protocol::{
        BalanceResponse, ErrorBody, InitiateTopupBody, PurchaseBody, PurchaseResponse,
        TopupPackageView, TopupTransactionView, WebhookAck, WebhookEnvelope,
    },
    purchase::{self, purchase_handler},
    state::AppState,
    topup::{
        self, balance_handler, initiate_topup_handler, list_packages_handler,
        open_account_handler,
    },
    webhook::{self, webhook_handler},
};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        webhook::webhook_handler,
        purchase::purchase_handler,
        topup::list_packages_handler,
        topup::initiate_topup_handler,
        topup::balance_handler,
        topup::open_account_handler,
    ),
    components(
        schemas(
            WebhookEnvelope, WebhookAck, PurchaseBody, PurchaseResponse, ErrorBody,
            TopupPackageView, InitiateTopupBody, TopupTransactionView, BalanceResponse
        )
    ),
    tags(
        (name = "Coin Ledger API", description = "Top-up settlement and episode purchases.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Router
//=========================================================================================

/// Builds the full application router: public routes, user routes behind
/// `require_user`, and the Swagger UI.
pub fn router(app_state: Arc<AppState>) -> Router {
    // Public routes (no user id required)
    let public_routes = Router::new()
        .route("/api/topup/webhook", post(webhook_handler))
        .route("/api/topup/packages", get(list_packages_handler));

    // User routes (user id forwarded by the auth proxy)
    let user_routes = Router::new()
        .route("/api/episodes/purchase", post(purchase_handler))
        .route("/api/topup/transactions", post(initiate_topup_handler))
        .route("/api/me/balance", get(balance_handler))
        .route("/api/accounts", post(open_account_handler))
        .layer(axum_middleware::from_fn(require_user));

    let api_router = Router::new()
        .merge(public_routes)
        .merge(user_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
