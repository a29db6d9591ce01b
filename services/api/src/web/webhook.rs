//! services/api/src/web/webhook.rs
//!
//! The payment gateway's webhook endpoint.
//!
//! The gateway retries any delivery that is not acknowledged with a 2xx and
//! `{"status":1}`, so already-settled transactions are acknowledged as success.

use axum::{
    body::to_bytes,
    extract::{FromRequest, Multipart, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    Json,
};
use coin_ledger_core::{LedgerError, Money, SettlementOutcome, WebhookPayment};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::web::protocol::{PaymentData, WebhookAck, WebhookEnvelope};
use crate::web::state::AppState;

const MAX_WEBHOOK_BODY: usize = 64 * 1024;

type WebhookReply = (StatusCode, Json<WebhookAck>);

fn reject(status: StatusCode, error: &str) -> WebhookReply {
    (status, Json(WebhookAck::failed(error)))
}

/// Receive a payment confirmation from the gateway.
///
/// Accepts `application/x-www-form-urlencoded`, `multipart/form-data` or a JSON
/// body with the fields `data` and `signature`.
#[utoipa::path(
    post,
    path = "/api/topup/webhook",
    request_body(content = WebhookEnvelope, description = "Signed payment data"),
    responses(
        (status = 200, description = "Payment settled or already settled", body = WebhookAck),
        (status = 400, description = "Malformed payload or amount mismatch", body = WebhookAck),
        (status = 401, description = "Invalid signature", body = WebhookAck),
        (status = 404, description = "Transaction not found", body = WebhookAck),
        (status = 500, description = "Server misconfiguration or settlement failure", body = WebhookAck)
    )
)]
pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> WebhookReply {
    // 1. Read the envelope in whichever encoding the gateway used
    let envelope = match read_envelope(request).await {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Unreadable webhook body: {}", e);
            return reject(StatusCode::BAD_REQUEST, "Missing data or signature");
        }
    };
    let (Some(data), Some(signature)) = (
        envelope.data.filter(|d| !d.is_empty()),
        envelope.signature.filter(|s| !s.trim().is_empty()),
    ) else {
        return reject(StatusCode::BAD_REQUEST, "Missing data or signature");
    };

    // 2. Verify the signature against the configured secret
    let Some(verifier) = state.verifier.as_ref() else {
        error!("Payment webhook cannot be verified: no payment secret configured");
        return reject(StatusCode::INTERNAL_SERVER_ERROR, "Server configuration error");
    };
    match verifier.matching_scheme(&data, &signature) {
        Some(scheme) => debug!(%scheme, "Webhook signature accepted"),
        None => {
            warn!(
                data_len = data.len(),
                data_prefix = %data.chars().take(24).collect::<String>(),
                schemes = verifier.schemes().len(),
                "Invalid webhook signature"
            );
            return reject(StatusCode::UNAUTHORIZED, "Invalid signature");
        }
    }

    // 3. Decode the signed payment data
    let payment = match parse_payment(&data) {
        Ok(payment) => payment,
        Err(reply) => return reply,
    };

    // 4. Settle
    match state.settlement.settle(&payment).await {
        Ok(SettlementOutcome::Credited(credit)) => {
            info!(
                gateway_ref = %payment.gateway_ref,
                user_id = %credit.user_id,
                coins_added = %credit.coins_added,
                "Payment webhook processed"
            );
            (StatusCode::OK, Json(WebhookAck::ok()))
        }
        Ok(SettlementOutcome::AlreadySettled { .. }) => (StatusCode::OK, Json(WebhookAck::ok())),
        Err(LedgerError::TransactionNotFound) => {
            warn!(gateway_ref = %payment.gateway_ref, buyer_ref = %payment.buyer_ref, "Transaction not found");
            reject(StatusCode::NOT_FOUND, "Transaction not found")
        }
        Err(LedgerError::AmountMismatch { .. }) => {
            reject(StatusCode::BAD_REQUEST, "Amount mismatch")
        }
        Err(e) => {
            error!(gateway_ref = %payment.gateway_ref, "Error processing webhook: {:?}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

/// Decodes the `data` string into a payment. Field checks mirror what the
/// gateway guarantees: `id_pay` and `ref1` always present, `amount` decimal.
fn parse_payment(data: &str) -> Result<WebhookPayment, WebhookReply> {
    let fields: PaymentData = serde_json::from_str(data).map_err(|e| {
        warn!("Failed to parse payment data: {}", e);
        reject(StatusCode::BAD_REQUEST, "Invalid data format")
    })?;

    let (Some(gateway_ref), Some(buyer_ref)) = (fields.id_pay, fields.ref1) else {
        return Err(reject(StatusCode::BAD_REQUEST, "Missing required payment data"));
    };

    let amount = fields
        .amount
        .as_deref()
        .ok_or(())
        .and_then(|raw| raw.parse::<Money>().map_err(|_| ()))
        .map_err(|_| {
            warn!(gateway_ref = %gateway_ref, "Webhook amount missing or malformed");
            reject(StatusCode::BAD_REQUEST, "Invalid data format")
        })?;

    Ok(WebhookPayment {
        gateway_ref,
        buyer_ref,
        amount,
        amount_check: fields.amount_check,
        paid_at: fields.date_pay,
    })
}

async fn read_envelope(request: Request) -> Result<WebhookEnvelope, String> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| e.to_string())?;
        let mut envelope = WebhookEnvelope::default();
        while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
            let name = field.name().unwrap_or_default().to_string();
            let value = field.text().await.map_err(|e| e.to_string())?;
            match name.as_str() {
                "data" => envelope.data = Some(value),
                "signature" => envelope.signature = Some(value),
                _ => {}
            }
        }
        return Ok(envelope);
    }

    let bytes = to_bytes(request.into_body(), MAX_WEBHOOK_BODY)
        .await
        .map_err(|e| e.to_string())?;

    if content_type.starts_with("application/x-www-form-urlencoded") {
        serde_urlencoded::from_bytes(&bytes).map_err(|e| e.to_string())
    } else {
        serde_json::from_slice(&bytes).map_err(|e| e.to_string())
    }
}
