//! services/api/src/web/responses.rs
//!
//! Maps core errors onto HTTP responses for client-facing endpoints and
//! enforces rate limits before a handler mutates anything.

use axum::{
    http::{header::RETRY_AFTER, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use coin_ledger_core::{admit, LedgerError, PortError, RateLimitPolicy, RateLimiter};
use std::time::Duration;
use tracing::error;

use crate::web::protocol::ErrorBody;

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Converts a core error into a JSON error response. Unexpected failures are
/// logged here and reported without detail.
pub fn error_response(err: LedgerError) -> Response {
    let (status, body) = match err {
        LedgerError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, ErrorBody::new(msg)),
        LedgerError::NothingToPurchase => (
            StatusCode::BAD_REQUEST,
            ErrorBody::new("No purchasable episodes in request"),
        ),
        LedgerError::AlreadyOwned(ids) => (
            StatusCode::BAD_REQUEST,
            ErrorBody {
                episodes: Some(ids),
                ..ErrorBody::new("Episode already owned")
            },
        ),
        LedgerError::InsufficientBalance { required, available } => (
            StatusCode::BAD_REQUEST,
            ErrorBody {
                message: Some(format!(
                    "This purchase costs {} coins but your balance is {}. Please top up.",
                    required, available
                )),
                top_up_required: Some(true),
                ..ErrorBody::new("Insufficient balance")
            },
        ),
        LedgerError::EpisodeNotFound(ids) => (
            StatusCode::NOT_FOUND,
            ErrorBody {
                episodes: (!ids.is_empty()).then_some(ids),
                ..ErrorBody::new("Episode not found")
            },
        ),
        LedgerError::PackageNotFound(_) => {
            (StatusCode::NOT_FOUND, ErrorBody::new("Package not found"))
        }
        LedgerError::Port(PortError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, ErrorBody::new("Account not found"))
        }
        LedgerError::DuplicateReference(_) => (
            StatusCode::CONFLICT,
            ErrorBody::new("Payment reference already recorded"),
        ),
        LedgerError::RateLimited { reset_in, .. } => (
            StatusCode::TOO_MANY_REQUESTS,
            ErrorBody {
                retry_after: Some(ceil_secs(reset_in)),
                ..ErrorBody::new("Too many requests")
            },
        ),
        other => {
            error!("Request failed: {:?}", other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody::new("Internal server error"),
            )
        }
    };
    (status, Json(body)).into_response()
}

/// Counts the request against `policy`. A denied request yields a ready 429
/// response carrying the standard rate-limit headers.
pub async fn enforce_rate_limit(
    limiter: &dyn RateLimiter,
    policy: &RateLimitPolicy,
    identifier: &str,
) -> Result<(), Response> {
    match admit(limiter, identifier, policy).await {
        Ok(_) => Ok(()),
        Err(LedgerError::RateLimited {
            reset_in,
            remaining,
        }) => Err(too_many_requests(policy.max_requests, remaining, reset_in)),
        // The limiter is a dependency like any other: if it fails, nothing runs.
        Err(other) => Err(error_response(other)),
    }
}

fn too_many_requests(limit: u32, remaining: u32, reset_in: Duration) -> Response {
    let retry_after = ceil_secs(reset_in);
    let reset_at_ms = Utc::now().timestamp_millis() + reset_in.as_millis() as i64;
    let body = ErrorBody {
        message: Some(format!("Please wait {} seconds before trying again", retry_after)),
        retry_after: Some(retry_after),
        ..ErrorBody::new("Too many requests")
    };

    (
        StatusCode::TOO_MANY_REQUESTS,
        [
            (RETRY_AFTER, HeaderValue::from(retry_after)),
            (X_RATELIMIT_LIMIT, HeaderValue::from(limit)),
            (X_RATELIMIT_REMAINING, HeaderValue::from(remaining)),
            (X_RATELIMIT_RESET, HeaderValue::from(reset_at_ms)),
        ],
        Json(body),
    )
        .into_response()
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use coin_ledger_core::Coins;

    #[test]
    fn insufficient_balance_prompts_top_up() {
        let response = error_response(LedgerError::InsufficientBalance {
            required: Coins(110),
            available: Coins(100),
        });
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn rate_limit_response_carries_headers() {
        let response = too_many_requests(5, 0, Duration::from_millis(1500));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers[RETRY_AFTER], "2");
        assert_eq!(headers[&X_RATELIMIT_LIMIT], "5");
        assert_eq!(headers[&X_RATELIMIT_REMAINING], "0");
        assert!(headers.contains_key(&X_RATELIMIT_RESET));
    }

    #[test]
    fn unexpected_errors_hide_details() {
        let response = error_response(LedgerError::Port(PortError::Unexpected(
            "connection refused".to_string(),
        )));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
