//! crates/coin_ledger_core/src/throttle.rs
//!
//! Turns a rate-limit decision into a hard stop before any mutation runs.

use tracing::warn;

use crate::error::{LedgerError, LedgerResult};
use crate::ports::{RateLimitDecision, RateLimitPolicy, RateLimiter};

/// Counts one request for `identifier` and fails with `RateLimited` when the
/// policy's window is exhausted.
pub async fn admit(
    limiter: &dyn RateLimiter,
    identifier: &str,
    policy: &RateLimitPolicy,
) -> LedgerResult<RateLimitDecision> {
    let decision = limiter.check(identifier, policy).await?;
    if !decision.allowed {
        warn!(
            namespace = policy.namespace,
            reset_in_secs = decision.reset_in.as_secs(),
            "Request rate limited"
        );
        return Err(LedgerError::RateLimited {
            reset_in: decision.reset_in,
            remaining: decision.remaining,
        });
    }
    Ok(decision)
}
