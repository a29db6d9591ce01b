//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::{Config, RateLimitSetting};
use coin_ledger_core::{
    LedgerStore, PurchaseEngine, RateLimitPolicy, RateLimiter, SettlementEngine,
    SignatureVerifier, TopupDesk,
};
use std::sync::Arc;

pub const SIGNUP_NAMESPACE: &str = "ratelimit:signup";
pub const PURCHASE_NAMESPACE: &str = "ratelimit:purchase";
pub const TOPUP_NAMESPACE: &str = "ratelimit:topup";

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub config: Arc<Config>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub settlement: SettlementEngine,
    pub purchases: PurchaseEngine,
    pub topups: TopupDesk,
    /// `None` when no payment secret is configured; the webhook then refuses
    /// every delivery.
    pub verifier: Option<SignatureVerifier>,
}

impl AppState {
    /// Wires the engines onto a single store handle and builds the webhook
    /// verifier from the configured secret.
    pub fn new(
        store: Arc<dyn LedgerStore>,
        config: Arc<Config>,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        let verifier = SignatureVerifier::new(
            config.payment_api_key.as_deref(),
            &config.signature_schemes,
        )
        .ok();
        Self {
            settlement: SettlementEngine::new(store.clone()),
            purchases: PurchaseEngine::new(store.clone()),
            topups: TopupDesk::new(store.clone()),
            store,
            config,
            rate_limiter,
            verifier,
        }
    }

    pub fn signup_policy(&self) -> RateLimitPolicy {
        policy(SIGNUP_NAMESPACE, self.config.signup_rate_limit)
    }

    pub fn purchase_policy(&self) -> RateLimitPolicy {
        policy(PURCHASE_NAMESPACE, self.config.purchase_rate_limit)
    }

    pub fn topup_policy(&self) -> RateLimitPolicy {
        policy(TOPUP_NAMESPACE, self.config.topup_rate_limit)
    }
}

fn policy(namespace: &'static str, setting: RateLimitSetting) -> RateLimitPolicy {
    RateLimitPolicy {
        namespace,
        max_requests: setting.max_requests,
        window: setting.window,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::rate_limit::FixedWindowRateLimiter;
    use coin_ledger_core::{MemoryLedger, SignatureScheme};

    fn state_with(vars: &[(&str, &str)]) -> AppState {
        let config = Config::from_lookup(|key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        })
        .unwrap();
        AppState::new(
            Arc::new(MemoryLedger::new()),
            Arc::new(config),
            Arc::new(FixedWindowRateLimiter::default()),
        )
    }

    #[test]
    fn verifier_is_built_once_from_the_configured_secret() {
        let state = state_with(&[
            ("DATABASE_URL", "postgres://unused"),
            ("PAYMENT_API_KEY", "gateway-secret"),
            ("PAYMENT_SIGNATURE_SCHEMES", "data_colon_secret"),
        ]);
        let verifier = state.verifier.as_ref().unwrap();
        assert_eq!(verifier.schemes(), &[SignatureScheme::DataColonSecret]);

        let data = r#"{"id_pay":"1"}"#;
        let signature = SignatureScheme::DataColonSecret.sign(data, "gateway-secret");
        assert!(verifier.verify(data, &signature));
    }

    #[test]
    fn missing_secret_leaves_no_verifier() {
        let state = state_with(&[("DATABASE_URL", "postgres://unused")]);
        assert!(state.verifier.is_none());
    }
}
