//! crates/coin_ledger_core/src/settlement.rs
//!
//! Reconciles verified gateway webhooks against pending top-up transactions.
//!
//! The gateway delivers webhooks at least once, so settlement must credit at
//! most once: a delivery for an already-completed transaction, or one that
//! loses the race against a concurrent delivery, resolves to
//! [`SettlementOutcome::AlreadySettled`] instead of an error.

use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::{Credit, TopupStatus, WebhookPayment};
use crate::error::{LedgerError, LedgerResult};
use crate::ports::LedgerStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// The transaction moved to `completed` and its coins were credited.
    Credited(Credit),
    /// The transaction was already completed; nothing was written.
    AlreadySettled { transaction_id: i64 },
}

#[derive(Clone)]
pub struct SettlementEngine {
    store: Arc<dyn LedgerStore>,
}

impl SettlementEngine {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Applies a webhook payment whose signature has already been verified.
    pub async fn settle(&self, payment: &WebhookPayment) -> LedgerResult<SettlementOutcome> {
        let transaction = self
            .store
            .find_topup_by_gateway_ref(&payment.gateway_ref)
            .await?
            .ok_or(LedgerError::TransactionNotFound)?;

        if transaction.status == TopupStatus::Completed {
            info!(
                gateway_ref = %payment.gateway_ref,
                transaction_id = transaction.id,
                "Webhook replay for settled transaction, acknowledging"
            );
            return Ok(SettlementOutcome::AlreadySettled {
                transaction_id: transaction.id,
            });
        }

        if !transaction.amount_paid.matches(payment.amount) {
            warn!(
                gateway_ref = %payment.gateway_ref,
                expected = %transaction.amount_paid,
                received = %payment.amount,
                "Webhook amount does not match pending transaction"
            );
            return Err(LedgerError::AmountMismatch {
                expected: transaction.amount_paid,
                received: payment.amount,
            });
        }

        let credit = self
            .store
            .complete_topup(transaction.id)
            .await
            .map_err(|e| LedgerError::SettlementFailed(e.to_string()))?;

        match credit {
            Some(credit) => {
                info!(
                    gateway_ref = %payment.gateway_ref,
                    user_id = %credit.user_id,
                    coins_added = %credit.coins_added,
                    amount = %transaction.amount_paid,
                    "Top-up settled"
                );
                Ok(SettlementOutcome::Credited(credit))
            }
            None => {
                info!(
                    gateway_ref = %payment.gateway_ref,
                    transaction_id = transaction.id,
                    "Concurrent delivery already settled transaction"
                );
                Ok(SettlementOutcome::AlreadySettled {
                    transaction_id: transaction.id,
                })
            }
        }
    }
}
