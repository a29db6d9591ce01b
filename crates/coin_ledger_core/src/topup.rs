//! crates/coin_ledger_core/src/topup.rs
//!
//! Account opening, balance lookup and recording of pending top-ups.

use std::sync::Arc;
use tracing::info;

use crate::domain::{LedgerEntry, NewTopupTransaction, TopupPackage, TopupTransaction, UserId};
use crate::error::{LedgerError, LedgerResult};
use crate::ports::{LedgerStore, PortError};

#[derive(Clone)]
pub struct TopupDesk {
    store: Arc<dyn LedgerStore>,
}

impl TopupDesk {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Creates the user's ledger entry with a zero balance. Idempotent.
    pub async fn open_account(&self, user_id: UserId) -> LedgerResult<LedgerEntry> {
        Ok(self.store.open_account(user_id).await?)
    }

    pub async fn balance(&self, user_id: UserId) -> LedgerResult<LedgerEntry> {
        Ok(self.store.get_ledger_entry(user_id).await?)
    }

    pub async fn packages(&self) -> LedgerResult<Vec<TopupPackage>> {
        Ok(self.store.list_topup_packages().await?)
    }

    /// Records a pending top-up for `package_id` under the reference the gateway
    /// issued for the payment.
    pub async fn initiate(
        &self,
        user_id: UserId,
        package_id: i64,
        gateway_ref: &str,
    ) -> LedgerResult<TopupTransaction> {
        let gateway_ref = gateway_ref.trim();
        if gateway_ref.is_empty() {
            return Err(LedgerError::InvalidRequest(
                "gateway reference is required".to_string(),
            ));
        }

        let package = self
            .store
            .get_topup_package(package_id)
            .await
            .map_err(|e| match e {
                PortError::NotFound(_) => LedgerError::PackageNotFound(package_id),
                other => LedgerError::Port(other),
            })?;

        let transaction = self
            .store
            .create_topup_transaction(NewTopupTransaction {
                user_id,
                gateway_ref: gateway_ref.to_string(),
                package_id: Some(package.id),
                amount_paid: package.price,
                coins_added: package.coins_credited(),
            })
            .await
            .map_err(|e| match e {
                PortError::Conflict(_) => LedgerError::DuplicateReference(gateway_ref.to_string()),
                other => LedgerError::Port(other),
            })?;

        info!(
            user_id = %user_id,
            gateway_ref = %transaction.gateway_ref,
            amount = %transaction.amount_paid,
            coins = %transaction.coins_added,
            "Pending top-up recorded"
        );
        Ok(transaction)
    }
}
