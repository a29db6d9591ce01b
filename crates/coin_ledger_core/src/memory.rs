//! crates/coin_ledger_core/src/memory.rs
//!
//! An in-process implementation of the `LedgerStore` port.
//!
//! All state sits behind one async mutex, so every port call is trivially
//! atomic. It backs the engine and HTTP tests and can stand in for Postgres in
//! local tooling.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{
    Coins, Credit, Episode, EpisodeId, LedgerEntry, NewTopupTransaction, OwnershipRecord,
    PurchaseCommit, TopupPackage, TopupStatus, TopupTransaction, UserId, WorkKind,
};
use crate::ports::{LedgerStore, PortError, PortResult};

#[derive(Default)]
struct State {
    balances: HashMap<UserId, Coins>,
    packages: Vec<TopupPackage>,
    transactions: Vec<TopupTransaction>,
    episodes: HashMap<EpisodeId, (Episode, WorkKind)>,
    ownerships: Vec<OwnershipRecord>,
}

#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<State>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    //-------------------------------------------------------------------------------------
    // Seeding helpers
    //-------------------------------------------------------------------------------------

    pub async fn set_balance(&self, user_id: UserId, balance: Coins) {
        self.state.lock().await.balances.insert(user_id, balance);
    }

    pub async fn add_package(&self, package: TopupPackage) {
        self.state.lock().await.packages.push(package);
    }

    pub async fn add_episode(&self, episode: Episode, kind: WorkKind) {
        self.state
            .lock()
            .await
            .episodes
            .insert(episode.id, (episode, kind));
    }

    pub async fn grant(&self, record: OwnershipRecord) {
        self.state.lock().await.ownerships.push(record);
    }

    pub async fn ownerships_for(&self, user_id: UserId) -> Vec<OwnershipRecord> {
        self.state
            .lock()
            .await
            .ownerships
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }
}

fn owned_in(state: &State, user_id: UserId, ids: &[EpisodeId], at: DateTime<Utc>) -> Vec<EpisodeId> {
    let mut owned: Vec<EpisodeId> = ids
        .iter()
        .copied()
        .filter(|id| {
            state
                .ownerships
                .iter()
                .any(|r| r.user_id == user_id && r.episode_id == *id && r.is_active_at(at))
        })
        .collect();
    owned.dedup();
    owned
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn open_account(&self, user_id: UserId) -> PortResult<LedgerEntry> {
        let mut state = self.state.lock().await;
        let balance = *state.balances.entry(user_id).or_insert(Coins::ZERO);
        Ok(LedgerEntry { user_id, balance })
    }

    async fn get_ledger_entry(&self, user_id: UserId) -> PortResult<LedgerEntry> {
        let state = self.state.lock().await;
        state
            .balances
            .get(&user_id)
            .map(|balance| LedgerEntry {
                user_id,
                balance: *balance,
            })
            .ok_or_else(|| PortError::NotFound(format!("Ledger for user {} not found", user_id)))
    }

    async fn list_topup_packages(&self) -> PortResult<Vec<TopupPackage>> {
        let mut packages = self.state.lock().await.packages.clone();
        packages.sort_by_key(|p| p.price);
        Ok(packages)
    }

    async fn get_topup_package(&self, package_id: i64) -> PortResult<TopupPackage> {
        self.state
            .lock()
            .await
            .packages
            .iter()
            .find(|p| p.id == package_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Package {} not found", package_id)))
    }

    async fn create_topup_transaction(
        &self,
        new: NewTopupTransaction,
    ) -> PortResult<TopupTransaction> {
        let mut state = self.state.lock().await;
        if state
            .transactions
            .iter()
            .any(|t| t.gateway_ref == new.gateway_ref)
        {
            return Err(PortError::Conflict(format!(
                "Transaction with reference {} already exists",
                new.gateway_ref
            )));
        }
        let now = Utc::now();
        let transaction = TopupTransaction {
            id: state.transactions.len() as i64 + 1,
            user_id: new.user_id,
            gateway_ref: new.gateway_ref,
            package_id: new.package_id,
            amount_paid: new.amount_paid,
            coins_added: new.coins_added,
            status: TopupStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        state.transactions.push(transaction.clone());
        Ok(transaction)
    }

    async fn find_topup_by_gateway_ref(
        &self,
        gateway_ref: &str,
    ) -> PortResult<Option<TopupTransaction>> {
        Ok(self
            .state
            .lock()
            .await
            .transactions
            .iter()
            .find(|t| t.gateway_ref == gateway_ref)
            .cloned())
    }

    async fn complete_topup(&self, transaction_id: i64) -> PortResult<Option<Credit>> {
        let mut state = self.state.lock().await;
        let Some(index) = state
            .transactions
            .iter()
            .position(|t| t.id == transaction_id && t.status == TopupStatus::Pending)
        else {
            return Ok(None);
        };

        let user_id = state.transactions[index].user_id;
        let coins = state.transactions[index].coins_added;
        let current = *state.balances.get(&user_id).ok_or_else(|| {
            PortError::NotFound(format!("Ledger for user {} not found", user_id))
        })?;
        let balance_after = current
            .checked_add(coins)
            .ok_or_else(|| PortError::Unexpected("balance overflow".to_string()))?;

        // Both writes happen under the same lock guard.
        state.balances.insert(user_id, balance_after);
        let transaction = &mut state.transactions[index];
        transaction.status = TopupStatus::Completed;
        transaction.updated_at = Utc::now();

        Ok(Some(Credit {
            transaction_id,
            user_id,
            coins_added: coins,
            balance_after,
        }))
    }

    async fn get_episodes(&self, ids: &[EpisodeId]) -> PortResult<Vec<Episode>> {
        let state = self.state.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.episodes.get(id).map(|(e, _)| e.clone()))
            .collect())
    }

    async fn find_episode_by_number(
        &self,
        work_id: Uuid,
        kind: WorkKind,
        number: i32,
    ) -> PortResult<Episode> {
        self.state
            .lock()
            .await
            .episodes
            .values()
            .find(|(e, k)| e.work_id == work_id && *k == kind && e.number == number)
            .map(|(e, _)| e.clone())
            .ok_or_else(|| {
                PortError::NotFound(format!("Episode {} of work {} not found", number, work_id))
            })
    }

    async fn owned_episodes(
        &self,
        user_id: UserId,
        ids: &[EpisodeId],
        at: DateTime<Utc>,
    ) -> PortResult<Vec<EpisodeId>> {
        let state = self.state.lock().await;
        Ok(owned_in(&state, user_id, ids, at))
    }

    async fn commit_purchase(
        &self,
        user_id: UserId,
        episodes: &[Episode],
        total: Coins,
        at: DateTime<Utc>,
    ) -> PortResult<PurchaseCommit> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let available = *state.balances.get(&user_id).ok_or_else(|| {
            PortError::NotFound(format!("Ledger for user {} not found", user_id))
        })?;

        let ids: Vec<EpisodeId> = episodes.iter().map(|e| e.id).collect();
        let owned = owned_in(state, user_id, &ids, at);
        if !owned.is_empty() {
            return Ok(PurchaseCommit::AlreadyOwned(owned));
        }

        let Some(balance_after) = available.checked_sub(total).filter(|b| *b >= Coins::ZERO)
        else {
            return Ok(PurchaseCommit::InsufficientBalance { available });
        };

        state.balances.insert(user_id, balance_after);
        for episode in episodes {
            // An expired grant is upgraded to a permanent one in place.
            if let Some(existing) = state
                .ownerships
                .iter_mut()
                .find(|r| r.user_id == user_id && r.episode_id == episode.id)
            {
                existing.acquired_at = at;
                existing.expires_at = None;
            } else {
                state.ownerships.push(OwnershipRecord {
                    user_id,
                    episode_id: episode.id,
                    acquired_at: at,
                    expires_at: None,
                });
            }
        }

        Ok(PurchaseCommit::Committed { balance_after })
    }
}
