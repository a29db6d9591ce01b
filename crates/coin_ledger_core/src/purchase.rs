//! crates/coin_ledger_core/src/purchase.rs
//!
//! Converts ledger balance into permanent episode ownership.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{Coins, EpisodeId, PurchaseCommit, UserId, WorkKind};
use crate::error::{LedgerError, LedgerResult};
use crate::ports::{LedgerStore, PortError};

//=========================================================================================
// Requests and Commands
//=========================================================================================

/// The two request shapes clients send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseRequest {
    /// A list of episode ids.
    Episodes(Vec<EpisodeId>),
    /// A single episode addressed by its work and episode number.
    Legacy {
        work_id: Uuid,
        number: i32,
        kind: WorkKind,
    },
}

/// The normalized input of [`PurchaseEngine::purchase`]: a deduplicated,
/// non-empty list of episode ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseCommand {
    episode_ids: Vec<EpisodeId>,
}

impl PurchaseCommand {
    pub fn new(ids: impl IntoIterator<Item = EpisodeId>) -> LedgerResult<Self> {
        let mut seen = HashSet::new();
        let episode_ids: Vec<EpisodeId> = ids.into_iter().filter(|id| seen.insert(*id)).collect();
        if episode_ids.is_empty() {
            return Err(LedgerError::InvalidRequest("no episodes specified".to_string()));
        }
        Ok(Self { episode_ids })
    }

    pub fn episode_ids(&self) -> &[EpisodeId] {
        &self.episode_ids
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseReceipt {
    pub purchased: usize,
    pub charged: Coins,
    pub balance_after: Coins,
}

//=========================================================================================
// Engine
//=========================================================================================

#[derive(Clone)]
pub struct PurchaseEngine {
    store: Arc<dyn LedgerStore>,
}

impl PurchaseEngine {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Resolves either request shape into a [`PurchaseCommand`].
    pub async fn normalize(&self, request: PurchaseRequest) -> LedgerResult<PurchaseCommand> {
        match request {
            PurchaseRequest::Episodes(ids) => PurchaseCommand::new(ids),
            PurchaseRequest::Legacy {
                work_id,
                number,
                kind,
            } => {
                let episode = self
                    .store
                    .find_episode_by_number(work_id, kind, number)
                    .await
                    .map_err(|e| match e {
                        PortError::NotFound(_) => LedgerError::EpisodeNotFound(Vec::new()),
                        other => LedgerError::Port(other),
                    })?;
                PurchaseCommand::new([episode.id])
            }
        }
    }

    /// Charges the user for every episode in `command` and grants permanent
    /// ownership, or changes nothing.
    pub async fn purchase(
        &self,
        user_id: UserId,
        command: &PurchaseCommand,
    ) -> LedgerResult<PurchaseReceipt> {
        let requested = command.episode_ids();
        let episodes = self.store.get_episodes(requested).await?;

        let found: HashSet<EpisodeId> = episodes.iter().map(|e| e.id).collect();
        let missing: Vec<EpisodeId> = requested
            .iter()
            .copied()
            .filter(|id| !found.contains(id))
            .collect();
        if !missing.is_empty() {
            return Err(LedgerError::EpisodeNotFound(missing));
        }

        // Free episodes are readable without a record and are never charged.
        let chargeable: Vec<_> = episodes.into_iter().filter(|e| !e.is_free()).collect();
        if chargeable.is_empty() {
            return Err(LedgerError::NothingToPurchase);
        }

        let now = Utc::now();
        let ids: Vec<EpisodeId> = chargeable.iter().map(|e| e.id).collect();
        let owned = self.store.owned_episodes(user_id, &ids, now).await?;
        if !owned.is_empty() {
            return Err(LedgerError::AlreadyOwned(owned));
        }

        let total = chargeable
            .iter()
            .try_fold(Coins::ZERO, |acc, e| acc.checked_add(e.price))
            .ok_or_else(|| LedgerError::InvalidRequest("total price overflows".to_string()))?;

        let entry = self.store.get_ledger_entry(user_id).await?;
        if entry.balance < total {
            return Err(LedgerError::InsufficientBalance {
                required: total,
                available: entry.balance,
            });
        }

        match self
            .store
            .commit_purchase(user_id, &chargeable, total, now)
            .await?
        {
            PurchaseCommit::Committed { balance_after } => {
                info!(
                    user_id = %user_id,
                    episodes = chargeable.len(),
                    charged = %total,
                    balance_after = %balance_after,
                    "Episodes purchased"
                );
                Ok(PurchaseReceipt {
                    purchased: chargeable.len(),
                    charged: total,
                    balance_after,
                })
            }
            PurchaseCommit::InsufficientBalance { available } => {
                warn!(user_id = %user_id, "Balance changed before purchase commit");
                Err(LedgerError::InsufficientBalance {
                    required: total,
                    available,
                })
            }
            PurchaseCommit::AlreadyOwned(ids) => Err(LedgerError::AlreadyOwned(ids)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Episode, OwnershipRecord};
    use crate::memory::MemoryLedger;

    const USER: UserId = UserId(1);

    async fn seed(ledger: &MemoryLedger, work_id: Uuid, prices: &[i64]) -> Vec<EpisodeId> {
        let mut ids = Vec::new();
        for (i, price) in prices.iter().enumerate() {
            let episode = Episode {
                id: Uuid::new_v4(),
                work_id,
                number: i as i32 + 1,
                price: Coins(*price),
            };
            ids.push(episode.id);
            ledger.add_episode(episode, WorkKind::Manga).await;
        }
        ids
    }

    async fn setup(balance: i64, prices: &[i64]) -> (Arc<MemoryLedger>, PurchaseEngine, Vec<EpisodeId>) {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.set_balance(USER, Coins(balance)).await;
        let ids = seed(&ledger, Uuid::new_v4(), prices).await;
        let engine = PurchaseEngine::new(ledger.clone());
        (ledger, engine, ids)
    }

    #[tokio::test]
    async fn purchase_debits_total_and_grants_permanent_ownership() {
        let (ledger, engine, ids) = setup(200, &[60, 50]).await;

        let receipt = engine
            .purchase(USER, &PurchaseCommand::new(ids.clone()).unwrap())
            .await
            .unwrap();

        assert_eq!(receipt.purchased, 2);
        assert_eq!(receipt.charged, Coins(110));
        assert_eq!(receipt.balance_after, Coins(90));
        let records = ledger.ownerships_for(USER).await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.expires_at.is_none()));
    }

    #[tokio::test]
    async fn insufficient_balance_changes_nothing() {
        let (ledger, engine, ids) = setup(100, &[60, 50]).await;

        let err = engine
            .purchase(USER, &PurchaseCommand::new(ids).unwrap())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LedgerError::InsufficientBalance { required: Coins(110), available: Coins(100) }
        ));
        assert_eq!(ledger.get_ledger_entry(USER).await.unwrap().balance, Coins(100));
        assert!(ledger.ownerships_for(USER).await.is_empty());
    }

    #[tokio::test]
    async fn one_owned_episode_rejects_the_whole_batch() {
        let (ledger, engine, ids) = setup(500, &[60, 50]).await;
        ledger
            .grant(OwnershipRecord {
                user_id: USER,
                episode_id: ids[1],
                acquired_at: Utc::now(),
                expires_at: None,
            })
            .await;

        let err = engine
            .purchase(USER, &PurchaseCommand::new(ids.clone()).unwrap())
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::AlreadyOwned(ref owned) if owned == &vec![ids[1]]));
        assert_eq!(ledger.get_ledger_entry(USER).await.unwrap().balance, Coins(500));
        assert_eq!(ledger.ownerships_for(USER).await.len(), 1);
    }

    #[tokio::test]
    async fn expired_grant_can_be_bought_permanently() {
        let (ledger, engine, ids) = setup(100, &[60]).await;
        ledger
            .grant(OwnershipRecord {
                user_id: USER,
                episode_id: ids[0],
                acquired_at: Utc::now() - chrono::Duration::days(2),
                expires_at: Some(Utc::now() - chrono::Duration::days(1)),
            })
            .await;

        engine
            .purchase(USER, &PurchaseCommand::new(ids.clone()).unwrap())
            .await
            .unwrap();

        let records = ledger.ownerships_for(USER).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].expires_at, None);
    }

    #[tokio::test]
    async fn unexpired_temporary_grant_counts_as_owned() {
        let (ledger, engine, ids) = setup(100, &[60]).await;
        ledger
            .grant(OwnershipRecord {
                user_id: USER,
                episode_id: ids[0],
                acquired_at: Utc::now(),
                expires_at: Some(Utc::now() + chrono::Duration::days(1)),
            })
            .await;

        let err = engine
            .purchase(USER, &PurchaseCommand::new(ids).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyOwned(_)));
    }

    #[tokio::test]
    async fn free_episodes_are_neither_charged_nor_recorded() {
        let (ledger, engine, ids) = setup(100, &[0, 40]).await;

        let receipt = engine
            .purchase(USER, &PurchaseCommand::new(ids.clone()).unwrap())
            .await
            .unwrap();

        assert_eq!(receipt.purchased, 1);
        assert_eq!(receipt.balance_after, Coins(60));
        let records = ledger.ownerships_for(USER).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].episode_id, ids[1]);
    }

    #[tokio::test]
    async fn only_free_episodes_is_nothing_to_purchase() {
        let (_, engine, ids) = setup(100, &[0]).await;
        let err = engine
            .purchase(USER, &PurchaseCommand::new(ids).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NothingToPurchase));
    }

    #[tokio::test]
    async fn unknown_episode_is_reported() {
        let (_, engine, mut ids) = setup(100, &[10]).await;
        let ghost = Uuid::new_v4();
        ids.push(ghost);

        let err = engine
            .purchase(USER, &PurchaseCommand::new(ids).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::EpisodeNotFound(ref missing) if missing == &vec![ghost]));
    }

    #[test]
    fn command_deduplicates_and_rejects_empty() {
        let id = Uuid::new_v4();
        let command = PurchaseCommand::new([id, id]).unwrap();
        assert_eq!(command.episode_ids(), &[id]);
        assert!(matches!(
            PurchaseCommand::new(Vec::new()),
            Err(LedgerError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn legacy_request_resolves_to_single_episode() {
        let ledger = Arc::new(MemoryLedger::new());
        let work_id = Uuid::new_v4();
        let ids = seed(&ledger, work_id, &[10, 20, 30]).await;
        let engine = PurchaseEngine::new(ledger.clone());

        let command = engine
            .normalize(PurchaseRequest::Legacy {
                work_id,
                number: 2,
                kind: WorkKind::Manga,
            })
            .await
            .unwrap();
        assert_eq!(command.episode_ids(), &[ids[1]]);

        let err = engine
            .normalize(PurchaseRequest::Legacy {
                work_id,
                number: 2,
                kind: WorkKind::Novel,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::EpisodeNotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_overlapping_purchases_never_overdraw() {
        let (ledger, engine, ids) = setup(120, &[60, 50, 40]).await;
        let first = PurchaseCommand::new([ids[0], ids[1]]).unwrap();
        let second = PurchaseCommand::new([ids[1], ids[2]]).unwrap();

        let (a, b) = tokio::join!(
            {
                let engine = engine.clone();
                let first = first.clone();
                tokio::spawn(async move { engine.purchase(USER, &first).await })
            },
            {
                let engine = engine.clone();
                let second = second.clone();
                tokio::spawn(async move { engine.purchase(USER, &second).await })
            }
        );
        let results = [a.unwrap(), b.unwrap()];

        let succeeded: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(succeeded.len(), 1);
        let balance = ledger.get_ledger_entry(USER).await.unwrap().balance;
        assert_eq!(balance, succeeded[0].balance_after);
        assert!(balance >= Coins::ZERO);
        assert_eq!(
            ledger.ownerships_for(USER).await.len(),
            succeeded[0].purchased
        );
    }
}
