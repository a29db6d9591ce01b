//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `LedgerStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! The two balance-mutating calls run inside a database transaction:
//! settlement uses a conditional update on `status = 'pending'`, purchases lock
//! the user's ledger row with `FOR UPDATE` before re-checking balance and
//! ownership.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coin_ledger_core::domain::{
    Coins, Credit, Episode, EpisodeId, LedgerEntry, Money, NewTopupTransaction, PurchaseCommit,
    TopupPackage, TopupStatus, TopupTransaction, UserId, WorkKind,
};
use coin_ledger_core::ports::{LedgerStore, PortError, PortResult};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `LedgerStore` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map_or(false, |db| db.is_unique_violation())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct LedgerRecord {
    user_id: i64,
    point: i64,
}
impl LedgerRecord {
    fn to_domain(self) -> LedgerEntry {
        LedgerEntry {
            user_id: UserId(self.user_id),
            balance: Coins(self.point),
        }
    }
}

#[derive(FromRow)]
struct PackageRecord {
    id: i64,
    price_minor: i64,
    coin_amount: i64,
    bonus: i64,
}
impl PackageRecord {
    fn to_domain(self) -> TopupPackage {
        TopupPackage {
            id: self.id,
            price: Money::from_minor_units(self.price_minor),
            coin_amount: Coins(self.coin_amount),
            bonus: Coins(self.bonus),
        }
    }
}

#[derive(FromRow)]
struct TopupRecord {
    id: i64,
    user_id: i64,
    ref_id: String,
    package_id: Option<i64>,
    amount_paid_minor: i64,
    coins_added: i64,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl TopupRecord {
    fn to_domain(self) -> PortResult<TopupTransaction> {
        let status = self
            .status
            .parse::<TopupStatus>()
            .map_err(PortError::Unexpected)?;
        Ok(TopupTransaction {
            id: self.id,
            user_id: UserId(self.user_id),
            gateway_ref: self.ref_id,
            package_id: self.package_id,
            amount_paid: Money::from_minor_units(self.amount_paid_minor),
            coins_added: Coins(self.coins_added),
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct EpisodeRecord {
    id: Uuid,
    work_id: Uuid,
    ep_no: i32,
    price: i64,
}
impl EpisodeRecord {
    fn to_domain(self) -> Episode {
        Episode {
            id: self.id,
            work_id: self.work_id,
            number: self.ep_no,
            price: Coins(self.price),
        }
    }
}

const TOPUP_COLUMNS: &str = "id, user_id, ref_id, package_id, amount_paid_minor, coins_added, \
                             status, created_at, updated_at";

//=========================================================================================
// `LedgerStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl LedgerStore for DbAdapter {
    async fn open_account(&self, user_id: UserId) -> PortResult<LedgerEntry> {
        sqlx::query("INSERT INTO user_ledgers (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id.0)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;

        self.get_ledger_entry(user_id).await
    }

    async fn get_ledger_entry(&self, user_id: UserId) -> PortResult<LedgerEntry> {
        let record = sqlx::query_as::<_, LedgerRecord>(
            "SELECT user_id, point FROM user_ledgers WHERE user_id = $1",
        )
        .bind(user_id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("Ledger for user {} not found", user_id))
            }
            _ => unexpected(e),
        })?;
        Ok(record.to_domain())
    }

    async fn list_topup_packages(&self) -> PortResult<Vec<TopupPackage>> {
        let records = sqlx::query_as::<_, PackageRecord>(
            "SELECT id, price_minor, coin_amount, bonus FROM topup_packages \
             WHERE status = 'show' ORDER BY price_minor ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn get_topup_package(&self, package_id: i64) -> PortResult<TopupPackage> {
        let record = sqlx::query_as::<_, PackageRecord>(
            "SELECT id, price_minor, coin_amount, bonus FROM topup_packages \
             WHERE id = $1 AND status = 'show'",
        )
        .bind(package_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("Package {} not found", package_id))
            }
            _ => unexpected(e),
        })?;
        Ok(record.to_domain())
    }

    async fn create_topup_transaction(
        &self,
        new: NewTopupTransaction,
    ) -> PortResult<TopupTransaction> {
        let sql = format!(
            "INSERT INTO topup_transactions \
             (user_id, ref_id, package_id, amount_paid_minor, coins_added, status) \
             VALUES ($1, $2, $3, $4, $5, 'pending') RETURNING {}",
            TOPUP_COLUMNS
        );
        let record = sqlx::query_as::<_, TopupRecord>(&sql)
            .bind(new.user_id.0)
            .bind(&new.gateway_ref)
            .bind(new.package_id)
            .bind(new.amount_paid.minor_units())
            .bind(new.coins_added.0)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    PortError::Conflict(format!(
                        "Transaction with reference {} already exists",
                        new.gateway_ref
                    ))
                } else {
                    unexpected(e)
                }
            })?;
        record.to_domain()
    }

    async fn find_topup_by_gateway_ref(
        &self,
        gateway_ref: &str,
    ) -> PortResult<Option<TopupTransaction>> {
        let sql = format!(
            "SELECT {} FROM topup_transactions WHERE ref_id = $1",
            TOPUP_COLUMNS
        );
        let record = sqlx::query_as::<_, TopupRecord>(&sql)
            .bind(gateway_ref)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;
        record.map(|r| r.to_domain()).transpose()
    }

    async fn complete_topup(&self, transaction_id: i64) -> PortResult<Option<Credit>> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        // Only a row that is still pending can be claimed; a concurrent delivery
        // that got here first leaves nothing to update.
        let claimed: Option<(i64, i64)> = sqlx::query_as(
            "UPDATE topup_transactions SET status = 'completed', updated_at = now() \
             WHERE id = $1 AND status = 'pending' RETURNING user_id, coins_added",
        )
        .bind(transaction_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?;

        let Some((user_id, coins_added)) = claimed else {
            tx.rollback().await.map_err(unexpected)?;
            return Ok(None);
        };

        let credited: Option<(i64,)> = sqlx::query_as(
            "UPDATE user_ledgers SET point = point + $2, updated_at = now() \
             WHERE user_id = $1 RETURNING point",
        )
        .bind(user_id)
        .bind(coins_added)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?;

        // Dropping `tx` without commit rolls the status change back.
        let Some((balance_after,)) = credited else {
            return Err(PortError::NotFound(format!(
                "Ledger for user {} not found",
                user_id
            )));
        };

        tx.commit().await.map_err(unexpected)?;

        Ok(Some(Credit {
            transaction_id,
            user_id: UserId(user_id),
            coins_added: Coins(coins_added),
            balance_after: Coins(balance_after),
        }))
    }

    async fn get_episodes(&self, ids: &[EpisodeId]) -> PortResult<Vec<Episode>> {
        let records = sqlx::query_as::<_, EpisodeRecord>(
            "SELECT e.id, e.work_id, e.ep_no, e.price FROM episodes e \
             JOIN works w ON w.id = e.work_id \
             WHERE e.id = ANY($1) AND e.status = 'active' AND w.status = 'active'",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn find_episode_by_number(
        &self,
        work_id: Uuid,
        kind: WorkKind,
        number: i32,
    ) -> PortResult<Episode> {
        let record = sqlx::query_as::<_, EpisodeRecord>(
            "SELECT e.id, e.work_id, e.ep_no, e.price FROM episodes e \
             JOIN works w ON w.id = e.work_id \
             WHERE w.id = $1 AND w.kind = $2 AND w.status = 'active' \
             AND e.ep_no = $3 AND e.status = 'active'",
        )
        .bind(work_id)
        .bind(kind.as_str())
        .bind(number)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!(
                "Episode {} of work {} not found",
                number, work_id
            )),
            _ => unexpected(e),
        })?;
        Ok(record.to_domain())
    }

    async fn owned_episodes(
        &self,
        user_id: UserId,
        ids: &[EpisodeId],
        at: DateTime<Utc>,
    ) -> PortResult<Vec<EpisodeId>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT episode_id FROM episode_ownerships \
             WHERE user_id = $1 AND episode_id = ANY($2) \
             AND (expires_at IS NULL OR expires_at > $3)",
        )
        .bind(user_id.0)
        .bind(ids)
        .bind(at)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn commit_purchase(
        &self,
        user_id: UserId,
        episodes: &[Episode],
        total: Coins,
        at: DateTime<Utc>,
    ) -> PortResult<PurchaseCommit> {
        let ids: Vec<Uuid> = episodes.iter().map(|e| e.id).collect();
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let locked: Option<(i64,)> =
            sqlx::query_as("SELECT point FROM user_ledgers WHERE user_id = $1 FOR UPDATE")
                .bind(user_id.0)
                .fetch_optional(&mut *tx)
                .await
                .map_err(unexpected)?;
        let Some((available,)) = locked else {
            return Err(PortError::NotFound(format!(
                "Ledger for user {} not found",
                user_id
            )));
        };

        let owned: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT episode_id FROM episode_ownerships \
             WHERE user_id = $1 AND episode_id = ANY($2) \
             AND (expires_at IS NULL OR expires_at > $3)",
        )
        .bind(user_id.0)
        .bind(&ids)
        .bind(at)
        .fetch_all(&mut *tx)
        .await
        .map_err(unexpected)?;
        if !owned.is_empty() {
            tx.rollback().await.map_err(unexpected)?;
            return Ok(PurchaseCommit::AlreadyOwned(
                owned.into_iter().map(|(id,)| id).collect(),
            ));
        }

        if available < total.0 {
            tx.rollback().await.map_err(unexpected)?;
            return Ok(PurchaseCommit::InsufficientBalance {
                available: Coins(available),
            });
        }

        let (balance_after,): (i64,) = sqlx::query_as(
            "UPDATE user_ledgers SET point = point - $2, updated_at = now() \
             WHERE user_id = $1 RETURNING point",
        )
        .bind(user_id.0)
        .bind(total.0)
        .fetch_one(&mut *tx)
        .await
        .map_err(unexpected)?;

        // An expired temporary grant is upgraded to a permanent record.
        sqlx::query(
            "INSERT INTO episode_ownerships (user_id, episode_id, acquired_at, expires_at) \
             SELECT $1, episode_id, $3, NULL FROM UNNEST($2::uuid[]) AS t(episode_id) \
             ON CONFLICT (user_id, episode_id) \
             DO UPDATE SET acquired_at = EXCLUDED.acquired_at, expires_at = NULL",
        )
        .bind(user_id.0)
        .bind(&ids)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;

        Ok(PurchaseCommit::Committed {
            balance_after: Coins(balance_after),
        })
    }
}
