//! crates/coin_ledger_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the ledger's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the concrete database and rate-limit store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{
    Coins, Credit, Episode, EpisodeId, LedgerEntry, NewTopupTransaction, PurchaseCommit,
    TopupPackage, TopupTransaction, UserId, WorkKind,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Conflicting item: {0}")]
    Conflict(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Ledger Store
//=========================================================================================

/// Durable storage for balances, top-up transactions, the episode catalog and
/// ownership records.
///
/// `complete_topup` and `commit_purchase` are the only balance-mutating calls and
/// each must apply all of its writes as one atomic unit.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // --- Accounts ---
    /// Creates the ledger entry with a zero balance if it does not exist yet.
    async fn open_account(&self, user_id: UserId) -> PortResult<LedgerEntry>;

    async fn get_ledger_entry(&self, user_id: UserId) -> PortResult<LedgerEntry>;

    // --- Top-ups ---
    /// Visible packages, cheapest first.
    async fn list_topup_packages(&self) -> PortResult<Vec<TopupPackage>>;

    async fn get_topup_package(&self, package_id: i64) -> PortResult<TopupPackage>;

    /// Fails with `PortError::Conflict` if the gateway reference is already recorded.
    async fn create_topup_transaction(
        &self,
        new: NewTopupTransaction,
    ) -> PortResult<TopupTransaction>;

    async fn find_topup_by_gateway_ref(
        &self,
        gateway_ref: &str,
    ) -> PortResult<Option<TopupTransaction>>;

    /// Marks a `pending` transaction `completed` and credits its coins in one unit.
    ///
    /// Returns `None` when the transaction is no longer pending, in which case
    /// nothing is written.
    async fn complete_topup(&self, transaction_id: i64) -> PortResult<Option<Credit>>;

    // --- Catalog ---
    /// Returns the active episodes among `ids`; unknown ids are omitted.
    async fn get_episodes(&self, ids: &[EpisodeId]) -> PortResult<Vec<Episode>>;

    async fn find_episode_by_number(
        &self,
        work_id: Uuid,
        kind: WorkKind,
        number: i32,
    ) -> PortResult<Episode>;

    // --- Ownership ---
    /// The subset of `ids` the user owns permanently or under a grant still
    /// valid at `at`.
    async fn owned_episodes(
        &self,
        user_id: UserId,
        ids: &[EpisodeId],
        at: DateTime<Utc>,
    ) -> PortResult<Vec<EpisodeId>>;

    /// Debits `total` and writes a permanent ownership record per episode, or
    /// writes nothing.
    ///
    /// Balance and ownership are re-checked under the ledger row lock, so a
    /// stale pre-check can never cause an overdraft or a double charge.
    async fn commit_purchase(
        &self,
        user_id: UserId,
        episodes: &[Episode],
        total: Coins,
        at: DateTime<Utc>,
    ) -> PortResult<PurchaseCommit>;
}

//=========================================================================================
// Rate Limiter
//=========================================================================================

/// A throttling rule. The namespace keeps counters of different features apart
/// even for the same caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub namespace: &'static str,
    pub max_requests: u32,
    pub window: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Time until the current window resets.
    pub reset_in: Duration,
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Records one request for `identifier` under `policy` and reports whether
    /// it is allowed.
    async fn check(
        &self,
        identifier: &str,
        policy: &RateLimitPolicy,
    ) -> PortResult<RateLimitDecision>;
}
