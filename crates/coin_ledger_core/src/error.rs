//! crates/coin_ledger_core/src/error.rs
//!
//! The error taxonomy shared by the settlement, purchase and top-up flows.

use std::time::Duration;

use crate::domain::{Coins, EpisodeId, Money};
use crate::ports::PortError;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Transaction not found")]
    TransactionNotFound,

    #[error("Amount mismatch: expected {expected}, received {received}")]
    AmountMismatch { expected: Money, received: Money },

    /// The atomic settlement could not be committed. Safe to retry.
    #[error("Settlement failed: {0}")]
    SettlementFailed(String),

    #[error("Episodes already owned: {0:?}")]
    AlreadyOwned(Vec<EpisodeId>),

    #[error("Insufficient balance: {required} required, {available} available")]
    InsufficientBalance { required: Coins, available: Coins },

    #[error("Episodes not found: {0:?}")]
    EpisodeNotFound(Vec<EpisodeId>),

    #[error("No chargeable episodes in request")]
    NothingToPurchase,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Top-up package {0} not found")]
    PackageNotFound(i64),

    #[error("Gateway reference '{0}' is already recorded")]
    DuplicateReference(String),

    /// Fatal misconfiguration, e.g. a missing webhook secret.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Rate limited, retry in {}s", reset_in.as_secs())]
    RateLimited { reset_in: Duration, remaining: u32 },

    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),
}

pub type LedgerResult<T> = Result<T, LedgerError>;
