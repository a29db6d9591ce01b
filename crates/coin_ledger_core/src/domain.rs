//! crates/coin_ledger_core/src/domain.rs
//!
//! Defines the pure, core data structures for the coin ledger.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// Identifiers and Quantities
//=========================================================================================

/// Identifies a platform user. Issued by the external auth provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a single episode (content unit).
pub type EpisodeId = Uuid;

/// A quantity of virtual coins. Balances and prices are both expressed in coins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Coins(pub i64);

impl Coins {
    pub const ZERO: Coins = Coins(0);

    pub fn checked_add(self, other: Coins) -> Option<Coins> {
        self.0.checked_add(other.0).map(Coins)
    }

    pub fn checked_sub(self, other: Coins) -> Option<Coins> {
        self.0.checked_sub(other.0).map(Coins)
    }
}

impl fmt::Display for Coins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An amount of real currency in minor units (1 unit = 0.01).
///
/// Gateway amounts arrive as decimal strings such as `"19.00"`; they are parsed
/// exactly into minor units so comparisons never go through floating point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Money(pub i64);

impl Money {
    /// The largest difference still treated as the same payment (0.01).
    pub const TOLERANCE: Money = Money(1);

    pub fn from_minor_units(units: i64) -> Self {
        Self(units)
    }

    pub fn minor_units(self) -> i64 {
        self.0
    }

    /// Whether two amounts are equal within [`Money::TOLERANCE`].
    pub fn matches(self, other: Money) -> bool {
        (self.0 - other.0).abs() <= Self::TOLERANCE.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

/// Error returned when a decimal currency string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid currency amount: '{0}'")]
pub struct ParseMoneyError(pub String);

impl FromStr for Money {
    type Err = ParseMoneyError;

    /// Parses a non-negative decimal amount with at most two fractional digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseMoneyError(s.to_string());
        let trimmed = s.trim();
        let (whole, frac) = match trimmed.split_once('.') {
            Some((w, f)) => (w, f),
            None => (trimmed, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(err());
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(err());
        }
        if frac.len() > 2 {
            return Err(err());
        }

        let whole_units: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| err())?
        };
        let frac_units: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| err())? * 10,
            _ => frac.parse().map_err(|_| err())?,
        };

        whole_units
            .checked_mul(100)
            .and_then(|u| u.checked_add(frac_units))
            .map(Money)
            .ok_or_else(err)
    }
}

//=========================================================================================
// Ledger
//=========================================================================================

/// A user's spendable coin balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub user_id: UserId,
    pub balance: Coins,
}

//=========================================================================================
// Top-ups
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopupStatus {
    Pending,
    Completed,
}

impl TopupStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TopupStatus::Pending => "pending",
            TopupStatus::Completed => "completed",
        }
    }
}

impl FromStr for TopupStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TopupStatus::Pending),
            "completed" => Ok(TopupStatus::Completed),
            other => Err(format!("unknown top-up status '{}'", other)),
        }
    }
}

/// A top-up awaiting (or having received) confirmation from the payment gateway.
#[derive(Debug, Clone)]
pub struct TopupTransaction {
    pub id: i64,
    pub user_id: UserId,
    /// The gateway's reference id (`id_pay`). Unique per gateway.
    pub gateway_ref: String,
    pub package_id: Option<i64>,
    pub amount_paid: Money,
    pub coins_added: Coins,
    pub status: TopupStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The data needed to record a new pending top-up.
#[derive(Debug, Clone)]
pub struct NewTopupTransaction {
    pub user_id: UserId,
    pub gateway_ref: String,
    pub package_id: Option<i64>,
    pub amount_paid: Money,
    pub coins_added: Coins,
}

/// A coin package offered on the top-up page.
#[derive(Debug, Clone)]
pub struct TopupPackage {
    pub id: i64,
    pub price: Money,
    pub coin_amount: Coins,
    pub bonus: Coins,
}

impl TopupPackage {
    /// Coins credited when this package is paid for.
    pub fn coins_credited(&self) -> Coins {
        Coins(self.coin_amount.0 + self.bonus.0)
    }

    /// Whether the package is highlighted when shown at `position` (0-based)
    /// of the price-ordered list: its bonus exceeds 10% of the base amount, or
    /// it sits third or fifth.
    pub fn is_popular(&self, position: usize) -> bool {
        let generous = self.coin_amount.0 > 0 && self.bonus.0 * 10 > self.coin_amount.0;
        generous || position == 2 || position == 4
    }
}

/// Payment data carried by a verified gateway webhook.
#[derive(Debug, Clone)]
pub struct WebhookPayment {
    /// `id_pay`: the gateway reference id, used as the idempotency key.
    pub gateway_ref: String,
    /// `ref1`: the buyer reference. Informational only.
    pub buyer_ref: String,
    /// `amount`: the amount the buyer actually paid.
    pub amount: Money,
    pub amount_check: Option<String>,
    pub paid_at: Option<String>,
}

/// The coins credited by a completed settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credit {
    pub transaction_id: i64,
    pub user_id: UserId,
    pub coins_added: Coins,
    pub balance_after: Coins,
}

//=========================================================================================
// Catalog and Ownership
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkKind {
    #[default]
    Manga,
    Novel,
}

impl WorkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkKind::Manga => "manga",
            WorkKind::Novel => "novel",
        }
    }

    /// Anything other than `novel` is treated as manga.
    pub fn from_label(label: Option<&str>) -> Self {
        match label {
            Some("novel") => WorkKind::Novel,
            _ => WorkKind::Manga,
        }
    }
}

/// A purchasable content unit belonging to a work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Episode {
    pub id: EpisodeId,
    pub work_id: Uuid,
    pub number: i32,
    pub price: Coins,
}

impl Episode {
    pub fn is_free(&self) -> bool {
        self.price.0 <= 0
    }
}

/// Proof that a user may read an episode. `expires_at = None` is permanent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipRecord {
    pub user_id: UserId,
    pub episode_id: EpisodeId,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl OwnershipRecord {
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |exp| exp > at)
    }
}

/// The result of the store's atomic purchase commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseCommit {
    Committed { balance_after: Coins },
    InsufficientBalance { available: Coins },
    AlreadyOwned(Vec<EpisodeId>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gateway_amounts_into_minor_units() {
        assert_eq!("19.00".parse::<Money>(), Ok(Money(1900)));
        assert_eq!("19".parse::<Money>(), Ok(Money(1900)));
        assert_eq!("19.5".parse::<Money>(), Ok(Money(1950)));
        assert_eq!(" 0.01 ".parse::<Money>(), Ok(Money(1)));
        assert_eq!(".50".parse::<Money>(), Ok(Money(50)));
    }

    #[test]
    fn rejects_malformed_amounts() {
        for bad in ["", ".", "-1.00", "19.001", "1e3", "abc", "19,00"] {
            assert!(bad.parse::<Money>().is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn money_matches_within_one_minor_unit() {
        assert!(Money(1900).matches(Money(1901)));
        assert!(Money(1900).matches(Money(1899)));
        assert!(!Money(1900).matches(Money(1902)));
        assert!(!Money(1900).matches(Money(500)));
    }

    #[test]
    fn money_displays_two_decimals() {
        assert_eq!(Money(1900).to_string(), "19.00");
        assert_eq!(Money(5).to_string(), "0.05");
    }

    #[test]
    fn popular_by_bonus_or_list_position() {
        let pkg = |coins, bonus| TopupPackage {
            id: 1,
            price: Money(10000),
            coin_amount: Coins(coins),
            bonus: Coins(bonus),
        };
        assert!(pkg(1000, 101).is_popular(0));
        assert!(!pkg(1000, 100).is_popular(0));
        assert!(pkg(1000, 0).is_popular(2));
        assert!(pkg(1000, 0).is_popular(4));
        assert!(!pkg(1000, 0).is_popular(3));
        assert_eq!(pkg(1000, 150).coins_credited(), Coins(1150));
    }

    #[test]
    fn temporary_ownership_lapses_at_expiry() {
        let now = Utc::now();
        let record = OwnershipRecord {
            user_id: UserId(1),
            episode_id: Uuid::new_v4(),
            acquired_at: now,
            expires_at: Some(now + chrono::Duration::hours(1)),
        };
        assert!(record.is_active_at(now));
        assert!(!record.is_active_at(now + chrono::Duration::hours(2)));
    }
}
