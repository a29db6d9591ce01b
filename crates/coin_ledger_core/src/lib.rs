pub mod domain;
pub mod error;
pub mod memory;
pub mod ports;
pub mod purchase;
pub mod settlement;
pub mod signature;
pub mod throttle;
pub mod topup;

pub use domain::{
    Coins, Credit, Episode, EpisodeId, LedgerEntry, Money, OwnershipRecord, TopupPackage,
    TopupStatus, TopupTransaction, UserId, WebhookPayment, WorkKind,
};
pub use error::{LedgerError, LedgerResult};
pub use memory::MemoryLedger;
pub use ports::{
    LedgerStore, PortError, PortResult, RateLimitDecision, RateLimitPolicy, RateLimiter,
};
pub use purchase::{PurchaseCommand, PurchaseEngine, PurchaseReceipt, PurchaseRequest};
pub use settlement::{SettlementEngine, SettlementOutcome};
pub use signature::{SignatureScheme, SignatureVerifier};
pub use throttle::admit;
pub use topup::TopupDesk;
