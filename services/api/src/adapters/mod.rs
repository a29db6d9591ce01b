pub mod db;
pub mod rate_limit;

pub use db::DbAdapter;
pub use rate_limit::FixedWindowRateLimiter;
