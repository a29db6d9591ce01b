pub mod middleware;
pub mod protocol;
pub mod purchase;
pub mod responses;
pub mod rest;
pub mod state;
pub mod topup;
pub mod webhook;

// Re-export the pieces the binaries need to build the server.
pub use middleware::require_user;
pub use rest::{router, ApiDoc};
pub use state::AppState;
