// API module
//
// This module exposes the ledger over HTTP. Every ledger read and update goes
// through the single lock in `AppState`, so requests never interleave ledger
// mutations. Proof of work runs with that lock released.

pub mod handlers;
pub mod routes;

// Re-export main components for easier access
pub use handlers::{AppState, LedgerData, ServiceError};
pub use routes::configure_routes;
