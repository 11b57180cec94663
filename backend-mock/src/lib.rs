/// Backend Mock Server Library
///
/// An in-memory stand-in for the wallet backend API, used by the wallet's
/// integration tests and for local development.

pub mod handlers;
pub mod ledger;
pub mod server;
pub mod types;

pub use handlers::SharedLedger;
pub use ledger::{Ledger, LedgerError};
pub use server::{create_router, run_server, serve};
pub use types::*;
