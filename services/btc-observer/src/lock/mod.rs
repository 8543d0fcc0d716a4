//! Value-time-lock interface boundary (§4.15). The full collateral-lock
//! bidding/renewal policy belongs to Sidetree Core; this crate only
//! resolves and reports lock state.

mod monitor;
mod resolver;
mod store;

pub use monitor::{LockEvent, LockMonitor};
pub use resolver::{LockResolver, LockStatus};
pub use store::{InMemoryLockTransactionStore, LockTransaction, LockTransactionStore, LockType};
