//! Persistence traits and the in-memory reference implementation.
//!
//! The spec treats the concrete database (MongoDB, in the original design)
//! as external and out of scope; what's in scope is the shape of the three
//! stores the processor depends on. Each is an `async_trait` so tests can
//! swap in fakes, mirroring how `sbtc`'s block observer is built against
//! `DbRead`/`DbWrite` traits rather than a concrete database handle.

mod block_metadata_store;
mod memory;
mod quantile_group_store;
mod service_state_store;
mod transaction_store;

pub use block_metadata_store::BlockMetadataStore;
pub use memory::{
    InMemoryBlockMetadataStore, InMemoryQuantileGroupStore, InMemoryServiceStateStore, InMemoryTransactionStore,
};
pub use quantile_group_store::QuantileGroupStore;
pub use service_state_store::ServiceStateStore;
pub use transaction_store::TransactionStore;
