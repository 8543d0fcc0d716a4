use async_trait::async_trait;

use crate::error::ObserverResult;
use crate::types::ServiceState;

/// Singleton row tracking the database schema version and the observer's
/// last-known approximate time (used to decide whether a fast-sync from raw
/// block files is still worthwhile on startup).
#[async_trait]
pub trait ServiceStateStore: Send + Sync {
    async fn get(&self) -> ObserverResult<Option<ServiceState>>;

    async fn put(&self, state: ServiceState) -> ObserverResult<()>;
}
