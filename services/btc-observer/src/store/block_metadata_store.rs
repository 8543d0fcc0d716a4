use async_trait::async_trait;

use crate::error::ObserverResult;
use crate::types::BlockMetadata;

/// Per-block bookkeeping: one row per height ever observed, including
/// heights later orphaned by a reorg until `trim` removes them (§4.4).
#[async_trait]
pub trait BlockMetadataStore: Send + Sync {
    async fn add(&self, metadata: BlockMetadata) -> ObserverResult<()>;

    async fn get(&self, height: u32) -> ObserverResult<Option<BlockMetadata>>;

    async fn last(&self) -> ObserverResult<Option<BlockMetadata>>;

    /// Metadata rows at heights `[from_height, to_height]` inclusive,
    /// ascending. Used when sealing a quantile group's histogram.
    async fn range(&self, from_height: u32, to_height: u32) -> ObserverResult<Vec<BlockMetadata>>;

    /// Heights `max_height, max_height-1, max_height-2, max_height-4, ...`
    /// down to (and including, if reached exactly) `min_height`, descending.
    /// Backs the exponential-lookback fork-recovery search of §4.12: the
    /// caller queries the live chain at each of these heights until it finds
    /// one whose stored hash still matches.
    async fn look_back_exponentially(&self, max_height: u32, min_height: u32) -> ObserverResult<Vec<u32>>;

    async fn remove_later_than_or_equal(&self, height: u32) -> ObserverResult<()>;

    async fn set_normalized_fee(&self, height: u32, normalized_fee: u64) -> ObserverResult<()>;
}
