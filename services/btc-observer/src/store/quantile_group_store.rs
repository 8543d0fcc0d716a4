use async_trait::async_trait;

use crate::error::ObserverResult;
use crate::types::QuantileGroup;

/// Persistence for sealed `QuantileGroup` histograms, backing
/// `SlidingWindowQuantileCalculator` across restarts (§3, §4.8). "All
/// mutations go through the backing store atomically per group."
#[async_trait]
pub trait QuantileGroupStore: Send + Sync {
    async fn add(&self, group: QuantileGroup) -> ObserverResult<()>;

    /// All persisted groups, ascending `group_id`, for restoring the sliding
    /// window on startup.
    async fn all_ascending(&self) -> ObserverResult<Vec<QuantileGroup>>;

    /// Removes every group with `group_id >= cutoff_group_id`, mirroring
    /// `SlidingWindowQuantileCalculator::remove_groups_greater_than_or_equal`
    /// for fork recovery.
    async fn remove_greater_than_or_equal(&self, cutoff_group_id: u64) -> ObserverResult<()>;
}
