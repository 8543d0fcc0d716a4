use async_trait::async_trait;
use bitcoin::BlockHash;

use crate::error::ObserverResult;
use crate::types::{SidetreeTransaction, TransactionNumber};

/// Ordered store of observed Sidetree transactions, keyed by
/// `TransactionNumber` (§4.3).
///
/// Invariants the processor relies on:
/// - `add` is idempotent: re-adding a transaction already present at the
///   same `transaction_number` is a no-op, not an error (blocks can be
///   reprocessed after a restart); a duplicate-key error from a bulk insert
///   (code 11000 in the original Mongo-backed store) is likewise swallowed.
/// - `transactions_later_than` returns rows strictly greater than the given
///   number, in ascending order.
/// - `remove_transactions_later_than_or_equal` removes rows at or above a
///   cutoff; used during fork recovery to roll back anything anchored in a
///   block that's no longer on the main chain.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn add(&self, transaction: SidetreeTransaction) -> ObserverResult<()>;

    /// Transactions with `transaction_number > since`, oldest first, capped
    /// at `limit` rows (the HTTP read API's pagination knob).
    async fn transactions_later_than(
        &self,
        since: Option<TransactionNumber>,
        limit: usize,
    ) -> ObserverResult<Vec<SidetreeTransaction>>;

    /// Transactions anchored at heights `[inclusive_start, exclusive_end)`,
    /// ascending `transaction_number`. Used by `BitcoinProcessor::transactions`
    /// to page block-by-block.
    async fn transactions_starting_from(
        &self,
        inclusive_start_height: u32,
        exclusive_end_height: u32,
    ) -> ObserverResult<Vec<SidetreeTransaction>>;

    async fn transaction_at(&self, number: TransactionNumber) -> ObserverResult<Option<SidetreeTransaction>>;

    /// The highest-numbered stored transaction, if any.
    async fn last(&self) -> ObserverResult<Option<SidetreeTransaction>>;

    /// The earliest stored transaction, if any; used by `firstValidTransaction`
    /// when none of the caller-supplied candidates resolve.
    async fn earliest(&self) -> ObserverResult<Option<SidetreeTransaction>>;

    /// Records at exponentially receding offsets from the last transaction:
    /// `last, last-1, last-2, last-4, ...` until genesis, descending
    /// `transaction_number`. Backs the same exponential-lookback idiom as
    /// `BlockMetadataStore::look_back_exponentially`, applied to individual
    /// transactions rather than whole blocks.
    async fn exponentially_spaced_transactions(&self) -> ObserverResult<Vec<SidetreeTransaction>>;

    async fn remove_transactions_later_than_or_equal(&self, cutoff: TransactionNumber) -> ObserverResult<()>;

    /// Removes every transaction whose `transaction_time_hash` equals
    /// `hash`, used by fast-sync to drop the anchors of orphaned blocks that
    /// never made it into the linearized chain (§4.11).
    async fn remove_by_transaction_time_hash(&self, hash: &BlockHash) -> ObserverResult<()>;

    /// Backfills `normalized_transaction_fee` for every transaction in
    /// `[first_of_block, last_of_block]`, once the owning block's quantile
    /// group has been sealed.
    async fn set_normalized_fee_for_block(&self, block_height: u64, normalized_fee: u64) -> ObserverResult<()>;

    async fn count(&self) -> ObserverResult<usize>;
}
