//! Wire-level data model: `TransactionNumber`, `Transaction`,
//! `BlockMetadata`, `QuantileGroup`, and `ServiceState`, plus the
//! composite-key arithmetic that ties them together.

use serde::{Deserialize, Serialize};

use crate::error::ObserverError;

/// Index component cannot exceed this; one block can carry at most one
/// million Sidetree transactions.
pub const MAX_INDEX_IN_BLOCK: u64 = 999_999;
/// `transactionNumber = blockHeight * INDEX_MULTIPLIER + indexInBlock`.
pub const INDEX_MULTIPLIER: u64 = 1_000_000;
/// Block heights above this are a fatal programmer error (see §3 invariants).
pub const MAX_BLOCK_HEIGHT: u64 = 9_000_000_000;

/// Composite key `blockHeight * 10^6 + indexInBlock`, total-ordered over all
/// Sidetree transactions ever observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionNumber(u64);

impl TransactionNumber {
    /// Construct from a block height and an index within that block.
    ///
    /// Fails rather than panics: these inputs can originate from anchored
    /// RPC data as well as internal arithmetic, so a malformed value must
    /// not be able to crash the process.
    pub fn construct(block_height: u64, index_in_block: u64) -> Result<Self, ObserverError> {
        if block_height > MAX_BLOCK_HEIGHT || index_in_block > MAX_INDEX_IN_BLOCK {
            return Err(ObserverError::InvalidTransactionNumber {
                height: block_height,
                index: index_in_block,
            });
        }
        Ok(TransactionNumber(block_height * INDEX_MULTIPLIER + index_in_block))
    }

    pub fn block_height(self) -> u64 {
        self.0 / INDEX_MULTIPLIER
    }

    pub fn index_in_block(self) -> u64 {
        self.0 % INDEX_MULTIPLIER
    }

    pub fn value(self) -> u64 {
        self.0
    }

    /// `lastTransactionOfBlock(h) = (h+1)*10^6 - 1`: the largest
    /// transaction number that could belong to block `h`.
    pub fn last_of_block(block_height: u64) -> Self {
        TransactionNumber((block_height + 1) * INDEX_MULTIPLIER - 1)
    }

    pub fn from_raw(value: u64) -> Self {
        TransactionNumber(value)
    }
}

impl std::fmt::Display for TransactionNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A Sidetree transaction: a Bitcoin transaction carrying exactly one
/// `OP_RETURN` output whose UTF-8 payload starts with the configured
/// prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidetreeTransaction {
    pub transaction_number: TransactionNumber,
    /// Block height; Sidetree's notion of "time".
    pub transaction_time: u32,
    pub transaction_time_hash: bitcoin::BlockHash,
    /// Payload after the configured prefix has been stripped.
    pub anchor_string: String,
    pub transaction_fee_paid: u64,
    /// Populated once the owning block's metadata row exists (normalized
    /// fee cannot be known before that — see the §3 ordering invariant).
    pub normalized_transaction_fee: Option<u64>,
    /// Opaque, derived from the first input's resolved output address.
    /// Stable across reorgs (the writer doesn't change because the chain
    /// forked under it); `Writer::Anonymous` when unresolvable.
    pub writer: Writer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Writer {
    Known(String),
    Anonymous,
}

impl Writer {
    pub fn as_opaque_str(&self) -> &str {
        match self {
            Writer::Known(s) => s,
            Writer::Anonymous => "anonymous",
        }
    }
}

/// Per-block bookkeeping row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMetadata {
    pub height: u32,
    pub hash: bitcoin::BlockHash,
    pub previous_hash: bitcoin::BlockHash,
    pub total_fee: u64,
    pub transaction_count: u32,
    /// `None` until the sampler/quantile pipeline has enough history.
    pub normalized_fee: Option<u64>,
}

/// One bucketed-fee histogram covering `groupSizeInBlocks` consecutive
/// heights, plus the quantile value computed once the group was sealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct QuantileGroup {
    pub group_id: u64,
    /// Quantile value at the time this group was sealed (persisted so that
    /// `getNormalizedFee` is a pure function of history — later groups must
    /// never retroactively change an earlier group's answer).
    pub quantile: Option<u64>,
    /// Histogram over power-of-sqrt(10) fee buckets.
    pub frequency_vector: Vec<u64>,
}

/// Singleton service-state record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceState {
    pub database_version: String,
    pub approximate_time: Option<u32>,
}

pub const CURRENT_DATABASE_VERSION: &str = "1.1.0";
