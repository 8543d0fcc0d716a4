//! Enforces `bitcoinFeeSpendingCutoff` over a rolling
//! `bitcoinFeeSpendingCutoffPeriodInBlocks`-block window (§4.6).
//!
//! The monitor only tracks fees paid by *this* node's own writes, not the
//! fees the observer merely watches go by on other transactions.

use std::collections::VecDeque;

/// One of this node's own anchoring transactions, recorded purely for
/// spending-cap bookkeeping.
#[derive(Debug, Clone, Copy)]
struct WriteRecord {
    block_height: u32,
    fee_paid_satoshis: u64,
}

pub struct SpendingMonitor {
    cutoff_period_in_blocks: u32,
    spending_cutoff_satoshis: u64,
    writes: VecDeque<WriteRecord>,
}

impl SpendingMonitor {
    pub fn new(spending_cutoff_satoshis: u64, cutoff_period_in_blocks: u32) -> Self {
        SpendingMonitor {
            cutoff_period_in_blocks,
            spending_cutoff_satoshis,
            writes: VecDeque::new(),
        }
    }

    /// Evicts write records older than `current_height - cutoff_period`.
    fn evict_expired(&mut self, current_height: u32) {
        let floor = current_height.saturating_sub(self.cutoff_period_in_blocks);
        while let Some(front) = self.writes.front() {
            if front.block_height < floor {
                self.writes.pop_front();
            } else {
                break;
            }
        }
    }

    /// Total fees this node has spent within the rolling window ending at
    /// `current_height`.
    pub fn total_spent_in_window(&mut self, current_height: u32) -> u64 {
        self.evict_expired(current_height);
        self.writes.iter().map(|w| w.fee_paid_satoshis).sum()
    }

    /// Whether writing a transaction that costs `additional_fee_satoshis`
    /// at `current_height` would stay within the spending cap.
    pub fn is_current_fee_within_spending_limit(
        &mut self,
        current_height: u32,
        additional_fee_satoshis: u64,
    ) -> bool {
        let spent = self.total_spent_in_window(current_height);
        spent + additional_fee_satoshis <= self.spending_cutoff_satoshis
    }

    /// Records a write this node just made, so future calls count it
    /// against the cap.
    pub fn add_transaction_data_being_written(&mut self, block_height: u32, fee_paid_satoshis: u64) {
        self.writes.push_back(WriteRecord {
            block_height,
            fee_paid_satoshis,
        });
    }

    /// Drops any recorded writes at or above `height`, for fork recovery:
    /// a write anchored in an orphaned block never happened as far as the
    /// spending cap is concerned once the block is reverted (it will be
    /// re-recorded if re-broadcast and re-confirmed).
    pub fn remove_writes_later_than_or_equal(&mut self, height: u32) {
        self.writes.retain(|w| w.block_height < height);
    }
}
