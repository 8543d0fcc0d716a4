//! Ties the reservoir sampler and sliding-window quantile calculator
//! together into the "normalized fee" pipeline (§4.7-4.8): every
//! `group_size_in_blocks` blocks, each confirmed transaction offers its id
//! to a reservoir sampler; once the group boundary is reached, the sampler
//! is drained and exactly one RPC is spent per surviving id to fetch its
//! fee, the fees are bucketed into a histogram, and the histogram is sealed
//! into the sliding quantile window. `get_normalized_fee` answers off that
//! window at a `historical_offset_in_blocks` look-back (§4.7).

use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, Txid};

use crate::bitcoin_client::BitcoinClient;
use crate::error::{ObserverError, ObserverResult};
use crate::quantile::SlidingWindowQuantileCalculator;
use crate::reservoir_sampler::ReservoirSampler;
use crate::types::QuantileGroup;

/// Accumulates per-block transaction-id samples until a group boundary is
/// reached, then seals the group's fee histogram into the quantile window.
pub struct NormalizedFeeCalculator {
    group_size_in_blocks: u32,
    sample_size_per_group: usize,
    genesis_block_number: u32,
    historical_offset_in_blocks: u32,
    quantile_calculator: SlidingWindowQuantileCalculator,
    current_group_id: u64,
    current_sampler: ReservoirSampler<Txid>,
}

impl NormalizedFeeCalculator {
    pub fn new(
        group_size_in_blocks: u32,
        window_size_in_groups: u32,
        sample_size_per_group: usize,
        quantile: f64,
        genesis_block_number: u32,
        historical_offset_in_blocks: u32,
    ) -> Self {
        NormalizedFeeCalculator {
            group_size_in_blocks,
            sample_size_per_group,
            genesis_block_number,
            historical_offset_in_blocks,
            quantile_calculator: SlidingWindowQuantileCalculator::new(window_size_in_groups, quantile),
            current_group_id: 0,
            current_sampler: ReservoirSampler::new(sample_size_per_group, &BlockHash::all_zeros()),
        }
    }

    /// Restores state from persisted quantile groups (e.g. on restart).
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        group_size_in_blocks: u32,
        window_size_in_groups: u32,
        sample_size_per_group: usize,
        quantile: f64,
        genesis_block_number: u32,
        historical_offset_in_blocks: u32,
        persisted_groups: Vec<QuantileGroup>,
        current_group_id: u64,
    ) -> Self {
        let quantile_calculator =
            SlidingWindowQuantileCalculator::restore(window_size_in_groups, quantile, persisted_groups);
        NormalizedFeeCalculator {
            group_size_in_blocks,
            sample_size_per_group,
            genesis_block_number,
            historical_offset_in_blocks,
            quantile_calculator,
            current_group_id,
            current_sampler: ReservoirSampler::new(sample_size_per_group, &BlockHash::all_zeros()),
        }
    }

    /// Which quantile group covers `height`. Exposed so the processor can
    /// compute cutoff group ids for fork recovery without duplicating the
    /// arithmetic.
    pub fn group_id_for_height(&self, height: u32) -> u64 {
        ((height - self.genesis_block_number) / self.group_size_in_blocks) as u64
    }

    fn is_group_boundary(&self, height: u32) -> bool {
        (height + 1 - self.genesis_block_number) % self.group_size_in_blocks == 0
    }

    /// Feeds one confirmed block's candidate transaction ids into the
    /// sampler. Returns `true` when `height` is the last block of its group,
    /// in which case the caller must follow up with [`Self::seal_boundary_group`]
    /// before processing the next block.
    pub fn process_block(&mut self, height: u32, block_hash: &BlockHash, candidate_txids: &[Txid]) -> bool {
        let group_id = self.group_id_for_height(height);
        if group_id != self.current_group_id {
            // New group started without the expected boundary call; reset
            // defensively rather than mixing two groups' samples.
            self.current_sampler = ReservoirSampler::new(self.sample_size_per_group, block_hash);
            self.current_group_id = group_id;
        } else {
            self.current_sampler.reset_pseudo_random_seed(block_hash);
        }

        for &txid in candidate_txids {
            self.current_sampler.process_item(txid);
        }

        self.is_group_boundary(height)
    }

    /// Drains the current sampler, fetching one fee per surviving id (one
    /// RPC call each), bucketing the fees into a histogram, and sealing the
    /// group into the quantile window. Returns the sealed group so the
    /// caller can persist it via `QuantileGroupStore::add`.
    pub async fn seal_boundary_group(&mut self, client: &dyn BitcoinClient) -> ObserverResult<QuantileGroup> {
        let sampled_txids = self.current_sampler.sample().to_vec();
        let mut fees = Vec::with_capacity(sampled_txids.len());
        for txid in &sampled_txids {
            fees.push(client.get_transaction_fee_in_satoshis(txid).await?);
        }

        let frequency_vector = crate::quantile::build_frequency_vector(&fees);
        let group = QuantileGroup {
            group_id: self.current_group_id,
            // Filled in by `add_group` from the merged histogram at seal
            // time; never set here.
            quantile: None,
            frequency_vector,
        };

        self.quantile_calculator.add_group(group.clone());
        let sealed = self
            .quantile_calculator
            .get_quantile(group.group_id)
            .map(|q| QuantileGroup {
                group_id: group.group_id,
                quantile: Some(q),
                frequency_vector: group.frequency_vector.clone(),
            })
            .unwrap_or(group);

        self.current_group_id += 1;
        self.current_sampler.clear();
        Ok(sealed)
    }

    /// Returns the normalized fee applicable to `height`: the quantile of
    /// the group covering `max(height - historical_offset_in_blocks, genesis)`,
    /// as sealed when that group closed. A pure function of blocks
    /// `[0, height - historical_offset_in_blocks]` — later blocks never
    /// change the answer for an earlier `height` (§4.7, §8).
    pub fn get_normalized_fee(&self, height: u32) -> ObserverResult<u64> {
        if height < self.genesis_block_number {
            return Err(ObserverError::BlockchainTimeOutOfRange);
        }

        let lookback_height = height
            .saturating_sub(self.historical_offset_in_blocks)
            .max(self.genesis_block_number);
        let group_id = self.group_id_for_height(lookback_height);

        self.quantile_calculator
            .get_quantile(group_id)
            .ok_or(ObserverError::BlockchainTimeOutOfRange)
    }

    /// Drops every sealed group whose blocks are at or above `from_height`,
    /// for fork recovery. The in-flight (unsealed) group is simply
    /// discarded and will be rebuilt from the blocks replayed after the
    /// revert.
    pub fn trim_databases_to_group_boundary(&mut self, from_height: u32) {
        let cutoff_group_id = self.group_id_for_height(from_height);
        self.quantile_calculator.remove_groups_greater_than_or_equal(cutoff_group_id);
        self.current_group_id = cutoff_group_id;
        self.current_sampler.clear();
    }

    #[cfg(test)]
    fn group_count(&self) -> usize {
        self.quantile_calculator.group_count()
    }
}
