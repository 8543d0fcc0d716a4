//! Sliding-window quantile estimator over bucketed per-block fee histograms
//! (§4.8). Fees are bucketed on a `sqrt(10)` logarithmic scale so that a
//! fixed, small number of buckets covers the entire `u64` fee range with
//! bounded relative error, the same trick the normalized-fee calculation
//! depends on to stay O(1) in the number of transactions observed.

use crate::types::QuantileGroup;

/// `sqrt(10) ~= 3.1623`; bucket boundaries are powers of this base, giving
/// roughly two buckets per decade of fee.
const LOG_BASE: f64 = 3.162_277_660_168_379_5;
/// `floor(log_sqrt10(u64::MAX)) + 1`, rounded up generously.
const BUCKET_COUNT: usize = 64;

/// Maps a fee value (satoshis per virtual byte, or any consistent unit) to
/// its histogram bucket index.
pub fn bucket_for_fee(fee: u64) -> usize {
    if fee == 0 {
        return 0;
    }
    let bucket = (fee as f64).ln() / LOG_BASE.ln();
    let bucket = bucket.floor();
    if bucket.is_nan() || bucket < 0.0 {
        0
    } else {
        (bucket as usize).min(BUCKET_COUNT - 1)
    }
}

/// Inverse of [`bucket_for_fee`]: the representative fee value for a bucket,
/// used to translate a quantile bucket index back into a fee.
fn fee_for_bucket(bucket: usize) -> u64 {
    LOG_BASE.powi(bucket as i32).round() as u64
}

/// Maintains a running histogram over the last `window_size_in_groups`
/// sealed groups, and answers quantile queries against it in O(buckets).
///
/// Each `QuantileGroup`'s `quantile` field is computed once, when the group
/// is sealed via `add_group`, over the merged histogram *as it stood at that
/// moment*, then persisted on the group itself. `get_quantile` is therefore a
/// pure lookup of that stored value, never a live recomputation — adding
/// later groups can never change the answer for an earlier `group_id` (§3,
/// §8 purity property).
pub struct SlidingWindowQuantileCalculator {
    window_size_in_groups: u32,
    quantile: f64,
    groups: std::collections::VecDeque<QuantileGroup>,
    merged_frequency_vector: Vec<u64>,
}

impl SlidingWindowQuantileCalculator {
    pub fn new(window_size_in_groups: u32, quantile: f64) -> Self {
        SlidingWindowQuantileCalculator {
            window_size_in_groups,
            quantile,
            groups: std::collections::VecDeque::new(),
            merged_frequency_vector: vec![0u64; BUCKET_COUNT],
        }
    }

    /// Restores a previously persisted window, oldest group first. Groups
    /// already carry their sealed-time quantile, so this re-merges the
    /// histograms without recomputing it.
    pub fn restore(window_size_in_groups: u32, quantile: f64, groups: Vec<QuantileGroup>) -> Self {
        let mut calculator = Self::new(window_size_in_groups, quantile);
        for group in groups {
            merge_into(&mut calculator.merged_frequency_vector, &group.frequency_vector, 1);
            calculator.groups.push_back(group);
        }
        while calculator.groups.len() > calculator.window_size_in_groups as usize {
            if let Some(evicted) = calculator.groups.pop_front() {
                merge_into(&mut calculator.merged_frequency_vector, &evicted.frequency_vector, -1);
            }
        }
        calculator
    }

    /// Seals a new group: merges its histogram into the running window,
    /// computes the quantile over the now-updated merged vector and
    /// persists it onto the group, then evicts the oldest group if the
    /// window is now over capacity.
    pub fn add_group(&mut self, mut group: QuantileGroup) {
        merge_into(&mut self.merged_frequency_vector, &group.frequency_vector, 1);
        group.quantile = self.compute_quantile_over_merged();
        self.groups.push_back(group);

        while self.groups.len() > self.window_size_in_groups as usize {
            if let Some(evicted) = self.groups.pop_front() {
                merge_into(&mut self.merged_frequency_vector, &evicted.frequency_vector, -1);
            }
        }
    }

    /// Evicts every group with `group_id >= cutoff_group_id`, for rolling
    /// back groups whose blocks were orphaned by a reorg.
    pub fn remove_groups_greater_than_or_equal(&mut self, cutoff_group_id: u64) {
        while let Some(last) = self.groups.back() {
            if last.group_id >= cutoff_group_id {
                let removed = self.groups.pop_back().unwrap();
                merge_into(&mut self.merged_frequency_vector, &removed.frequency_vector, -1);
            } else {
                break;
            }
        }
    }

    fn compute_quantile_over_merged(&self) -> Option<u64> {
        let total: u64 = self.merged_frequency_vector.iter().sum();
        if total == 0 {
            return None;
        }

        let target = (total as f64 * self.quantile).ceil() as u64;
        let mut running = 0u64;
        for (bucket, count) in self.merged_frequency_vector.iter().enumerate() {
            running += count;
            if running >= target.max(1) {
                return Some(fee_for_bucket(bucket));
            }
        }
        self.merged_frequency_vector
            .iter()
            .rposition(|&c| c > 0)
            .map(fee_for_bucket)
    }

    /// Returns the fee value persisted for `group_id` at the moment that
    /// group was sealed, or `None` if the group isn't in the current window
    /// (evicted, never seen, or rolled back).
    pub fn get_quantile(&self, group_id: u64) -> Option<u64> {
        self.groups
            .iter()
            .find(|g| g.group_id == group_id)
            .and_then(|g| g.quantile)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

/// Adds (`sign = 1`) or subtracts (`sign = -1`) `source` into `target`
/// bucket-wise, saturating rather than underflowing when evicting a group
/// whose counts have already been clamped elsewhere.
fn merge_into(target: &mut [u64], source: &[u64], sign: i8) {
    for (i, value) in source.iter().enumerate() {
        if i >= target.len() {
            break;
        }
        if sign > 0 {
            target[i] = target[i].saturating_add(*value);
        } else {
            target[i] = target[i].saturating_sub(*value);
        }
    }
}

/// Builds a `BUCKET_COUNT`-sized histogram out of raw fee samples.
pub fn build_frequency_vector(fees: &[u64]) -> Vec<u64> {
    let mut vector = vec![0u64; BUCKET_COUNT];
    for &fee in fees {
        vector[bucket_for_fee(fee)] += 1;
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_is_monotonic_in_fee() {
        assert!(bucket_for_fee(10) <= bucket_for_fee(100));
        assert!(bucket_for_fee(100) <= bucket_for_fee(10_000));
    }

    #[test]
    fn empty_window_has_no_quantile() {
        let calc = SlidingWindowQuantileCalculator::new(3, 0.5);
        assert_eq!(calc.get_quantile(0), None);
    }

    #[test]
    fn quantile_reflects_added_group() {
        let mut calc = SlidingWindowQuantileCalculator::new(3, 0.5);
        let fees: Vec<u64> = (1..=100).map(|i| i * 10).collect();
        calc.add_group(QuantileGroup {
            group_id: 0,
            quantile: None,
            frequency_vector: build_frequency_vector(&fees),
        });
        let q = calc.get_quantile(0).unwrap();
        assert!(q > 0);
    }

    #[test]
    fn window_evicts_oldest_group_past_capacity() {
        let mut calc = SlidingWindowQuantileCalculator::new(2, 0.5);
        for id in 0..4 {
            calc.add_group(QuantileGroup {
                group_id: id,
                quantile: None,
                frequency_vector: build_frequency_vector(&[100]),
            });
        }
        assert_eq!(calc.group_count(), 2);
    }

    #[test]
    fn remove_groups_greater_than_or_equal_rolls_back_reorg() {
        let mut calc = SlidingWindowQuantileCalculator::new(5, 0.5);
        for id in 0..4 {
            calc.add_group(QuantileGroup {
                group_id: id,
                quantile: None,
                frequency_vector: build_frequency_vector(&[100]),
            });
        }
        calc.remove_groups_greater_than_or_equal(2);
        assert_eq!(calc.group_count(), 2);
    }

    #[test]
    fn earlier_group_quantile_is_not_changed_by_later_groups() {
        let mut calc = SlidingWindowQuantileCalculator::new(10, 0.5);
        calc.add_group(QuantileGroup {
            group_id: 0,
            quantile: None,
            frequency_vector: build_frequency_vector(&[100]),
        });
        let first = calc.get_quantile(0);

        calc.add_group(QuantileGroup {
            group_id: 1,
            quantile: None,
            frequency_vector: build_frequency_vector(&[100_000, 200_000, 300_000]),
        });

        assert_eq!(calc.get_quantile(0), first);
    }
}
