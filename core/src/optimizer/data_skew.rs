//! Key-range planning from observed partition sizes.

use crate::plan::{PhysicalPlan, ShuffleDistribution};
use floe_common::{bucket_of, HashRange, Result};
use floe_utils::next_prime;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use tracing::{debug, warn};

/// How many of the largest buckets are eligible to be flagged skewed.
pub const DEFAULT_NUM_SKEWED_KEYS: usize = 10;
/// A shuffle edge's hash range is the next prime at or above this multiple
/// of the destination parallelism.
pub const HASH_RANGE_MULTIPLIER: u32 = 5;

/// Rebalances the key ranges of a shuffle edge so each destination task
/// receives an approximately equal share of bytes, flagging ranges that
/// contain a skewed bucket so the scheduler can spread them across
/// executors.
#[derive(Debug, Clone)]
pub struct DataSkewRuntimePass {
    num_skewed_keys: usize,
}

impl DataSkewRuntimePass {
    pub fn new() -> Self {
        Self {
            num_skewed_keys: DEFAULT_NUM_SKEWED_KEYS,
        }
    }

    pub fn from_config(config: &floe_common::RuntimeConfig) -> Self {
        Self {
            num_skewed_keys: config.num_skewed_keys,
        }
    }

    pub fn with_num_skewed_keys(mut self, num_skewed_keys: usize) -> Self {
        self.num_skewed_keys = num_skewed_keys;
        self
    }

    /// Fold a key-to-size map into per-bucket sizes for a bucket space of
    /// `hash_range`.
    pub fn bucket_sizes<K: Hash>(key_to_size: &HashMap<K, u64>, hash_range: u32) -> Vec<u64> {
        let mut sizes = vec![0u64; hash_range as usize];
        for (key, size) in key_to_size {
            sizes[bucket_of(key, hash_range) as usize] += size;
        }
        sizes
    }

    /// Buckets flagged skewed: among the `num_skewed_keys` largest, those
    /// whose size strictly exceeds the ideal per-task share. The threshold
    /// keeps uniform distributions (where every bucket would otherwise be a
    /// "largest" bucket) from being flagged wholesale.
    fn identify_skewed_buckets(&self, bucket_sizes: &[u64], dst_parallelism: usize) -> HashSet<usize> {
        let total: u64 = bucket_sizes.iter().sum();
        if total == 0 || dst_parallelism == 0 {
            return HashSet::new();
        }
        let ideal_size_per_task = total / dst_parallelism as u64;

        let mut by_size: Vec<usize> = (0..bucket_sizes.len()).collect();
        by_size.sort_by_key(|i| (std::cmp::Reverse(bucket_sizes[*i]), *i));
        by_size
            .into_iter()
            .take(self.num_skewed_keys)
            .filter(|i| bucket_sizes[*i] > ideal_size_per_task)
            .collect()
    }

    /// Split `[0, bucket_sizes.len())` into `dst_parallelism` contiguous
    /// ranges of approximately equal total size.
    ///
    /// The sweep accumulates buckets toward the cumulative ideal for each
    /// boundary, steps one bucket back when that lands closer to the ideal
    /// (ties do not step back), and never leaves fewer buckets than there
    /// are tasks still to assign. The last task absorbs the tail. A zero
    /// total degrades to equal-width ranges.
    pub fn calculate_key_ranges(
        &self,
        bucket_sizes: &[u64],
        dst_parallelism: usize,
    ) -> Vec<HashRange> {
        let hash_range = bucket_sizes.len();
        if dst_parallelism == 0 || hash_range < dst_parallelism {
            return Vec::new();
        }
        let total: u64 = bucket_sizes.iter().sum();
        let mut key_ranges = Vec::with_capacity(dst_parallelism);

        if total == 0 {
            warn!("zero total size, falling back to equal-width ranges");
            let mean_range = hash_range / dst_parallelism;
            for i in 0..dst_parallelism - 1 {
                key_ranges.push(HashRange::of(
                    (i * mean_range) as u32,
                    ((i + 1) * mean_range) as u32,
                    false,
                ));
            }
            key_ranges.push(HashRange::of(
                ((dst_parallelism - 1) * mean_range) as u32,
                hash_range as u32,
                false,
            ));
            return key_ranges;
        }

        let skewed_buckets = self.identify_skewed_buckets(bucket_sizes, dst_parallelism);
        let ideal_size_per_task = total / dst_parallelism as u64;
        let last_bucket = hash_range - 1;

        let mut starting_bucket = 0usize;
        let mut finishing_bucket = 1usize;
        let mut current_accumulated = bucket_sizes[0];
        for i in 1..=dst_parallelism {
            if i != dst_parallelism {
                let ideal_accumulated = ideal_size_per_task * i as u64;

                // Accumulate buckets toward the ideal, leaving at least one
                // bucket per remaining task.
                while current_accumulated < ideal_accumulated
                    && last_bucket - finishing_bucket >= dst_parallelism - i
                {
                    current_accumulated += bucket_sizes[finishing_bucket];
                    finishing_bucket += 1;
                }

                let one_step_back = current_accumulated - bucket_sizes[finishing_bucket - 1];
                let diff = current_accumulated as i128 - ideal_accumulated as i128;
                let diff_one_step_back = ideal_accumulated as i128 - one_step_back as i128;
                if diff > diff_one_step_back {
                    finishing_bucket -= 1;
                    current_accumulated -= bucket_sizes[finishing_bucket];
                }

                let is_skewed = (starting_bucket..finishing_bucket)
                    .any(|bucket| skewed_buckets.contains(&bucket));
                debug!(
                    task = i - 1,
                    begin = starting_bucket,
                    end = finishing_bucket,
                    is_skewed,
                    "assigned key range"
                );
                key_ranges.push(HashRange::of(
                    starting_bucket as u32,
                    finishing_bucket as u32,
                    is_skewed,
                ));

                current_accumulated += bucket_sizes[finishing_bucket];
                starting_bucket = finishing_bucket;
                finishing_bucket += 1;
            } else {
                // Last task takes everything that remains.
                let is_skewed = (starting_bucket..=last_bucket)
                    .any(|bucket| skewed_buckets.contains(&bucket));
                key_ranges.push(HashRange::of(
                    starting_bucket as u32,
                    hash_range as u32,
                    is_skewed,
                ));
            }
        }
        key_ranges
    }

    /// Recompute and overwrite the shuffle distribution of `edge_id` from an
    /// observed key-to-size map. The hash range is the next prime at or
    /// above `HASH_RANGE_MULTIPLIER` times the destination parallelism.
    pub fn apply<K: Hash>(
        &self,
        plan: &mut PhysicalPlan,
        edge_id: &str,
        key_to_size: &HashMap<K, u64>,
    ) -> Result<ShuffleDistribution> {
        let dst_stage = plan.edge(edge_id)?.dst_stage.clone();
        let dst_parallelism = plan.stage(&dst_stage)?.parallelism;
        let hash_range = next_prime(HASH_RANGE_MULTIPLIER * dst_parallelism as u32);

        let bucket_sizes = Self::bucket_sizes(key_to_size, hash_range);
        let key_ranges = self.calculate_key_ranges(&bucket_sizes, dst_parallelism);
        let distribution = ShuffleDistribution::new(hash_range, key_ranges);
        plan.update_shuffle_distribution(edge_id, distribution.clone())?;
        Ok(distribution)
    }
}

impl Default for DataSkewRuntimePass {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_partitions_space(ranges: &[HashRange], hash_range: u32) {
        assert!(!ranges.is_empty());
        assert_eq!(ranges[0].begin(), 0);
        assert_eq!(ranges.last().unwrap().end(), hash_range);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end(), pair[1].begin());
        }
    }

    #[test]
    fn test_result_partitions_the_hash_space() {
        let pass = DataSkewRuntimePass::new();
        let sizes = vec![3, 0, 14, 7, 7, 0, 1, 9, 2, 5, 4];
        for parallelism in 1..=5 {
            let ranges = pass.calculate_key_ranges(&sizes, parallelism);
            assert_eq!(ranges.len(), parallelism);
            assert_partitions_space(&ranges, sizes.len() as u32);
        }
    }

    #[test]
    fn test_hot_flag_matches_skewed_buckets() {
        let pass = DataSkewRuntimePass::new();
        let sizes = vec![3, 0, 140, 7, 7, 0, 1, 9, 2, 5, 4];
        let parallelism = 3;
        let skewed = pass.identify_skewed_buckets(&sizes, parallelism);
        let ranges = pass.calculate_key_ranges(&sizes, parallelism);
        for range in &ranges {
            let contains_skewed = (range.begin()..range.end())
                .any(|bucket| skewed.contains(&(bucket as usize)));
            assert_eq!(range.is_hot(), contains_skewed);
        }
    }

    #[test]
    fn test_uniform_sizes_are_never_hot_and_balanced() {
        let pass = DataSkewRuntimePass::new();
        let sizes = vec![5u64; 11];
        let ranges = pass.calculate_key_ranges(&sizes, 3);
        assert_partitions_space(&ranges, 11);
        assert!(ranges.iter().all(|r| !r.is_hot()));

        let widths: Vec<u32> = ranges.iter().map(|r| r.length()).collect();
        let max = *widths.iter().max().unwrap();
        let min = *widths.iter().min().unwrap();
        assert!(max - min <= 1, "widths {widths:?} differ by more than 1");
    }

    #[test]
    fn test_single_dominant_bucket_is_isolated_and_hot() {
        let pass = DataSkewRuntimePass::new().with_num_skewed_keys(1);
        // One bucket of 100 and three of 1, in a hash space of 11.
        let mut sizes = vec![0u64; 11];
        sizes[0] = 100;
        sizes[3] = 1;
        sizes[6] = 1;
        sizes[9] = 1;

        let ranges = pass.calculate_key_ranges(&sizes, 2);
        assert_partitions_space(&ranges, 11);
        assert_eq!(ranges[0], HashRange::of(0, 1, true));
        assert!(!ranges[1].is_hot());
    }

    #[test]
    fn test_zero_total_produces_equal_ranges() {
        let pass = DataSkewRuntimePass::new();
        let ranges = pass.calculate_key_ranges(&vec![0u64; 23], 4);
        assert_eq!(
            ranges,
            vec![
                HashRange::of(0, 5, false),
                HashRange::of(5, 10, false),
                HashRange::of(10, 15, false),
                HashRange::of(15, 23, false),
            ]
        );
    }

    #[test]
    fn test_empty_size_map_degrades_gracefully() {
        let pass = DataSkewRuntimePass::new();
        let sizes = DataSkewRuntimePass::bucket_sizes(&HashMap::<String, u64>::new(), 11);
        let ranges = pass.calculate_key_ranges(&sizes, 2);
        assert_eq!(ranges.len(), 2);
        assert_partitions_space(&ranges, 11);
        assert!(ranges.iter().all(|r| !r.is_hot()));
    }

    #[test]
    fn test_bucket_sizes_accumulate_colliding_keys() {
        let mut key_to_size = HashMap::new();
        key_to_size.insert("a".to_string(), 10);
        key_to_size.insert("b".to_string(), 20);
        key_to_size.insert("c".to_string(), 30);
        let sizes = DataSkewRuntimePass::bucket_sizes(&key_to_size, 11);
        assert_eq!(sizes.len(), 11);
        assert_eq!(sizes.iter().sum::<u64>(), 60);
    }
}
