//! # Online Statistics Module
//!
//! Implements the two streaming statistics primitives used by the
//! measurement probe:
//!
//! - **OnlineVariance**: Welford's online algorithm for incremental
//!   mean/variance over a numeric stream in O(1) memory
//! - **PercentileHeap**: a bounded-memory streaming selector that splits a
//!   sample stream into "below the requested percentile" (released
//!   immediately for accumulation) and "tail" (held in a size-adaptive
//!   min-heap until the stream is closed)
//!
//! Both are deliberately allocation-light: a worker calls into them once
//! per measured iteration, so the hot path must not sort, copy, or retain
//! the full sample set.

use anyhow::Result;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Heap slots are pre-filled with this value; real samples are durations
/// and therefore never negative.
const SENTINEL: f64 = -1.0;

/// Default initial heap size when the configuration does not override it.
pub const DEFAULT_HEAP_INIT_SIZE: usize = 127;

/// Incremental mean/variance using Welford's recurrence.
///
/// With `ddof = 0` the result matches the population standard deviation
/// (the `STDEV.P` convention), which is what the probe reports.
#[derive(Debug, Clone, Default)]
pub struct OnlineVariance {
    ddof: u64,
    count: u64,
    mean: f64,
    m2: f64,
}

impl OnlineVariance {
    /// Create a new accumulator with the given delta degrees of freedom.
    pub fn new(ddof: u64) -> Self {
        Self {
            ddof,
            count: 0,
            mean: 0.0,
            m2: 0.0,
        }
    }

    /// Population-variance accumulator (`ddof = 0`).
    pub fn population() -> Self {
        Self::new(0)
    }

    /// Fold one observation into the running mean and sum of squared
    /// deviations.
    pub fn include(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// Number of observations folded in so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Running mean of the stream.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Variance of the stream seen so far; 0.0 while the stream has no
    /// more observations than `ddof`.
    pub fn variance(&self) -> f64 {
        if self.count <= self.ddof {
            0.0
        } else {
            self.m2 / (self.count - self.ddof) as f64
        }
    }

    /// Standard deviation of the stream seen so far.
    pub fn std(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// Min-heap entry with a total order over f64 durations.
///
/// Samples come from `Duration::as_secs_f64`, so NaN never occurs in
/// practice; `total_cmp` keeps the ordering well defined regardless.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Sample(f64);

impl Eq for Sample {}

impl Ord for Sample {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for Sample {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Bounded-memory streaming percentile selector.
///
/// For a target percentile `p` the heap retains only the largest samples —
/// the part of the stream that may still end up above the percentile
/// boundary. Everything provably below the boundary is released to the
/// caller immediately via the return value of [`offer`](Self::offer), so
/// a downstream accumulator sees the below-percentile values in stream
/// order without the heap ever holding all `n` samples.
///
/// At close time, [`drain`](Self::drain) splits the retained values into
/// the remainder of the below-percentile set and the tail, then resets the
/// heap for reuse on a fresh stream.
#[derive(Debug)]
pub struct PercentileHeap {
    percentile: f64,
    init_size: usize,
    count: u64,
    heap: BinaryHeap<Reverse<Sample>>,
}

impl PercentileHeap {
    /// Create a heap for the requested percentile.
    ///
    /// `percentile` must lie strictly between 0 and 1; smaller values make
    /// the heap retain more of the stream. `init_size` controls the number
    /// of pre-filled sentinel slots (a larger value avoids early growth).
    pub fn new(percentile: f64, init_size: usize) -> Result<Self> {
        if !(percentile > 0.0 && percentile < 1.0) {
            anyhow::bail!(
                "Invalid range for 'percentile': requested value is '{}', accepted values are > 0 and < 1",
                percentile
            );
        }
        if init_size == 0 {
            anyhow::bail!("Heap init size must be a positive integer");
        }
        let mut heap = Self {
            percentile,
            init_size,
            count: 0,
            heap: BinaryHeap::with_capacity(init_size),
        };
        heap.reset();
        Ok(heap)
    }

    /// The percentile boundary this heap was built for.
    pub fn percentile(&self) -> f64 {
        self.percentile
    }

    /// Number of real samples offered since the last reset.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Offer one sample to the heap.
    ///
    /// Returns the at-most-one value released for downstream accumulation:
    /// either the sample itself (it is provably below the retained tail)
    /// or the previous heap minimum evicted to make room. `None` means the
    /// heap absorbed the sample, either by growing or by evicting a
    /// sentinel slot.
    pub fn offer(&mut self, value: f64) -> Option<f64> {
        self.count += 1;

        // While the tail the heap must retain is still growing, extend the
        // heap instead of evicting.
        let perc = (self.count + 1) as f64 * self.percentile;
        if perc < self.count as f64 {
            let requested_size = 1 + (self.count as f64 - perc).ceil() as usize;
            if requested_size > self.heap.len() {
                self.heap.push(Reverse(Sample(value)));
                return None;
            }
        }

        let current_min = match self.heap.peek() {
            Some(Reverse(Sample(v))) => *v,
            None => f64::NEG_INFINITY,
        };
        if value >= current_min {
            self.heap.pop();
            self.heap.push(Reverse(Sample(value)));
            // Sentinel slots never reach the downstream accumulator.
            if current_min >= 0.0 {
                Some(current_min)
            } else {
                None
            }
        } else {
            Some(value)
        }
    }

    /// Close the stream: split the retained values into the rest of the
    /// below-percentile set and the tail above the boundary, both in
    /// ascending order and with sentinels removed, then reset the heap so
    /// it behaves like a freshly constructed instance.
    pub fn drain(&mut self) -> (Vec<f64>, Vec<f64>) {
        // How many of the retained values still belong below the boundary.
        let retained = self.count as f64 - (self.count + 1) as f64 * self.percentile;
        let pop_operations = if retained.ceil() >= 1.0 {
            (self.heap.len() as f64 - retained) as usize
        } else {
            self.heap.len()
        };

        let mut below = Vec::new();
        for _ in 0..pop_operations {
            if let Some(Reverse(Sample(v))) = self.heap.pop() {
                if v >= 0.0 {
                    below.push(v);
                }
            }
        }

        let mut tail = Vec::new();
        while let Some(Reverse(Sample(v))) = self.heap.pop() {
            if v >= 0.0 {
                tail.push(v);
            }
        }

        self.reset();
        (below, tail)
    }

    /// Restore the sentinel-filled initial state.
    fn reset(&mut self) {
        self.count = 0;
        self.heap.clear();
        for _ in 0..self.init_size {
            self.heap.push(Reverse(Sample(SENTINEL)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Direct two-pass population standard deviation for cross-checking.
    fn two_pass_std(values: &[f64]) -> f64 {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        variance.sqrt()
    }

    #[test]
    fn welford_matches_two_pass() {
        let datasets: Vec<Vec<f64>> = vec![
            vec![0.1],
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
            vec![0.004, 0.0041, 0.0039, 0.0042, 0.004, 0.0038],
            vec![10.0, 10.0, 10.0],
        ];
        for data in datasets {
            let mut online = OnlineVariance::population();
            for &v in &data {
                online.include(v);
            }
            let expected = two_pass_std(&data);
            assert!(
                (online.std() - expected).abs() < 1e-12,
                "std mismatch: online {} vs two-pass {}",
                online.std(),
                expected
            );
        }
    }

    #[test]
    fn welford_empty_stream_is_zero() {
        let online = OnlineVariance::population();
        assert_eq!(online.variance(), 0.0);
        assert_eq!(online.std(), 0.0);
    }

    #[test]
    fn welford_sample_variance_ddof_one() {
        let mut online = OnlineVariance::new(1);
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            online.include(v);
        }
        // Sample variance of the classic textbook set is 32/7.
        assert!((online.variance() - 32.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn percentile_rejects_out_of_range() {
        assert!(PercentileHeap::new(0.0, 8).is_err());
        assert!(PercentileHeap::new(1.0, 8).is_err());
        assert!(PercentileHeap::new(-0.5, 8).is_err());
        assert!(PercentileHeap::new(1.5, 8).is_err());
        assert!(PercentileHeap::new(0.99, 0).is_err());
        assert!(PercentileHeap::new(0.5, 8).is_ok());
    }

    /// Run a full stream through the heap and collect the
    /// below-percentile set and the full set exactly as the probe would.
    fn run_split(heap: &mut PercentileHeap, sequence: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let mut bounded = Vec::new();
        for &v in sequence {
            if let Some(released) = heap.offer(v) {
                bounded.push(released);
            }
        }
        let (below, tail) = heap.drain();
        bounded.extend(below);
        let mut full = bounded.clone();
        full.extend(tail);
        (bounded, full)
    }

    fn assert_split(
        percentile: f64,
        sequence: &[f64],
        expected_bounded_len: usize,
        excluded: &[f64],
    ) {
        let mut heap = PercentileHeap::new(percentile, 2).unwrap();
        let (bounded, full) = run_split(&mut heap, sequence);

        assert_eq!(
            bounded.len(),
            expected_bounded_len,
            "bounded size for p={} over {:?}",
            percentile,
            sequence
        );
        for v in excluded {
            assert!(
                !bounded.contains(v),
                "value {} must be above the p={} boundary",
                v,
                percentile
            );
        }

        // The full aggregate always sees every sample, and its sum is the
        // exact sum of the input.
        assert_eq!(full.len(), sequence.len());
        let full_sum: f64 = full.iter().sum();
        let expected_sum: f64 = sequence.iter().sum();
        assert!((full_sum - expected_sum).abs() < 1e-12);
    }

    #[test]
    fn percentile_split_p50() {
        assert_split(
            0.5,
            &[0.24, 0.21, 0.34, 0.33, 0.11, 0.23, 0.21],
            4,
            &[0.33, 0.34, 0.24],
        );
        assert_split(0.5, &[0.24, 0.21, 0.34, 0.33, 0.11], 3, &[0.33, 0.34]);
        assert_split(0.5, &[0.34, 0.24, 0.11, 0.21, 0.33], 3, &[0.33, 0.34]);
        assert_split(0.5, &[0.34, 0.24, 0.11, 0.21], 2, &[0.34, 0.24]);
        assert_split(0.5, &[0.34, 0.24, 0.11], 2, &[0.34]);
        assert_split(0.5, &[0.34, 0.24], 1, &[0.34]);
        assert_split(0.5, &[0.34], 1, &[]);
    }

    #[test]
    fn percentile_split_p70() {
        assert_split(
            0.7,
            &[0.55, 0.24, 0.21, 0.34, 0.33, 0.11, 0.23, 0.21],
            6,
            &[0.34, 0.55],
        );
        assert_split(
            0.7,
            &[0.24, 0.21, 0.34, 0.33, 0.11, 0.23, 0.21],
            5,
            &[0.33, 0.34],
        );
        assert_split(0.7, &[0.24, 0.21, 0.34, 0.33, 0.11], 4, &[0.34]);
        assert_split(0.7, &[0.11, 0.21, 0.24, 0.33, 0.34], 4, &[0.34]);
        assert_split(0.7, &[0.34, 0.24, 0.11], 2, &[0.34]);
        assert_split(0.7, &[0.34, 0.24], 2, &[]);
        assert_split(0.7, &[0.34], 1, &[]);
    }

    #[test]
    fn percentile_split_p90() {
        assert_split(
            0.9,
            &[0.55, 0.24, 0.21, 0.34, 0.33, 0.11, 0.23, 0.21, 0.10, 0.10],
            9,
            &[0.55],
        );
        assert_split(
            0.9,
            &[0.55, 0.24, 0.21, 0.34, 0.33, 0.11, 0.23, 0.21, 0.10],
            9,
            &[],
        );
        assert_split(0.9, &[0.24, 0.21, 0.34, 0.33, 0.11], 5, &[]);
    }

    #[test]
    fn heap_reset_is_idempotent() {
        let sequence = [0.24, 0.21, 0.34, 0.33, 0.11];

        let mut reused = PercentileHeap::new(0.5, 2).unwrap();
        // First stream, drained and discarded.
        let _ = run_split(&mut reused, &[0.9, 0.8, 0.7, 0.1, 0.2, 0.3]);
        let after_reuse = run_split(&mut reused, &sequence);

        let mut fresh = PercentileHeap::new(0.5, 2).unwrap();
        let from_fresh = run_split(&mut fresh, &sequence);

        assert_eq!(after_reuse, from_fresh);
    }

    #[test]
    fn sentinels_never_released() {
        let mut heap = PercentileHeap::new(0.99, DEFAULT_HEAP_INIT_SIZE).unwrap();
        let (bounded, full) = run_split(&mut heap, &[0.5, 0.6]);
        assert!(bounded.iter().all(|&v| v >= 0.0));
        assert!(full.iter().all(|&v| v >= 0.0));
        assert_eq!(full.len(), 2);
    }

    #[test]
    fn heap_grows_without_eviction_for_low_percentiles() {
        // p=0.1 forces the retained tail to cover most of the stream, so
        // the heap must grow past its initial size without losing samples.
        let mut heap = PercentileHeap::new(0.1, 2).unwrap();
        let sequence: Vec<f64> = (1..=50).map(|i| i as f64 / 100.0).collect();
        let (_, full) = run_split(&mut heap, &sequence);
        assert_eq!(full.len(), sequence.len());
    }
}
