//! # Result Aggregation Module
//!
//! Folds per-worker probe reports into per-percentile summaries for one
//! run. Aggregation is order-insensitive over the report map and ignores
//! failed workers entirely; their absence shows up as a lower executor
//! count, not as skewed statistics.
//!
//! ## Average of averages
//!
//! The cross-worker average is deliberately the mean of the per-worker
//! means, not the mean over the pooled samples. Workers are the unit of
//! parallelism, so each contributes equally to the derived throughput no
//! matter how many calls it completed.

use serde::{Deserialize, Serialize};

use crate::config::RunConfiguration;
use crate::orchestrator::ReportMap;
use crate::probe::NO_DATA_MIN;

/// Cross-worker aggregate at one percentile boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentileSummary {
    pub percentile: f64,
    /// Total calls across all contributing workers.
    pub count: u64,
    /// Derived calls per second across workers.
    pub calls_per_sec_raw: f64,
    /// `calls_per_sec_raw` scaled by the bulk row count.
    pub calls_per_sec: f64,
    /// Mean of the per-worker mean durations.
    pub avg: f64,
    /// Mean of the per-worker standard deviations.
    pub std: f64,
    pub min: f64,
    pub max: f64,
    /// Workers that contributed at least one sample.
    pub executors: u32,
}

impl PercentileSummary {
    fn placeholder(percentile: f64, min: f64) -> Self {
        Self {
            percentile,
            count: 0,
            calls_per_sec_raw: 0.0,
            calls_per_sec: 0.0,
            avg: 0.0,
            std: 0.0,
            min,
            max: 0.0,
            executors: 0,
        }
    }
}

/// Whether every planned worker reported and none failed.
pub fn run_succeeded(reports: &ReportMap) -> bool {
    reports
        .values()
        .all(|slot| matches!(slot, Some(report) if report.succeeded()))
}

/// Fold the report map into summaries, one per percentile boundary seen
/// in the reports. The full boundary (`p = 1`) and the requested
/// percentile always appear, synthesized as empty if no worker reported
/// them. Sorted by percentile for deterministic output.
pub fn summarize(config: &RunConfiguration, reports: &ReportMap) -> Vec<PercentileSummary> {
    let mut summaries: Vec<PercentileSummary> = Vec::new();

    for report in reports.values().flatten() {
        if !report.succeeded() {
            continue;
        }
        for item in &report.items {
            let existing = summaries
                .iter_mut()
                .find(|s| s.percentile == item.percentile);
            if item.count > 0 {
                match existing {
                    Some(summary) => {
                        summary.count += item.count;
                        summary.avg += item.total_duration / item.count as f64;
                        summary.std += item.std;
                        summary.min = summary.min.min(item.min);
                        summary.max = summary.max.max(item.max);
                        summary.executors += 1;
                    }
                    None => summaries.push(PercentileSummary {
                        percentile: item.percentile,
                        count: item.count,
                        calls_per_sec_raw: 0.0,
                        calls_per_sec: 0.0,
                        avg: item.total_duration / item.count as f64,
                        std: item.std,
                        min: item.min,
                        max: item.max,
                        executors: 1,
                    }),
                }
            } else if existing.is_none() {
                // Empty worker: reserve the boundary with a min sentinel
                // that loses against any real sample during folding.
                summaries.push(PercentileSummary::placeholder(item.percentile, NO_DATA_MIN));
            }
        }
    }

    if !summaries.iter().any(|s| s.percentile == 1.0) {
        summaries.push(PercentileSummary::placeholder(1.0, 0.0));
    }
    if let Some(p) = config.percentile {
        if !summaries.iter().any(|s| s.percentile == p) {
            summaries.push(PercentileSummary::placeholder(p, 0.0));
        }
    }

    for summary in &mut summaries {
        if summary.executors > 0 {
            let executors = summary.executors as f64;
            // avg currently holds the sum of per-worker means; one worker's
            // share of it is the average call duration, whose inverse is
            // that worker's call rate.
            let per_worker_avg = summary.avg / executors;
            summary.calls_per_sec_raw = if per_worker_avg == 0.0 {
                0.0
            } else {
                (1.0 / per_worker_avg) * executors
            };
            summary.calls_per_sec = summary.calls_per_sec_raw * config.bulk_rows as f64;
            summary.avg = per_worker_avg;
            summary.std /= executors;
        } else {
            summary.min = 0.0;
            summary.max = 0.0;
        }
    }

    summaries.sort_by(|a, b| a.percentile.total_cmp(&b.percentile));
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{PercentileItem, ProbeReport};
    use std::time::Duration;

    fn item(percentile: f64, count: u64, total: f64, std: f64, min: f64, max: f64) -> PercentileItem {
        PercentileItem {
            percentile,
            count,
            total_duration: total,
            min,
            max,
            std,
        }
    }

    fn report(items: Vec<PercentileItem>) -> ProbeReport {
        let now = chrono::Utc::now();
        ProbeReport {
            pid: 1,
            counter: items.iter().map(|i| i.count).max().unwrap_or(0),
            items,
            error: None,
            track_init: now,
            track_start: now,
            track_end: now,
        }
    }

    fn config_with_bulk(rows: i64) -> RunConfiguration {
        let mut cfg = RunConfiguration::new(Duration::from_secs(1), Duration::ZERO);
        cfg.set_bulk(rows, 1);
        cfg
    }

    fn find(summaries: &[PercentileSummary], p: f64) -> &PercentileSummary {
        summaries
            .iter()
            .find(|s| s.percentile == p)
            .unwrap_or_else(|| panic!("missing percentile {}", p))
    }

    #[test]
    fn single_worker_throughput_is_inverse_average() {
        let cfg = config_with_bulk(1);
        let mut reports = ReportMap::new();
        reports.insert(
            "0x0".into(),
            Some(report(vec![item(1.0, 10, 1.0, 0.01, 0.08, 0.12)])),
        );

        let summaries = summarize(&cfg, &reports);
        let full = find(&summaries, 1.0);
        assert_eq!(full.count, 10);
        assert_eq!(full.executors, 1);
        assert!((full.avg - 0.1).abs() < 1e-12);
        assert!((full.calls_per_sec_raw - 10.0).abs() < 1e-9);
        assert_eq!(full.calls_per_sec, full.calls_per_sec_raw);
    }

    #[test]
    fn average_of_averages_across_workers() {
        let cfg = config_with_bulk(1);
        let mut reports = ReportMap::new();
        // Worker A: 10 calls averaging 0.25s. Worker B: 100 calls
        // averaging 0.125s. Each worker weighs the same.
        reports.insert(
            "0x0".into(),
            Some(report(vec![item(1.0, 10, 2.5, 0.02, 0.2, 0.3)])),
        );
        reports.insert(
            "1x0".into(),
            Some(report(vec![item(1.0, 100, 12.5, 0.04, 0.1, 0.2)])),
        );

        let summaries = summarize(&cfg, &reports);
        let full = find(&summaries, 1.0);
        assert_eq!(full.count, 110);
        assert_eq!(full.executors, 2);
        assert!((full.avg - 0.1875).abs() < 1e-12);
        assert!((full.std - 0.03).abs() < 1e-12);
        assert_eq!(full.min, 0.1);
        assert_eq!(full.max, 0.3);
        // 1 / 0.1875 per worker, times two workers.
        assert!((full.calls_per_sec_raw - 2.0 / 0.1875).abs() < 1e-9);
    }

    #[test]
    fn doubling_workers_doubles_throughput() {
        let cfg = config_with_bulk(1);

        let one_worker = {
            let mut reports = ReportMap::new();
            reports.insert(
                "0x0".into(),
                Some(report(vec![item(1.0, 10, 1.0, 0.0, 0.1, 0.1)])),
            );
            summarize(&cfg, &reports)
        };
        let two_workers = {
            let mut reports = ReportMap::new();
            for id in ["0x0", "1x0"] {
                reports.insert(id.into(), Some(report(vec![item(1.0, 10, 1.0, 0.0, 0.1, 0.1)])));
            }
            summarize(&cfg, &reports)
        };

        let single = find(&one_worker, 1.0).calls_per_sec_raw;
        let double = find(&two_workers, 1.0).calls_per_sec_raw;
        assert!((9.0..=10.0).contains(&single));
        assert!((18.0..=20.0).contains(&double));
    }

    #[test]
    fn raw_throughput_is_bulk_invariant() {
        // Four workers at a fixed ~4ms per call: the raw rate stays in the
        // same band for any bulk size, only the scaled rate moves.
        for (rows, expected_low, expected_high) in [(1, 800.0, 1000.0), (2, 1600.0, 2000.0), (3, 2400.0, 3000.0)] {
            let cfg = config_with_bulk(rows);
            let mut reports = ReportMap::new();
            for p in 0..4u32 {
                reports.insert(
                    format!("{}x0", p),
                    Some(report(vec![item(1.0, 250, 1.0, 0.0, 0.004, 0.004)])),
                );
            }
            let summaries = summarize(&cfg, &reports);
            let full = find(&summaries, 1.0);
            assert!((800.0..=1000.0).contains(&full.calls_per_sec_raw));
            assert!(
                full.calls_per_sec >= expected_low && full.calls_per_sec <= expected_high,
                "bulk {}: calls_per_sec {}",
                rows,
                full.calls_per_sec
            );
        }
    }

    #[test]
    fn bulk_rows_scale_derived_throughput() {
        let cfg = config_with_bulk(50);
        let mut reports = ReportMap::new();
        reports.insert(
            "0x0".into(),
            Some(report(vec![item(1.0, 10, 1.0, 0.0, 0.1, 0.1)])),
        );

        let summaries = summarize(&cfg, &reports);
        let full = find(&summaries, 1.0);
        assert!((full.calls_per_sec_raw - 10.0).abs() < 1e-9);
        assert!((full.calls_per_sec - 500.0).abs() < 1e-9);
    }

    #[test]
    fn failed_and_missing_workers_are_excluded() {
        let cfg = config_with_bulk(1);
        let mut reports = ReportMap::new();
        reports.insert(
            "0x0".into(),
            Some(report(vec![item(1.0, 10, 1.0, 0.0, 0.1, 0.1)])),
        );
        reports.insert("1x0".into(), Some(ProbeReport::failed(2, "died")));
        reports.insert("2x0".into(), None);

        assert!(!run_succeeded(&reports));

        let summaries = summarize(&cfg, &reports);
        let full = find(&summaries, 1.0);
        // Only the healthy worker contributes.
        assert_eq!(full.executors, 1);
        assert_eq!(full.count, 10);
        assert!((full.calls_per_sec_raw - 10.0).abs() < 1e-9);
    }

    #[test]
    fn empty_workers_reserve_boundary_without_skew() {
        let cfg = config_with_bulk(1);
        let mut reports = ReportMap::new();
        // One worker measured nothing (zero-count item), another has data.
        reports.insert(
            "0x0".into(),
            Some(report(vec![item(0.9, 0, 0.0, 0.0, NO_DATA_MIN, 0.0)])),
        );
        reports.insert(
            "1x0".into(),
            Some(report(vec![item(0.9, 4, 0.4, 0.0, 0.05, 0.15)])),
        );

        let summaries = summarize(&cfg, &reports);
        let bounded = find(&summaries, 0.9);
        assert_eq!(bounded.executors, 1);
        // The sentinel min from the empty worker must not survive.
        assert_eq!(bounded.min, 0.05);
        assert_eq!(bounded.max, 0.15);
    }

    #[test]
    fn missing_boundaries_are_synthesized_empty() {
        let cfg = config_with_bulk(1).with_percentile(0.95);
        let reports = ReportMap::new();

        let summaries = summarize(&cfg, &reports);
        assert_eq!(summaries.len(), 2);
        let bounded = find(&summaries, 0.95);
        let full = find(&summaries, 1.0);
        for s in [bounded, full] {
            assert_eq!(s.executors, 0);
            assert_eq!(s.count, 0);
            assert_eq!(s.min, 0.0);
            assert_eq!(s.max, 0.0);
            assert_eq!(s.calls_per_sec, 0.0);
        }
    }

    #[test]
    fn summaries_are_sorted_by_percentile() {
        let cfg = config_with_bulk(1).with_percentile(0.5);
        let mut reports = ReportMap::new();
        reports.insert(
            "0x0".into(),
            Some(report(vec![
                item(1.0, 10, 1.0, 0.0, 0.1, 0.1),
                item(0.5, 5, 0.4, 0.0, 0.05, 0.1),
            ])),
        );

        let summaries = summarize(&cfg, &reports);
        let percentiles: Vec<f64> = summaries.iter().map(|s| s.percentile).collect();
        assert_eq!(percentiles, vec![0.5, 1.0]);
    }
}
