//! # Run Configuration Module
//!
//! Defines the immutable per-run configuration shared by the orchestrator
//! and every worker, plus the executor-shape and bulk presets used to build
//! scaling matrices.
//!
//! A `RunConfiguration` crosses process boundaries: the orchestrator
//! serializes it into the worker plan handed to each child process, so the
//! whole structure is plain serde data. Validation happens exactly once,
//! before any worker is spawned, so a bad percentile or heap size fails
//! fast instead of surfacing as N identical worker failures.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::stats::DEFAULT_HEAP_INIT_SIZE;

/// Reserved parameter key marking a calibration run.
///
/// Calibration runs execute the work function once, in-process and with a
/// zero duration, before a measured bulk starts. Work functions can check
/// [`RunConfiguration::is_calibration`] to set up external state (create a
/// table, warm a cache) instead of measuring.
pub const CALIBRATION_PARAM: &str = "__init__";

/// Configuration validation errors, raised before any worker spawns.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid range for 'percentile': requested value is '{0}', accepted values are > 0 and < 1")]
    InvalidPercentile(f64),

    #[error("'heap_init_size' must be a positive integer")]
    InvalidHeapInitSize,
}

/// Immutable description of one measured run, shared by the orchestrator
/// and every worker process/thread it spawns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfiguration {
    /// How long each worker keeps invoking the measured operation.
    /// A zero duration means "run the operation exactly once".
    pub work_duration: Duration,

    /// Synchronization window granted to workers before the measured phase
    /// starts. Zero disables the start barrier.
    pub start_delay: Duration,

    /// Rows per bulk; scales the derived `calls_per_sec` throughput.
    pub bulk_rows: u64,

    /// Columns per bulk; carried as workload metadata only.
    pub bulk_cols: u64,

    /// Free-form workload parameters, read-only to workers.
    pub parameters: BTreeMap<String, String>,

    /// Requested percentile boundary in the open interval (0, 1).
    /// `None` disables the streaming percentile heap and the probe
    /// accumulates every sample directly.
    pub percentile: Option<f64>,

    /// Initial sentinel-slot count of the percentile heap.
    pub heap_init_size: usize,

    /// Shared start deadline in nanoseconds since the Unix epoch.
    /// Set exactly once by the orchestrator before spawning; `None` until
    /// then (workers constructed without a deadline start immediately).
    pub start_deadline_ns: Option<u64>,
}

impl Default for RunConfiguration {
    fn default() -> Self {
        Self::new(crate::defaults::WORK_DURATION, Duration::ZERO)
    }
}

impl RunConfiguration {
    /// Create a configuration with the given measured duration and start
    /// synchronization delay. Bulk defaults to 1x1, no percentile.
    pub fn new(work_duration: Duration, start_delay: Duration) -> Self {
        Self {
            work_duration,
            start_delay,
            bulk_rows: 1,
            bulk_cols: 1,
            parameters: BTreeMap::new(),
            percentile: None,
            heap_init_size: DEFAULT_HEAP_INIT_SIZE,
            start_deadline_ns: None,
        }
    }

    /// Attach a requested percentile boundary (builder style).
    pub fn with_percentile(mut self, percentile: f64) -> Self {
        self.percentile = Some(percentile);
        self
    }

    /// Attach a workload parameter (builder style).
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Validate the configuration. Called by the orchestrator before the
    /// first spawn; a failure here never reaches a worker.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(p) = self.percentile {
            if !(p > 0.0 && p < 1.0) {
                return Err(ConfigError::InvalidPercentile(p));
            }
        }
        if self.heap_init_size == 0 {
            return Err(ConfigError::InvalidHeapInitSize);
        }
        Ok(())
    }

    /// Set the bulk dimensions, clamping non-positive values to 1.
    pub fn set_bulk(&mut self, rows: i64, cols: i64) {
        self.bulk_rows = if rows > 0 { rows as u64 } else { 1 };
        self.bulk_cols = if cols > 0 { cols as u64 } else { 1 };
    }

    /// Look up a workload parameter.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    /// True when this configuration describes a calibration run.
    pub fn is_calibration(&self) -> bool {
        self.param(CALIBRATION_PARAM)
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    /// Derive the calibration variant of this configuration: zero duration,
    /// no start delay, calibration parameter set, bulk preserved.
    pub fn calibration(&self) -> Self {
        let mut cfg = self.clone();
        cfg.work_duration = Duration::ZERO;
        cfg.start_delay = Duration::ZERO;
        cfg.start_deadline_ns = None;
        cfg.parameters
            .insert(CALIBRATION_PARAM.to_string(), "true".to_string());
        cfg
    }
}

/// One point of a scaling matrix: how many processes and threads per
/// process to spawn, with a human label for the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorShape {
    pub processes: u32,
    pub threads: u32,
    pub label: String,
}

impl ExecutorShape {
    pub fn new(processes: u32, threads: u32, label: impl Into<String>) -> Self {
        Self {
            processes,
            threads,
            label: label.into(),
        }
    }

    /// Total planned workers for this shape.
    pub fn planned_workers(&self) -> u32 {
        self.processes * self.threads
    }
}

impl std::fmt::Display for ExecutorShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} '{}'",
            self.processes, self.threads, self.label
        )
    }
}

/// Preset generators for scaling matrices.
pub mod shapes {
    use super::ExecutorShape;

    /// Grow the thread count in powers of two at a fixed process count.
    pub fn thread_grow(processes: u32, pow_start: u32, pow_stop: u32) -> Vec<ExecutorShape> {
        (pow_start..pow_stop)
            .map(|i| {
                let threads = 2u32.pow(i);
                ExecutorShape::new(processes, threads, format!("{}x thread", threads))
            })
            .collect()
    }

    /// Grow the process count in powers of two at a fixed thread count.
    pub fn process_grow(pow_start: u32, pow_stop: u32, threads: u32) -> Vec<ExecutorShape> {
        (pow_start..pow_stop)
            .map(|i| {
                let processes = 2u32.pow(i);
                ExecutorShape::new(processes, threads, format!("{}x process", processes))
            })
            .collect()
    }

    /// Single-threaded processes from 1 to 8.
    pub fn process_1_8_thread_1() -> Vec<ExecutorShape> {
        [1, 2, 4, 8]
            .iter()
            .map(|&p| ExecutorShape::new(p, 1, "1x thread"))
            .collect()
    }
}

/// Preset bulk lists in `(rows, columns)` form.
pub mod bulks {
    /// Single-row bulks with growing column counts.
    pub const ROW_1_COL_10_100: [(i64, i64); 3] = [(1, 10), (1, 50), (1, 100)];

    /// Growing row counts at 10 columns.
    pub const ROW_1_10K_COL_10: [(i64, i64); 4] = [(1, 10), (100, 10), (1000, 10), (10000, 10)];
}
