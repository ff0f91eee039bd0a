//! # Parallel Bench Library
//!
//! A parallel load-generation and benchmarking engine implemented in Rust.
//! Given a user-supplied unit of work, the library runs it concurrently
//! across a configurable number of worker processes and threads, measures
//! per-call latency precisely, and produces statistically sound throughput
//! and latency summaries without retaining every sample in memory.
//!
//! ## Architecture Overview
//!
//! The library is organized into several key modules:
//!
//! - `stats`: online statistics (Welford mean/variance, streaming
//!   percentile heap with bounded memory)
//! - `probe`: the per-worker measurement probe with start/stop and
//!   partial/segmented measurement protocols
//! - `worker`: work-function contract, named workload registry, and the
//!   failure-isolating worker wrapper
//! - `orchestrator`: barrier-synchronized process/thread spawning and
//!   report collection over per-child pipes
//! - `aggregate`: cross-worker per-percentile summaries
//! - `runner`: the bulk x executor-shape matrix loop
//! - `results`: run results, collections, and the JSON results writer
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use parallel_bench::{BenchmarkRunner, MeasurementProbe, RunConfiguration};
//! use std::time::Duration;
//!
//! fn my_workload(
//!     probe: &mut MeasurementProbe,
//!     _config: &RunConfiguration,
//! ) -> anyhow::Result<()> {
//!     loop {
//!         probe.start()?;
//!         // ... the operation under test ...
//!         if probe.stop()? {
//!             return Ok(());
//!         }
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     parallel_bench::worker::register_workload("my-workload", my_workload);
//!
//!     let config = RunConfiguration::new(Duration::from_secs(5), Duration::from_secs(1))
//!         .with_percentile(0.99);
//!     let runner = BenchmarkRunner::new("demo", "my-workload");
//!     let collection = runner.run(4, 2, &config).await?;
//!
//!     println!("overall: {}", collection.overall_succeeded());
//!     Ok(())
//! }
//! ```
//!
//! ## Measurement Characteristics
//!
//! - **Bounded memory**: percentile estimation streams through a
//!   size-adaptive min-heap instead of retaining all samples
//! - **Synchronized start**: workers block on a shared wall-clock deadline
//!   so spawn latency never staggers the measured phase
//! - **Failure isolation**: a panicking or failing worker becomes a
//!   failure-tagged report; the remaining workers are unaffected

/// Online statistics primitives: Welford variance and the streaming
/// percentile heap.
pub mod stats;

/// Run configuration, validation, and executor-shape/bulk presets.
pub mod config;

/// Shared wall-clock start barrier.
pub mod barrier;

/// Per-worker measurement probe and its serializable report.
pub mod probe;

/// Work-function contract, workload registry, and worker process entry.
pub mod worker;

/// Process/thread spawning and report collection.
pub mod orchestrator;

/// Cross-worker aggregation into per-percentile summaries.
pub mod aggregate;

/// Run results, collections, and the JSON results writer.
pub mod results;

/// The bulk x executor-shape matrix loop.
pub mod runner;

/// Command-line interface and parsers.
pub mod cli;

/// Tracing setup: colorized console, optional file appender.
pub mod logging;

/// Built-in demo workloads registered by the binary.
pub mod workloads;

// Re-export the types a library user touches directly.
pub use aggregate::PercentileSummary;
pub use config::{ConfigError, ExecutorShape, RunConfiguration};
pub use probe::{MeasurementProbe, PercentileItem, ProbeReport};
pub use results::{ResultCollection, RunResult};
pub use runner::BenchmarkRunner;
pub use stats::{OnlineVariance, PercentileHeap};
pub use worker::WorkFn;

/// The current version of the benchmark engine, from Cargo.toml; recorded
/// in every results file for reproducibility.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values.
pub mod defaults {
    use std::time::Duration;

    /// Default measured duration per run. Long enough for rates to
    /// stabilize, short enough for interactive sweeps.
    pub const WORK_DURATION: Duration = Duration::from_secs(5);

    /// Default initial size of the streaming percentile heap. Sized so
    /// typical short runs never need to grow it.
    pub const HEAP_INIT_SIZE: usize = crate::stats::DEFAULT_HEAP_INIT_SIZE;

    /// Default run label.
    pub const LABEL: &str = "parallel-bench";
}
