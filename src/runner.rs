//! # Benchmark Runner Module
//!
//! The outer execution loop: iterate a list of bulk sizes across a list
//! of executor shapes, orchestrate one measured run per combination, and
//! collect everything into a [`ResultCollection`].
//!
//! Orchestration failures are recorded as failed runs and the loop keeps
//! going; a broken shape must not cost the rest of the matrix. The only
//! errors that abort the loop are the ones no later run could survive
//! either (invalid configuration, unwritable results file).

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::{ExecutorShape, RunConfiguration};
use crate::orchestrator;
use crate::probe::ProbeReport;
use crate::results::{self, ResultCollection, RunResult};
use crate::worker;

/// Drives bulk x shape matrices for one named workload.
#[derive(Debug, Clone)]
pub struct BenchmarkRunner {
    label: String,
    workload: String,
    init_each_bulk: bool,
    sleep_between_bulks: Duration,
    output_file: Option<PathBuf>,
}

impl BenchmarkRunner {
    pub fn new(label: impl Into<String>, workload: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            workload: workload.into(),
            init_each_bulk: false,
            sleep_between_bulks: Duration::ZERO,
            output_file: None,
        }
    }

    /// Run a calibration pass before each bulk (builder style).
    pub fn with_init_each_bulk(mut self, enabled: bool) -> Self {
        self.init_each_bulk = enabled;
        self
    }

    /// Pause between bulks to let the measured system settle.
    pub fn with_sleep_between_bulks(mut self, sleep: Duration) -> Self {
        self.sleep_between_bulks = sleep;
        self
    }

    /// Write the final collection to a JSON results file.
    pub fn with_output_file(mut self, path: PathBuf) -> Self {
        self.output_file = Some(path);
        self
    }

    /// Run a single shape with the configuration's current bulk.
    pub async fn run(
        &self,
        processes: u32,
        threads: u32,
        config: &RunConfiguration,
    ) -> Result<ResultCollection> {
        let shape = ExecutorShape::new(processes, threads, format!("{}x thread", threads));
        let bulk = [(config.bulk_rows as i64, config.bulk_cols as i64)];
        self.run_bulk_executor(&bulk, &[shape], config).await
    }

    /// Run a shape list with the configuration's current bulk.
    pub async fn run_executor(
        &self,
        shapes: &[ExecutorShape],
        config: &RunConfiguration,
    ) -> Result<ResultCollection> {
        let bulk = [(config.bulk_rows as i64, config.bulk_cols as i64)];
        self.run_bulk_executor(&bulk, shapes, config).await
    }

    /// Run the full bulk x shape matrix.
    pub async fn run_bulk_executor(
        &self,
        bulks: &[(i64, i64)],
        shapes: &[ExecutorShape],
        config: &RunConfiguration,
    ) -> Result<ResultCollection> {
        config.validate()?;

        self.print_header(config);
        let started = Instant::now();
        let mut collection = ResultCollection::new(&self.label);

        for (index, &(rows, cols)) in bulks.iter().enumerate() {
            if index > 0 && !self.sleep_between_bulks.is_zero() {
                tokio::time::sleep(self.sleep_between_bulks).await;
            }

            let mut run_config = config.clone();
            run_config.set_bulk(rows, cols);

            if self.init_each_bulk {
                match self.init_run(&run_config) {
                    Ok(true) => {}
                    Ok(false) => warn!("calibration run reported a failure, continuing"),
                    Err(e) => warn!("calibration run errored: {:#}", e),
                }
            }

            for shape in shapes {
                info!(
                    "Run: bulk {}x{}, executors {}",
                    run_config.bulk_rows, run_config.bulk_cols, shape
                );
                let result = match orchestrator::execute(
                    &run_config,
                    &self.workload,
                    shape.processes,
                    shape.threads,
                ) {
                    Ok(reports) => RunResult::from_reports(&run_config, shape, &reports),
                    Err(e) => {
                        warn!("orchestration failed for {}: {:#}", shape, e);
                        RunResult::failed(&run_config, shape, format!("{:#}", e))
                    }
                };
                self.print_detail(&result);
                collection.push(result);
            }
        }

        self.print_footer(&collection, started.elapsed());
        if let Some(path) = &self.output_file {
            results::write_results(path, &collection)?;
        }
        Ok(collection)
    }

    /// Calibration pass: run the workload once, in-process, with a zero
    /// duration and the calibration parameter set. Returns whether the
    /// workload succeeded.
    pub fn init_run(&self, config: &RunConfiguration) -> Result<bool> {
        let report = self.run_in_process(&config.calibration())?;
        Ok(report.succeeded())
    }

    /// Smoke-test the workload in-process with the given configuration.
    /// No child processes, no barrier; intended for development and CI.
    pub fn test_run(&self, config: &RunConfiguration) -> Result<ProbeReport> {
        config.validate()?;
        self.run_in_process(config)
    }

    fn run_in_process(&self, config: &RunConfiguration) -> Result<ProbeReport> {
        let work = worker::workload(&self.workload)
            .ok_or_else(|| anyhow!("unknown workload '{}'", self.workload))?;
        Ok(worker::run_worker(work, config, "0x0").report)
    }

    fn print_header(&self, config: &RunConfiguration) {
        info!("Execution: '{}'", self.label);
        info!(
            "  workload '{}', duration {:?}, percentile {}",
            self.workload,
            config.work_duration,
            config
                .percentile
                .map(|p| p.to_string())
                .unwrap_or_else(|| "none".to_string())
        );
        info!("  host cpus: {}", num_cpus::get());
    }

    fn print_detail(&self, result: &RunResult) {
        if result.succeeded {
            info!(
                "  done: {}/{} executors, {:.2} calls/sec",
                result.real_executors,
                result.planned_workers,
                result.calls_per_sec()
            );
        } else {
            warn!(
                "  failed: {}",
                result.error.as_deref().unwrap_or("one or more workers failed")
            );
        }
    }

    fn print_footer(&self, collection: &ResultCollection, elapsed: Duration) {
        info!(
            "Execution '{}' finished: {} in {}",
            self.label,
            if collection.overall_succeeded() {
                "OK"
            } else {
                "FAILED"
            },
            readable_duration(elapsed)
        );
    }
}

/// Human-readable duration for the run footer, e.g. "1 h 2 min 3.4 sec".
fn readable_duration(duration: Duration) -> String {
    let total = duration.as_secs_f64();
    let hours = (total / 3600.0) as u64;
    let minutes = ((total % 3600.0) / 60.0) as u64;
    let seconds = total % 60.0;

    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{} h", hours));
    }
    if minutes > 0 {
        parts.push(format!("{} min", minutes));
    }
    parts.push(format!("{:.1} sec", seconds));
    parts.join(" ")
}
