//! # Worker Module
//!
//! Everything that runs on the worker side of the process boundary: the
//! work-function contract, the named workload registry, the wrapper that
//! isolates worker failures, and the entry point executed by re-spawned
//! worker processes.
//!
//! ## Workload registry
//!
//! Worker processes are re-executions of the current binary, so a work
//! function cannot be passed across the process boundary directly.
//! Instead both sides register the same functions under stable names at
//! startup and the orchestrator ships only the name; the child resolves
//! it from its own registry.

use anyhow::{anyhow, Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::debug;

use crate::config::RunConfiguration;
use crate::probe::{MeasurementProbe, ProbeReport};

/// Contract for a unit of measured work.
///
/// The function owns the measurement loop: it drives the probe through
/// `start()`/`stop()` (or the partial protocol) until a terminating call
/// returns `true`, then returns. Returning `Err` marks the worker failed.
pub type WorkFn = fn(&mut MeasurementProbe, &RunConfiguration) -> Result<()>;

static REGISTRY: RwLock<BTreeMap<&'static str, WorkFn>> = RwLock::new(BTreeMap::new());

/// Register a workload under a stable name. Call before any run; both the
/// orchestrating process and re-executed workers must register the same
/// set.
pub fn register_workload(name: &'static str, work: WorkFn) {
    REGISTRY.write().insert(name, work);
}

/// Resolve a registered workload.
pub fn workload(name: &str) -> Option<WorkFn> {
    REGISTRY.read().get(name).copied()
}

/// Names of all registered workloads, sorted.
pub fn workload_names() -> Vec<&'static str> {
    REGISTRY.read().keys().copied().collect()
}

/// Everything a worker process needs, serialized onto its command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPlan {
    pub workload: String,
    pub config: RunConfiguration,
    pub process_index: u32,
    pub threads: u32,
}

/// One worker's terminal output, tagged with its slot id. Each worker
/// writes exactly one of these as a JSON line on the child's stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerReport {
    pub id: String,
    pub report: ProbeReport,
}

/// Slot id of the worker at `(process, thread)`.
pub fn worker_id(process_index: u32, thread_index: u32) -> String {
    format!("{}x{}", process_index, thread_index)
}

/// Run one worker to completion, converting any failure (probe
/// construction, work-function error, panic) into a failure-tagged
/// report. Never unwinds into the caller.
pub fn run_worker(work: WorkFn, config: &RunConfiguration, id: &str) -> WorkerReport {
    let outcome = catch_unwind(AssertUnwindSafe(|| -> Result<ProbeReport> {
        let mut probe = MeasurementProbe::new(config)?;
        work(&mut probe, config)?;
        // A work function that returns before the terminating stop() still
        // yields whatever it measured.
        probe.close();
        Ok(probe.report())
    }));

    let report = match outcome {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => ProbeReport::failed(std::process::id(), format!("{:#}", e)),
        Err(payload) => ProbeReport::failed(std::process::id(), panic_message(payload)),
    };
    WorkerReport {
        id: id.to_string(),
        report,
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("worker panicked: {}", s)
    } else {
        "worker panicked".to_string()
    }
}

/// Entry point of a re-executed worker process.
///
/// Runs one worker inline when the plan asks for a single thread, or a
/// scoped thread pool otherwise, and writes one JSON report line per
/// worker to stdout. Stdout carries nothing else; logging goes to stderr.
pub fn worker_process_main(plan_json: &str) -> Result<()> {
    let plan: WorkerPlan =
        serde_json::from_str(plan_json).context("failed to parse worker plan")?;
    let work = workload(&plan.workload)
        .ok_or_else(|| anyhow!("unknown workload '{}'", plan.workload))?;

    debug!(
        "worker process {} starting: workload '{}', {} thread(s)",
        plan.process_index, plan.workload, plan.threads
    );

    let reports = if plan.threads <= 1 {
        vec![run_worker(work, &plan.config, &worker_id(plan.process_index, 0))]
    } else {
        run_thread_pool(work, &plan)
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for report in &reports {
        let line = serde_json::to_string(report).context("failed to encode worker report")?;
        writeln!(out, "{}", line).context("failed to write worker report")?;
    }
    out.flush().context("failed to flush worker reports")?;
    Ok(())
}

/// Run `plan.threads` workers on scoped threads, collecting their reports
/// over a channel. A thread that cannot be spawned surfaces as a missing
/// report, which the orchestrator treats as a failed worker.
fn run_thread_pool(work: WorkFn, plan: &WorkerPlan) -> Vec<WorkerReport> {
    let (tx, rx) = crossbeam::channel::unbounded();
    std::thread::scope(|scope| {
        for thread_index in 0..plan.threads {
            let tx = tx.clone();
            let config = &plan.config;
            let id = worker_id(plan.process_index, thread_index);
            scope.spawn(move || {
                let _ = tx.send(run_worker(work, config, &id));
            });
        }
    });
    drop(tx);
    rx.iter().collect()
}
