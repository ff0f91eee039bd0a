//! # Built-in Workloads
//!
//! Demo workloads registered by the binary so the tool is usable out of
//! the box and end-to-end tests can exercise real multi-process runs.

use anyhow::{Context, Result};
use std::time::Duration;

use crate::config::RunConfiguration;
use crate::probe::MeasurementProbe;
use crate::worker;

/// Register the built-in workloads. The binary calls this on startup in
/// both orchestrator and worker mode, so names resolve on either side of
/// the process boundary.
pub fn register_builtin() {
    worker::register_workload("sleep", sleep_workload);
    worker::register_workload("spin", spin_workload);
    worker::register_workload("fail", fail_workload);
}

/// Sleeps `sleep_ms` milliseconds per call (default 1). Approximates an
/// I/O-bound operation with a known latency floor.
fn sleep_workload(probe: &mut MeasurementProbe, config: &RunConfiguration) -> Result<()> {
    let millis: u64 = config
        .param("sleep_ms")
        .map(str::parse)
        .transpose()
        .context("invalid 'sleep_ms' parameter")?
        .unwrap_or(1);
    loop {
        probe.start()?;
        std::thread::sleep(Duration::from_millis(millis));
        if probe.stop()? {
            return Ok(());
        }
    }
}

/// Burns CPU for `spin_iters` iterations per call (default 10000).
fn spin_workload(probe: &mut MeasurementProbe, config: &RunConfiguration) -> Result<()> {
    let iterations: u64 = config
        .param("spin_iters")
        .map(str::parse)
        .transpose()
        .context("invalid 'spin_iters' parameter")?
        .unwrap_or(10_000);
    loop {
        probe.start()?;
        let mut acc: u64 = 0;
        for i in 0..iterations {
            acc = std::hint::black_box(acc.wrapping_add(i));
        }
        std::hint::black_box(acc);
        if probe.stop()? {
            return Ok(());
        }
    }
}

/// Always fails. Exists so failure propagation can be exercised through
/// the full process topology.
fn fail_workload(_probe: &mut MeasurementProbe, _config: &RunConfiguration) -> Result<()> {
    anyhow::bail!("the 'fail' workload always fails")
}
