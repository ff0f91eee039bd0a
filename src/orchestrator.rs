//! # Orchestrator Module
//!
//! Spawns the worker topology for one measured run and collects the
//! per-worker reports.
//!
//! ## Process model
//!
//! Worker processes are re-executions of the current binary in a hidden
//! internal mode. Each child gets its serialized [`WorkerPlan`] on the
//! command line and the write end of a dedicated OS pipe as stdout; it
//! writes one JSON report line per worker and exits. The parent owns the
//! read ends exclusively, so no run state is ever shared mutably across
//! workers.
//!
//! Every planned worker slot appears in the returned map. A slot with no
//! report (child crashed, was killed, or never wrote its line) stays
//! `None` and counts as a failed worker downstream.

use anyhow::{bail, Context, Result};
use os_pipe::pipe;
use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use tracing::{debug, warn};

#[cfg(unix)]
use std::os::unix::io::{FromRawFd, IntoRawFd};
#[cfg(windows)]
use std::os::windows::io::{FromRawHandle, IntoRawHandle};

use crate::barrier::StartBarrier;
use crate::config::RunConfiguration;
use crate::probe::ProbeReport;
use crate::worker::{worker_id, WorkerPlan, WorkerReport};

/// Hidden CLI flag that switches the binary into worker mode.
pub const WORKER_FLAG: &str = "--internal-worker";

/// Environment override for the worker executable path.
pub const EXE_ENV: &str = "PARALLEL_BENCH_EXE";

/// Reports from one run, keyed by worker slot id (`"{process}x{thread}"`).
/// `None` marks a planned worker that produced no report.
pub type ReportMap = HashMap<String, Option<ProbeReport>>;

/// Run `workload` across `processes` child processes with `threads`
/// workers each, synchronized on a shared start deadline computed here.
///
/// Validates the configuration before the first spawn, so configuration
/// errors never reach a worker.
pub fn execute(
    config: &RunConfiguration,
    workload: &str,
    processes: u32,
    threads: u32,
) -> Result<ReportMap> {
    config.validate()?;
    if processes == 0 || threads == 0 {
        bail!("executor shape must have at least one process and one thread");
    }

    // The deadline is computed exactly once and shipped to every worker
    // inside the plan.
    let mut run_config = config.clone();
    run_config.start_deadline_ns = Some(StartBarrier::compute_deadline(config.start_delay)?);

    let exe = resolve_worker_exe()?;
    debug!(
        "spawning {} worker process(es) x {} thread(s) via {:?}",
        processes, threads, exe
    );

    let mut children: Vec<(Child, os_pipe::PipeReader)> = Vec::with_capacity(processes as usize);
    for process_index in 0..processes {
        let plan = WorkerPlan {
            workload: workload.to_string(),
            config: run_config.clone(),
            process_index,
            threads,
        };
        match spawn_worker(&exe, &plan) {
            Ok(pair) => children.push(pair),
            Err(e) => {
                // Do not leave half a topology running.
                for (mut child, _) in children {
                    let _ = child.kill();
                    let _ = child.wait();
                }
                return Err(e.context(format!("failed to spawn worker process {}", process_index)));
            }
        }
    }

    // Pre-fill every planned slot; workers that report overwrite theirs.
    let mut reports: ReportMap = HashMap::new();
    for p in 0..processes {
        for t in 0..threads {
            reports.insert(worker_id(p, t), None);
        }
    }

    for (mut child, mut reader) in children {
        let mut output = String::new();
        if let Err(e) = reader.read_to_string(&mut output) {
            warn!("failed to read worker pipe: {}", e);
        }
        match child.wait() {
            Ok(status) if !status.success() => {
                warn!("worker process exited with {}", status);
            }
            Err(e) => warn!("failed to reap worker process: {}", e),
            _ => {}
        }
        for line in output.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<WorkerReport>(line) {
                Ok(wr) => {
                    reports.insert(wr.id, Some(wr.report));
                }
                Err(e) => warn!("discarding malformed worker report line: {}", e),
            }
        }
    }

    Ok(reports)
}

/// Spawn one worker process with the pipe's write end as its stdout.
fn spawn_worker(exe: &PathBuf, plan: &WorkerPlan) -> Result<(Child, os_pipe::PipeReader)> {
    let plan_json = serde_json::to_string(plan).context("failed to encode worker plan")?;
    let (reader, writer) = pipe().context("failed to create worker pipe")?;

    let mut cmd = Command::new(exe);
    cmd.arg(WORKER_FLAG).arg(plan_json);
    cmd.stdin(Stdio::null());
    #[cfg(unix)]
    {
        cmd.stdout(unsafe { Stdio::from_raw_fd(writer.into_raw_fd()) });
    }
    #[cfg(windows)]
    {
        cmd.stdout(unsafe { Stdio::from_raw_handle(writer.into_raw_handle()) });
    }
    // Worker logging goes to our stderr.
    cmd.stderr(Stdio::inherit());

    let child = cmd.spawn().context("failed to spawn worker process")?;
    Ok((child, reader))
}

/// Locate the executable to re-execute in worker mode.
///
/// Resolution order: explicit environment override, a Cargo-provided
/// binary path if one is present in the environment, the current
/// executable when it is the real binary, and finally a sibling of the
/// current executable (covers test harness binaries under
/// `target/*/deps`).
fn resolve_worker_exe() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(EXE_ENV) {
        return Ok(PathBuf::from(path));
    }
    if let Ok(path) = std::env::var(concat!("CARGO_BIN_EXE_", env!("CARGO_PKG_NAME"))) {
        return Ok(PathBuf::from(path));
    }

    let current = std::env::current_exe().context("cannot determine current executable")?;
    let bin_name = env!("CARGO_PKG_NAME");
    if current
        .file_stem()
        .map(|stem| stem.to_string_lossy() == bin_name)
        .unwrap_or(false)
    {
        return Ok(current);
    }

    if let Some(dir) = current.parent() {
        let base = if dir.ends_with("deps") {
            dir.parent().unwrap_or(dir)
        } else {
            dir
        };
        let candidate = base.join(bin_name);
        if candidate.exists() {
            return Ok(candidate);
        }
        #[cfg(windows)]
        {
            let candidate = base.join(format!("{}.exe", bin_name));
            if candidate.exists() {
                return Ok(candidate);
            }
        }
    }

    bail!(
        "cannot locate the worker executable; set the {} environment variable",
        EXE_ENV
    )
}
