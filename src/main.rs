//! # Parallel Bench - Main Entry Point
//!
//! The binary runs in one of two modes:
//!
//! 1. **Orchestrator** (default): parses the CLI, registers the built-in
//!    workloads, and drives the bulk x shape matrix through the runner.
//! 2. **Worker** (hidden `--internal-worker` flag): the same binary
//!    re-executed by the orchestrator. It deserializes its worker plan,
//!    runs the requested workload on one or more threads, and writes one
//!    JSON report line per worker to stdout.
//!
//! Workloads are registered before mode dispatch so names resolve
//! identically on both sides of the process boundary.

use anyhow::{bail, Result};
use clap::Parser;
use parallel_bench::{
    cli::Args,
    logging, runner::BenchmarkRunner, worker, workloads,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    workloads::register_builtin();

    // Worker mode: stdout is the report channel, logging goes to stderr.
    if let Some(plan_json) = args.internal_worker.as_deref() {
        logging::init_worker();
        return worker::worker_process_main(plan_json);
    }

    let _log_guard = logging::init(args.verbose, args.log_file.as_deref())?;

    info!("Parallel Bench v{}", parallel_bench::VERSION);
    info!(
        "workload '{}', {} bulk(s), {} shape(s)",
        args.workload,
        args.bulks.len(),
        args.shapes().len()
    );

    let config = args.run_configuration();
    // Surface configuration errors before anything spawns.
    config.validate()?;

    let mut runner = BenchmarkRunner::new(&args.label, &args.workload)
        .with_init_each_bulk(args.init_each_bulk)
        .with_sleep_between_bulks(args.sleep_between_bulks);
    if let Some(path) = &args.output_file {
        runner = runner.with_output_file(path.clone());
    }

    let collection = runner
        .run_bulk_executor(&args.bulk_list(), &args.shapes(), &config)
        .await?;

    if !collection.overall_succeeded() {
        bail!("one or more runs failed");
    }
    Ok(())
}
