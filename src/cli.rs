use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{ExecutorShape, RunConfiguration};

/// Parallel Bench - a load-generation and benchmarking engine with
/// streaming percentile statistics
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Registered workload to run
    #[clap(short = 'w', long, default_value = "sleep", help_heading = "Core Options")]
    pub workload: String,

    /// Duration of each measured run (0 runs the workload exactly once)
    #[clap(short = 'd', long, value_parser = parse_duration, default_value = "5s")]
    pub duration: Duration,

    /// Synchronization window granted to workers before measuring starts
    #[clap(long, value_parser = parse_duration, default_value = "0s")]
    pub start_delay: Duration,

    /// Bulk sizes as ROWSxCOLS (space-separated, e.g. "1x10 100x10")
    #[clap(short = 'b', long = "bulk", value_parser = parse_bulk, default_values_t = vec![Bulk::new(1, 1)], num_args = 1..)]
    pub bulks: Vec<Bulk>,

    /// Process counts to sweep
    #[clap(short = 'p', long, default_values_t = vec![1u32], num_args = 1..)]
    pub processes: Vec<u32>,

    /// Thread counts per process to sweep
    #[clap(short = 't', long, default_values_t = vec![1u32], num_args = 1..)]
    pub threads: Vec<u32>,

    /// Percentile boundary to report, strictly between 0 and 1
    #[clap(long)]
    pub percentile: Option<f64>,

    /// Initial size of the streaming percentile heap
    #[clap(long, default_value_t = crate::defaults::HEAP_INIT_SIZE)]
    pub heap_init_size: usize,

    /// Workload parameters as KEY=VALUE pairs
    #[clap(long = "param", value_parser = parse_param, num_args = 0..)]
    pub parameters: Vec<(String, String)>,

    /// Run the workload once in-process before each bulk (calibration)
    #[clap(long, default_value_t = false)]
    pub init_each_bulk: bool,

    /// Pause between bulks
    #[clap(long, value_parser = parse_duration, default_value = "0s")]
    pub sleep_between_bulks: Duration,

    /// Run label used in logs and results
    #[clap(short = 'l', long, default_value = "parallel-bench")]
    pub label: String,

    /// Output file for results (JSON format)
    #[clap(short = 'o', long)]
    pub output_file: Option<PathBuf>,

    /// Log file (plain text, disables console colors)
    #[clap(long)]
    pub log_file: Option<PathBuf>,

    /// Verbose output
    #[clap(short = 'v', long, default_value_t = false)]
    pub verbose: bool,

    /// Internal: run as a worker process with the given JSON plan
    #[clap(long = "internal-worker", hide = true)]
    pub internal_worker: Option<String>,
}

impl Args {
    /// Build the run configuration described by these arguments.
    pub fn run_configuration(&self) -> RunConfiguration {
        let mut config = RunConfiguration::new(self.duration, self.start_delay);
        config.percentile = self.percentile;
        config.heap_init_size = self.heap_init_size;
        for (key, value) in &self.parameters {
            config.parameters.insert(key.clone(), value.clone());
        }
        config
    }

    /// Cross product of the process and thread sweeps.
    pub fn shapes(&self) -> Vec<ExecutorShape> {
        let mut shapes = Vec::new();
        for &threads in &self.threads {
            for &processes in &self.processes {
                shapes.push(ExecutorShape::new(
                    processes,
                    threads,
                    format!("{}x thread", threads),
                ));
            }
        }
        shapes
    }

    /// Bulk list in the `(rows, cols)` form the runner consumes.
    pub fn bulk_list(&self) -> Vec<(i64, i64)> {
        self.bulks.iter().map(|b| (b.rows, b.cols)).collect()
    }
}

/// One bulk size: rows scale the derived throughput, columns are
/// workload metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bulk {
    pub rows: i64,
    pub cols: i64,
}

impl Bulk {
    pub fn new(rows: i64, cols: i64) -> Self {
        Self { rows, cols }
    }
}

impl std::fmt::Display for Bulk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

/// Parse a bulk size from "ROWSxCOLS" (e.g. "100x10") or "ROWS".
fn parse_bulk(s: &str) -> Result<Bulk, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Bulk cannot be empty".to_string());
    }
    let (rows_str, cols_str) = match s.split_once('x') {
        Some((r, c)) => (r, c),
        None => (s, "1"),
    };
    let rows: i64 = rows_str
        .parse()
        .map_err(|_| format!("Invalid bulk rows: {}", rows_str))?;
    let cols: i64 = cols_str
        .parse()
        .map_err(|_| format!("Invalid bulk columns: {}", cols_str))?;
    if rows < 1 || cols < 1 {
        return Err(format!("Bulk dimensions must be positive: {}", s));
    }
    Ok(Bulk::new(rows, cols))
}

/// Parse a workload parameter from "KEY=VALUE".
fn parse_param(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Expected KEY=VALUE, got: {}", s)),
    }
}

/// Parse duration from string (e.g. "10s", "5m", "1h", "500ms")
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;

    let duration = match unit {
        "ms" => Duration::from_millis(num as u64),
        "s" => Duration::from_secs(num as u64),
        "m" => Duration::from_secs((num * 60.0) as u64),
        "h" => Duration::from_secs((num * 3600.0) as u64),
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Ok(duration)
}
