//! # Results Module
//!
//! Run-level result types and the JSON results writer. One [`RunResult`]
//! captures a single bulk x shape execution; a [`ResultCollection`]
//! accumulates them across a whole matrix and tracks the overall verdict.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

use crate::aggregate::{self, PercentileSummary};
use crate::config::{ExecutorShape, RunConfiguration};
use crate::orchestrator::ReportMap;

/// Outcome of one measured run (one bulk at one executor shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub succeeded: bool,
    pub label: String,
    pub bulk_rows: u64,
    pub bulk_cols: u64,
    pub processes: u32,
    pub threads: u32,
    /// Workers the shape planned for.
    pub planned_workers: u32,
    /// Workers that actually contributed samples.
    pub real_executors: u32,
    pub summaries: Vec<PercentileSummary>,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    /// Aggregate one run's worker reports into its result.
    pub fn from_reports(
        config: &RunConfiguration,
        shape: &ExecutorShape,
        reports: &ReportMap,
    ) -> Self {
        let summaries = aggregate::summarize(config, reports);
        let real_executors = summaries
            .iter()
            .find(|s| s.percentile == 1.0)
            .map(|s| s.executors)
            .unwrap_or(0);
        Self {
            succeeded: aggregate::run_succeeded(reports),
            label: shape.label.clone(),
            bulk_rows: config.bulk_rows,
            bulk_cols: config.bulk_cols,
            processes: shape.processes,
            threads: shape.threads,
            planned_workers: shape.planned_workers(),
            real_executors,
            summaries,
            error: None,
            finished_at: Utc::now(),
        }
    }

    /// Record a run that never produced reports (orchestration failure).
    pub fn failed(config: &RunConfiguration, shape: &ExecutorShape, error: String) -> Self {
        Self {
            succeeded: false,
            label: shape.label.clone(),
            bulk_rows: config.bulk_rows,
            bulk_cols: config.bulk_cols,
            processes: shape.processes,
            threads: shape.threads,
            planned_workers: shape.planned_workers(),
            real_executors: 0,
            summaries: Vec::new(),
            error: Some(error),
            finished_at: Utc::now(),
        }
    }

    /// Derived throughput over the full sample stream, scaled by bulk rows.
    pub fn calls_per_sec(&self) -> f64 {
        self.summaries
            .iter()
            .find(|s| s.percentile == 1.0)
            .map(|s| s.calls_per_sec)
            .unwrap_or(0.0)
    }
}

/// All results of one runner invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultCollection {
    pub run_id: Uuid,
    pub label: String,
    pub started_at: DateTime<Utc>,
    pub results: Vec<RunResult>,
    overall_succeeded: bool,
}

impl ResultCollection {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            label: label.into(),
            started_at: Utc::now(),
            results: Vec::new(),
            overall_succeeded: true,
        }
    }

    /// Record one run. The overall verdict only ever degrades: once any
    /// run fails the collection stays failed.
    pub fn push(&mut self, result: RunResult) {
        if !result.succeeded {
            self.overall_succeeded = false;
        }
        self.results.push(result);
    }

    pub fn overall_succeeded(&self) -> bool {
        self.overall_succeeded
    }
}

/// Results file envelope with the metadata needed to reproduce a run.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResultsFile {
    pub version: String,
    pub host: String,
    pub cpu_count: usize,
    pub written_at: DateTime<Utc>,
    pub collection: ResultCollection,
}

/// Serialize the collection to a JSON results file, creating parent
/// directories as needed.
pub fn write_results(path: &Path, collection: &ResultCollection) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create output directory {:?}", parent))?;
        }
    }

    let envelope = ResultsFile {
        version: crate::VERSION.to_string(),
        host: hostname(),
        cpu_count: num_cpus::get(),
        written_at: Utc::now(),
        collection: collection.clone(),
    };

    let file = fs::File::create(path)
        .with_context(|| format!("failed to create results file {:?}", path))?;
    serde_json::to_writer_pretty(file, &envelope).context("failed to serialize results")?;
    info!("Results written to {:?}", path);
    Ok(())
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn shape() -> ExecutorShape {
        ExecutorShape::new(2, 2, "2x thread")
    }

    fn config() -> RunConfiguration {
        RunConfiguration::new(Duration::from_secs(1), Duration::ZERO)
    }

    #[test]
    fn overall_verdict_is_monotone() {
        let mut collection = ResultCollection::new("test");
        assert!(collection.overall_succeeded());

        let mut ok = RunResult::from_reports(&config(), &shape(), &ReportMap::new());
        ok.succeeded = true;
        collection.push(ok.clone());
        assert!(collection.overall_succeeded());

        collection.push(RunResult::failed(
            &config(),
            &shape(),
            "spawn failed".to_string(),
        ));
        assert!(!collection.overall_succeeded());

        // A later success never restores the verdict.
        collection.push(ok);
        assert!(!collection.overall_succeeded());
    }

    #[test]
    fn failed_run_carries_error_and_no_summaries() {
        let result = RunResult::failed(&config(), &shape(), "no binary".to_string());
        assert!(!result.succeeded);
        assert_eq!(result.error.as_deref(), Some("no binary"));
        assert!(result.summaries.is_empty());
        assert_eq!(result.calls_per_sec(), 0.0);
        assert_eq!(result.planned_workers, 4);
    }

    #[test]
    fn results_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("results.json");

        let mut collection = ResultCollection::new("round-trip");
        collection.push(RunResult::from_reports(
            &config(),
            &shape(),
            &ReportMap::new(),
        ));
        write_results(&path, &collection).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let back: ResultsFile = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.version, crate::VERSION);
        assert_eq!(back.collection.results.len(), 1);
        assert_eq!(back.collection.run_id, collection.run_id);
    }
}
