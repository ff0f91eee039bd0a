use std::process::Command;

const BIN: &str = env!("CARGO_BIN_EXE_parallel-bench");

#[test]
fn binary_runs_a_small_matrix_end_to_end() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let results_path = dir.path().join("results.json");

    // Zero duration runs each worker exactly once, keeping the test fast.
    let output = Command::new(BIN)
        .args([
            "-w",
            "sleep",
            "-d",
            "0s",
            "-p",
            "2",
            "-t",
            "2",
            "--percentile",
            "0.9",
            "--param",
            "sleep_ms=1",
            "-o",
        ])
        .arg(&results_path)
        .env("PARALLEL_BENCH_EXE", BIN)
        .output()
        .expect("run benchmark binary");

    assert!(
        output.status.success(),
        "binary failed\nstderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let raw = std::fs::read_to_string(&results_path).expect("read results file");
    let json: serde_json::Value = serde_json::from_str(&raw).expect("parse results JSON");

    let results = json["collection"]["results"]
        .as_array()
        .expect("results array");
    assert_eq!(results.len(), 1);

    let run = &results[0];
    assert_eq!(run["succeeded"], true);
    assert_eq!(run["planned_workers"], 4);
    assert_eq!(run["real_executors"], 4);

    let summaries = run["summaries"].as_array().expect("summaries array");
    let percentiles: Vec<f64> = summaries
        .iter()
        .map(|s| s["percentile"].as_f64().unwrap())
        .collect();
    assert!(percentiles.contains(&0.9));
    assert!(percentiles.contains(&1.0));

    // Every worker ran exactly once, so the full boundary holds one
    // sample per worker and the average respects the sleep floor.
    let full = summaries
        .iter()
        .find(|s| s["percentile"] == 1.0)
        .expect("full summary");
    assert_eq!(full["count"], 4);
    assert_eq!(full["executors"], 4);
    assert!(full["avg"].as_f64().unwrap() >= 0.001);
    assert!(full["calls_per_sec"].as_f64().unwrap() > 0.0);
}

#[test]
fn failing_workload_fails_the_run_but_still_writes_results() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let results_path = dir.path().join("results.json");

    let output = Command::new(BIN)
        .args(["-w", "fail", "-d", "0s", "-p", "2", "-t", "1", "-o"])
        .arg(&results_path)
        .env("PARALLEL_BENCH_EXE", BIN)
        .output()
        .expect("run benchmark binary");

    assert!(
        !output.status.success(),
        "a failing workload must fail the process"
    );

    let raw = std::fs::read_to_string(&results_path).expect("read results file");
    let json: serde_json::Value = serde_json::from_str(&raw).expect("parse results JSON");
    let run = &json["collection"]["results"][0];
    assert_eq!(run["succeeded"], false);
    assert_eq!(run["real_executors"], 0);
}

#[test]
fn invalid_percentile_fails_fast() {
    let output = Command::new(BIN)
        .args(["-w", "sleep", "-d", "0s", "--percentile", "1.5"])
        .env("PARALLEL_BENCH_EXE", BIN)
        .output()
        .expect("run benchmark binary");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("percentile"),
        "expected a percentile validation error, got: {}",
        stderr
    );
}
