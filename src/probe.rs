//! # Measurement Probe Module
//!
//! The per-worker latency probe. A work function drives the probe through
//! repeated `start()`/`stop()` pairs (or the partial protocol when setup
//! work must be excluded from a sample), and the probe decides when the
//! measured phase is over.
//!
//! ## Lifecycle
//!
//! Construction waits on the shared [`StartBarrier`] (Synchronizing), then
//! enters Measuring. `stop()`/`partial_end()` return `true` once the
//! configured work duration has elapsed, at which point the probe has
//! already closed itself and snapshotted its [`PercentileItem`]s. Worker
//! failures are reported as a failure-tagged [`ProbeReport`] with no
//! partial statistics.
//!
//! ## Sample routing
//!
//! The sink strategy is fixed at construction: without a requested
//! percentile every sample feeds the accumulator directly; with one, the
//! samples stream through a [`PercentileHeap`] and the accumulator sees
//! them in two waves (below-boundary during the run, tail at close), which
//! yields one snapshot at the requested boundary and one over the full
//! stream.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::barrier::StartBarrier;
use crate::config::RunConfiguration;
use crate::stats::{OnlineVariance, PercentileHeap};

/// Minimum placeholder used where no sample exists; larger than any real
/// duration so cross-worker `min` folding ignores empty workers.
pub const NO_DATA_MIN: f64 = f64::MAX;

/// Probe lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    /// Waiting on the shared start barrier.
    Synchronizing,
    /// Accepting `start()`/`stop()` and partial-protocol calls.
    Measuring,
    /// Work duration elapsed; statistics are final.
    Closed,
}

/// Running aggregate over the samples routed to it.
#[derive(Debug, Clone)]
struct StatAccumulator {
    count: u64,
    total: f64,
    min: f64,
    max: f64,
    variance: OnlineVariance,
}

impl StatAccumulator {
    fn new() -> Self {
        Self {
            count: 0,
            total: 0.0,
            min: NO_DATA_MIN,
            max: 0.0,
            variance: OnlineVariance::population(),
        }
    }

    fn include(&mut self, duration: f64) {
        self.count += 1;
        self.total += duration;
        self.min = self.min.min(duration);
        self.max = self.max.max(duration);
        self.variance.include(duration);
    }

    fn snapshot(&self, percentile: f64) -> PercentileItem {
        PercentileItem {
            percentile,
            count: self.count,
            total_duration: self.total,
            min: self.min,
            max: self.max,
            std: self.variance.std(),
        }
    }
}

/// Where samples go: straight to the accumulator, or through the
/// streaming percentile heap first. Chosen once at construction.
#[derive(Debug)]
enum SampleSink {
    Direct,
    Percentile(PercentileHeap),
}

/// Aggregate snapshot at one percentile boundary. `percentile == 1.0`
/// covers the full sample stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentileItem {
    pub percentile: f64,
    pub count: u64,
    pub total_duration: f64,
    pub min: f64,
    pub max: f64,
    pub std: f64,
}

/// Serializable terminal output of one worker; the only thing that
/// crosses the worker/orchestrator boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    pub pid: u32,
    /// Completed measured calls (each bulk counts once).
    pub counter: u64,
    pub items: Vec<PercentileItem>,
    pub error: Option<String>,
    pub track_init: DateTime<Utc>,
    pub track_start: DateTime<Utc>,
    pub track_end: DateTime<Utc>,
}

impl ProbeReport {
    /// Build a failure report carrying no partial statistics.
    pub fn failed(pid: u32, error: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            pid,
            counter: 0,
            items: Vec::new(),
            error: Some(error.into()),
            track_init: now,
            track_start: now,
            track_end: now,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Open partial-measurement window: accumulated seconds plus the start
/// of the currently open segment, if any.
#[derive(Debug)]
struct PartialWindow {
    accumulated: f64,
    segment_start: Option<Instant>,
}

/// Per-worker latency probe. See the module docs for the lifecycle.
#[derive(Debug)]
pub struct MeasurementProbe {
    state: ProbeState,
    pid: u32,
    counter: u64,
    stats: StatAccumulator,
    sink: SampleSink,
    work_duration: Duration,
    init_time: Instant,
    call_start: Option<Instant>,
    partial: Option<PartialWindow>,
    items: Vec<PercentileItem>,
    track_init: DateTime<Utc>,
    track_start: DateTime<Utc>,
    track_end: DateTime<Utc>,
}

impl MeasurementProbe {
    /// Construct a probe for one worker: wait on the start barrier (if the
    /// configuration carries a deadline), then enter the measuring state.
    ///
    /// `init_time` is captured after the barrier releases, so the work
    /// duration excludes synchronization time.
    pub fn new(config: &RunConfiguration) -> Result<Self> {
        let track_init = Utc::now();

        let sink = match config.percentile {
            Some(p) => SampleSink::Percentile(PercentileHeap::new(p, config.heap_init_size)?),
            None => SampleSink::Direct,
        };

        // Synchronizing phase: hold at the shared deadline if one is set.
        if let Some(deadline_ns) = config.start_deadline_ns {
            StartBarrier::from_deadline(deadline_ns).wait()?;
        }

        let track_start = Utc::now();
        Ok(Self {
            state: ProbeState::Measuring,
            pid: std::process::id(),
            counter: 0,
            stats: StatAccumulator::new(),
            sink,
            work_duration: config.work_duration,
            init_time: Instant::now(),
            call_start: None,
            partial: None,
            items: Vec::new(),
            track_init,
            track_start,
            track_end: track_start,
        })
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }

    /// Completed measured calls so far.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Mark the start of one measured call.
    pub fn start(&mut self) -> Result<()> {
        self.ensure_measuring("start")?;
        if self.call_start.is_some() {
            bail!("start() called twice without an intervening stop()");
        }
        if self.partial.is_some() {
            bail!("start() called inside an open partial window");
        }
        self.call_start = Some(Instant::now());
        Ok(())
    }

    /// Mark the end of one measured call. Returns `true` once the work
    /// duration has elapsed; the probe is then closed and the work
    /// function must return.
    pub fn stop(&mut self) -> Result<bool> {
        self.ensure_measuring("stop")?;
        let started = match self.call_start.take() {
            Some(t) => t,
            None => bail!("stop() called without a matching start()"),
        };
        let duration = started.elapsed().as_secs_f64();
        self.record(duration);
        Ok(self.check_termination())
    }

    /// Open a partial window: one logical call measured as the sum of
    /// explicit segments, so setup work between segments is excluded.
    pub fn partial_begin(&mut self) -> Result<()> {
        self.ensure_measuring("partial_begin")?;
        if self.call_start.is_some() {
            bail!("partial_begin() called inside an open start()/stop() pair");
        }
        if self.partial.is_some() {
            bail!("partial_begin() called twice without partial_end()");
        }
        self.partial = Some(PartialWindow {
            accumulated: 0.0,
            segment_start: None,
        });
        Ok(())
    }

    /// Start one measured segment of the open partial window.
    pub fn segment_start(&mut self) -> Result<()> {
        self.ensure_measuring("segment_start")?;
        let window = match self.partial.as_mut() {
            Some(w) => w,
            None => bail!("segment_start() called outside a partial window"),
        };
        if window.segment_start.is_some() {
            bail!("segment_start() called twice without segment_stop()");
        }
        window.segment_start = Some(Instant::now());
        Ok(())
    }

    /// Stop the open segment and fold its elapsed time into the window.
    pub fn segment_stop(&mut self) -> Result<()> {
        self.ensure_measuring("segment_stop")?;
        let window = match self.partial.as_mut() {
            Some(w) => w,
            None => bail!("segment_stop() called outside a partial window"),
        };
        let started = match window.segment_start.take() {
            Some(t) => t,
            None => bail!("segment_stop() called without a matching segment_start()"),
        };
        window.accumulated += started.elapsed().as_secs_f64();
        Ok(())
    }

    /// Close the partial window, recording the summed segments as one
    /// sample. Termination semantics match [`stop`](Self::stop).
    pub fn partial_end(&mut self) -> Result<bool> {
        self.ensure_measuring("partial_end")?;
        let window = match self.partial.take() {
            Some(w) => w,
            None => bail!("partial_end() called without partial_begin()"),
        };
        if window.segment_start.is_some() {
            bail!("partial_end() called with an open segment");
        }
        self.record(window.accumulated);
        Ok(self.check_termination())
    }

    /// Final statistics; empty until the probe has closed.
    pub fn items(&self) -> &[PercentileItem] {
        &self.items
    }

    /// Snapshot the probe into its serializable terminal report.
    pub fn report(&self) -> ProbeReport {
        ProbeReport {
            pid: self.pid,
            counter: self.counter,
            items: self.items.clone(),
            error: None,
            track_init: self.track_init,
            track_start: self.track_start,
            track_end: self.track_end,
        }
    }

    /// Force-close an idle probe (work function returned early). No-op if
    /// already closed.
    pub fn close(&mut self) {
        if self.state != ProbeState::Closed {
            self.seal();
        }
    }

    fn ensure_measuring(&self, operation: &str) -> Result<()> {
        match self.state {
            ProbeState::Measuring => Ok(()),
            ProbeState::Closed => bail!("{}() called on a closed probe", operation),
            ProbeState::Synchronizing => bail!("{}() called before synchronization", operation),
        }
    }

    fn record(&mut self, duration: f64) {
        self.counter += 1;
        match &mut self.sink {
            SampleSink::Direct => self.stats.include(duration),
            SampleSink::Percentile(heap) => {
                if let Some(released) = heap.offer(duration) {
                    self.stats.include(released);
                }
            }
        }
    }

    /// Zero work duration means "run exactly once", so elapsed >= 0
    /// terminates on the first completed call.
    fn check_termination(&mut self) -> bool {
        if self.init_time.elapsed() >= self.work_duration {
            self.seal();
            true
        } else {
            false
        }
    }

    fn seal(&mut self) {
        match &mut self.sink {
            SampleSink::Direct => {
                self.items.push(self.stats.snapshot(1.0));
            }
            SampleSink::Percentile(heap) => {
                let boundary = heap.percentile();
                let (below, tail) = heap.drain();
                for v in below {
                    self.stats.include(v);
                }
                self.items.push(self.stats.snapshot(boundary));
                for v in tail {
                    self.stats.include(v);
                }
                self.items.push(self.stats.snapshot(1.0));
            }
        }
        self.track_end = Utc::now();
        self.state = ProbeState::Closed;
    }
}
