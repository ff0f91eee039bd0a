//! # Start Barrier Module
//!
//! Synchronizes the start of the measured phase across worker processes
//! and threads. The orchestrator computes one wall-clock deadline before
//! spawning anything; every worker blocks on it so measurements begin
//! together instead of staggered by spawn latency.
//!
//! The deadline is wall-clock (`SystemTime`) rather than monotonic because
//! it must be meaningful across process boundaries.

use anyhow::{Context, Result};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Workers may start this much before the shared deadline; sub-100ms skew
/// is below the noise floor of the measurements themselves.
pub const START_TOLERANCE: Duration = Duration::from_millis(100);

/// A shared wall-clock start deadline.
#[derive(Debug, Clone, Copy)]
pub struct StartBarrier {
    deadline_ns: u64,
}

impl StartBarrier {
    /// Compute a deadline `start_delay` from now, as nanoseconds since the
    /// Unix epoch. Called exactly once per run, before any spawn.
    pub fn compute_deadline(start_delay: Duration) -> Result<u64> {
        let deadline = SystemTime::now() + start_delay;
        let since_epoch = deadline
            .duration_since(UNIX_EPOCH)
            .context("system clock is set before the Unix epoch")?;
        Ok(since_epoch.as_nanos() as u64)
    }

    /// Rebuild a barrier from a deadline carried in a worker plan.
    pub fn from_deadline(deadline_ns: u64) -> Self {
        Self { deadline_ns }
    }

    /// Block until the shared deadline, within [`START_TOLERANCE`].
    /// A deadline already in the past returns immediately.
    pub fn wait(&self) -> Result<()> {
        loop {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .context("system clock is set before the Unix epoch")?;
            let now_ns = now.as_nanos() as u64;
            if now_ns + START_TOLERANCE.as_nanos() as u64 >= self.deadline_ns {
                return Ok(());
            }
            let remaining = Duration::from_nanos(self.deadline_ns - now_ns);
            // Sleep most of the gap, then re-check against the clock; a
            // single long sleep would compound scheduler overshoot.
            std::thread::sleep(remaining.min(Duration::from_millis(50)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn past_deadline_returns_immediately() {
        let barrier = StartBarrier::from_deadline(0);
        let started = Instant::now();
        barrier.wait().unwrap();
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn wait_releases_within_tolerance_of_deadline() {
        let delay = Duration::from_millis(300);
        let deadline = StartBarrier::compute_deadline(delay).unwrap();
        let barrier = StartBarrier::from_deadline(deadline);

        let started = Instant::now();
        barrier.wait().unwrap();
        let waited = started.elapsed();

        // Released no earlier than tolerance allows and not grossly late.
        assert!(waited + START_TOLERANCE + Duration::from_millis(20) >= delay);
        assert!(waited < delay + Duration::from_millis(500));
    }

    #[test]
    fn deadlines_are_shared_across_barrier_instances() {
        let deadline = StartBarrier::compute_deadline(Duration::from_millis(100)).unwrap();
        let a = StartBarrier::from_deadline(deadline);
        let b = StartBarrier::from_deadline(deadline);

        let handle = std::thread::spawn(move || {
            a.wait().unwrap();
            SystemTime::now()
        });
        b.wait().unwrap();
        let released_b = SystemTime::now();
        let released_a = handle.join().unwrap();

        let skew = released_a
            .duration_since(released_b)
            .unwrap_or_else(|e| e.duration());
        assert!(skew < 2 * START_TOLERANCE, "start skew {:?}", skew);
    }
}
