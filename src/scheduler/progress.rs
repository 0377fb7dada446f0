//! Background progress monitor for pooled benchmark runs.
//!
//! Periodically logs how many exercises have finished and how they ended,
//! so operators can follow a long parallel run without reading every
//! per-exercise log line.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::runner::ExerciseOutcome;

/// Snapshot of the counters at a point in time.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    /// Exercises currently held by a worker.
    pub in_flight: usize,
    /// Exercises evaluated in this run whose last attempt passed.
    pub passed: usize,
    /// Exercises evaluated in this run that exhausted their attempts.
    pub failed: usize,
    /// Exercises that already had a record.
    pub already_done: usize,
    /// Exercises skipped, dry-run or interrupted.
    pub other: usize,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Exercises a worker has finished with, whatever the outcome.
    pub fn finished(&self) -> usize {
        self.passed + self.failed + self.already_done + self.other
    }
}

/// Shared atomic counters, cloned into every worker.
#[derive(Debug, Clone, Default)]
pub struct ProgressCounters {
    pub in_flight: Arc<AtomicUsize>,
    pub passed: Arc<AtomicUsize>,
    pub failed: Arc<AtomicUsize>,
    pub already_done: Arc<AtomicUsize>,
    pub other: Arc<AtomicUsize>,
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a finished exercise.
    pub fn record(&self, outcome: &ExerciseOutcome) {
        let counter = match outcome {
            ExerciseOutcome::Completed(r) if r.passed() => &self.passed,
            ExerciseOutcome::Completed(_) => &self.failed,
            ExerciseOutcome::AlreadyDone(_) => &self.already_done,
            _ => &self.other,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, start: Instant) -> ProgressSnapshot {
        ProgressSnapshot {
            in_flight: self.in_flight.load(Ordering::Relaxed),
            passed: self.passed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            already_done: self.already_done.load(Ordering::Relaxed),
            other: self.other.load(Ordering::Relaxed),
            elapsed: start.elapsed(),
        }
    }
}

/// A background task that logs the counters every `interval`.
///
/// Call [`ProgressMonitor::stop`] to end it; dropping also stops it at the
/// next tick.
pub struct ProgressMonitor {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressMonitor {
    /// Starts logging progress towards `total` exercises.
    pub fn start(counters: ProgressCounters, total: usize, interval: Duration) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = stop_flag.clone();
        let start = Instant::now();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // skip the immediate first tick

            loop {
                tick.tick().await;
                if flag.load(Ordering::Relaxed) {
                    break;
                }

                let snap = counters.snapshot(start);
                let pct = if total > 0 {
                    (snap.finished() as f64 / total as f64 * 100.0).min(100.0)
                } else {
                    0.0
                };

                tracing::info!(
                    finished = snap.finished(),
                    total,
                    in_flight = snap.in_flight,
                    passed = snap.passed,
                    failed = snap.failed,
                    already_done = snap.already_done,
                    other = snap.other,
                    progress_pct = format!("{:.1}%", pct),
                    elapsed_secs = snap.elapsed.as_secs(),
                    "Benchmark progress"
                );
            }
        });

        Self {
            stop_flag,
            handle: Some(handle),
        }
    }

    /// Signals the monitor to stop and waits for it.
    pub async fn stop(mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::tests::sample_record;

    #[test]
    fn test_record_classifies_outcomes() {
        let counters = ProgressCounters::new();
        counters.record(&ExerciseOutcome::Completed(sample_record("a", vec![false, true])));
        counters.record(&ExerciseOutcome::Completed(sample_record("b", vec![false, false])));
        counters.record(&ExerciseOutcome::AlreadyDone(sample_record("c", vec![true])));
        counters.record(&ExerciseOutcome::Skipped {
            exercise: "d".to_string(),
            reason: "no tests".to_string(),
        });

        let snap = counters.snapshot(Instant::now());
        assert_eq!(snap.passed, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.already_done, 1);
        assert_eq!(snap.other, 1);
        assert_eq!(snap.finished(), 4);
    }

    #[test]
    fn test_clone_shares_state() {
        let counters = ProgressCounters::new();
        let clone = counters.clone();
        counters.in_flight.fetch_add(2, Ordering::Relaxed);
        assert_eq!(clone.snapshot(Instant::now()).in_flight, 2);
    }

    #[tokio::test]
    async fn test_monitor_start_stop() {
        let counters = ProgressCounters::new();
        let monitor = ProgressMonitor::start(counters, 4, Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(50)).await;
        monitor.stop().await;
    }
}
