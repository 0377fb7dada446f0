//! Dispatches exercises to the [`ExerciseRunner`].
//!
//! At concurrency 1 exercises run strictly in order and the corpus aggregate
//! is logged after each one. Above that, a fixed pool of workers pulls names
//! from a bounded work queue and sends outcomes back on a results channel:
//!
//! ```text
//!   producer ──► work queue (cap N) ──► worker 1..N ──► results ──► RunReport
//! ```
//!
//! Every exercise owns a disjoint directory, so workers share nothing but the
//! queue, the results channel, the progress counters and the
//! [`CancellationSignal`]. Once the signal is set no new exercise starts,
//! busy workers stop at their next attempt boundary, and the report comes
//! back with `interrupted` set.

pub mod progress;

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::results::OutcomeRecord;
use crate::runner::{CancellationSignal, ExerciseOutcome, ExerciseRunner};
use crate::stats;

pub use progress::{ProgressCounters, ProgressMonitor, ProgressSnapshot};

/// Default interval between progress log lines in pooled mode.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(30);

/// Everything a scheduler run produced.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Outcomes in completion order.
    pub outcomes: Vec<ExerciseOutcome>,
    /// The run was stopped by operator interruption.
    pub interrupted: bool,
}

impl RunReport {
    pub fn push(&mut self, outcome: ExerciseOutcome) {
        if outcome.is_interrupted() {
            self.interrupted = true;
        }
        self.outcomes.push(outcome);
    }

    /// Records produced or found during the run.
    pub fn records(&self) -> impl Iterator<Item = &OutcomeRecord> {
        self.outcomes.iter().filter_map(ExerciseOutcome::record)
    }

    /// Exercises evaluated during this run.
    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, ExerciseOutcome::Completed(_)))
    }

    /// Exercises evaluated during this run whose last attempt passed.
    pub fn passed(&self) -> usize {
        self.count(|o| matches!(o, ExerciseOutcome::Completed(r) if r.passed()))
    }

    pub fn already_done(&self) -> usize {
        self.count(|o| matches!(o, ExerciseOutcome::AlreadyDone(_)))
    }

    pub fn dry_runs(&self) -> usize {
        self.count(|o| matches!(o, ExerciseOutcome::DryRun { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ExerciseOutcome::Skipped { .. }))
    }

    fn count(&self, pred: impl Fn(&ExerciseOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }
}

/// Runs a list of exercises from one corpus directory.
pub struct Scheduler {
    runner: Arc<ExerciseRunner>,
    corpus_dir: PathBuf,
    concurrency: usize,
    cancel: CancellationSignal,
    progress_interval: Duration,
}

impl Scheduler {
    pub fn new(
        runner: Arc<ExerciseRunner>,
        corpus_dir: impl Into<PathBuf>,
        concurrency: usize,
        cancel: CancellationSignal,
    ) -> Self {
        Self {
            runner,
            corpus_dir: corpus_dir.into(),
            concurrency: concurrency.max(1),
            cancel,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Sets how often the pool logs progress.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn corpus_dir(&self) -> &Path {
        &self.corpus_dir
    }

    /// Evaluates `names` and blocks until every dispatched exercise is done.
    pub async fn run(&self, names: Vec<String>) -> RunReport {
        info!(
            exercises = names.len(),
            concurrency = self.concurrency,
            corpus = %self.corpus_dir.display(),
            "Starting benchmark run"
        );

        let mut report = if self.concurrency == 1 {
            self.run_sequential(names).await
        } else {
            self.run_pool(names).await
        };
        if self.cancel.is_cancelled() {
            report.interrupted = true;
        }

        info!(
            completed = report.completed(),
            passed = report.passed(),
            already_done = report.already_done(),
            skipped = report.skipped(),
            interrupted = report.interrupted,
            "Benchmark run finished"
        );
        report
    }

    async fn run_sequential(&self, names: Vec<String>) -> RunReport {
        let mut report = RunReport::default();

        for name in names {
            if self.cancel.is_cancelled() {
                break;
            }
            let outcome = self.runner.run(&self.corpus_dir.join(&name), &self.cancel).await;
            let stop = outcome.is_interrupted();
            report.push(outcome);
            if stop {
                warn!(exercise = %name, "Run interrupted");
                break;
            }

            match stats::summarize(&self.corpus_dir) {
                Ok(stats) => info!("Running totals\n{}", stats),
                Err(e) => warn!(error = %e, "Could not summarize corpus"),
            }
        }
        report
    }

    async fn run_pool(&self, names: Vec<String>) -> RunReport {
        let total = names.len();
        let workers = self.concurrency.min(total).max(1);
        let (work_tx, work_rx) = mpsc::channel::<String>(workers);
        let work_rx = Arc::new(Mutex::new(work_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<ExerciseOutcome>(workers);

        let counters = ProgressCounters::new();
        let monitor = ProgressMonitor::start(counters.clone(), total, self.progress_interval);

        let producer_cancel = self.cancel.clone();
        let producer = tokio::spawn(async move {
            for name in names {
                if producer_cancel.is_cancelled() || work_tx.send(name).await.is_err() {
                    break;
                }
            }
        });

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            let runner = self.runner.clone();
            let cancel = self.cancel.clone();
            let corpus_dir = self.corpus_dir.clone();
            let counters = counters.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    let next = work_rx.lock().await.recv().await;
                    let Some(name) = next else { break };
                    if cancel.is_cancelled() {
                        break;
                    }

                    counters.in_flight.fetch_add(1, Ordering::Relaxed);
                    let outcome = runner.run(&corpus_dir.join(&name), &cancel).await;
                    counters.in_flight.fetch_sub(1, Ordering::Relaxed);
                    counters.record(&outcome);

                    if result_tx.send(outcome).await.is_err() {
                        break;
                    }
                }
                debug!(worker_id, "Worker finished");
            }));
        }
        drop(result_tx);
        drop(work_rx);

        let mut report = RunReport::default();
        let gather = async {
            while let Some(outcome) = result_rx.recv().await {
                report.push(outcome);
            }
        };
        let ((), joined) = tokio::join!(gather, join_all(handles));
        for result in joined {
            if let Err(e) = result {
                error!("Worker panicked: {e}");
            }
        }
        if let Err(e) = producer.await {
            error!("Producer panicked: {e}");
        }
        monitor.stop().await;
        report
    }
}
