// SPDX-License-Identifier: MIT

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::PipelineError;
use crate::pipeline::counter::{OddCountSource, RandomOddCounter};
use crate::pipeline::state::{BatchState, Phase, WaitOutcome};
use crate::pipeline::task::CalculationTask;
use crate::pipeline::writer::ResultWriter;
use crate::pools::workerpool::WorkerPool;

/// Construction-time constants for one orchestrator.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Top-level tasks per batch; also the result buffer capacity.
    pub total_tasks: usize,
    /// Parallel counting sub-jobs inside each task.
    pub sub_jobs_per_task: u32,
    /// Random draws per sub-job.
    pub draws_per_sub_job: u32,
    /// File receiving one result per line, truncated on each batch.
    pub sink_path: PathBuf,
    /// Bound on how long a cancel waits for workers to stop.
    pub writer_stop_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            total_tasks: 2000,
            sub_jobs_per_task: 10,
            draws_per_sub_job: 1000,
            sink_path: PathBuf::from("result.txt"),
            writer_stop_timeout: Duration::from_secs(10),
        }
    }
}

/// Pools belonging to the batch currently in flight. Held behind the
/// orchestrator's `active` mutex so a concurrent cancel can take them.
struct ActivePools {
    submission: Arc<WorkerPool>,
    writer: Arc<WorkerPool>,
}

/// Runs batches of calculation tasks against a shared result buffer and
/// hands the full buffer to a writer exactly once per batch.
///
/// [`submit_tasks`](TaskOrchestrator::submit_tasks) is synchronous: it
/// returns once the batch results are on disk (or the batch was
/// cancelled). [`cancel_tasks`](TaskOrchestrator::cancel_tasks) may be
/// called from any thread at any time.
pub struct TaskOrchestrator {
    config: BatchConfig,
    source: Arc<dyn OddCountSource>,
    state: Arc<BatchState>,
    active: Mutex<Option<ActivePools>>,
}

impl TaskOrchestrator {
    /// Orchestrator drawing from the thread-local random generator.
    pub fn new(config: BatchConfig) -> Self {
        Self::with_source(config, Arc::new(RandomOddCounter))
    }

    /// Orchestrator with a caller-provided count source.
    pub fn with_source(config: BatchConfig, source: Arc<dyn OddCountSource>) -> Self {
        let state = Arc::new(BatchState::new(config.total_tasks));
        TaskOrchestrator {
            config,
            source,
            state,
            active: Mutex::new(None),
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActivePools>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs one full batch: enqueues every calculation task on the
    /// submission pool, waits for the buffer to fill, hands the drain job
    /// to the writer pool, and waits for the drained results to reach the
    /// sink.
    ///
    /// Blocks the caller for the whole batch. Returns `BatchInProgress`
    /// if a batch is already running, `Cancelled` if
    /// [`cancel_tasks`](TaskOrchestrator::cancel_tasks) interrupted this
    /// one, and `Sink` if the results could not be written. A batch whose
    /// tasks fail (without being cancelled) never fills the buffer and
    /// keeps this call suspended until a cancel releases it.
    pub fn submit_tasks(&self) -> Result<(), PipelineError> {
        let started = Instant::now();

        // Batch start and pool registration are atomic with respect to
        // cancel: once `begin_batch` succeeds, the pools are reachable
        // for teardown before any job is enqueued.
        let submission;
        let writer_pool;
        let epoch;
        {
            let mut active = self.lock_active();
            self.state.begin_batch()?;
            epoch = self.state.epoch();
            submission = Arc::new(WorkerPool::new("submission", 1));
            writer_pool = Arc::new(WorkerPool::new("writer", 1));
            *active = Some(ActivePools {
                submission: Arc::clone(&submission),
                writer: Arc::clone(&writer_pool),
            });
        }

        info!(
            "submitting batch: {} tasks, {} sub-jobs x {} draws each",
            self.config.total_tasks, self.config.sub_jobs_per_task, self.config.draws_per_sub_job
        );

        for id in 0..self.config.total_tasks {
            let task = Arc::new(CalculationTask::new(
                id,
                self.config.sub_jobs_per_task,
                self.config.draws_per_sub_job,
                Arc::clone(&self.source),
                Arc::clone(&self.state),
            ));
            if submission.submit(task).is_err() {
                debug!("submission pool halted after {id} enqueued tasks");
                return Err(PipelineError::Cancelled);
            }
        }

        if !submission.wait_idle() || self.state.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        // Every phase write on this path is conditional on the batch
        // still being this one, uncancelled. A refused advance means a
        // cancel now owns the batch, including its teardown; backing out
        // without further writes keeps the phase the cancel left behind.
        if !self
            .state
            .advance_phase(epoch, Phase::Submitting, Phase::AwaitingCompletion)
        {
            return Err(PipelineError::Cancelled);
        }
        if self.state.await_full(epoch) == WaitOutcome::Cancelled {
            return Err(PipelineError::Cancelled);
        }

        if !self
            .state
            .advance_phase(epoch, Phase::AwaitingCompletion, Phase::Writing)
        {
            return Err(PipelineError::Cancelled);
        }
        let writer_job = Arc::new(ResultWriter::new(
            Arc::clone(&self.state),
            self.config.sink_path.clone(),
        ));
        if writer_pool.submit(writer_job.clone()).is_err() {
            return Err(PipelineError::Cancelled);
        }

        if !self
            .state
            .advance_phase(epoch, Phase::Writing, Phase::AwaitingDrain)
        {
            return Err(PipelineError::Cancelled);
        }
        if self.state.await_drained(epoch) == WaitOutcome::Cancelled {
            return Err(PipelineError::Cancelled);
        }

        // Normal completion. A cancel that takes the pools first owns the
        // rest of the teardown; otherwise no cancel can touch this batch
        // any more and the final transition is uncontested.
        if self.lock_active().take().is_none() {
            return Err(PipelineError::Cancelled);
        }
        submission.halt();
        writer_pool.halt();
        submission.join_all();
        writer_pool.join_all();
        self.state.advance_phase(epoch, Phase::AwaitingDrain, Phase::Idle);

        if let Some(source) = writer_job.take_sink_error() {
            return Err(PipelineError::Sink {
                path: self.config.sink_path.clone(),
                source,
            });
        }

        info!(
            "batch of {} tasks completed in {} ms ({} failed work units)",
            self.config.total_tasks,
            started.elapsed().as_millis(),
            self.state.failures()
        );
        Ok(())
    }

    /// Aborts the in-flight batch, if any.
    ///
    /// Wakes every thread suspended on a completion condition, halts both
    /// pools discarding queued jobs, waits up to the configured timeout
    /// for the workers to stop (detaching any that do not), clears the
    /// buffer, and returns the orchestrator to idle. Safe to call
    /// concurrently with [`submit_tasks`](TaskOrchestrator::submit_tasks)
    /// and idempotent: with no batch in flight it only clears the
    /// (already empty) buffer.
    pub fn cancel_tasks(&self) {
        let taken = self.lock_active().take();
        let Some(pools) = taken else {
            debug!("cancel requested with no batch in flight");
            self.state.clear_buffer();
            return;
        };

        info!("cancelling in-flight batch");
        // Waiters wake and observe the flag before any pool comes down.
        self.state.cancel();

        let discarded = pools.submission.halt() + pools.writer.halt();
        if discarded > 0 {
            debug!("cancel discarded {discarded} queued job(s)");
        }

        let deadline = Instant::now() + self.config.writer_stop_timeout;
        for pool in [&pools.submission, &pools.writer] {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if pool.await_termination(remaining) {
                pool.join_all();
            } else {
                warn!(
                    "a worker ignored the stop signal for {:?}, detaching it",
                    self.config.writer_stop_timeout
                );
                pool.detach();
            }
        }

        self.state.clear_buffer();
        self.state.set_phase(Phase::Idle);
        info!("batch cancelled, buffer cleared");
    }

    /// Current batch phase.
    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// True while a batch is in flight.
    pub fn has_active_batch(&self) -> bool {
        self.lock_active().is_some()
    }

    /// Results currently waiting in the buffer.
    pub fn buffered_results(&self) -> usize {
        self.state.result_count()
    }

    /// True when the result buffer holds nothing.
    pub fn buffer_is_empty(&self) -> bool {
        self.state.is_buffer_empty()
    }

    /// Failed work units recorded for the current batch.
    pub fn failures(&self) -> u32 {
        self.state.failures()
    }

    /// The configuration this orchestrator was built with.
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }
}
