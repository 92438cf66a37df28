// SPDX-License-Identifier: MIT

use std::sync::Arc;
use std::thread;

use log::{debug, error};
use thiserror::Error;

use crate::pipeline::counter::OddCountSource;
use crate::pipeline::state::{BatchState, PushOutcome};
use crate::pools::workerpool::Job;

/// Why a task produced no result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The batch was cancelled before the task got to deposit.
    #[error("task aborted by cancellation")]
    Aborted,

    /// One or more sub-jobs panicked, so the partial sums are unusable.
    #[error("{failed} sub-job(s) panicked")]
    SubJobPanicked { failed: usize },
}

/// One unit of batch work: fans out a fixed number of counting sub-jobs,
/// sums their partial counts, and deposits the sum into the shared buffer.
///
/// Sub-jobs run on scoped threads, so the fan-out borrows the task instead
/// of cloning it and every sub-job is joined before the task reports back.
pub struct CalculationTask {
    id: usize,
    sub_jobs: u32,
    draws: u32,
    source: Arc<dyn OddCountSource>,
    state: Arc<BatchState>,
    /// Epoch of the batch this task belongs to, captured at construction.
    epoch: u64,
}

impl CalculationTask {
    pub fn new(
        id: usize,
        sub_jobs: u32,
        draws: u32,
        source: Arc<dyn OddCountSource>,
        state: Arc<BatchState>,
    ) -> Self {
        let epoch = state.epoch();
        CalculationTask {
            id,
            sub_jobs,
            draws,
            source,
            state,
            epoch,
        }
    }

    /// Runs the fan-out and returns the summed odd count.
    ///
    /// Cancellation is checked before the fan-out starts and again after
    /// the sub-jobs are joined; a cancelled task never deposits. A zero
    /// fan-out width sums to zero.
    pub fn compute(&self) -> Result<u32, TaskError> {
        if self.state.is_cancelled() {
            return Err(TaskError::Aborted);
        }

        let mut total = 0u32;
        let mut panicked = 0usize;
        thread::scope(|scope| {
            let handles: Vec<_> = (0..self.sub_jobs)
                .map(|_| scope.spawn(|| self.source.count_odds(self.draws)))
                .collect();
            for handle in handles {
                match handle.join() {
                    Ok(count) => total += count,
                    Err(_) => panicked += 1,
                }
            }
        });

        if self.state.is_cancelled() {
            return Err(TaskError::Aborted);
        }
        if panicked > 0 {
            return Err(TaskError::SubJobPanicked { failed: panicked });
        }
        Ok(total)
    }
}

impl Job for CalculationTask {
    fn run(&self) {
        match self.compute() {
            Ok(sum) => match self.state.push_result(self.epoch, sum) {
                PushOutcome::Stored { now_full } => {
                    if now_full {
                        debug!("task {} filled the final result slot", self.id);
                    }
                }
                PushOutcome::Discarded => {
                    debug!("task {} outlived its batch, result dropped", self.id);
                }
            },
            Err(TaskError::Aborted) => {
                debug!("task {} aborted", self.id);
            }
            Err(err) => {
                self.state.record_failure();
                error!("task {} failed: {err}", self.id);
            }
        }
    }
}
