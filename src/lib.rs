// SPDX-License-Identifier: MIT

//! Bounded two-stage batch pipeline: calculation tasks fan out parallel
//! odd-count sub-jobs, deposit their sums into a bounded result buffer,
//! and a single writer drains the full buffer to a file exactly once per
//! batch. Cancellation aborts all three stages without stranding a
//! waiter.
//!
//! [`TaskOrchestrator`] drives the whole flow; [`WorkerPool`] supplies
//! the submission and writer tiers.

pub mod error;
pub mod pipeline;
pub mod pools;

pub use error::PipelineError;
pub use pipeline::buffer::{CapacityError, ResultBuffer};
pub use pipeline::counter::{OddCountSource, RandomOddCounter};
pub use pipeline::orchestrator::{BatchConfig, TaskOrchestrator};
pub use pipeline::state::{BatchState, Phase, PushOutcome, WaitOutcome};
pub use pipeline::task::{CalculationTask, TaskError};
pub use pipeline::writer::ResultWriter;
pub use pools::workerpool::{Job, PoolHalted, WorkerPool};
