// SPDX-License-Identifier: MIT

//! Errors surfaced by the batch pipeline.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure of a whole batch run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A batch is already in flight on this orchestrator.
    #[error("a batch is already in flight")]
    BatchInProgress,

    /// The batch was cancelled before the results reached the sink.
    #[error("batch cancelled before completion")]
    Cancelled,

    /// The drained results could not be written to the sink file.
    #[error("failed to write results to {path:?}")]
    Sink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
