// SPDX-License-Identifier: MIT

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, error, info};

use crate::pipeline::state::{BatchState, WaitOutcome};
use crate::pools::workerpool::Job;

/// Drains the full result buffer into the sink file.
///
/// The writer suspends until every slot is filled, drains the buffer in
/// one sweep, and writes one result per line. The file write happens
/// outside the batch lock, so depositing tasks are never stalled behind
/// the sink. Whether the write succeeds or not, the drain is marked done
/// so the orchestrator is released; a write failure is kept aside for the
/// orchestrator to surface.
///
/// The writer binds to the batch live at construction. If that batch is
/// cancelled and replaced while the writer is still around, every one of
/// its waits, drains, and marks misses the epoch and falls away.
pub struct ResultWriter {
    state: Arc<BatchState>,
    epoch: u64,
    path: PathBuf,
    sink_error: Mutex<Option<io::Error>>,
}

impl ResultWriter {
    pub fn new(state: Arc<BatchState>, path: impl Into<PathBuf>) -> Self {
        ResultWriter {
            epoch: state.epoch(),
            state,
            path: path.into(),
            sink_error: Mutex::new(None),
        }
    }

    /// Takes the sink failure out of the writer, if the write failed.
    pub fn take_sink_error(&self) -> Option<io::Error> {
        self.sink_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn write_lines(&self, values: &[u32]) -> io::Result<()> {
        let file = File::create(&self.path)?;
        let mut sink = BufWriter::new(file);
        for value in values {
            writeln!(sink, "{value}")?;
        }
        sink.flush()
    }
}

impl Job for ResultWriter {
    fn run(&self) {
        if self.state.await_full(self.epoch) == WaitOutcome::Cancelled {
            debug!("result writer released by cancellation");
            return;
        }
        let Some(values) = self.state.drain_for_write(self.epoch) else {
            debug!("result writer found the batch cancelled, nothing drained");
            return;
        };

        info!("writing {} results to {:?}", values.len(), self.path);
        if let Err(err) = self.write_lines(&values) {
            error!("failed to write results to {:?}: {err}", self.path);
            self.state.record_failure();
            *self
                .sink_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(err);
        }
        self.state.mark_drain_done(self.epoch);
    }
}
