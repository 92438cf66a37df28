// SPDX-License-Identifier: MIT

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering::SeqCst};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use log::{debug, trace};

use crate::error::PipelineError;
use crate::pipeline::buffer::ResultBuffer;

/// Where a batch currently stands. Transitions happen under the shared
/// mutex, so a phase snapshot is always consistent with the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Submitting,
    AwaitingCompletion,
    Writing,
    AwaitingDrain,
    Cancelling,
}

/// How a blocking wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The awaited condition became true.
    Completed,
    /// The batch was cancelled while waiting.
    Cancelled,
}

/// What happened to a deposited result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The result was stored; `now_full` reports whether this deposit
    /// filled the final slot.
    Stored { now_full: bool },
    /// The result's batch was cancelled or superseded; the value was
    /// dropped.
    Discarded,
}

/// Fields guarded by the batch mutex.
struct BatchSlots {
    /// Completed task results awaiting the drain.
    buffer: ResultBuffer,
    /// Set by the writer once the drained results reached the sink.
    drain_done: bool,
    /// Current batch phase.
    phase: Phase,
    /// Bumped by every `begin_batch`. A straggler task or writer that
    /// outlives its batch carries a stale epoch and can neither deposit
    /// into a later batch nor mark it drained.
    epoch: u64,
}

/// Shared completion state for one orchestrator.
///
/// One mutex guards the result buffer, the drain flag, and the phase; two
/// condition variables signal "buffer became full" and "drain finished".
/// The cancellation flag is atomic so compute tasks can poll it without
/// the lock, but it is only ever stored while the mutex is held. A waiter
/// that checked it under the lock therefore cannot miss the transition
/// between its predicate check and its sleep.
pub struct BatchState {
    /// Cancellation flag. Stored only by [`cancel`](BatchState::cancel)
    /// and [`begin_batch`](BatchState::begin_batch), both under `slots`.
    cancelled: AtomicBool,
    /// Failed work units (task fan-outs and sink writes) this batch.
    failures: AtomicU32,
    slots: Mutex<BatchSlots>,
    /// Signaled when the final result lands in the buffer.
    results_full: Condvar,
    /// Signaled when a drain (including the sink write) completes.
    results_drained: Condvar,
}

impl BatchState {
    /// Creates state for batches of exactly `capacity` results.
    pub fn new(capacity: usize) -> Self {
        BatchState {
            cancelled: AtomicBool::new(false),
            failures: AtomicU32::new(0),
            slots: Mutex::new(BatchSlots {
                buffer: ResultBuffer::with_capacity(capacity),
                drain_done: false,
                phase: Phase::Idle,
                epoch: 0,
            }),
            results_full: Condvar::new(),
            results_drained: Condvar::new(),
        }
    }

    fn slots(&self) -> MutexGuard<'_, BatchSlots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a fresh batch: bumps the epoch, resets the cancellation
    /// flag, the drain flag, and the failure counter, and moves `Idle` to
    /// `Submitting`.
    pub fn begin_batch(&self) -> Result<(), PipelineError> {
        let mut slots = self.slots();
        if slots.phase != Phase::Idle {
            return Err(PipelineError::BatchInProgress);
        }
        debug_assert!(slots.buffer.is_empty());
        slots.phase = Phase::Submitting;
        slots.drain_done = false;
        slots.epoch += 1;
        self.cancelled.store(false, SeqCst);
        self.failures.store(0, SeqCst);
        Ok(())
    }

    /// Epoch of the current batch. Tasks and the writer capture it at
    /// construction and present it with every deposit, wait, and drain
    /// mark.
    pub fn epoch(&self) -> u64 {
        self.slots().epoch
    }

    /// Unconditionally moves the batch to `phase`. Only the cancel path
    /// writes phases this way; the submit flow advances with
    /// [`advance_phase`](BatchState::advance_phase) so a completed cancel
    /// is never overwritten.
    pub fn set_phase(&self, phase: Phase) {
        let mut slots = self.slots();
        debug!("batch phase {:?} -> {:?}", slots.phase, phase);
        slots.phase = phase;
    }

    /// Moves the batch from `from` to `to`, but only while the batch
    /// identified by `epoch` is live, uncancelled, and actually in
    /// `from`. A refusal means a cancel owns the batch now; the caller
    /// must back out without writing any further state.
    pub fn advance_phase(&self, epoch: u64, from: Phase, to: Phase) -> bool {
        let mut slots = self.slots();
        if self.cancelled.load(SeqCst) || slots.epoch != epoch || slots.phase != from {
            debug!(
                "batch phase {:?} -> {:?} refused (currently {:?})",
                from, to, slots.phase
            );
            return false;
        }
        debug!("batch phase {:?} -> {:?}", from, to);
        slots.phase = to;
        true
    }

    /// Snapshot of the current phase.
    pub fn phase(&self) -> Phase {
        self.slots().phase
    }

    /// True once the current batch has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(SeqCst)
    }

    /// Deposits one task result for the batch identified by `epoch`.
    ///
    /// The offer, the full check, and the wakeup happen in one critical
    /// section: when the final slot fills, both the writer and the
    /// orchestrator may be waiting, so the full condition is broadcast.
    /// A deposit after cancellation, or from a task whose batch has been
    /// superseded, is dropped. An offer that fails on capacity panics;
    /// with one slot reserved per task that can only be a construction
    /// bug.
    pub fn push_result(&self, epoch: u64, value: u32) -> PushOutcome {
        let mut slots = self.slots();
        if self.cancelled.load(SeqCst) || slots.epoch != epoch {
            return PushOutcome::Discarded;
        }
        if let Err(err) = slots.buffer.offer(value) {
            panic!("result deposit overflowed the buffer: {err}");
        }
        trace!(
            "deposited {value} ({}/{})",
            slots.buffer.len(),
            slots.buffer.capacity()
        );
        let now_full = slots.buffer.is_full();
        if now_full {
            self.results_full.notify_all();
        }
        PushOutcome::Stored { now_full }
    }

    /// Suspends until every slot is filled, or until the batch
    /// identified by `epoch` is cancelled or superseded.
    ///
    /// The predicate is strict fullness: a buffer stalled one result
    /// short keeps the caller suspended indefinitely.
    pub fn await_full(&self, epoch: u64) -> WaitOutcome {
        let mut slots = self.slots();
        while !self.cancelled.load(SeqCst) && slots.epoch == epoch && !slots.buffer.is_full() {
            slots = self
                .results_full
                .wait(slots)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if self.cancelled.load(SeqCst) || slots.epoch != epoch {
            WaitOutcome::Cancelled
        } else {
            WaitOutcome::Completed
        }
    }

    /// Removes every buffered result for writing, or `None` if the batch
    /// identified by `epoch` was cancelled or superseded first.
    pub fn drain_for_write(&self, epoch: u64) -> Option<Vec<u32>> {
        let mut slots = self.slots();
        if self.cancelled.load(SeqCst) || slots.epoch != epoch {
            return None;
        }
        Some(slots.buffer.drain_all())
    }

    /// Marks the drain (and its sink write) finished for the batch
    /// identified by `epoch` and wakes the orchestrator. Like a deposit,
    /// a mark from a cancelled or superseded batch is dropped, so a
    /// writer that outlived its batch cannot complete a later one.
    pub fn mark_drain_done(&self, epoch: u64) {
        let mut slots = self.slots();
        if self.cancelled.load(SeqCst) || slots.epoch != epoch {
            debug!("drain mark from a stale batch dropped");
            return;
        }
        slots.drain_done = true;
        self.results_drained.notify_all();
    }

    /// Suspends until the drain completes, or until the batch identified
    /// by `epoch` is cancelled or superseded.
    pub fn await_drained(&self, epoch: u64) -> WaitOutcome {
        let mut slots = self.slots();
        while !self.cancelled.load(SeqCst) && slots.epoch == epoch && !slots.drain_done {
            slots = self
                .results_drained
                .wait(slots)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if self.cancelled.load(SeqCst) || slots.epoch != epoch {
            WaitOutcome::Cancelled
        } else {
            WaitOutcome::Completed
        }
    }

    /// Cancels the current batch: sets the flag under the lock, moves to
    /// `Cancelling`, and broadcasts both conditions so every waiter
    /// re-checks its predicate.
    pub fn cancel(&self) {
        let mut slots = self.slots();
        self.cancelled.store(true, SeqCst);
        slots.phase = Phase::Cancelling;
        self.results_full.notify_all();
        self.results_drained.notify_all();
    }

    /// Discards all buffered results.
    pub fn clear_buffer(&self) {
        let mut slots = self.slots();
        slots.buffer.clear();
        self.results_drained.notify_all();
    }

    /// Number of buffered results.
    pub fn result_count(&self) -> usize {
        self.slots().buffer.len()
    }

    /// True when the buffer holds no results.
    pub fn is_buffer_empty(&self) -> bool {
        self.slots().buffer.is_empty()
    }

    /// Records one failed work unit (a task fan-out or a sink write).
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, SeqCst);
    }

    /// Failed work units recorded for the current batch.
    pub fn failures(&self) -> u32 {
        self.failures.load(SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn spawn_full_waiter(state: &Arc<BatchState>, epoch: u64) -> mpsc::Receiver<WaitOutcome> {
        let (tx, rx) = mpsc::channel();
        let state = state.clone();
        thread::spawn(move || {
            let _ = tx.send(state.await_full(epoch));
        });
        rx
    }

    fn spawn_drained_waiter(state: &Arc<BatchState>, epoch: u64) -> mpsc::Receiver<WaitOutcome> {
        let (tx, rx) = mpsc::channel();
        let state = state.clone();
        thread::spawn(move || {
            let _ = tx.send(state.await_drained(epoch));
        });
        rx
    }

    #[test]
    fn final_deposit_wakes_full_waiter() {
        let state = Arc::new(BatchState::new(4));
        let epoch = state.epoch();
        let rx = spawn_full_waiter(&state, epoch);

        for value in 0..3 {
            assert_eq!(
                state.push_result(epoch, value),
                PushOutcome::Stored { now_full: false }
            );
        }
        // Three of four slots filled: the waiter must still be suspended.
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        assert_eq!(
            state.push_result(epoch, 3),
            PushOutcome::Stored { now_full: true }
        );
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            WaitOutcome::Completed
        );
    }

    #[test]
    fn stalled_one_short_never_wakes() {
        let state = Arc::new(BatchState::new(5));
        let epoch = state.epoch();
        let rx = spawn_full_waiter(&state, epoch);

        for value in 0..4 {
            state.push_result(epoch, value);
        }
        assert!(
            rx.recv_timeout(Duration::from_millis(200)).is_err(),
            "waiter woke below the expected total"
        );

        // Release the waiter so the test thread can be joined.
        state.cancel();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            WaitOutcome::Cancelled
        );
    }

    #[test]
    fn cancel_broadcast_releases_both_conditions() {
        let state = Arc::new(BatchState::new(8));
        let epoch = state.epoch();
        let full_rx = spawn_full_waiter(&state, epoch);
        let drained_rx = spawn_drained_waiter(&state, epoch);

        thread::sleep(Duration::from_millis(20));
        state.cancel();

        assert_eq!(
            full_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            WaitOutcome::Cancelled
        );
        assert_eq!(
            drained_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            WaitOutcome::Cancelled
        );
    }

    #[test]
    fn push_after_cancel_is_discarded() {
        let state = BatchState::new(4);
        let epoch = state.epoch();
        state.push_result(epoch, 1);
        state.cancel();
        state.clear_buffer();

        assert_eq!(state.push_result(epoch, 2), PushOutcome::Discarded);
        assert!(state.is_buffer_empty());
    }

    #[test]
    fn concurrent_pushes_fill_without_losing_results() {
        let state = Arc::new(BatchState::new(128));
        let epoch = state.epoch();

        let mut handles = Vec::new();
        for worker in 0..8u32 {
            let state = state.clone();
            handles.push(thread::spawn(move || {
                for i in 0..16u32 {
                    state.push_result(epoch, worker * 16 + i);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(state.result_count(), 128);
        assert_eq!(state.await_full(epoch), WaitOutcome::Completed);
    }

    #[test]
    fn push_with_stale_epoch_is_discarded() {
        let state = BatchState::new(4);
        state.begin_batch().unwrap();
        let stale = state.epoch();
        state.cancel();
        state.clear_buffer();
        state.set_phase(Phase::Idle);
        state.begin_batch().unwrap();

        // A straggler from the cancelled batch must not leak into this one.
        assert_eq!(state.push_result(stale, 7), PushOutcome::Discarded);
        assert!(state.is_buffer_empty());
        assert_eq!(
            state.push_result(state.epoch(), 7),
            PushOutcome::Stored { now_full: false }
        );
    }

    #[test]
    fn drain_then_mark_done_wakes_drained_waiter() {
        let state = Arc::new(BatchState::new(3));
        let epoch = state.epoch();
        for value in [10, 20, 30] {
            state.push_result(epoch, value);
        }
        assert_eq!(state.drain_for_write(epoch), Some(vec![10, 20, 30]));
        assert!(state.is_buffer_empty());

        let rx = spawn_drained_waiter(&state, epoch);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        state.mark_drain_done(epoch);
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            WaitOutcome::Completed
        );
    }

    #[test]
    fn drain_after_cancel_yields_nothing() {
        let state = BatchState::new(2);
        let epoch = state.epoch();
        state.push_result(epoch, 1);
        state.cancel();
        assert_eq!(state.drain_for_write(epoch), None);
    }

    #[test]
    fn stale_drain_mark_does_not_complete_a_later_batch() {
        let state = Arc::new(BatchState::new(2));
        state.begin_batch().unwrap();
        let first_epoch = state.epoch();

        // First batch winds down through a cancel while its writer is
        // stuck in the sink write and outlives the bounded wait.
        state.cancel();
        state.clear_buffer();
        state.set_phase(Phase::Idle);
        state.begin_batch().unwrap();

        // The detached writer finally reports its old drain.
        state.mark_drain_done(first_epoch);

        let rx = spawn_drained_waiter(&state, state.epoch());
        assert!(
            rx.recv_timeout(Duration::from_millis(200)).is_err(),
            "a stale drain mark satisfied the new batch"
        );

        state.mark_drain_done(state.epoch());
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            WaitOutcome::Completed
        );
    }

    #[test]
    #[should_panic(expected = "overflowed")]
    fn deposit_past_capacity_panics() {
        let state = BatchState::new(1);
        state.push_result(state.epoch(), 1);
        state.push_result(state.epoch(), 2);
    }

    #[test]
    fn begin_batch_rejects_reentry_until_idle() {
        let state = BatchState::new(2);
        state.begin_batch().unwrap();
        assert!(matches!(
            state.begin_batch(),
            Err(PipelineError::BatchInProgress)
        ));
        state.set_phase(Phase::Idle);
        state.begin_batch().unwrap();
    }

    #[test]
    fn late_phase_write_after_cancel_cannot_wedge_reentry() {
        let state = BatchState::new(4);
        state.begin_batch().unwrap();
        let epoch = state.epoch();
        assert!(state.advance_phase(epoch, Phase::Submitting, Phase::AwaitingCompletion));

        // A cancel runs to completion in the gap before the submit side
        // records its next phase.
        state.cancel();
        state.clear_buffer();
        state.set_phase(Phase::Idle);

        // The late transition is refused, the idle state survives, and a
        // fresh batch can still begin.
        assert!(!state.advance_phase(epoch, Phase::AwaitingCompletion, Phase::Writing));
        assert_eq!(state.phase(), Phase::Idle);
        assert_eq!(state.await_full(epoch), WaitOutcome::Cancelled);
        state.begin_batch().unwrap();

        // Even with the flag reset and the phase matching again, the old
        // batch's writes stay locked out by its epoch.
        assert!(!state.advance_phase(epoch, Phase::Submitting, Phase::AwaitingCompletion));
        assert_eq!(state.phase(), Phase::Submitting);
    }

    #[test]
    fn begin_batch_resets_cancellation_and_failures() {
        let state = BatchState::new(2);
        state.begin_batch().unwrap();
        state.record_failure();
        state.cancel();
        state.clear_buffer();
        state.set_phase(Phase::Idle);

        state.begin_batch().unwrap();
        assert!(!state.is_cancelled());
        assert_eq!(state.failures(), 0);
        assert_eq!(
            state.push_result(state.epoch(), 9),
            PushOutcome::Stored { now_full: false }
        );
    }
}
