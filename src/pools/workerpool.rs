// SPDX-License-Identifier: MIT

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, trace};
use thiserror::Error;

/// Unit of work accepted by a [`WorkerPool`].
///
/// Jobs carry their own shared state (buffer handles, sources) and report
/// results through it; the pool only runs them.
pub trait Job: Send + Sync {
    fn run(&self);
}

/// Error returned by [`WorkerPool::submit`] once the pool has been halted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{label} pool is halted, job rejected")]
pub struct PoolHalted {
    /// Label of the rejecting pool.
    pub label: &'static str,
}

/// Mutable pool state guarded by the shared mutex.
struct PoolState {
    /// Queue of jobs awaiting a worker.
    queue: VecDeque<Arc<dyn Job>>,
    /// Once set, workers exit instead of picking up further jobs and
    /// `submit` rejects new ones.
    halted: bool,
    /// Number of jobs currently executing on a worker.
    active: usize,
    /// Number of worker threads that have not yet exited their loop.
    workers_alive: usize,
}

/// State and signaling shared between the pool handle and its workers.
struct PoolShared {
    /// Queue, halt flag, and accounting.
    state: Mutex<PoolState>,
    /// Wakes workers when a job arrives or the pool halts.
    job_ready: Condvar,
    /// Wakes threads observing the pool: idle transitions and worker
    /// exits are both announced here.
    lifecycle: Condvar,
}

impl PoolShared {
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                self.state.clear_poison();
                poisoned.into_inner()
            }
        }
    }
}

/// Fixed-size worker pool over a guarded job queue.
///
/// Workers block on a condition variable while the queue is empty and run
/// each job outside the lock scope. [`halt`](WorkerPool::halt) discards
/// queued jobs and releases every worker; jobs already running are not
/// preempted and are expected to observe cancellation through their own
/// checkpoints.
pub struct WorkerPool {
    /// Short name used in log lines ("submission", "writer").
    label: &'static str,
    /// Shared queue and signaling.
    shared: Arc<PoolShared>,
    /// Worker thread handles, taken by `join_all` or `detach`.
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawns `worker_count` workers that wait for jobs on the queue.
    pub fn new(label: &'static str, worker_count: usize) -> Self {
        assert!(worker_count > 0, "worker pool needs at least one worker");

        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                halted: false,
                active: 0,
                workers_alive: worker_count,
            }),
            job_ready: Condvar::new(),
            lifecycle: Condvar::new(),
        });

        let mut handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let shared = shared.clone();
            handles.push(thread::spawn(move || worker_loop(&shared, label)));
        }
        debug!("{label} pool: spawned {worker_count} worker(s)");

        WorkerPool {
            label,
            shared,
            handles: Mutex::new(handles),
        }
    }

    /// Queues a job and wakes one waiting worker.
    pub fn submit(&self, job: Arc<dyn Job>) -> Result<(), PoolHalted> {
        let mut state = self.shared.lock_state();
        if state.halted {
            return Err(PoolHalted { label: self.label });
        }
        state.queue.push_back(job);
        self.shared.job_ready.notify_one();
        Ok(())
    }

    /// Blocks until the queue is empty and no job is executing.
    ///
    /// Returns `true` on a normal idle transition and `false` if the pool
    /// was halted before it drained.
    pub fn wait_idle(&self) -> bool {
        let mut state = self.shared.lock_state();
        while !state.halted && !(state.queue.is_empty() && state.active == 0) {
            state = self
                .shared
                .lifecycle
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        !state.halted
    }

    /// Stops the pool: discards every queued job, wakes all workers so
    /// they exit, and wakes anything blocked in [`wait_idle`].
    ///
    /// Returns the number of discarded jobs. Halting twice is a no-op.
    pub fn halt(&self) -> usize {
        let mut state = self.shared.lock_state();
        if state.halted {
            return 0;
        }
        state.halted = true;
        let discarded = state.queue.len();
        state.queue.clear();
        self.shared.job_ready.notify_all();
        self.shared.lifecycle.notify_all();
        drop(state);

        debug!("{} pool: halted, discarded {discarded} queued job(s)", self.label);
        discarded
    }

    /// Waits up to `timeout` for every worker to exit its loop.
    ///
    /// Returns `true` once all workers are gone. A `false` return means a
    /// worker is still inside a job after the deadline; the caller decides
    /// whether to join or [`detach`](WorkerPool::detach).
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock_state();
        while state.workers_alive > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .shared
                .lifecycle
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
        }
        true
    }

    /// True once every worker has exited its loop.
    pub fn is_terminated(&self) -> bool {
        self.shared.lock_state().workers_alive == 0
    }

    /// Joins every worker thread. Call after a halt (or an
    /// [`await_termination`](WorkerPool::await_termination) that returned
    /// `true`) to reclaim the threads.
    pub fn join_all(&self) {
        let handles = std::mem::take(&mut *lock_handles(&self.handles));
        for handle in handles {
            let _ = handle.join();
        }
    }

    /// Abandons the worker threads without joining them. Used when a
    /// worker outlived the bounded termination wait; the detached thread
    /// finishes its current job and exits on its own.
    pub fn detach(&self) {
        let handles = std::mem::take(&mut *lock_handles(&self.handles));
        if !handles.is_empty() {
            debug!("{} pool: detaching {} worker(s)", self.label, handles.len());
        }
        drop(handles);
    }
}

impl Drop for WorkerPool {
    /// Signals halt and joins whichever workers were not detached.
    fn drop(&mut self) {
        self.halt();
        self.join_all();
    }
}

fn lock_handles(
    handles: &Mutex<Vec<thread::JoinHandle<()>>>,
) -> MutexGuard<'_, Vec<thread::JoinHandle<()>>> {
    match handles.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            handles.clear_poison();
            poisoned.into_inner()
        }
    }
}

fn worker_loop(shared: &PoolShared, label: &'static str) {
    loop {
        let job = {
            let mut state = shared.lock_state();

            // Wait until there is a job to run or the pool halts.
            loop {
                if state.halted {
                    break None;
                }
                if let Some(job) = state.queue.pop_front() {
                    state.active += 1;
                    break Some(job);
                }
                state = shared
                    .job_ready
                    .wait(state)
                    .unwrap_or_else(|e| e.into_inner());
            }
        };
        let Some(job) = job else { break };

        // Run the job outside the lock scope. A panicking job must not
        // take the worker down or wedge the idle accounting.
        let outcome = catch_unwind(AssertUnwindSafe(|| job.run()));
        if outcome.is_err() {
            error!("{label} pool: job panicked, worker continues");
        }

        let mut state = shared.lock_state();
        state.active -= 1;
        if state.queue.is_empty() && state.active == 0 {
            shared.lifecycle.notify_all();
        }
    }

    // Announce the exit so bounded termination waits can observe it.
    let mut state = shared.lock_state();
    state.workers_alive -= 1;
    shared.lifecycle.notify_all();
    trace!("{label} pool: worker exited");
}
