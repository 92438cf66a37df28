// SPDX-License-Identifier: MIT

use std::sync::atomic::{AtomicU32, Ordering::SeqCst};
use std::thread;
use std::time::Duration;

use batchpipe::pipeline::counter::OddCountSource;

/// Source that reports the same odd count on every call.
pub struct FixedOddCounter {
    /// Count returned by every invocation.
    count: u32,
}

impl FixedOddCounter {
    /// Creates a new FixedOddCounter reporting `count`.
    pub fn new(count: u32) -> Self {
        FixedOddCounter { count }
    }
}

impl OddCountSource for FixedOddCounter {
    fn count_odds(&self, _draws: u32) -> u32 {
        self.count
    }
}

/// Source that sleeps before answering, so a cancel can land while a
/// batch is mid-flight.
pub struct SlowOddCounter {
    count: u32,
    delay: Duration,
}

impl SlowOddCounter {
    pub fn new(count: u32, delay: Duration) -> Self {
        SlowOddCounter { count, delay }
    }
}

impl OddCountSource for SlowOddCounter {
    fn count_odds(&self, _draws: u32) -> u32 {
        thread::sleep(self.delay);
        self.count
    }
}

/// Source that panics on exactly one call and reports a fixed count on
/// every other.
///
/// # Arguments
/// - `count`: The odd count reported by the non-failing calls.
/// - `nth`: Which call fails, counting from 1.
pub struct PanicOnNth {
    count: u32,
    nth: u32,
    calls: AtomicU32,
}

impl PanicOnNth {
    pub fn new(count: u32, nth: u32) -> Self {
        PanicOnNth {
            count,
            nth,
            calls: AtomicU32::new(0),
        }
    }

    /// Number of calls observed so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(SeqCst)
    }
}

impl OddCountSource for PanicOnNth {
    fn count_odds(&self, _draws: u32) -> u32 {
        let call = self.calls.fetch_add(1, SeqCst) + 1;
        if call == self.nth {
            panic!("counting source failed on call {call}");
        }
        self.count
    }
}
