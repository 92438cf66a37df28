// SPDX-License-Identifier: MIT

use std::collections::VecDeque;

use thiserror::Error;

/// Error returned by [`ResultBuffer::offer`] when the buffer already holds
/// `capacity` results. With one slot reserved per task this can only happen
/// through a wiring bug, so callers treat it as fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("result buffer at capacity ({capacity}), value {rejected} rejected")]
pub struct CapacityError {
    /// Fixed capacity of the buffer that rejected the value.
    pub capacity: usize,
    /// The value that could not be stored.
    pub rejected: u32,
}

/// Bounded FIFO of completed task results.
///
/// The buffer itself is a plain data structure: callers wrap it in the
/// shared batch mutex, because completion detection ("did this push fill
/// the buffer?") is a compound check that must be atomic with the push.
#[derive(Debug)]
pub struct ResultBuffer {
    /// Stored results in arrival order.
    slots: VecDeque<u32>,
    /// Maximum number of results, fixed at construction.
    capacity: usize,
}

impl ResultBuffer {
    /// Creates an empty buffer that holds at most `capacity` results.
    pub fn with_capacity(capacity: usize) -> Self {
        ResultBuffer {
            slots: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `value`, failing if the buffer is already full.
    pub fn offer(&mut self, value: u32) -> Result<(), CapacityError> {
        if self.slots.len() == self.capacity {
            return Err(CapacityError {
                capacity: self.capacity,
                rejected: value,
            });
        }
        self.slots.push_back(value);
        Ok(())
    }

    /// Removes and returns every stored result in arrival order, leaving
    /// the buffer empty.
    pub fn drain_all(&mut self) -> Vec<u32> {
        self.slots.drain(..).collect()
    }

    /// Number of results currently stored.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when no results are stored.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// True when every slot is occupied.
    pub fn is_full(&self) -> bool {
        self.slots.len() == self.capacity
    }

    /// Fixed capacity given at construction.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discards all stored results.
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
