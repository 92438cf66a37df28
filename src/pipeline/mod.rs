// SPDX-License-Identifier: MIT

pub mod buffer;
pub mod counter;
pub mod orchestrator;
pub mod state;
pub mod task;
pub mod writer;
