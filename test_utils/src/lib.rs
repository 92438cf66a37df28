// SPDX-License-Identifier: MIT

pub mod sink_utils;
pub mod sources;
