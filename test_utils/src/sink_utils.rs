// SPDX-License-Identifier: MIT

use std::fs;
use std::path::Path;

/// Reads a result sink back as one integer per line.
///
/// # Returns
/// The parsed values in file order. Panics on an unreadable file or a
/// non-numeric line, which is the loud failure tests want.
pub fn read_result_lines(path: &Path) -> Vec<u32> {
    fs::read_to_string(path)
        .unwrap_or_else(|err| panic!("failed to read {path:?}: {err}"))
        .lines()
        .map(|line| {
            line.parse()
                .unwrap_or_else(|err| panic!("line {line:?} is not a result: {err}"))
        })
        .collect()
}
