// SPDX-License-Identifier: MIT

use rand::Rng;

/// Source of odd-count samples, the leaf computation of every sub-job.
///
/// Implementations must be shareable across the sub-job threads of a task.
/// The production implementation is [`RandomOddCounter`]; tests substitute
/// deterministic sources through the same seam.
pub trait OddCountSource: Send + Sync {
    /// Draws `draws` integers and returns how many of them were odd.
    fn count_odds(&self, draws: u32) -> u32;
}

/// Counts odd values among freshly drawn pseudo-random integers.
///
/// Draws full-range `i32`s from the thread-local generator; a value is odd
/// when its remainder mod 2 is nonzero, which covers negative draws as
/// well. Stateless, so a single instance serves every sub-job thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomOddCounter;

impl OddCountSource for RandomOddCounter {
    fn count_odds(&self, draws: u32) -> u32 {
        let mut rng = rand::rng();
        let mut odd = 0;
        for _ in 0..draws {
            let value: i32 = rng.random();
            if value % 2 != 0 {
                odd += 1;
            }
        }
        odd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_never_exceeds_draws() {
        let source = RandomOddCounter;
        for _ in 0..10 {
            assert!(source.count_odds(1000) <= 1000);
        }
    }

    #[test]
    fn zero_draws_count_zero() {
        assert_eq!(RandomOddCounter.count_odds(0), 0);
    }

    #[test]
    fn large_sample_is_roughly_balanced() {
        // Half of all i32 values are odd; 100k draws landing outside
        // [40%, 60%] would indicate a broken parity test, not bad luck.
        let odd = RandomOddCounter.count_odds(100_000);
        assert!((40_000..=60_000).contains(&odd), "odd count was {odd}");
    }
}
