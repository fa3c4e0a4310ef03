/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use crate::range::Range;
use crate::strategy::Strategy;

/// Aggregated injection configuration, shared read-only by every tracee.
#[derive(Debug, Clone)]
pub struct Options {
    /// Probability in `[0, 1]` that a gated syscall is perturbed.
    pub unpredictability: f64,

    /// How many byte positions a buffer mutation scribbles over.
    pub rand_buf: Range,

    /// Offsets (relative to the current file position) injected by the
    /// seek strategy.
    pub rand_fp: Range,

    /// Extra delay, in microseconds, added to intercepted sleeps.
    pub wait: Range,

    /// The enabled I/O strategies. Must be non-empty; one is drawn uniformly
    /// per perturbed `read`/`write`.
    pub strategies: Vec<Strategy>,
}

impl Default for Options {
    /// All strategies enabled with an unpredictability of 20%.
    fn default() -> Self {
        Options {
            unpredictability: 0.2,
            rand_buf: Range::new(5, 15),
            rand_fp: Range::new(-10, 10),
            wait: Range::new(1000, 1001),
            strategies: vec![
                Strategy::Silence,
                Strategy::RandomBuffer,
                Strategy::RandomOffset,
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::Rng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn defaults() {
        let options = Options::default();
        assert_eq!(options.unpredictability, 0.2);
        assert_eq!(options.rand_buf, Range::new(5, 15));
        assert_eq!(options.rand_fp, Range::new(-10, 10));
        assert_eq!(options.wait, Range::new(1000, 1001));
        assert_eq!(options.strategies.len(), 3);
    }

    #[test]
    fn gate_converges_on_unpredictability() {
        // The Bernoulli gate is rng.gen_bool(unpredictability); over many
        // draws the perturbed fraction must track the configured probability.
        let options = Options::default();
        let mut rng = StdRng::seed_from_u64(1);
        let n = 10_000;
        let hits = (0..n)
            .filter(|_| rng.gen_bool(options.unpredictability))
            .count();
        let fraction = hits as f64 / n as f64;
        assert!(
            (fraction - options.unpredictability).abs() < 0.02,
            "gate fraction {} drifted from {}",
            fraction,
            options.unpredictability
        );
    }
}
