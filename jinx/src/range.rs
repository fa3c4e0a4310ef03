/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::str::FromStr;

use rand::Rng;

use crate::error::Error;

/// An inclusive-low, exclusive-high integer range with uniform sampling.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Range {
    low: i64,
    high: i64,
}

impl Range {
    /// Creates a range over `[low, high)`. Panics unless `high > low`.
    pub fn new(low: i64, high: i64) -> Self {
        assert!(high > low, "invalid range [{}, {})", low, high);
        Range { low, high }
    }

    /// Returns a uniformly distributed integer in `[low, high)`.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> i64 {
        rng.gen_range(self.low..self.high)
    }
}

impl FromStr for Range {
    type Err = Error;

    /// Parses `"a,b"` to `[a, b)` and the singleton `"N"` to `[N, N+1)`.
    fn from_str(s: &str) -> Result<Self, Error> {
        let malformed = || Error::MalformedRange(s.to_string());
        let (low, high) = match s.split_once(',') {
            Some((low, high)) => {
                let low = low.trim().parse().map_err(|_| malformed())?;
                let high = high.trim().parse().map_err(|_| malformed())?;
                (low, high)
            }
            None => {
                let low: i64 = s.trim().parse().map_err(|_| malformed())?;
                (low, low + 1)
            }
        };
        if high <= low {
            return Err(malformed());
        }
        Ok(Range { low, high })
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn parse_pair() {
        assert_eq!("5,15".parse::<Range>().unwrap(), Range::new(5, 15));
        assert_eq!(" -10 , 10 ".parse::<Range>().unwrap(), Range::new(-10, 10));
    }

    #[test]
    fn parse_singleton() {
        // "N" means the fixed value N.
        assert_eq!("1000".parse::<Range>().unwrap(), Range::new(1000, 1001));
        assert_eq!(
            "7".parse::<Range>().unwrap(),
            "7,8".parse::<Range>().unwrap()
        );
    }

    #[test]
    fn parse_malformed() {
        for s in ["", "x", "1,x", "x,1", "1,", "5,5", "10,5", "1,2,3"] {
            assert!(
                matches!(s.parse::<Range>(), Err(Error::MalformedRange(_))),
                "expected {:?} to be rejected",
                s
            );
        }
    }

    #[test]
    fn samples_stay_in_bounds() {
        let mut rng = StdRng::seed_from_u64(99);
        let range = Range::new(-10, 10);
        for _ in 0..10_000 {
            let v = range.sample(&mut rng);
            assert!((-10..10).contains(&v));
        }

        let fixed = "1000".parse::<Range>().unwrap();
        assert_eq!(fixed.sample(&mut rng), 1000);
    }
}
