//! Absolute microsecond clock and the distribution samplers flows draw from.
//!
//! Everything in the scheduler and in `FlowSpec` deadlines is expressed in
//! microseconds since an arbitrary epoch anchored at process start, matching
//! the original meter's `getMicroTime()`. A `Clock` is injected everywhere
//! time is read so tests can drive the engine with a `ManualClock` instead of
//! the wall clock.

use std::time::Instant;

use rand::Rng;

/// Source of the current absolute time, in microseconds.
pub trait Clock {
    fn now_micros(&self) -> u64;
}

/// Wall-clock implementation, anchored at construction time.
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_micros(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

/// Test double whose time only advances when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: std::cell::Cell<u64>,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: std::cell::Cell::new(start),
        }
    }

    pub fn advance(&self, micros: u64) {
        self.now.set(self.now.get() + micros);
    }

    pub fn set(&self, micros: u64) {
        self.now.set(micros);
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> u64 {
        self.now.get()
    }
}

/// A random-value distribution a flow's rate or frame size is drawn from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Distribution {
    /// Always returns the same value.
    Constant(f64),
    /// Negative-exponential with the given mean.
    NegExponential(f64),
}

impl Distribution {
    /// Draw one sample. `rng` is caller-owned so callers can seed it for
    /// reproducible tests.
    pub fn sample(&self, rng: &mut impl Rng) -> f64 {
        match *self {
            Distribution::Constant(value) => value,
            Distribution::NegExponential(mean) => {
                if mean <= 0.0 {
                    return 0.0;
                }
                let u: f64 = rng.gen_range(0.0..1.0);
                -mean * (1.0 - u).ln()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn manual_clock_advances_explicitly() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_micros(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now_micros(), 1_500);
    }

    #[test]
    fn constant_distribution_is_constant() {
        let mut rng = StdRng::seed_from_u64(1);
        let d = Distribution::Constant(42.0);
        for _ in 0..10 {
            assert_eq!(d.sample(&mut rng), 42.0);
        }
    }

    #[test]
    fn negexp_distribution_converges_to_mean() {
        let mut rng = StdRng::seed_from_u64(7);
        let d = Distribution::NegExponential(100.0);
        let n = 20_000;
        let sum: f64 = (0..n).map(|_| d.sample(&mut rng)).sum();
        let mean = sum / n as f64;
        assert!(
            (80.0..120.0).contains(&mean),
            "sample mean {mean} too far from expected 100.0"
        );
    }

    #[test]
    fn negexp_zero_mean_is_zero() {
        let mut rng = StdRng::seed_from_u64(1);
        let d = Distribution::NegExponential(0.0);
        assert_eq!(d.sample(&mut rng), 0.0);
    }
}
