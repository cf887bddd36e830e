use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of every random draw the scheduler makes.
///
/// Production code uses [`RngSource`]; tests pin draws with [`FixedSource`]
/// so interval and strength values can be asserted exactly.
pub trait RandomSource: Send {
    /// Uniform float in `[low, high]`.
    fn uniform(&mut self, low: f64, high: f64) -> f64;

    /// Uniform integer in `[low, high]`.
    fn int_inclusive(&mut self, low: i64, high: i64) -> i64;

    /// `amount` distinct indices drawn from `0..len`.
    fn sample_indices(&mut self, len: usize, amount: usize) -> Vec<usize>;
}

pub struct RngSource<R = StdRng> {
    rng: R,
}

impl RngSource<StdRng> {
    pub fn from_os() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl<R: Rng + Send> RandomSource for RngSource<R> {
    fn uniform(&mut self, low: f64, high: f64) -> f64 {
        if high <= low {
            return low;
        }
        self.rng.random_range(low..=high)
    }

    fn int_inclusive(&mut self, low: i64, high: i64) -> i64 {
        if high <= low {
            return low;
        }
        self.rng.random_range(low..=high)
    }

    fn sample_indices(&mut self, len: usize, amount: usize) -> Vec<usize> {
        let amount = amount.min(len);
        rand::seq::index::sample(&mut self.rng, len, amount).into_vec()
    }
}

/// Deterministic source: every float draw returns `factor` (clamped into the
/// requested range), integer draws return the lower bound and index samples
/// take the first `amount` positions.
#[derive(Debug, Clone, Copy)]
pub struct FixedSource {
    factor: f64,
}

impl FixedSource {
    pub fn new(factor: f64) -> Self {
        Self { factor }
    }

    pub fn neutral() -> Self {
        Self::new(1.0)
    }
}

impl RandomSource for FixedSource {
    fn uniform(&mut self, low: f64, high: f64) -> f64 {
        self.factor.clamp(low, high.max(low))
    }

    fn int_inclusive(&mut self, low: i64, _high: i64) -> i64 {
        low
    }

    fn sample_indices(&mut self, len: usize, amount: usize) -> Vec<usize> {
        (0..amount.min(len)).collect()
    }
}
