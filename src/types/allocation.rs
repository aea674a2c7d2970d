//! The optimizer output type: a probability-like vector of budget shares.

use super::channel::{Channel, ChannelMap};
use serde::{Deserialize, Serialize};

const SUM_TOLERANCE: f64 = 1e-5;

/// A budget split across the four channels. Well-formed allocations sum to
/// 1.0 within [`SUM_TOLERANCE`] and carry no negative shares.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub shares: ChannelMap<f64>,
}

impl Allocation {
    pub fn new(shares: ChannelMap<f64>) -> Self {
        Self { shares }
    }

    pub fn share(&self, c: Channel) -> f64 {
        *self.shares.get(c)
    }

    /// Checks the well-formedness invariant: every channel present exactly
    /// once (guaranteed by `ChannelMap`), all shares non-negative, and the
    /// shares sum to 1.0 within tolerance.
    pub fn is_well_formed(&self) -> bool {
        let sum = self.shares.sum();
        (sum - 1.0).abs() <= SUM_TOLERANCE && self.shares.values().all(|&v| v >= -SUM_TOLERANCE)
    }

    /// Rescales shares so they sum to exactly 1.0, preserving relative
    /// proportions. No-op (returns a zero allocation split evenly) if the
    /// input sums to zero.
    pub fn normalized(&self) -> Allocation {
        let sum = self.shares.sum();
        if sum.abs() < f64::EPSILON {
            return Allocation::new(ChannelMap::filled(1.0 / Channel::COUNT as f64));
        }
        Allocation::new(self.shares.map(|_, v| v / sum))
    }

    pub fn budget_for(&self, c: Channel, total_budget: f64) -> f64 {
        self.share(c) * total_budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_split_is_well_formed() {
        let alloc = Allocation::new(ChannelMap::filled(0.25));
        assert!(alloc.is_well_formed());
    }

    #[test]
    fn normalizes_skewed_shares_to_sum_one() {
        let alloc = Allocation::new(ChannelMap::from_fn(|c| match c {
            Channel::Google => 2.0,
            _ => 1.0,
        }));
        let normalized = alloc.normalized();
        assert!((normalized.shares.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_sum_normalizes_to_even_split() {
        let alloc = Allocation::new(ChannelMap::zero());
        let normalized = alloc.normalized();
        assert!((normalized.share(Channel::Google) - 0.25).abs() < 1e-9);
    }
}
