//! Per-channel benchmark intervals the forward model samples from.

use super::channel::{Channel, ChannelMap};
use serde::{Deserialize, Serialize};

/// A `[low, high]` interval with an implied midpoint, used for CPM, CTR, and
/// CVR benchmarks. Low must be <= high; both must be finite and non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub low: f64,
    pub high: f64,
}

impl Interval {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn midpoint(&self) -> f64 {
        (self.low + self.high) / 2.0
    }

    pub fn is_valid(&self) -> bool {
        self.low.is_finite()
            && self.high.is_finite()
            && self.low >= 0.0
            && self.high >= self.low
    }

    pub fn width(&self) -> f64 {
        self.high - self.low
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.low, self.high)
    }
}

/// CPM/CTR/CVR benchmark intervals for a single channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Priors {
    pub cpm: Interval,
    pub ctr: Interval,
    pub cvr: Interval,
}

impl Priors {
    pub fn is_valid(&self) -> bool {
        self.cpm.is_valid() && self.ctr.is_valid() && self.cvr.is_valid() && self.cpm.low > 0.0
    }
}

/// The full set of benchmark priors, one per channel.
pub type ChannelPriors = ChannelMap<Priors>;

/// Conservative, widely-cited industry defaults used by the built-in
/// `PriorSource` fallback when no caller-supplied benchmarks are available.
pub fn industry_default_priors() -> ChannelPriors {
    ChannelMap::from_fn(|c| match c {
        Channel::Google => Priors {
            cpm: Interval::new(8.0, 25.0),
            ctr: Interval::new(0.02, 0.06),
            cvr: Interval::new(0.02, 0.08),
        },
        Channel::Meta => Priors {
            cpm: Interval::new(6.0, 18.0),
            ctr: Interval::new(0.01, 0.035),
            cvr: Interval::new(0.01, 0.05),
        },
        Channel::Tiktok => Priors {
            cpm: Interval::new(5.0, 15.0),
            ctr: Interval::new(0.01, 0.03),
            cvr: Interval::new(0.005, 0.03),
        },
        Channel::Linkedin => Priors {
            cpm: Interval::new(20.0, 60.0),
            ctr: Interval::new(0.004, 0.015),
            cvr: Interval::new(0.01, 0.06),
        },
    })
}
