//! Caller-supplied goal and constraint inputs to an optimization run.

use super::channel::{Channel, ChannelMap};
use serde::{Deserialize, Serialize};

/// The objective the optimizer maximizes (or minimizes, for `Cac`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Goal {
    Demos,
    Revenue,
    Cac,
}

/// Per-channel minimum/maximum share constraints plus the goal-specific
/// inputs needed to evaluate a forward-model run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assumptions {
    pub goal: Goal,
    pub budget: f64,
    /// Used when `goal == Revenue`; average deal size in currency units.
    /// Defaults to 1000 when absent.
    #[serde(rename = "avgDealSize", default)]
    pub avg_deal_size: Option<f64>,
    #[serde(rename = "minPct", default)]
    pub min_pct: ChannelMap<f64>,
    #[serde(rename = "maxPct", default = "default_max_pct")]
    pub max_pct: ChannelMap<f64>,
}

fn default_max_pct() -> ChannelMap<f64> {
    ChannelMap::filled(1.0)
}

const DEFAULT_AVG_DEAL_SIZE: f64 = 1000.0;

impl Assumptions {
    /// `avgDealSize` with the §6 default of 1000 applied when absent.
    pub fn avg_deal_size_or_default(&self) -> f64 {
        self.avg_deal_size.unwrap_or(DEFAULT_AVG_DEAL_SIZE)
    }

    /// Checks the constraint inputs are internally consistent: every
    /// channel's min <= max and all shares lie in `[0, 1]`.
    ///
    /// Deliberately does NOT reject `Σ minPct > 1` — per §3/§7 that is the
    /// `OverConstrained` case, which is accepted and flagged via
    /// [`Self::is_over_constrained`] rather than rejected as `InvalidInput`.
    pub fn validate(&self) -> Result<(), String> {
        if !self.budget.is_finite() || self.budget <= 0.0 {
            return Err("budget must be a positive finite number".into());
        }
        if let Some(size) = self.avg_deal_size {
            if !size.is_finite() || size <= 0.0 {
                return Err("avgDealSize must be a positive finite number".into());
            }
        }
        for c in Channel::ALL {
            let min = *self.min_pct.get(c);
            let max = *self.max_pct.get(c);
            if !(0.0..=1.0).contains(&min) || !(0.0..=1.0).contains(&max) {
                return Err(format!("{c} share bounds must lie in [0, 1]"));
            }
            if min > max {
                return Err(format!("{c} minPct exceeds maxPct"));
            }
        }
        Ok(())
    }

    /// True when `Σ minPct > 1` (no allocation can satisfy every minimum
    /// simultaneously) or the max bounds can't reach 100% even at their
    /// ceiling — either case trips the `constraint_over_specified`
    /// degradation path (§7 `OverConstrained`).
    pub fn is_over_constrained(&self) -> bool {
        let min_sum: f64 = Channel::ALL.iter().map(|c| *self.min_pct.get(*c)).sum();
        let max_sum: f64 = Channel::ALL.iter().map(|c| *self.max_pct.get(*c)).sum();
        min_sum > 1.0 + 1e-9 || max_sum < 1.0 - 1e-9
    }
}
