//! Deterministic and Monte-Carlo outcome evaluation for a fixed allocation.
//!
//! Pure functions over [`ChannelMap`] — cannot fail. Pathological inputs
//! (zero CPM, NaN priors) produce zero outcomes for the affected channel
//! rather than propagating NaN.

use crate::config::defaults::CAC_EPSILON;
use crate::types::{Allocation, Channel, ChannelPriors, Goal};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Percentile summary of a Monte-Carlo run: linearly interpolated p10/p50/p90.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct McOutcome {
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
}

/// `spend_c = budget * allocation[c]`; impressions/clicks/conversions per
/// channel and the aggregate conversion count, given one concrete
/// `(cpm, ctr, cvr)` draw per channel.
fn per_channel_conversions(
    budget: f64,
    allocation: &Allocation,
    cpm: &crate::types::ChannelMap<f64>,
    ctr: &crate::types::ChannelMap<f64>,
    cvr: &crate::types::ChannelMap<f64>,
) -> f64 {
    Channel::ALL
        .iter()
        .map(|&c| {
            let spend = budget * allocation.share(c);
            let cpm_c = *cpm.get(c);
            let impressions = if cpm_c > 0.0 { 1000.0 * spend / cpm_c } else { 0.0 };
            let clicks = impressions * ctr.get(c).max(0.0);
            let conversions = clicks * cvr.get(c).max(0.0);
            if conversions.is_finite() { conversions } else { 0.0 }
        })
        .sum()
}

/// Maps raw conversion count to the objective's native units: conversions
/// for `demos`, currency for `revenue`, currency-per-conversion for `cac`
/// (to be minimized).
pub fn objective_from_conversions(goal: Goal, conversions: f64, budget: f64, avg_deal_size: f64) -> f64 {
    let value = match goal {
        Goal::Demos => conversions,
        Goal::Revenue => conversions * avg_deal_size,
        Goal::Cac => budget / conversions.max(CAC_EPSILON),
    };
    sanitize(value)
}

/// Replaces NaN/Infinity with 0.0, the numerical policy every public
/// forward-model output follows.
pub fn sanitize(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

/// One deterministic evaluation using the midpoints of every prior interval.
pub fn evaluate_deterministic(
    budget: f64,
    allocation: &Allocation,
    priors: &ChannelPriors,
    goal: Goal,
    avg_deal_size: f64,
) -> f64 {
    let cpm = priors.map(|_, p| p.cpm.midpoint());
    let ctr = priors.map(|_, p| p.ctr.midpoint());
    let cvr = priors.map(|_, p| p.cvr.midpoint());
    let conversions = per_channel_conversions(budget, allocation, &cpm, &ctr, &cvr);
    objective_from_conversions(goal, conversions, budget, avg_deal_size)
}

/// `n` independent draws of the objective, sampling `(cpm, ctr, cvr)` per
/// channel per draw uniformly from its prior interval. Returns the sorted
/// outcomes so callers needing more than p10/p50/p90 can reuse the work.
pub fn monte_carlo_samples(
    budget: f64,
    allocation: &Allocation,
    priors: &ChannelPriors,
    goal: Goal,
    avg_deal_size: f64,
    n: usize,
    seed: u64,
) -> Vec<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut outcomes = Vec::with_capacity(n.max(1));
    for _ in 0..n.max(1) {
        let cpm = priors.map(|_, p| sample_interval(&mut rng, p.cpm.low, p.cpm.high));
        let ctr = priors.map(|_, p| sample_interval(&mut rng, p.ctr.low, p.ctr.high));
        let cvr = priors.map(|_, p| sample_interval(&mut rng, p.cvr.low, p.cvr.high));
        let conversions = per_channel_conversions(budget, allocation, &cpm, &ctr, &cvr);
        outcomes.push(objective_from_conversions(goal, conversions, budget, avg_deal_size));
    }
    outcomes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    outcomes
}

fn sample_interval(rng: &mut ChaCha8Rng, low: f64, high: f64) -> f64 {
    let (low, high) = sanitize_interval(low, high);
    if (high - low).abs() < f64::EPSILON {
        return low;
    }
    rng.gen_range(low..=high)
}

/// NaN/Infinity in a prior interval must not propagate; treat it as a
/// degenerate zero-width interval at the origin instead.
fn sanitize_interval(low: f64, high: f64) -> (f64, f64) {
    let low = if low.is_finite() && low >= 0.0 { low } else { 0.0 };
    let high = if high.is_finite() && high >= low { high } else { low };
    (low, high)
}

/// Linear-interpolated percentile of an already-sorted sample set.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let frac = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

pub fn monte_carlo_outcome(
    budget: f64,
    allocation: &Allocation,
    priors: &ChannelPriors,
    goal: Goal,
    avg_deal_size: f64,
    n: usize,
    seed: u64,
) -> McOutcome {
    let samples = monte_carlo_samples(budget, allocation, priors, goal, avg_deal_size, n, seed);
    McOutcome {
        p10: percentile(&samples, 0.10),
        p50: percentile(&samples, 0.50),
        p90: percentile(&samples, 0.90),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChannelMap, Interval, Priors};

    fn even_allocation() -> Allocation {
        Allocation::new(ChannelMap::filled(0.25))
    }

    fn uniform_priors(cpm: (f64, f64), ctr: (f64, f64), cvr: (f64, f64)) -> ChannelPriors {
        ChannelMap::filled(Priors {
            cpm: Interval::new(cpm.0, cpm.1),
            ctr: Interval::new(ctr.0, ctr.1),
            cvr: Interval::new(cvr.0, cvr.1),
        })
    }

    #[test]
    fn zero_cpm_channel_contributes_zero_not_nan() {
        let priors = ChannelMap::from_fn(|c| match c {
            Channel::Google => Priors { cpm: Interval::new(0.0, 0.0), ctr: Interval::new(0.02, 0.02), cvr: Interval::new(0.05, 0.05) },
            _ => Priors { cpm: Interval::new(10.0, 10.0), ctr: Interval::new(0.02, 0.02), cvr: Interval::new(0.05, 0.05) },
        });
        let outcome = evaluate_deterministic(10_000.0, &even_allocation(), &priors, Goal::Demos, 1000.0);
        assert!(outcome.is_finite());
    }

    #[test]
    fn nan_prior_is_sanitized_not_propagated() {
        let mut priors = uniform_priors((10.0, 20.0), (0.02, 0.04), (0.05, 0.1));
        priors.set(Channel::Meta, Priors {
            cpm: Interval::new(f64::NAN, f64::INFINITY),
            ctr: Interval::new(0.02, 0.04),
            cvr: Interval::new(0.05, 0.1),
        });
        let outcome = evaluate_deterministic(10_000.0, &even_allocation(), &priors, Goal::Demos, 1000.0);
        assert!(outcome.is_finite());
        let mc = monte_carlo_outcome(10_000.0, &even_allocation(), &priors, Goal::Demos, 1000.0, 50, 7);
        assert!(mc.p10.is_finite() && mc.p50.is_finite() && mc.p90.is_finite());
    }

    #[test]
    fn monte_carlo_percentiles_are_monotonic() {
        let priors = uniform_priors((10.0, 20.0), (0.02, 0.04), (0.05, 0.1));
        let outcome = monte_carlo_outcome(10_000.0, &even_allocation(), &priors, Goal::Demos, 1000.0, 200, 42);
        assert!(outcome.p10 <= outcome.p50);
        assert!(outcome.p50 <= outcome.p90);
    }

    #[test]
    fn deterministic_is_seed_independent_and_reproducible() {
        let priors = uniform_priors((10.0, 20.0), (0.02, 0.04), (0.05, 0.1));
        let a = evaluate_deterministic(10_000.0, &even_allocation(), &priors, Goal::Demos, 1000.0);
        let b = evaluate_deterministic(10_000.0, &even_allocation(), &priors, Goal::Demos, 1000.0);
        assert_eq!(a, b);
    }

    #[test]
    fn same_seed_yields_bit_identical_monte_carlo_runs() {
        let priors = uniform_priors((10.0, 20.0), (0.02, 0.04), (0.05, 0.1));
        let a = monte_carlo_samples(10_000.0, &even_allocation(), &priors, Goal::Demos, 1000.0, 200, 99);
        let b = monte_carlo_samples(10_000.0, &even_allocation(), &priors, Goal::Demos, 1000.0, 200, 99);
        assert_eq!(a, b);
    }

    #[test]
    fn cac_objective_uses_epsilon_floor_not_infinity() {
        let priors = ChannelMap::filled(Priors {
            cpm: Interval::new(10.0, 10.0),
            ctr: Interval::new(0.0, 0.0),
            cvr: Interval::new(0.0, 0.0),
        });
        let outcome = evaluate_deterministic(10_000.0, &even_allocation(), &priors, Goal::Cac, 1000.0);
        assert!(outcome.is_finite());
        assert!(outcome > 0.0);
    }
}
