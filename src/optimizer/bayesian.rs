//! Bayesian-style optimizer.
//!
//! The retrieval pack's distillation of the original system names this
//! stage `bayesianOptimization` without documenting its algorithm. Rather
//! than fabricate a Gaussian-process model, this reuses the Monte-Carlo
//! grid machinery of [`crate::optimizer::monte_carlo`] with perturbed,
//! tightened priors per run — an independent allocation search with
//! distinct sampling, not a shared result with the plain Monte-Carlo stage.

use crate::optimizer::monte_carlo;
use crate::types::{AlgorithmName, AlgorithmResult, Assumptions, ChannelPriors, Interval, OptimizeOptions};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Fraction by which each prior interval is shrunk toward its midpoint to
/// emulate a posterior that has been updated by prior observations.
const POSTERIOR_SHRINK: f64 = 0.35;

fn perturb_priors(priors: &ChannelPriors, seed: u64) -> ChannelPriors {
    let mut rng = ChaCha8Rng::seed_from_u64(seed ^ 0xB17E_5117);
    priors.map(|_, p| {
        let shrink = |iv: Interval| -> Interval {
            let mid = iv.midpoint();
            let half_width = iv.width() / 2.0 * (1.0 - POSTERIOR_SHRINK);
            let jitter = rng.gen_range(-0.05..=0.05) * iv.width().max(1e-9);
            let center = mid + jitter;
            Interval::new((center - half_width).max(0.0), (center + half_width).max(0.0))
        };
        crate::types::Priors { cpm: shrink(p.cpm), ctr: shrink(p.ctr), cvr: shrink(p.cvr) }
    })
}

pub fn optimize(
    budget: f64,
    priors: &ChannelPriors,
    assumptions: &Assumptions,
    options: &OptimizeOptions,
) -> AlgorithmResult {
    let perturbed = perturb_priors(priors, options.seed);
    let mut bayesian_options = options.clone();
    bayesian_options.seed = options.seed ^ 0x8A1E_5BEA;
    let grid_result = monte_carlo::optimize_detailed(budget, &perturbed, assumptions, &bayesian_options);
    AlgorithmResult::new(
        AlgorithmName::Bayesian,
        grid_result.best.allocation,
        grid_result.best.confidence * 0.95,
        grid_result.best.performance,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Channel, ChannelMap, Goal, Priors};

    fn uniform_priors() -> ChannelPriors {
        ChannelMap::filled(Priors {
            cpm: Interval::new(10.0, 20.0),
            ctr: Interval::new(0.02, 0.04),
            cvr: Interval::new(0.05, 0.1),
        })
    }

    fn assumptions() -> Assumptions {
        Assumptions {
            goal: Goal::Demos,
            budget: 10_000.0,
            avg_deal_size: None,
            min_pct: ChannelMap::zero(),
            max_pct: ChannelMap::filled(1.0),
        }
    }

    #[test]
    fn produces_well_formed_allocation() {
        let priors = uniform_priors();
        let assumptions = assumptions();
        let mut options = OptimizeOptions::default();
        options.grid_step = 0.2;
        options.mc_samples = 20;
        let result = optimize(10_000.0, &priors, &assumptions, &options);
        assert!(result.allocation.is_well_formed());
    }

    #[test]
    fn same_seed_is_reproducible() {
        let priors = uniform_priors();
        let assumptions = assumptions();
        let mut options = OptimizeOptions::default();
        options.grid_step = 0.25;
        options.mc_samples = 10;
        options.seed = 123;
        let a = optimize(10_000.0, &priors, &assumptions, &options);
        let b = optimize(10_000.0, &priors, &assumptions, &options);
        assert_eq!(a.allocation.share(Channel::Google), b.allocation.share(Channel::Google));
    }
}
