//! Monte-Carlo grid optimizer: enumerate a share grid, score each candidate
//! with a forward-model Monte-Carlo run, and rank by the objective.

use crate::config::defaults::GRID_TOP_K;
use crate::forward_model;
use crate::types::{
    AlgorithmName, AlgorithmResult, Allocation, Assumptions, Channel, ChannelMap, ChannelPriors, Goal,
    OptimizeOptions,
};
use rayon::prelude::*;

/// Everything beyond the single best [`AlgorithmResult`] that the pipeline
/// surfaces on the composite result: the top-K runner-ups and the observed
/// per-channel share range across them.
pub struct GridOutputs {
    pub best: AlgorithmResult,
    pub top_allocations: Vec<Allocation>,
    pub channel_share_intervals: ChannelMap<(f64, f64)>,
    pub constraint_over_specified: bool,
}

/// Enumerate every 4-tuple of multiples of `step` in `[0, 1]` that sums to
/// exactly 1 (integer arithmetic on step counts to avoid float drift).
fn generate_grid(step: f64) -> Vec<Allocation> {
    let step = step.clamp(1e-3, 1.0);
    let steps = (1.0 / step).round() as i64;
    let steps = steps.max(1);
    let mut candidates = Vec::new();
    for i in 0..=steps {
        for j in 0..=(steps - i) {
            for k in 0..=(steps - i - j) {
                let l = steps - i - j - k;
                let shares = ChannelMap::from_fn(|c| {
                    let n = match c {
                        Channel::Google => i,
                        Channel::Meta => j,
                        Channel::Tiktok => k,
                        Channel::Linkedin => l,
                    };
                    n as f64 / steps as f64
                });
                candidates.push(Allocation::new(shares));
            }
        }
    }
    candidates
}

fn satisfies_constraints(allocation: &Allocation, assumptions: &Assumptions) -> bool {
    Channel::ALL.iter().all(|&c| {
        let share = allocation.share(c);
        share >= *assumptions.min_pct.get(c) - 1e-9 && share <= *assumptions.max_pct.get(c) + 1e-9
    })
}

/// Project an allocation onto the feasible region defined by `minPct`:
/// pin each channel at its minimum, then spread the remaining budget
/// evenly, matching the gradient optimizer's own constraint redistribution.
fn project_to_feasible(assumptions: &Assumptions) -> Allocation {
    crate::optimizer::gradient::initial_allocation(assumptions)
}

fn rank_key(goal: Goal, outcome_p50: f64, deterministic: f64) -> (f64, f64) {
    match goal {
        Goal::Cac => (outcome_p50, deterministic),
        _ => (-outcome_p50, -deterministic),
    }
}

pub fn optimize_detailed(
    budget: f64,
    priors: &ChannelPriors,
    assumptions: &Assumptions,
    options: &OptimizeOptions,
) -> GridOutputs {
    let avg_deal_size = assumptions.avg_deal_size_or_default();
    let grid = generate_grid(options.grid_step);
    let mut feasible: Vec<Allocation> = grid
        .into_iter()
        .filter(|a| satisfies_constraints(a, assumptions))
        .collect();

    let constraint_over_specified = feasible.is_empty();
    if constraint_over_specified {
        feasible.push(project_to_feasible(assumptions));
    }

    let mut scored: Vec<(Allocation, f64, f64)> = feasible
        .par_iter()
        .map(|alloc| {
            let mc = forward_model::monte_carlo_outcome(
                budget,
                alloc,
                priors,
                assumptions.goal,
                avg_deal_size,
                options.mc_samples,
                options.seed,
            );
            let deterministic =
                forward_model::evaluate_deterministic(budget, alloc, priors, assumptions.goal, avg_deal_size);
            (*alloc, mc.p50, deterministic)
        })
        .collect();

    // Stable, deterministic tie-break: objective, then deterministic
    // outcome, then lexicographic channel order (the grid itself is
    // generated in that canonical order, so a stable sort is sufficient).
    scored.sort_by(|a, b| {
        let ka = rank_key(assumptions.goal, a.1, a.2);
        let kb = rank_key(assumptions.goal, b.1, b.2);
        ka.partial_cmp(&kb).unwrap_or(std::cmp::Ordering::Equal)
    });

    let top_allocations: Vec<Allocation> = scored.iter().take(GRID_TOP_K).map(|(a, _, _)| *a).collect();

    let channel_share_intervals = ChannelMap::from_fn(|c| {
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for alloc in &top_allocations {
            let s = alloc.share(c);
            lo = lo.min(s);
            hi = hi.max(s);
        }
        (lo, hi)
    });

    let (best_alloc, best_p50, _best_deterministic) = scored[0];
    let confidence = if constraint_over_specified { 0.3 } else { 0.7 };

    GridOutputs {
        best: AlgorithmResult::new(AlgorithmName::MonteCarlo, best_alloc, confidence, best_p50),
        top_allocations,
        channel_share_intervals,
        constraint_over_specified,
    }
}

pub fn optimize(
    budget: f64,
    priors: &ChannelPriors,
    assumptions: &Assumptions,
    options: &OptimizeOptions,
) -> AlgorithmResult {
    optimize_detailed(budget, priors, assumptions, options).best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Interval, OptimizeOptions, Priors};

    fn uniform_priors() -> ChannelPriors {
        ChannelMap::filled(Priors {
            cpm: Interval::new(10.0, 20.0),
            ctr: Interval::new(0.02, 0.04),
            cvr: Interval::new(0.05, 0.1),
        })
    }

    fn unconstrained_assumptions(goal: Goal) -> Assumptions {
        Assumptions {
            goal,
            budget: 10_000.0,
            avg_deal_size: None,
            min_pct: ChannelMap::zero(),
            max_pct: ChannelMap::filled(1.0),
        }
    }

    #[test]
    fn grid_generates_allocations_summing_to_one() {
        let grid = generate_grid(0.25);
        assert!(!grid.is_empty());
        for a in &grid {
            assert!(a.is_well_formed());
        }
    }

    #[test]
    fn best_candidate_is_well_formed() {
        let priors = uniform_priors();
        let assumptions = unconstrained_assumptions(Goal::Demos);
        let mut options = OptimizeOptions::default();
        options.grid_step = 0.25;
        options.mc_samples = 20;
        let result = optimize(10_000.0, &priors, &assumptions, &options);
        assert!(result.allocation.is_well_formed());
    }

    #[test]
    fn over_constrained_input_flags_constraint_over_specified() {
        let priors = uniform_priors();
        let mut assumptions = unconstrained_assumptions(Goal::Demos);
        assumptions.min_pct = ChannelMap::from_fn(|c| match c {
            Channel::Google => 0.6,
            Channel::Meta => 0.6,
            _ => 0.0,
        });
        let mut options = OptimizeOptions::default();
        options.grid_step = 0.1;
        options.mc_samples = 10;
        let outputs = optimize_detailed(10_000.0, &priors, &assumptions, &options);
        assert!(outputs.constraint_over_specified);
        assert!(outputs.best.allocation.is_well_formed());
    }

    #[test]
    fn feasible_constraints_are_respected() {
        let priors = uniform_priors();
        let mut assumptions = unconstrained_assumptions(Goal::Cac);
        assumptions.max_pct = ChannelMap::from_fn(|c| if c == Channel::Linkedin { 0.1 } else { 1.0 });
        let mut options = OptimizeOptions::default();
        options.grid_step = 0.1;
        options.mc_samples = 20;
        let result = optimize(10_000.0, &priors, &assumptions, &options);
        assert!(result.allocation.share(Channel::Linkedin) <= 0.1 + 1e-6);
    }
}
