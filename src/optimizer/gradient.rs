//! Finite-difference gradient descent with constraint projection.

use crate::config::defaults::{GRAD_LR_DECAY, GRAD_LR_FLOOR, GRAD_MAX_REDISTRIBUTE_ITERATIONS};
use crate::forward_model;
use crate::types::{AlgorithmName, AlgorithmResult, Allocation, Assumptions, Channel, ChannelMap, ChannelPriors, Goal, OptimizeOptions};

/// Extra diagnostics the pipeline/confidence scorer read beyond the
/// uniform `AlgorithmResult`: whether the run converged and its final
/// gradient norm, used in the confidence-mapping rule.
pub struct GradientOutputs {
    pub result: AlgorithmResult,
    pub iterations: usize,
    pub converged: bool,
    pub gradient_norm: f64,
}

/// Uniform start `(0.25, 0.25, 0.25, 0.25)`, then pin any channel with a
/// minimum constraint to that minimum, redistribute the remainder equally
/// over the unconstrained channels, and normalize.
pub(crate) fn initial_allocation(assumptions: &Assumptions) -> Allocation {
    let pinned: ChannelMap<bool> = ChannelMap::from_fn(|c| *assumptions.min_pct.get(c) > 0.0);
    let pinned_sum: f64 = Channel::ALL.iter().filter(|&&c| *pinned.get(c)).map(|&c| *assumptions.min_pct.get(c)).sum();
    let unconstrained_count = Channel::ALL.iter().filter(|&&c| !*pinned.get(c)).count().max(1);
    let remainder_each = (1.0 - pinned_sum).max(0.0) / unconstrained_count as f64;

    let shares = ChannelMap::from_fn(|c| {
        if *pinned.get(c) {
            *assumptions.min_pct.get(c)
        } else {
            remainder_each
        }
    });
    Allocation::new(shares).normalized()
}

/// Clip every share into `[minPct, maxPct]`, normalize to sum to 1, then
/// iteratively redistribute any mass that still violates `maxPct` to
/// channels with spare headroom, capped at [`GRAD_MAX_REDISTRIBUTE_ITERATIONS`]
/// passes.
fn project(shares: ChannelMap<f64>, assumptions: &Assumptions) -> ChannelMap<f64> {
    let mut shares = ChannelMap::from_fn(|c| {
        let min = *assumptions.min_pct.get(c);
        let max = *assumptions.max_pct.get(c);
        shares.get(c).clamp(min, max)
    });

    let normalize = |s: ChannelMap<f64>| -> ChannelMap<f64> {
        let sum = s.sum();
        if sum.abs() < f64::EPSILON {
            ChannelMap::filled(1.0 / Channel::COUNT as f64)
        } else {
            s.map(|_, v| v / sum)
        }
    };
    shares = normalize(shares);

    for _ in 0..GRAD_MAX_REDISTRIBUTE_ITERATIONS {
        let mut excess = 0.0;
        let mut headroom_total = 0.0;
        let overflow: ChannelMap<f64> = ChannelMap::from_fn(|c| {
            let max = *assumptions.max_pct.get(c);
            let over = (shares.get(c) - max).max(0.0);
            excess += over;
            over
        });
        if excess <= 1e-12 {
            break;
        }
        let headroom: ChannelMap<f64> = ChannelMap::from_fn(|c| {
            let max = *assumptions.max_pct.get(c);
            let room = (max - shares.get(c)).max(0.0);
            headroom_total += room;
            room
        });
        if headroom_total <= 1e-12 {
            break;
        }
        shares = ChannelMap::from_fn(|c| {
            let current = *shares.get(c) - *overflow.get(c);
            current + excess * (*headroom.get(c) / headroom_total)
        });
    }
    normalize(shares)
}

fn gradient_norm(grad: &ChannelMap<f64>) -> f64 {
    Channel::ALL.iter().map(|&c| grad.get(c).powi(2)).sum::<f64>().sqrt()
}

pub fn optimize_detailed(
    budget: f64,
    priors: &ChannelPriors,
    assumptions: &Assumptions,
    options: &OptimizeOptions,
) -> GradientOutputs {
    let avg_deal_size = assumptions.avg_deal_size_or_default();
    let sign = if assumptions.goal == Goal::Cac { -1.0 } else { 1.0 };

    let mut current = initial_allocation(assumptions).shares;
    let mut eta = options.grad_learning_rate;
    let mut iterations = 0usize;
    let mut converged = false;
    let mut last_grad_norm = f64::INFINITY;

    let objective_at = |shares: &ChannelMap<f64>| -> f64 {
        forward_model::evaluate_deterministic(budget, &Allocation::new(*shares), priors, assumptions.goal, avg_deal_size)
    };

    let mut current_value = objective_at(&current);

    for _ in 0..options.max_iterations {
        iterations += 1;

        let base_value = current_value;
        let grad = ChannelMap::from_fn(|c| {
            let mut perturbed = current;
            perturbed.set(c, perturbed.get(c) + options.grad_step);
            let perturbed = project(perturbed, assumptions);
            let perturbed_value = objective_at(&perturbed);
            if perturbed.get(c) - current.get(c) <= 0.0 {
                0.0
            } else {
                (perturbed_value - base_value) / options.grad_step
            }
        });

        last_grad_norm = gradient_norm(&grad);
        if last_grad_norm < options.grad_tolerance {
            converged = true;
            break;
        }

        let candidate = ChannelMap::from_fn(|c| current.get(c) + sign * eta * grad.get(c));
        let candidate = project(candidate, assumptions);
        let candidate_value = objective_at(&candidate);

        let improved = match assumptions.goal {
            Goal::Cac => candidate_value < base_value,
            _ => candidate_value > base_value,
        };

        if improved {
            current = candidate;
            current_value = candidate_value;
        } else {
            eta *= GRAD_LR_DECAY;
            if eta < GRAD_LR_FLOOR {
                break;
            }
        }
    }

    let performance = forward_model::sanitize(current_value);

    let mut confidence: f64 = 0.5;
    if converged {
        confidence += 0.3;
    }
    if last_grad_norm < 1e-4 {
        confidence += 0.1;
    }
    let confidence = confidence.min(1.0);

    GradientOutputs {
        result: AlgorithmResult::new(AlgorithmName::Gradient, Allocation::new(current), confidence, performance),
        iterations,
        converged,
        gradient_norm: if last_grad_norm.is_finite() { last_grad_norm } else { 0.0 },
    }
}

pub fn optimize(
    budget: f64,
    priors: &ChannelPriors,
    assumptions: &Assumptions,
    options: &OptimizeOptions,
) -> AlgorithmResult {
    optimize_detailed(budget, priors, assumptions, options).result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Interval, Priors};

    fn uniform_priors() -> ChannelPriors {
        ChannelMap::filled(Priors {
            cpm: Interval::new(10.0, 20.0),
            ctr: Interval::new(0.02, 0.04),
            cvr: Interval::new(0.05, 0.1),
        })
    }

    fn base_assumptions(goal: Goal) -> Assumptions {
        Assumptions {
            goal,
            budget: 10_000.0,
            avg_deal_size: None,
            min_pct: ChannelMap::zero(),
            max_pct: ChannelMap::filled(1.0),
        }
    }

    #[test]
    fn result_allocation_is_always_well_formed() {
        let priors = uniform_priors();
        let assumptions = base_assumptions(Goal::Demos);
        let options = OptimizeOptions::default();
        let out = optimize(10_000.0, &priors, &assumptions, &options);
        assert!(out.allocation.is_well_formed());
    }

    #[test]
    fn respects_max_constraint() {
        let priors = uniform_priors();
        let mut assumptions = base_assumptions(Goal::Cac);
        assumptions.max_pct = ChannelMap::from_fn(|c| if c == Channel::Linkedin { 0.1 } else { 1.0 });
        let options = OptimizeOptions::default();
        let out = optimize(10_000.0, &priors, &assumptions, &options);
        assert!(out.allocation.share(Channel::Linkedin) <= 0.1 + 1e-6);
    }

    #[test]
    fn over_constrained_min_pct_projects_to_feasible_split() {
        let mut assumptions = base_assumptions(Goal::Demos);
        assumptions.min_pct = ChannelMap::from_fn(|c| match c {
            Channel::Google => 0.6,
            Channel::Meta => 0.6,
            _ => 0.0,
        });
        let alloc = initial_allocation(&assumptions);
        assert!(alloc.is_well_formed());
        assert!((alloc.share(Channel::Google) - 0.5).abs() < 1e-6);
        assert!((alloc.share(Channel::Meta) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn nan_priors_never_produce_nan_performance() {
        let mut priors = uniform_priors();
        priors.set(Channel::Google, Priors { cpm: Interval::new(f64::NAN, f64::NAN), ctr: Interval::new(0.02, 0.04), cvr: Interval::new(0.05, 0.1) });
        let assumptions = base_assumptions(Goal::Demos);
        let mut options = OptimizeOptions::default();
        options.max_iterations = 20;
        let out = optimize(10_000.0, &priors, &assumptions, &options);
        assert!(out.performance.is_finite());
    }

    #[test]
    fn negative_budget_still_returns_valid_allocation() {
        let priors = uniform_priors();
        let mut assumptions = base_assumptions(Goal::Demos);
        assumptions.budget = -5000.0;
        let mut options = OptimizeOptions::default();
        options.max_iterations = 20;
        let out = optimize(-5000.0, &priors, &assumptions, &options);
        assert!(out.allocation.is_well_formed());
    }
}
