//! Budget Allocator Core: optimization and validation engine for
//! cross-channel paid-media budget allocation.
//!
//! Allocates a fixed budget across four channels (`google`, `meta`,
//! `tiktok`, `linkedin`) against one of three objectives (expected demos,
//! expected revenue, or customer acquisition cost), under per-channel share
//! constraints, while quantifying the reliability of the recommendation.
//!
//! ## Architecture
//!
//! - **Forward Model** (`forward_model`): pure deterministic + Monte-Carlo
//!   outcome evaluation for a fixed allocation.
//! - **Optimizers** (`optimizer`): three independent search strategies —
//!   Monte-Carlo grid, finite-difference gradient descent, and a
//!   perturbed-posterior sampler — each built on the forward model.
//! - **Ensemble Combiner** (`ensemble`): fuses the three algorithm results
//!   into one allocation, flagging outliers and cross-algorithm consensus.
//! - **Confidence Scorer** (`confidence`): fuses consensus, stability, and
//!   benchmark deviation into a calibrated confidence score.
//! - **Pipeline Controller & Event Bus** (`pipeline`): sequences the nine
//!   stages of one optimization run and publishes progress.
//! - **Collaborators** (`collaborators`): trait interfaces for the two
//!   external stages (priors retrieval, LLM validation) with trivial
//!   built-in defaults.

pub mod collaborators;
pub mod config;
pub mod confidence;
pub mod ensemble;
pub mod error;
pub mod forward_model;
pub mod optimizer;
pub mod pipeline;
pub mod types;

pub use error::{OptimizeError, Result};
pub use pipeline::{CancellationToken, Collaborators, EventBus, OptimizeRequest, PipelineController};
pub use types::{Assumptions, Channel, ChannelPriors, EnhancedModelResult, Goal, OptimizationPipeline, OptimizeOptions};

/// Runs one full optimization with the default (standalone) collaborators
/// and a fresh event bus with no subscribers. Convenience entry point for
/// callers who only need the terminal result; use [`PipelineController`]
/// directly to subscribe to stage progress.
///
/// Returns `Err` only for `InvalidInput` (§7): a non-positive or non-finite
/// budget, or inverted/out-of-range per-channel share bounds. No pipeline is
/// created for that case. Every other outcome, including cancellation and
/// non-compensable stage failure, comes back as `Ok` with the terminal
/// pipeline snapshot.
pub async fn optimize(request: OptimizeRequest) -> Result<(OptimizationPipeline, Option<EnhancedModelResult>)> {
    let controller = PipelineController::default();
    let bus = EventBus::new();
    controller.run(request, &bus, CancellationToken::new()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ChannelMap;

    fn request(goal: Goal) -> OptimizeRequest {
        OptimizeRequest {
            budget: 10_000.0,
            assumptions: Assumptions {
                goal,
                budget: 10_000.0,
                avg_deal_size: None,
                min_pct: ChannelMap::zero(),
                max_pct: ChannelMap::filled(1.0),
            },
            options: OptimizeOptions::default(),
            priors: None,
        }
    }

    #[tokio::test]
    async fn end_to_end_optimize_produces_well_formed_result() {
        let (pipeline, result) = optimize(request(Goal::Demos)).await.expect("request is valid");
        assert_eq!(pipeline.status, types::PipelineStatus::Completed);
        let result = result.expect("default collaborators never fail the run");
        assert!(result.allocation.is_well_formed());
        assert!((0.0..=1.0).contains(&result.overall_confidence));
    }
}
