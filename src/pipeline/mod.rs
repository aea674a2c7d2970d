//! Pipeline Controller & Event Bus
//!
//! ## Nine-Stage Optimization DAG
//!
//! ```text
//! STAGE 1: dataFetch            (external: priors retrieval)
//! STAGE 2: validation
//! STAGE 3: ensembleOptimization (Monte-Carlo grid optimizer)
//! STAGE 4: bayesianOptimization (perturbed-prior posterior sampler)
//! STAGE 5: gradientOptimization (finite-difference descent)
//! STAGE 6: confidenceScoring    (ensemble fusion + stability)
//! STAGE 7: benchmarkValidation
//! STAGE 8: llmValidation        (external)
//! STAGE 9: finalSelection       (assembles EnhancedModelResult)
//! ```
//!
//! Stages 3-5 are "independent optimization variants" per their shared
//! `(budget, priors, assumptions, options) -> AlgorithmResult` capability;
//! the Ensemble Combiner's fusion runs at the start of `confidenceScoring`,
//! once all three have reported in, since the Confidence Scorer is the
//! first downstream consumer of the fused allocation.
//!
//! # Usage
//!
//! ```ignore
//! use budget_allocator_core::pipeline::{
//!     CancellationToken, Collaborators, EventBus, OptimizeRequest, PipelineController,
//! };
//!
//! let controller = PipelineController::new(Collaborators::default());
//! let bus = EventBus::new();
//! let (pipeline, result) = controller.run(request, &bus, CancellationToken::new()).await?;
//! ```

mod coordinator;
mod event_bus;

pub use coordinator::{CancellationToken, Collaborators, OptimizeRequest, PipelineController};
pub use event_bus::{EventBus, EventKind, EventPayload, EventSubscriber, PipelineEvent};
