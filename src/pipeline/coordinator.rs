//! Pipeline Controller — nine-stage optimization run sequence.
//!
//! Grounded in the teacher's `PipelineCoordinator` (phase-numbered
//! processing sequence, `tracing` spans per phase) generalized from the
//! fixed 10-phase WITS pipeline to this spec's fixed 9-stage optimization
//! DAG:
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
//! CRITICAL GUARANTEE: a pipeline's terminal status is never `completed`
//! unless `finalSelection` produced a result; any earlier non-compensable
//! failure leaves `status=error` and no allocation is exposed as final.

use crate::collaborators::{DefaultPriorSource, LlmValidator, NeutralLlmValidator, PriorContext, PriorSource};
use crate::config::defaults::{
    HARD_TIMEOUT_MULTIPLIER, STAGE_SOFT_TIMEOUT_CPU_SECS, STAGE_SOFT_TIMEOUT_EXTERNAL_SECS,
};
use crate::confidence;
use crate::ensemble;
use crate::error::{OptimizeError, Result as CrateResult};
use crate::forward_model;
use crate::optimizer::{bayesian, gradient, monte_carlo};
use crate::pipeline::event_bus::{EventBus, EventKind, EventPayload, PipelineEvent};
use crate::types::{
    AlgorithmResult, Allocation, Alternatives, Assumptions, ChannelMap, ChannelPriors, ConfidenceInterval,
    EnhancedModelResult, OptimizeOptions, OptimizationPipeline, Percentiles, PipelineId, PipelineStatus, Severity,
    StageId, ValidationWarning, WarningCode,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Caller-supplied collaborators for the two external stages. Defaults to
/// the trivial built-in substitutes so the pipeline is runnable standalone
/// (teacher precedent: `Box<dyn KnowledgeStore>` always has a
/// `StaticKnowledgeBase` fallback behind it).
#[derive(Clone)]
pub struct Collaborators {
    pub prior_source: Arc<dyn PriorSource>,
    pub llm_validator: Arc<dyn LlmValidator>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self { prior_source: Arc::new(DefaultPriorSource), llm_validator: Arc::new(NeutralLlmValidator) }
    }
}

/// Input to a single `Optimize` call (spec §6).
///
/// `priors` is the direct, synchronous way to supply channel priors, per
/// §6's `Optimize` signature. When `None`, `dataFetch` falls back to the
/// collaborator-backed [`PriorSource`] (and, on its failure or timeout, to
/// industry-default priors) exactly as it always has.
#[derive(Debug, Clone)]
pub struct OptimizeRequest {
    pub budget: f64,
    pub assumptions: Assumptions,
    pub options: OptimizeOptions,
    pub priors: Option<ChannelPriors>,
}

/// A one-shot cancellation signal shared between the caller and one
/// in-flight pipeline run. Cloning shares the same underlying flag.
///
/// Teacher precedent: `background::self_healer`'s `Arc<RwLock<...>>`
/// shared health flag, generalized to a `watch` channel since cancellation
/// is a single bit, not rich shared data.
#[derive(Clone)]
pub struct CancellationToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    fn receiver(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `work` on the blocking thread pool and races it against
/// cancellation. On cancellation the coordinator stops waiting and returns
/// `None`; the spawned computation is pure and stateless, so letting it run
/// to completion detached is harmless and leaves no shared state to unwind.
async fn run_cancellable<T, F>(cancel: &mut watch::Receiver<bool>, work: F) -> Option<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    if *cancel.borrow() {
        return None;
    }
    let handle = tokio::task::spawn_blocking(work);
    tokio::pin!(handle);
    tokio::select! {
        biased;
        changed = cancel.changed() => {
            if changed.is_ok() && *cancel.borrow() {
                None
            } else {
                (&mut handle).await.ok()
            }
        }
        result = &mut handle => result.ok(),
    }
}

/// The Pipeline Controller: sequences the nine stages of one run,
/// publishes progress to an [`EventBus`], and assembles the final
/// [`EnhancedModelResult`]. Stateless across runs — construct one per
/// `Optimize` call, or reuse it; it owns no per-run state itself.
pub struct PipelineController {
    collaborators: Collaborators,
}

impl PipelineController {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }
}

impl Default for PipelineController {
    fn default() -> Self {
        Self::new(Collaborators::default())
    }
}

/// Helper the coordinator uses to start/progress/complete/fail a stage and
/// publish the matching events, keeping the per-stage contract (§4.6) in
/// one place instead of repeated at every call site.
struct StageRunner<'a> {
    pipeline: &'a mut OptimizationPipeline,
    bus: &'a EventBus,
    stage: StageId,
    soft_budget_secs: u64,
}

impl<'a> StageRunner<'a> {
    fn start(pipeline: &'a mut OptimizationPipeline, bus: &'a EventBus, stage: StageId) -> Self {
        let now = Utc::now();
        pipeline.stage_mut(stage).start(now);
        pipeline.current_stage = Some(stage);
        bus.publish(PipelineEvent::new(EventKind::StageStarted, pipeline.id, Some(stage), now));
        info!(pipeline_id = %pipeline.id, stage = %stage, "stage started");
        let soft_budget_secs =
            if stage.is_external() { STAGE_SOFT_TIMEOUT_EXTERNAL_SECS } else { STAGE_SOFT_TIMEOUT_CPU_SECS };
        Self { pipeline, bus, stage, soft_budget_secs }
    }

    fn progress(&mut self, progress: f64, details: Option<&str>) {
        let now = Utc::now();
        self.pipeline.stage_mut(self.stage).progress = progress.clamp(0.0, 100.0);
        self.bus.publish(
            PipelineEvent::new(EventKind::StageProgress, self.pipeline.id, Some(self.stage), now)
                .with_payload(EventPayload::Progress { progress, details: details.map(str::to_string) }),
        );
    }

    /// Completes the stage and returns a [`WarningCode::StageTimeout`]
    /// warning if it overran its soft time budget. The stage itself still
    /// succeeded — only the hard budget (`hard_budget`) is actually enforced
    /// via `tokio::time::timeout`.
    fn complete(self, details: Option<String>) -> Option<ValidationWarning> {
        let now = Utc::now();
        let start = self.pipeline.stage(self.stage).start_time.unwrap_or(now);
        let elapsed_secs = (now - start).num_seconds().max(0) as u64;
        self.pipeline.stage_mut(self.stage).complete(now, details);
        self.pipeline.completed_stages.push(self.stage);
        self.bus.publish(PipelineEvent::new(EventKind::StageCompleted, self.pipeline.id, Some(self.stage), now));
        info!(pipeline_id = %self.pipeline.id, stage = %self.stage, elapsed_secs, "stage completed");
        if elapsed_secs > self.soft_budget_secs {
            warn!(pipeline_id = %self.pipeline.id, stage = %self.stage, elapsed_secs, budget = self.soft_budget_secs, "stage exceeded soft time budget");
            Some(ValidationWarning::new(
                WarningCode::StageTimeout,
                Severity::Low,
                format!("stage {} took {elapsed_secs}s, exceeding its {}s soft budget", self.stage, self.soft_budget_secs),
            ))
        } else {
            None
        }
    }

    fn fail(self, error: impl Into<String>) -> String {
        let now = Utc::now();
        let error = error.into();
        self.pipeline.stage_mut(self.stage).fail(now, error.clone());
        self.pipeline.failed_stages.push(self.stage);
        self.bus.publish(
            PipelineEvent::new(EventKind::StageFailed, self.pipeline.id, Some(self.stage), now)
                .with_payload(EventPayload::Error { message: error.clone() }),
        );
        warn!(pipeline_id = %self.pipeline.id, stage = %self.stage, error = %error, "stage failed");
        error
    }

    fn hard_budget(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.soft_budget_secs * HARD_TIMEOUT_MULTIPLIER)
    }
}

/// The full per-run working state threaded through stages 3-9. Kept
/// separate from [`OptimizationPipeline`] (which is the published,
/// value-typed state machine) so the coordinator can freely mutate it
/// without that mutation being observable to subscribers.
#[derive(Default)]
struct RunState {
    priors: Option<ChannelPriors>,
    algorithm_results: Vec<AlgorithmResult>,
    grid: Option<monte_carlo::GridOutputs>,
    gradient: Option<gradient::GradientOutputs>,
    fused: Option<ensemble::FusionOutput>,
    stability: Option<crate::types::StabilityMetrics>,
    benchmark: Option<crate::types::BenchmarkAnalysis>,
    llm_score: Option<f64>,
    warnings: Vec<ValidationWarning>,
}

impl PipelineController {
    /// Runs the full nine-stage pipeline for one request.
    ///
    /// `InvalidInput` (§7: non-positive/non-finite budget, inverted or
    /// out-of-range share bounds) is checked before anything else and is
    /// the one error this returns as `Err` — per spec it is "always fatal
    /// to the request; no pipeline is created," so no [`OptimizationPipeline`]
    /// is constructed for it. Every other outcome, including cancellation
    /// and non-compensable stage failure, is returned as `Ok` carrying the
    /// terminal pipeline snapshot; `Some(result)` only when `finalSelection`
    /// completed. `cancel.cancel()` may be called from another task at any
    /// point to abort the run at its next stage boundary.
    pub async fn run(
        &self,
        request: OptimizeRequest,
        bus: &EventBus,
        cancel: CancellationToken,
    ) -> CrateResult<(OptimizationPipeline, Option<EnhancedModelResult>)> {
        request.assumptions.validate().map_err(OptimizeError::InvalidInput)?;

        let pipeline_id: PipelineId = Uuid::new_v4();
        let start_time = Utc::now();
        let mut pipeline = OptimizationPipeline::new(pipeline_id, start_time);
        pipeline.status = PipelineStatus::Running;
        bus.publish(PipelineEvent::new(EventKind::PipelineStarted, pipeline_id, None, start_time));
        info!(pipeline_id = %pipeline_id, budget = request.budget, goal = ?request.assumptions.goal, "pipeline started");

        let mut state = RunState::default();
        let mut cancel_rx = cancel.receiver();

        let outcome = self.drive(&request, bus, &mut pipeline, &mut state, &mut cancel_rx).await;

        let end_time = Utc::now();
        pipeline.end_time = Some(end_time);
        pipeline.total_duration_ms = Some((end_time - pipeline.start_time).num_milliseconds());
        pipeline.current_stage = None;

        Ok(match &outcome {
            Ok(result) => {
                pipeline.status = PipelineStatus::Completed;
                bus.publish(PipelineEvent::new(EventKind::PipelineCompleted, pipeline_id, None, end_time));
                info!(pipeline_id = %pipeline_id, overall_confidence = result.overall_confidence, "pipeline completed");
                (pipeline, Some(result.clone()))
            }
            Err(OptimizeError::Cancelled) => {
                pipeline.status = PipelineStatus::Cancelled;
                bus.publish(PipelineEvent::new(EventKind::PipelineFailed, pipeline_id, None, end_time));
                warn!(pipeline_id = %pipeline_id, "pipeline cancelled");
                (pipeline, None)
            }
            Err(e) => {
                pipeline.status = PipelineStatus::Error;
                bus.publish(PipelineEvent::new(EventKind::PipelineFailed, pipeline_id, None, end_time));
                warn!(pipeline_id = %pipeline_id, error = %e, "pipeline failed");
                (pipeline, None)
            }
        })
    }

    async fn drive(
        &self,
        request: &OptimizeRequest,
        bus: &EventBus,
        pipeline: &mut OptimizationPipeline,
        state: &mut RunState,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> CrateResult<EnhancedModelResult> {
        self.stage_data_fetch(request, bus, pipeline, state).await?;
        self.stage_validation(request, bus, pipeline, state)?;
        self.stage_ensemble_optimization(request, bus, pipeline, state, cancel_rx).await?;
        self.stage_bayesian_optimization(request, bus, pipeline, state, cancel_rx).await?;
        self.stage_gradient_optimization(request, bus, pipeline, state, cancel_rx).await?;
        self.stage_confidence_scoring(request, bus, pipeline, state)?;
        self.stage_benchmark_validation(request, bus, pipeline, state)?;
        self.stage_llm_validation(bus, pipeline, state).await?;
        self.stage_final_selection(request, bus, pipeline, state)
    }

    async fn stage_data_fetch(
        &self,
        request: &OptimizeRequest,
        bus: &EventBus,
        pipeline: &mut OptimizationPipeline,
        state: &mut RunState,
    ) -> CrateResult<()> {
        let mut runner = StageRunner::start(pipeline, bus, StageId::DataFetch);

        if let Some(priors) = request.priors {
            runner.progress(100.0, Some("using caller-supplied priors"));
            if let Some(w) = runner.complete(Some("priors supplied directly on the request".to_string())) {
                state.warnings.push(w);
            }
            state.priors = Some(priors);
            return Ok(());
        }

        runner.progress(50.0, Some("fetching channel priors"));
        let context = PriorContext::default();
        let hard_budget = runner.hard_budget();
        let fetch = tokio::time::timeout(hard_budget, self.collaborators.prior_source.fetch_priors(&context)).await;

        let priors = match fetch {
            Ok(Ok(priors)) => {
                if let Some(w) = runner.complete(Some("priors fetched from configured source".to_string())) {
                    state.warnings.push(w);
                }
                priors
            }
            Ok(Err(e)) => {
                debug!(error = %e, "prior source failed, substituting industry defaults");
                if let Some(w) = runner.complete(Some("prior source failed; substituted industry defaults".to_string())) {
                    state.warnings.push(w);
                }
                state.warnings.push(ValidationWarning::new(
                    WarningCode::DataFetchFallback,
                    Severity::Medium,
                    format!("prior source unavailable ({e}); using industry-default channel priors"),
                ));
                crate::types::industry_default_priors()
            }
            Err(_) => {
                if let Some(w) = runner.complete(Some("prior source exceeded its time budget; substituted industry defaults".to_string())) {
                    state.warnings.push(w);
                }
                state.warnings.push(ValidationWarning::new(
                    WarningCode::DataFetchFallback,
                    Severity::Medium,
                    "prior source timed out; using industry-default channel priors",
                ));
                crate::types::industry_default_priors()
            }
        };
        state.priors = Some(priors);
        Ok(())
    }

    fn stage_validation(
        &self,
        request: &OptimizeRequest,
        bus: &EventBus,
        pipeline: &mut OptimizationPipeline,
        state: &mut RunState,
    ) -> CrateResult<()> {
        let mut runner = StageRunner::start(pipeline, bus, StageId::Validation);

        if request.assumptions.is_over_constrained() {
            state.warnings.push(ValidationWarning::new(
                WarningCode::ConstraintOverSpecified,
                Severity::High,
                "per-channel share constraints cannot all be satisfied simultaneously; a projected allocation will be returned",
            ));
        }

        let priors = state.priors.as_ref().expect("dataFetch always populates priors");
        let corrected_any = crate::types::Channel::ALL.iter().any(|&c| !priors.get(c).is_valid());
        if corrected_any {
            state.priors = Some(priors.map(|_, p| {
                let fix = |iv: crate::types::Interval| if iv.is_valid() { iv } else { crate::types::Interval::new(0.0, 0.0) };
                crate::types::Priors { cpm: fix(p.cpm), ctr: fix(p.ctr), cvr: fix(p.cvr) }
            }));
            debug!(pipeline_id = %pipeline.id, "sanitized invalid prior intervals before use");
        }

        runner.progress(100.0, None);
        if let Some(w) = runner.complete(Some("inputs validated".to_string())) {
            state.warnings.push(w);
        }
        Ok(())
    }

    async fn stage_ensemble_optimization(
        &self,
        request: &OptimizeRequest,
        bus: &EventBus,
        pipeline: &mut OptimizationPipeline,
        state: &mut RunState,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> CrateResult<()> {
        let mut runner = StageRunner::start(pipeline, bus, StageId::EnsembleOptimization);
        let budget = request.budget;
        let priors = state.priors.clone().expect("validation always populates priors");
        let assumptions = request.assumptions.clone();
        let options = request.options.clone();

        runner.progress(10.0, Some("enumerating share grid"));
        let outcome =
            run_cancellable(cancel_rx, move || monte_carlo::optimize_detailed(budget, &priors, &assumptions, &options))
                .await;

        match outcome {
            Some(grid) => {
                if grid.constraint_over_specified {
                    state.warnings.push(ValidationWarning::new(
                        WarningCode::ConstraintOverSpecified,
                        Severity::High,
                        "no grid candidate satisfied every channel constraint; returned the closest feasible projection",
                    ));
                }
                state.algorithm_results.push(grid.best.clone());
                state.grid = Some(grid);
                runner.progress(100.0, None);
                if let Some(w) = runner.complete(Some("Monte-Carlo grid search complete".to_string())) {
                    state.warnings.push(w);
                }
                Ok(())
            }
            None => {
                runner.fail("cancelled");
                Err(OptimizeError::Cancelled)
            }
        }
    }

    async fn stage_bayesian_optimization(
        &self,
        request: &OptimizeRequest,
        bus: &EventBus,
        pipeline: &mut OptimizationPipeline,
        state: &mut RunState,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> CrateResult<()> {
        let mut runner = StageRunner::start(pipeline, bus, StageId::BayesianOptimization);
        let budget = request.budget;
        let priors = state.priors.clone().expect("validation always populates priors");
        let assumptions = request.assumptions.clone();
        let options = request.options.clone();

        runner.progress(20.0, Some("sampling perturbed posterior"));
        let outcome = run_cancellable(cancel_rx, move || bayesian::optimize(budget, &priors, &assumptions, &options)).await;

        match outcome {
            Some(result) => {
                state.algorithm_results.push(result);
                runner.progress(100.0, None);
                if let Some(w) = runner.complete(Some("Bayesian-style search complete".to_string())) {
                    state.warnings.push(w);
                }
                Ok(())
            }
            None => {
                // Cancellation is unconditional, not a compensable stage
                // failure: the run ends here rather than reaching finalSelection.
                runner.fail("cancelled");
                Err(OptimizeError::Cancelled)
            }
        }
    }

    async fn stage_gradient_optimization(
        &self,
        request: &OptimizeRequest,
        bus: &EventBus,
        pipeline: &mut OptimizationPipeline,
        state: &mut RunState,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> CrateResult<()> {
        let mut runner = StageRunner::start(pipeline, bus, StageId::GradientOptimization);
        let budget = request.budget;
        let priors = state.priors.clone().expect("validation always populates priors");
        let assumptions = request.assumptions.clone();
        let options = request.options.clone();

        runner.progress(15.0, Some("descending objective surface"));
        let outcome =
            run_cancellable(cancel_rx, move || gradient::optimize_detailed(budget, &priors, &assumptions, &options)).await;

        match outcome {
            Some(out) => {
                state.algorithm_results.push(out.result.clone());
                let converged = out.converged;
                let iterations = out.iterations;
                state.gradient = Some(out);
                runner.progress(100.0, None);
                if let Some(w) = runner.complete(Some(format!("gradient descent finished in {iterations} iterations (converged={converged})"))) {
                    state.warnings.push(w);
                }
                Ok(())
            }
            None => {
                // Cancellation is unconditional, not a compensable stage
                // failure: the run ends here rather than reaching finalSelection.
                runner.fail("cancelled");
                Err(OptimizeError::Cancelled)
            }
        }
    }

    fn stage_confidence_scoring(
        &self,
        request: &OptimizeRequest,
        bus: &EventBus,
        pipeline: &mut OptimizationPipeline,
        state: &mut RunState,
    ) -> CrateResult<()> {
        let mut runner = StageRunner::start(pipeline, bus, StageId::ConfidenceScoring);

        if state.algorithm_results.is_empty() {
            let err = runner.fail("no algorithm result survived to fuse; confidence scoring cannot proceed");
            return Err(OptimizeError::StageFailed { stage: StageId::ConfidenceScoring, reason: err });
        }

        let outlier_threshold = request.options.outlier_threshold;
        let fused = ensemble::combine(&state.algorithm_results, outlier_threshold, request.options.algorithm_weights.as_deref());
        let stability = confidence::compute_stability(&state.algorithm_results);

        state.warnings.extend(fused.warnings.clone());
        state.stability = Some(stability);
        state.fused = Some(fused);

        runner.progress(100.0, None);
        if let Some(w) = runner.complete(Some(format!("fused {} algorithm result(s)", state.algorithm_results.len()))) {
            state.warnings.push(w);
        }
        Ok(())
    }

    fn stage_benchmark_validation(
        &self,
        _request: &OptimizeRequest,
        bus: &EventBus,
        pipeline: &mut OptimizationPipeline,
        state: &mut RunState,
    ) -> CrateResult<()> {
        let mut runner = StageRunner::start(pipeline, bus, StageId::BenchmarkValidation);

        let priors = state.priors.as_ref().expect("validation always populates priors");
        let fused_allocation = state.fused.as_ref().expect("confidenceScoring always populates the fused allocation").allocation;
        let benchmark = confidence::compare_to_benchmark(&fused_allocation, priors);
        state.warnings.extend(benchmark.warnings.clone());
        state.benchmark = Some(benchmark);

        runner.progress(100.0, None);
        if let Some(w) = runner.complete(Some("benchmark comparison complete".to_string())) {
            state.warnings.push(w);
        }
        Ok(())
    }

    async fn stage_llm_validation(
        &self,
        bus: &EventBus,
        pipeline: &mut OptimizationPipeline,
        state: &mut RunState,
    ) -> CrateResult<()> {
        let mut runner = StageRunner::start(pipeline, bus, StageId::LlmValidation);
        let fused_allocation = state.fused.as_ref().expect("confidenceScoring always populates the fused allocation").allocation;
        let summary = format!(
            "fused allocation google={:.3} meta={:.3} tiktok={:.3} linkedin={:.3}",
            fused_allocation.share(crate::types::Channel::Google),
            fused_allocation.share(crate::types::Channel::Meta),
            fused_allocation.share(crate::types::Channel::Tiktok),
            fused_allocation.share(crate::types::Channel::Linkedin),
        );
        let hard_budget = runner.hard_budget();
        let validation = tokio::time::timeout(hard_budget, self.collaborators.llm_validator.validate(&fused_allocation, &summary)).await;

        let score = match validation {
            Ok(Ok(v)) => {
                if let Some(w) = runner.complete(Some(v.notes.clone())) {
                    state.warnings.push(w);
                }
                v.confidence
            }
            Ok(Err(e)) => {
                if let Some(w) = runner.complete(Some("LLM validator failed; substituted neutral confidence".to_string())) {
                    state.warnings.push(w);
                }
                state.warnings.push(ValidationWarning::new(
                    WarningCode::LlmValidationFallback,
                    Severity::Medium,
                    format!("LLM validator unavailable ({e}); using neutral confidence 0.7"),
                ));
                crate::config::defaults::DEFAULT_LLM_CONFIDENCE
            }
            Err(_) => {
                if let Some(w) = runner.complete(Some("LLM validator exceeded its time budget; substituted neutral confidence".to_string())) {
                    state.warnings.push(w);
                }
                state.warnings.push(ValidationWarning::new(
                    WarningCode::LlmValidationFallback,
                    Severity::Medium,
                    "LLM validator timed out; using neutral confidence 0.7",
                ));
                crate::config::defaults::DEFAULT_LLM_CONFIDENCE
            }
        };
        state.llm_score = Some(score);
        Ok(())
    }

    fn stage_final_selection(
        &self,
        request: &OptimizeRequest,
        bus: &EventBus,
        pipeline: &mut OptimizationPipeline,
        state: &mut RunState,
    ) -> CrateResult<EnhancedModelResult> {
        let runner = StageRunner::start(pipeline, bus, StageId::FinalSelection);

        let priors = state.priors.clone().expect("validation always populates priors");
        let fused = state.fused.take().expect("confidenceScoring always populates fusion output");
        let stability = state.stability.clone().expect("confidenceScoring always populates stability");
        let benchmark = state.benchmark.clone().expect("benchmarkValidation always populates benchmark analysis");
        let llm_score = state.llm_score;

        let avg_deal_size = request.assumptions.avg_deal_size_or_default();
        let deterministic_outcome =
            forward_model::evaluate_deterministic(request.budget, &fused.allocation, &priors, request.assumptions.goal, avg_deal_size);
        let mc = forward_model::monte_carlo_outcome(
            request.budget,
            &fused.allocation,
            &priors,
            request.assumptions.goal,
            avg_deal_size,
            request.options.mc_samples,
            request.options.seed,
        );

        let breakdown = confidence::overall_confidence(&fused.consensus, &stability, Some(&benchmark), llm_score);
        let overall_confidence = breakdown.compute();
        let channel_confidence = confidence::channel_confidence(&fused.consensus, &stability, Some(&benchmark), llm_score);
        let recommendations = confidence::recommendations(overall_confidence, &stability, &channel_confidence);

        let channel_confidence_intervals: ChannelMap<ConfidenceInterval> = ChannelMap::from_fn(|c| {
            let mut lo = f64::INFINITY;
            let mut hi = f64::NEG_INFINITY;
            for result in &state.algorithm_results {
                let s = result.allocation.share(c);
                lo = lo.min(s);
                hi = hi.max(s);
            }
            if !lo.is_finite() || !hi.is_finite() {
                let s = fused.allocation.share(c);
                lo = s;
                hi = s;
            }
            ConfidenceInterval { lo, hi }
        });

        let top_allocations = state.grid.as_ref().map(|g| g.top_allocations.clone()).unwrap_or_else(|| vec![fused.allocation]);
        let reasoning_explanation = reasoning_explanation(&state.algorithm_results, &fused, overall_confidence);

        if let Some(w) = runner.complete(Some("final allocation selected".to_string())) {
            state.warnings.push(w);
        }
        let mut warnings: Vec<ValidationWarning> = state.warnings.drain(..).collect();
        warnings.sort_by(|a, b| b.severity.cmp(&a.severity));

        let result = EnhancedModelResult {
            allocation: fused.allocation,
            deterministic_outcome: forward_model::sanitize(deterministic_outcome),
            percentiles: Percentiles {
                p10: forward_model::sanitize(mc.p10),
                p50: forward_model::sanitize(mc.p50),
                p90: forward_model::sanitize(mc.p90),
            },
            objective: forward_model::sanitize(deterministic_outcome),
            channel_confidence_intervals,
            overall_confidence,
            channel_confidence,
            stability,
            alternative_algorithms: state.algorithm_results.clone(),
            consensus: fused.consensus,
            benchmark_comparison: benchmark,
            warnings,
            alternatives: Alternatives { top_allocations, reasoning_explanation },
            recommendations,
        };

        Ok(result)
    }
}

fn reasoning_explanation(results: &[AlgorithmResult], fused: &ensemble::FusionOutput, overall_confidence: f64) -> String {
    let algorithm_names: Vec<String> = results.iter().map(|r| r.name.to_string()).collect();
    let outlier_note = if fused.outlier_names.is_empty() {
        "no algorithm results were excluded as outliers".to_string()
    } else {
        format!("excluded {} as outlier(s)", fused.outlier_names.join(", "))
    };
    format!(
        "Fused {} algorithm result(s) ({}) by confidence-weighted average; {}. Agreement {:.2}, overall confidence {:.2}.",
        results.len(),
        algorithm_names.join(", "),
        outlier_note,
        fused.consensus.agreement,
        overall_confidence,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Channel, ChannelMap, Goal, Interval, Priors};

    fn uniform_priors() -> ChannelPriors {
        ChannelMap::filled(Priors {
            cpm: Interval::new(10.0, 20.0),
            ctr: Interval::new(0.02, 0.04),
            cvr: Interval::new(0.05, 0.1),
        })
    }

    fn request(goal: Goal) -> OptimizeRequest {
        let mut options = OptimizeOptions::default();
        options.mc_samples = 30;
        options.grid_step = 0.2;
        options.max_iterations = 50;
        OptimizeRequest {
            budget: 10_000.0,
            assumptions: Assumptions {
                goal,
                budget: 10_000.0,
                avg_deal_size: None,
                min_pct: ChannelMap::zero(),
                max_pct: ChannelMap::filled(1.0),
            },
            options,
            priors: None,
        }
    }

    struct FixedPriorSource(ChannelPriors);

    #[async_trait::async_trait]
    impl PriorSource for FixedPriorSource {
        async fn fetch_priors(&self, _context: &PriorContext) -> anyhow::Result<ChannelPriors> {
            Ok(self.0)
        }
    }

    fn controller() -> PipelineController {
        PipelineController::new(Collaborators {
            prior_source: Arc::new(FixedPriorSource(uniform_priors())),
            llm_validator: Arc::new(NeutralLlmValidator),
        })
    }

    #[tokio::test]
    async fn baseline_run_completes_with_well_formed_allocation() {
        let mut bus = EventBus::new();
        let _sub = bus.subscribe();
        let (pipeline, result) = controller().run(request(Goal::Demos), &bus, CancellationToken::new()).await.expect("request is valid");
        assert_eq!(pipeline.status, PipelineStatus::Completed);
        let result = result.expect("completed pipeline always carries a result");
        assert!(result.allocation.is_well_formed());
        assert!(result.percentiles.p10 <= result.percentiles.p50);
        assert!(result.percentiles.p50 <= result.percentiles.p90);
        assert_eq!(pipeline.completed_stages.len(), StageId::ORDER.len());
    }

    #[tokio::test]
    async fn invalid_budget_is_rejected_before_any_pipeline_is_created() {
        let mut req = request(Goal::Demos);
        req.budget = -1.0;
        req.assumptions.budget = -1.0;
        let bus = EventBus::new();
        let err = controller().run(req, &bus, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, OptimizeError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn events_preserve_started_before_progress_before_terminal_per_stage() {
        let mut bus = EventBus::new();
        let mut sub = bus.subscribe();
        let (_pipeline, _result) = controller().run(request(Goal::Demos), &bus, CancellationToken::new()).await.expect("request is valid");

        let mut seen_started: std::collections::HashSet<StageId> = std::collections::HashSet::new();
        let mut seen_terminal: std::collections::HashSet<StageId> = std::collections::HashSet::new();
        for event in sub.drain() {
            let Some(stage) = event.stage_id else { continue };
            match event.kind {
                EventKind::StageStarted => {
                    assert!(!seen_terminal.contains(&stage));
                    seen_started.insert(stage);
                }
                EventKind::StageProgress => {
                    assert!(seen_started.contains(&stage));
                    assert!(!seen_terminal.contains(&stage));
                }
                EventKind::StageCompleted | EventKind::StageFailed => {
                    assert!(seen_started.contains(&stage));
                    seen_terminal.insert(stage);
                }
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn cancellation_before_gradient_stage_yields_non_completed_status() {
        let mut bus = EventBus::new();
        let _sub = bus.subscribe();
        let cancel = CancellationToken::new();

        // Cancel once the gradient stage is the current one, at its next
        // stage boundary (see run_cancellable's boundary-check semantics).
        let mut sub2 = bus.subscribe();
        let cancel_clone = cancel.clone();
        let watcher = tokio::spawn(async move {
            while let Some(event) = sub2.recv().await {
                if event.stage_id == Some(StageId::GradientOptimization) && event.kind == EventKind::StageStarted {
                    cancel_clone.cancel();
                    break;
                }
            }
        });

        let (pipeline, result) = controller().run(request(Goal::Demos), &bus, cancel).await.expect("request is valid");
        let _ = watcher.await;

        assert_ne!(pipeline.status, PipelineStatus::Completed);
        assert!(result.is_none(), "no partial allocation should be exposed as the final result");
    }

    #[tokio::test]
    async fn external_prior_source_failure_degrades_gracefully() {
        struct FailingPriorSource;
        #[async_trait::async_trait]
        impl PriorSource for FailingPriorSource {
            async fn fetch_priors(&self, _context: &PriorContext) -> anyhow::Result<ChannelPriors> {
                Err(anyhow::anyhow!("unreachable"))
            }
        }
        let ctl = PipelineController::new(Collaborators {
            prior_source: Arc::new(FailingPriorSource),
            llm_validator: Arc::new(NeutralLlmValidator),
        });
        let mut bus = EventBus::new();
        let (pipeline, result) = ctl.run(request(Goal::Demos), &bus, CancellationToken::new()).await.expect("request is valid");
        assert_eq!(pipeline.status, PipelineStatus::Completed);
        let result = result.expect("degraded run still completes");
        assert!(result.allocation.is_well_formed());
        assert!(result.warnings.iter().any(|w| w.code == WarningCode::DataFetchFallback));
    }

    #[tokio::test]
    async fn over_constrained_minpct_still_produces_well_formed_allocation() {
        let mut req = request(Goal::Demos);
        req.assumptions.min_pct = ChannelMap::from_fn(|c| match c {
            Channel::Google => 0.6,
            Channel::Meta => 0.6,
            _ => 0.0,
        });
        let mut bus = EventBus::new();
        let (pipeline, result) = controller().run(req, &bus, CancellationToken::new()).await.expect("request is valid");
        assert_eq!(pipeline.status, PipelineStatus::Completed);
        let result = result.unwrap();
        assert!(result.allocation.is_well_formed());
        assert!(result.warnings.iter().any(|w| w.code == WarningCode::ConstraintOverSpecified && w.severity == Severity::High));
    }
}
