//! System-wide default constants.
//!
//! Centralises magic numbers that would otherwise be scattered across the
//! optimizer, ensemble, and confidence modules. Grouped by subsystem.

// ============================================================================
// Optimize options
// ============================================================================

/// Default Monte-Carlo sample count per forward-model evaluation.
pub const DEFAULT_MC_SAMPLES: usize = 200;

/// Default share-grid step for the Monte-Carlo grid optimizer.
pub const DEFAULT_GRID_STEP: f64 = 0.05;

/// Default iteration cap for the gradient optimizer.
pub const DEFAULT_MAX_ITERATIONS: usize = 1000;

/// Default learning rate for the gradient optimizer's update rule.
pub const DEFAULT_GRAD_LEARNING_RATE: f64 = 0.01;

/// Gradient-norm convergence tolerance.
pub const DEFAULT_GRAD_TOLERANCE: f64 = 1e-6;

/// Finite-difference perturbation step for gradient estimation.
pub const DEFAULT_GRAD_STEP: f64 = 1e-4;

/// Mean-pairwise-distance threshold above which an algorithm result is an
/// ensemble outlier.
pub const DEFAULT_OUTLIER_THRESHOLD: f64 = 0.5;

/// `avgDealSize` assumed for the `revenue` goal when the caller omits it.
pub const DEFAULT_AVG_DEAL_SIZE: f64 = 1000.0;

// ============================================================================
// Forward model
// ============================================================================

/// Floor used in the CAC objective's denominator to avoid division by zero.
pub const CAC_EPSILON: f64 = 1e-9;

// ============================================================================
// Gradient optimizer
// ============================================================================

/// Multiplier applied to the learning rate on a rejected step.
pub const GRAD_LR_DECAY: f64 = 0.9;

/// Learning rate floor below which the gradient run aborts.
pub const GRAD_LR_FLOOR: f64 = 1e-8;

/// Inner-loop cap on constraint-redistribution passes per gradient step.
pub const GRAD_MAX_REDISTRIBUTE_ITERATIONS: usize = 10;

// ============================================================================
// Monte-Carlo grid optimizer
// ============================================================================

/// Number of top-ranked candidates retained as `alternatives.topAllocations`.
pub const GRID_TOP_K: usize = 5;

// ============================================================================
// Ensemble combiner
// ============================================================================

/// The "maximum variance" constant in the agreement formula: the per-channel
/// variance of a one-hot allocation averaged against a uniform one, for a
/// four-channel set. Codified literally rather than re-derived so the
/// `agreement` threshold semantics in `spec` stay numerically stable.
pub const ENSEMBLE_V_MAX: f64 = 0.0625;

// ============================================================================
// Confidence scorer
// ============================================================================

/// Confidence substituted for a missing external (LLM) validation score.
pub const DEFAULT_LLM_CONFIDENCE: f64 = 0.7;

/// Confidence substituted when no benchmark analysis was supplied.
pub const DEFAULT_BENCHMARK_CONFIDENCE: f64 = 0.7;

// Fusion weights with an LLM score present: (consensus, stability, benchmark,
// performance-convergence, llm).
pub const CONFIDENCE_WEIGHTS_WITH_LLM: [f64; 5] = [0.25, 0.20, 0.20, 0.15, 0.20];

// Fusion weights without an LLM score: (consensus, stability, benchmark,
// performance-convergence, llm=0).
pub const CONFIDENCE_WEIGHTS_NO_LLM: [f64; 5] = [0.30, 0.25, 0.25, 0.20, 0.0];

// ============================================================================
// Pipeline controller
// ============================================================================

/// Soft time budget for CPU-bound stages before a timeout warning fires.
pub const STAGE_SOFT_TIMEOUT_CPU_SECS: u64 = 30;

/// Soft time budget for the two external stages.
pub const STAGE_SOFT_TIMEOUT_EXTERNAL_SECS: u64 = 60;

/// Hard timeout multiplier: exceeding `soft * HARD_TIMEOUT_MULTIPLIER` fails
/// the stage outright.
pub const HARD_TIMEOUT_MULTIPLIER: u64 = 3;

/// Per-subscriber event channel capacity before drop-oldest backpressure
/// engages.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
