//! Reflective prompt optimization
//!
//! Each rollout picks the best candidate from the Pareto frontier, scores it
//! on a random batch of labeled samples, asks a reflection model to rewrite
//! it from the judge's feedback, re-scores the rewrite on the same batch and
//! keeps it only if the batch score strictly improves.

pub mod controller;
pub mod evaluator;
pub mod events;
pub mod frontier;
pub mod generator;
pub mod judge;
pub mod metrics;
pub mod reflector;

pub use controller::Optimizer;
pub use evaluator::{BatchEvaluation, BatchEvaluator, EvalSettings};
pub use events::{ChannelSink, EventKind, EventSink, NullSink, Progress, ProgressEvent};
pub use frontier::{dominates, update_frontier, ParetoFrontier, PromptCandidate};
pub use generator::{TrajectoryGenerator, GENERATION_FAILED};
pub use judge::{Judge, JudgeOutcome, MetricsPrompt};
pub use metrics::{Metric, MetricScores};
pub use reflector::Reflector;

use crate::storage::RunConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum OptimizeError {
    #[error("No samples found. Please add samples with feedback first.")]
    NoSamples,
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Parameters of one optimization run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeRequest {
    /// Model that generates trajectories. Empty means the configured default.
    #[serde(default)]
    pub optimization_model: String,
    /// Model that judges and reflects. Empty means the configured default.
    #[serde(default)]
    pub reflection_model: String,
    pub batch_size: usize,
    pub num_rollouts: usize,
    #[serde(default = "Metric::default_names")]
    pub selected_metrics: Vec<String>,
    #[serde(default)]
    pub use_structured_output: bool,
    #[serde(default)]
    pub sample_group_id: Option<String>,
    /// Seed for batch sampling; entropy when absent
    #[serde(default)]
    pub seed: Option<u64>,
}

impl OptimizeRequest {
    pub fn validate(&self) -> Result<(), OptimizeError> {
        if self.batch_size == 0 {
            return Err(OptimizeError::InvalidRequest(
                "batchSize must be at least 1".to_string(),
            ));
        }
        if let Some(unknown) = self
            .selected_metrics
            .iter()
            .find(|m| m.parse::<Metric>().is_err())
        {
            return Err(OptimizeError::InvalidRequest(format!(
                "unknown metric '{}'",
                unknown
            )));
        }
        Ok(())
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            optimization_model: self.optimization_model.clone(),
            reflection_model: self.reflection_model.clone(),
            batch_size: self.batch_size,
            num_rollouts: self.num_rollouts,
            selected_metrics: self.selected_metrics.clone(),
            use_structured_output: self.use_structured_output,
            sample_group_id: self.sample_group_id.clone(),
        }
    }
}
