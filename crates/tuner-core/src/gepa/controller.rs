//! The optimization loop: seed, rollouts, completion

use super::evaluator::{BatchEvaluator, EvalSettings};
use super::events::{EventKind, EventSink, Progress, ProgressEvent};
use super::frontier::{ParetoFrontier, PromptCandidate};
use super::generator::TrajectoryGenerator;
use super::judge::Judge;
use super::reflector::Reflector;
use super::{OptimizeError, OptimizeRequest};
use crate::completion::CompletionModel;
use crate::config::{UserConfigHandle, DEFAULT_MODEL};
use crate::storage::{DatasetStore, OptimizationRun, RunPrompt, RunStatus, RunStore};
use crate::trajectory::Sample;
use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct Optimizer {
    evaluator: BatchEvaluator,
    reflector: Reflector,
    runs: Arc<dyn RunStore>,
    dataset: Arc<dyn DatasetStore>,
    user_config: Arc<UserConfigHandle>,
    default_model: String,
}

impl Optimizer {
    pub fn new(
        model: Arc<dyn CompletionModel>,
        runs: Arc<dyn RunStore>,
        dataset: Arc<dyn DatasetStore>,
        user_config: Arc<UserConfigHandle>,
    ) -> Self {
        Self {
            evaluator: BatchEvaluator::new(
                TrajectoryGenerator::new(model.clone(), user_config.clone()),
                Judge::new(model.clone()),
            ),
            reflector: Reflector::new(model),
            runs,
            dataset,
            user_config,
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Model used when a request leaves a model empty and the user config
    /// names none
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Run to completion, turning any failure into a persisted `error` status
    /// and a final `error` event.
    pub async fn run_streaming(
        &self,
        run_id: &str,
        request: OptimizeRequest,
        sink: &dyn EventSink,
    ) -> Result<OptimizationRun> {
        match self.run(run_id, request, sink).await {
            Ok(run) => Ok(run),
            Err(e) => {
                error!("Optimization run {} failed: {:#}", run_id, e);
                self.fail(run_id, &e.to_string(), sink).await;
                Err(e)
            }
        }
    }

    /// Best-effort: mark the run as errored and emit an `error` event
    pub async fn fail(&self, run_id: &str, message: &str, sink: &dyn EventSink) {
        if let Err(e) = self.runs.mark_error(run_id).await {
            warn!("Could not mark run {} as error: {:#}", run_id, e);
        }
        sink.emit(ProgressEvent::failure(Some(run_id.to_string()), message))
            .await;
    }

    /// Seed the frontier, run `num_rollouts` rollouts and persist after each
    pub async fn run(
        &self,
        run_id: &str,
        mut request: OptimizeRequest,
        sink: &dyn EventSink,
    ) -> Result<OptimizationRun> {
        request.validate()?;
        let default_model = self
            .user_config
            .current()
            .default_model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        if request.optimization_model.is_empty() {
            request.optimization_model = default_model.clone();
        }
        if request.reflection_model.is_empty() {
            request.reflection_model = default_model;
        }

        let samples = self
            .dataset
            .load_samples(request.sample_group_id.as_deref())
            .await;
        let seed_prompt = self.dataset.load_prompt().await;
        let schema = if request.use_structured_output {
            self.dataset.load_schema().await
        } else {
            None
        };
        let rubric = self.dataset.load_metrics_prompt().await;

        info!(
            "Loaded {} samples from group {}",
            samples.len(),
            request.sample_group_id.as_deref().unwrap_or("default")
        );

        let mut run = OptimizationRun::start(run_id, request.run_config(), &seed_prompt);
        self.persist(&run).await;

        if samples.is_empty() {
            run.status = RunStatus::Error;
            self.persist(&run).await;
            return Err(OptimizeError::NoSamples.into());
        }

        let mut rng = match request.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let settings = EvalSettings {
            generation_model: &request.optimization_model,
            judge_model: &request.reflection_model,
            metrics: &request.selected_metrics,
            schema: schema.as_ref(),
            rubric: &rubric,
        };

        let mut start = ProgressEvent::new(EventKind::Start, 0, 1, 0.0).message(format!(
            "Starting GEPA optimization with {} samples, {} iterations (Run ID: {})",
            samples.len(),
            request.num_rollouts,
            run_id
        ));
        start.run_id = Some(run_id.to_string());
        sink.emit(start).await;

        // Seed phase
        let batch = sample_batch(&mut rng, &samples, request.batch_size);
        record_samples(&mut run, &batch);
        let seed_eval = self
            .evaluator
            .evaluate(&batch, &seed_prompt, &settings, &Progress::new(sink, 0, 1, 0.0))
            .await;

        let mut frontier = ParetoFrontier::seeded(
            PromptCandidate::new(
                "seed",
                seed_prompt.clone(),
                seed_eval.metrics.clone(),
                seed_eval.overall_score,
            ),
            request.selected_metrics.clone(),
        );
        let mut best_score = seed_eval.overall_score;
        run.prompts.push(RunPrompt {
            iteration: 0,
            prompt: seed_prompt,
            accepted: true,
            score: seed_eval.overall_score,
            metrics: seed_eval.metrics,
        });
        info!("Seed prompt score: {:.2}", best_score);
        sync_run(&mut run, &frontier, best_score);
        self.persist(&run).await;

        for iteration in 1..=request.num_rollouts {
            info!("=== Iteration {}/{} ===", iteration, request.num_rollouts);
            let progress = Progress::new(sink, iteration, frontier.len(), best_score);

            let selected = frontier.select().clone();
            debug!(
                "Selected candidate {} (score {:.2})",
                selected.id, selected.overall_score
            );

            let batch = sample_batch(&mut rng, &samples, request.batch_size);
            record_samples(&mut run, &batch);

            let batch_eval = self
                .evaluator
                .evaluate(&batch, &selected.prompt, &settings, &progress)
                .await;
            let improved_prompt = self
                .reflector
                .improve(
                    &selected.prompt,
                    &batch_eval.suggestions,
                    &batch_eval.feedbacks,
                    &request.reflection_model,
                )
                .await;
            // Same batch, so the comparison is like for like
            let improved_eval = self
                .evaluator
                .evaluate(&batch, &improved_prompt, &settings, &progress)
                .await;

            let accepted = improved_eval.overall_score > batch_eval.overall_score;
            let event = if accepted {
                frontier = frontier.update(PromptCandidate::new(
                    format!("candidate-{}", iteration),
                    improved_prompt.clone(),
                    improved_eval.metrics.clone(),
                    improved_eval.overall_score,
                ));
                if improved_eval.overall_score > best_score {
                    best_score = improved_eval.overall_score;
                }
                info!(
                    "Accepted: {:.2} -> {:.2}, collection size {}",
                    batch_eval.overall_score,
                    improved_eval.overall_score,
                    frontier.len()
                );

                let mut event =
                    ProgressEvent::new(EventKind::Iteration, iteration, frontier.len(), best_score)
                        .accepted(true)
                        .message(format!(
                            "Iteration {}: Improved! Score {:.2} -> {:.2}",
                            iteration, batch_eval.overall_score, improved_eval.overall_score
                        ));
                event.candidate_prompt = Some(improved_prompt.clone());
                event.batch_score = Some(improved_eval.overall_score);
                event.metrics = Some(improved_eval.metrics.clone());
                event
            } else {
                info!(
                    "Rejected: {:.2} vs {:.2}",
                    batch_eval.overall_score, improved_eval.overall_score
                );
                let mut event =
                    ProgressEvent::new(EventKind::Iteration, iteration, frontier.len(), best_score)
                        .message(format!("Iteration {}: No improvement", iteration));
                event.batch_score = Some(batch_eval.overall_score);
                event
            };

            run.prompts.push(RunPrompt {
                iteration,
                prompt: improved_prompt,
                accepted,
                score: improved_eval.overall_score,
                metrics: improved_eval.metrics,
            });
            sync_run(&mut run, &frontier, best_score);
            self.persist(&run).await;
            sink.emit(event).await;
        }

        let final_prompt = frontier.select().prompt.clone();
        info!(
            "Optimization complete: best score {:.2}, collection size {}",
            best_score,
            frontier.len()
        );

        run.status = RunStatus::Completed;
        sync_run(&mut run, &frontier, best_score);
        self.persist(&run).await;

        let mut complete = ProgressEvent::new(
            EventKind::Complete,
            request.num_rollouts,
            frontier.len(),
            best_score,
        )
        .accepted(true)
        .message(format!(
            "Optimization complete! Final score: {:.2} (Run ID: {})",
            best_score, run_id
        ));
        complete.run_id = Some(run_id.to_string());
        complete.final_prompt = Some(final_prompt);
        complete.collection = Some(frontier.into_candidates());
        sink.emit(complete).await;

        Ok(run)
    }

    async fn persist(&self, run: &OptimizationRun) {
        if let Err(e) = self.runs.save(run).await {
            warn!("Failed to save run {}: {:#}", run.id, e);
        }
    }
}

/// Draw `size` samples uniformly with replacement. Small pools give batches
/// with repeated samples, so batch members are not independent.
fn sample_batch(rng: &mut StdRng, samples: &[Sample], size: usize) -> Vec<Sample> {
    (0..size)
        .map(|_| samples[rng.gen_range(0..samples.len())].clone())
        .collect()
}

fn record_samples(run: &mut OptimizationRun, batch: &[Sample]) {
    for sample in batch {
        if !run.samples_used.contains(&sample.id) {
            run.samples_used.push(sample.id.clone());
        }
    }
}

fn sync_run(run: &mut OptimizationRun, frontier: &ParetoFrontier, best_score: f64) {
    run.best_score = best_score;
    run.collection_size = frontier.len();
    run.final_prompt = frontier.select().prompt.clone();
}
