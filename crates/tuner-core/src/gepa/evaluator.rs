//! Batch evaluation: generate then judge each sample, then aggregate

use super::generator::TrajectoryGenerator;
use super::judge::{Judge, JudgeOutcome, MetricsPrompt};
use super::{MetricScores, Progress};
use crate::trajectory::Sample;
use serde_json::Value;
use tracing::debug;

/// Everything about an evaluation that stays fixed across a run
#[derive(Clone, Copy)]
pub struct EvalSettings<'a> {
    pub generation_model: &'a str,
    pub judge_model: &'a str,
    pub metrics: &'a [String],
    /// Present only when structured output was requested and a schema exists
    pub schema: Option<&'a Value>,
    pub rubric: &'a MetricsPrompt,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchEvaluation {
    pub metrics: MetricScores,
    pub overall_score: f64,
    pub suggestions: Vec<String>,
    pub feedbacks: Vec<String>,
}

pub struct BatchEvaluator {
    generator: TrajectoryGenerator,
    judge: Judge,
}

impl BatchEvaluator {
    pub fn new(generator: TrajectoryGenerator, judge: Judge) -> Self {
        Self { generator, judge }
    }

    /// Evaluate `prompt` over `samples`, one sample at a time so progress
    /// events stay in order. An empty batch makes no completion calls.
    pub async fn evaluate(
        &self,
        samples: &[Sample],
        prompt: &str,
        settings: &EvalSettings<'_>,
        progress: &Progress<'_>,
    ) -> BatchEvaluation {
        if samples.is_empty() {
            debug!("Empty batch, returning zero scores");
            return BatchEvaluation::default();
        }

        let mut outcomes = Vec::with_capacity(samples.len());
        for sample in samples {
            let generated = self
                .generator
                .generate(
                    sample,
                    prompt,
                    settings.generation_model,
                    settings.schema,
                    progress,
                )
                .await;
            let outcome = self
                .judge
                .judge(
                    sample,
                    &generated,
                    settings.judge_model,
                    settings.metrics,
                    settings.rubric,
                )
                .await;

            progress
                .evaluation_output(
                    &sample.id,
                    format!(
                        "Sample {}: Score {:.2}\n{}",
                        sample.id, outcome.overall_score, outcome.detailed_feedback
                    ),
                )
                .await;
            outcomes.push(outcome);
        }

        aggregate(outcomes, settings.metrics)
    }
}

/// Per-metric mean over the outcomes that reported that metric; overall is
/// the mean of the judge's own overall scores.
fn aggregate(outcomes: Vec<JudgeOutcome>, metrics: &[String]) -> BatchEvaluation {
    let mut aggregated = MetricScores::new();
    for metric in metrics {
        let values: Vec<f64> = outcomes.iter().filter_map(|o| o.metrics.get(metric)).collect();
        if !values.is_empty() {
            aggregated.insert(metric.clone(), values.iter().sum::<f64>() / values.len() as f64);
        }
    }

    let overall_score =
        outcomes.iter().map(|o| o.overall_score).sum::<f64>() / outcomes.len() as f64;

    let (suggestions, feedbacks) = outcomes
        .into_iter()
        .map(|o| (o.suggested_improvements, o.detailed_feedback))
        .unzip();

    BatchEvaluation {
        metrics: aggregated,
        overall_score,
        suggestions,
        feedbacks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::testing::{text_reply, verdict, ScriptedModel};
    use crate::completion::CompletionModel;
    use crate::config::{UserConfig, UserConfigHandle};
    use crate::gepa::events::testing::CollectingSink;
    use crate::gepa::{EventKind, Metric};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn sample(id: &str) -> Sample {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "messages": [{"role": "user", "content": format!("question {}", id)}],
            "feedback": {"rating": "positive"}
        }))
        .unwrap()
    }

    fn evaluator(model: Arc<dyn CompletionModel>) -> BatchEvaluator {
        let config = Arc::new(UserConfigHandle::fixed(UserConfig::default()));
        BatchEvaluator::new(
            TrajectoryGenerator::new(model.clone(), config),
            Judge::new(model),
        )
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_calls() {
        let model = Arc::new(ScriptedModel::failing());
        let metrics = vec!["tone".to_string()];
        let rubric = MetricsPrompt::default();
        let settings = EvalSettings {
            generation_model: "gen",
            judge_model: "judge",
            metrics: &metrics,
            schema: None,
            rubric: &rubric,
        };

        let result = evaluator(model.clone())
            .evaluate(&[], "prompt", &settings, &Progress::silent())
            .await;

        assert_eq!(result, BatchEvaluation::default());
        assert!(result.metrics.is_empty());
        assert_eq!(result.overall_score, 0.0);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_aggregates_means_and_collects_feedback() {
        let judged = Arc::new(AtomicUsize::new(0));
        let counter = judged.clone();
        let model = Arc::new(ScriptedModel::new(
            |_| Ok(text_reply("answer")),
            move |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let score = if n == 0 { 0.4 } else { 0.8 };
                Ok(verdict(score, &format!("feedback {}", n), &format!("suggestion {}", n)))
            },
        ));
        let metrics = vec!["tone".to_string(), "accuracy".to_string()];
        let rubric = MetricsPrompt::default();
        let settings = EvalSettings {
            generation_model: "gen",
            judge_model: "judge",
            metrics: &metrics,
            schema: None,
            rubric: &rubric,
        };
        let sink = CollectingSink::default();
        let progress = Progress::new(&sink, 3, 1, 0.5);

        let result = evaluator(model)
            .evaluate(&[sample("a"), sample("b")], "prompt", &settings, &progress)
            .await;

        assert!((result.overall_score - 0.6).abs() < 1e-9);
        assert!((result.metrics.value_or_zero("tone") - 0.6).abs() < 1e-9);
        // only selected metrics are aggregated
        assert_eq!(result.metrics.len(), 2);
        assert_eq!(result.suggestions, vec!["suggestion 0", "suggestion 1"]);
        assert_eq!(result.feedbacks, vec!["feedback 0", "feedback 1"]);

        assert_eq!(
            sink.kinds(),
            vec![
                EventKind::SampleOutput,
                EventKind::SampleOutput,
                EventKind::EvaluationOutput,
                EventKind::SampleOutput,
                EventKind::SampleOutput,
                EventKind::EvaluationOutput,
            ]
        );
        let events = sink.events();
        assert!(events.iter().all(|e| e.iteration == 3));
        assert_eq!(
            events[2].content.as_deref(),
            Some("Sample a: Score 0.40\nfeedback 0")
        );
    }

    #[test]
    fn test_missing_metric_is_excluded_from_mean() {
        let with_tone = JudgeOutcome {
            metrics: [("tone", 0.9)].into_iter().collect(),
            overall_score: 0.9,
            detailed_feedback: String::new(),
            suggested_improvements: String::new(),
        };
        let without_tone = JudgeOutcome {
            metrics: MetricScores::new(),
            overall_score: 0.3,
            detailed_feedback: String::new(),
            suggested_improvements: String::new(),
        };
        let metrics = vec!["tone".to_string(), "accuracy".to_string()];
        let result = aggregate(vec![with_tone, without_tone], &metrics);

        assert_eq!(result.metrics.get("tone"), Some(0.9));
        assert_eq!(result.metrics.get("accuracy"), None);
        assert!((result.overall_score - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_capability_failure_degrades() {
        let metrics = Metric::default_names();
        let rubric = MetricsPrompt::default();
        let settings = EvalSettings {
            generation_model: "gen",
            judge_model: "judge",
            metrics: &metrics,
            schema: None,
            rubric: &rubric,
        };
        let result = evaluator(Arc::new(ScriptedModel::failing()))
            .evaluate(&[sample("a")], "prompt", &settings, &Progress::silent())
            .await;
        assert_eq!(result.overall_score, 0.5);
        assert_eq!(result.suggestions, vec![String::new()]);
    }
}
