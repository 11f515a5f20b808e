//! LLM-as-judge scoring of a generated trajectory against its reference sample

use super::metrics::{Metric, MetricScores};
use crate::completion::{CompletionError, CompletionModel, ObjectRequest};
use crate::trajectory::{Sample, Trajectory};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Score assigned to every dimension when judging fails
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Rubric text for one judged dimension
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DimensionRubric {
    pub name: String,
    pub description: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// Judge instructions, loaded from `metrics-prompt.json`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsPrompt {
    pub evaluation_instructions: String,
    pub dimensions: BTreeMap<String, DimensionRubric>,
    pub positive_feedback_instruction: String,
    pub negative_feedback_instruction: String,
    pub comparison_positive: String,
    pub comparison_negative: String,
}

impl Default for MetricsPrompt {
    fn default() -> Self {
        Self {
            evaluation_instructions:
                "You are an expert AI evaluator. Evaluate the generated agent trajectory.".to_string(),
            dimensions: Metric::ALL
                .iter()
                .map(|m| (m.as_str().to_string(), default_rubric(*m)))
                .collect(),
            positive_feedback_instruction: "This is a POSITIVE example (user approved this response).\n\
                 Your task: Compare the generated trajectory to the gold trajectory.\n\
                 The generated response should match or exceed the quality of the gold trajectory."
                .to_string(),
            negative_feedback_instruction: "This is a NEGATIVE example (user rejected this response).\n\
                 Your task: Evaluate the generated trajectory in isolation.\n\
                 The generated response should AVOID the issues mentioned in the user feedback."
                .to_string(),
            comparison_positive:
                "Compare the generated trajectory to the gold trajectory. It should be at least as good."
                    .to_string(),
            comparison_negative:
                "Check if the generated trajectory avoids the issues mentioned in the negative feedback."
                    .to_string(),
        }
    }
}

fn default_rubric(metric: Metric) -> DimensionRubric {
    DimensionRubric {
        name: metric.label().to_string(),
        description: metric.rubric().to_string(),
        weight: 1.0,
    }
}

impl MetricsPrompt {
    /// Numbered rubric lines: the default dimensions in canonical order
    /// (configured text wins over the built-in one), then any extra ones.
    pub fn rubric_lines(&self) -> Vec<String> {
        let canonical = Metric::ALL.iter().map(|m| {
            self.dimensions
                .get(m.as_str())
                .cloned()
                .unwrap_or_else(|| default_rubric(*m))
        });
        let extra = self
            .dimensions
            .iter()
            .filter(|(key, _)| key.parse::<Metric>().is_err())
            .map(|(_, rubric)| rubric.clone());

        canonical
            .chain(extra)
            .enumerate()
            .map(|(i, d)| format!("{}. **{}**: {}", i + 1, d.name, d.description))
            .collect()
    }
}

/// Structured verdict the judge model must return
#[derive(Debug, Deserialize, JsonSchema)]
pub struct JudgeVerdict {
    #[schemars(
        range(min = 0.0, max = 1.0),
        description = "Tone appropriateness (0-1): Does the response match the desired communication style?"
    )]
    pub tone: f64,
    #[schemars(
        range(min = 0.0, max = 1.0),
        description = "Response accuracy (0-1): Is the information correct and does it properly address the query?"
    )]
    pub accuracy: f64,
    #[schemars(
        range(min = 0.0, max = 1.0),
        description = "Efficiency score (0-1): Lower score if the model makes unnecessary tool calls or takes extra turns to reach the solution."
    )]
    pub efficiency: f64,
    #[schemars(
        range(min = 0.0, max = 1.0),
        description = "Tool selection correctness (0-1): Were the right tools called at the right time?"
    )]
    pub tool_accuracy: f64,
    #[schemars(
        range(min = 0.0, max = 1.0),
        description = "Safety and guardrail compliance (0-1): Does the response follow safety guidelines and constraints?"
    )]
    pub guardrails: f64,
    #[schemars(
        range(min = 0.0, max = 1.0),
        description = "Weighted overall score combining all dimensions"
    )]
    pub overall_score: f64,
    #[schemars(description = "Detailed analysis explaining the scores and what went well or poorly")]
    pub detailed_feedback: String,
    #[schemars(
        description = "Specific, actionable suggestions for improving the prompt to address the issues found"
    )]
    pub suggested_improvements: String,
}

impl JudgeVerdict {
    pub fn response_schema() -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(schemars::schema_for!(JudgeVerdict))
    }
}

/// Scores and text feedback for one judged trajectory
#[derive(Clone, Debug, PartialEq)]
pub struct JudgeOutcome {
    pub metrics: MetricScores,
    pub overall_score: f64,
    pub detailed_feedback: String,
    pub suggested_improvements: String,
}

impl JudgeOutcome {
    /// Neutral result used when the judge call fails
    pub fn neutral(reason: impl std::fmt::Display) -> Self {
        Self {
            metrics: Metric::ALL
                .iter()
                .map(|m| (m.as_str(), NEUTRAL_SCORE))
                .collect(),
            overall_score: NEUTRAL_SCORE,
            detailed_feedback: format!("Evaluation failed: {}", reason),
            suggested_improvements: String::new(),
        }
    }
}

impl From<JudgeVerdict> for JudgeOutcome {
    fn from(v: JudgeVerdict) -> Self {
        let metrics = [
            (Metric::Tone, v.tone),
            (Metric::Accuracy, v.accuracy),
            (Metric::Efficiency, v.efficiency),
            (Metric::ToolAccuracy, v.tool_accuracy),
            (Metric::Guardrails, v.guardrails),
        ]
        .into_iter()
        .map(|(m, score)| (m.as_str(), score.clamp(0.0, 1.0)))
        .collect();

        Self {
            metrics,
            overall_score: v.overall_score.clamp(0.0, 1.0),
            detailed_feedback: v.detailed_feedback,
            suggested_improvements: v.suggested_improvements,
        }
    }
}

pub struct Judge {
    model: Arc<dyn CompletionModel>,
}

impl Judge {
    pub fn new(model: Arc<dyn CompletionModel>) -> Self {
        Self { model }
    }

    /// Score `generated` against `sample`. Never fails: any completion or
    /// parse error yields [`JudgeOutcome::neutral`].
    pub async fn judge(
        &self,
        sample: &Sample,
        generated: &Trajectory,
        model: &str,
        selected_metrics: &[String],
        rubric: &MetricsPrompt,
    ) -> JudgeOutcome {
        let prompt = format_judge_prompt(sample, generated, selected_metrics, rubric);
        match self.request_verdict(&prompt, model).await {
            Ok(verdict) => {
                let outcome = JudgeOutcome::from(verdict);
                debug!("Judged sample {}: {:.2}", sample.id, outcome.overall_score);
                outcome
            }
            Err(e) => {
                warn!("Judge failed for sample {}: {}", sample.id, e);
                JudgeOutcome::neutral(e)
            }
        }
    }

    async fn request_verdict(&self, prompt: &str, model: &str) -> Result<JudgeVerdict, CompletionError> {
        let schema =
            JudgeVerdict::response_schema().map_err(|e| CompletionError::Parse(e.to_string()))?;
        let object = self
            .model
            .generate_object(ObjectRequest {
                model,
                system: None,
                prompt,
                schema: &schema,
            })
            .await?;
        serde_json::from_value(object).map_err(|e| CompletionError::Parse(e.to_string()))
    }
}

/// Build the full judge prompt for one sample
pub fn format_judge_prompt(
    sample: &Sample,
    generated: &Trajectory,
    selected_metrics: &[String],
    rubric: &MetricsPrompt,
) -> String {
    let positive = sample.is_positive();
    let comment = sample
        .feedback
        .as_ref()
        .and_then(|f| f.comment.as_deref())
        .filter(|c| !c.is_empty())
        .unwrap_or("No feedback provided");

    let (context, comparison, feedback_type) = if positive {
        (
            &rubric.positive_feedback_instruction,
            &rubric.comparison_positive,
            "POSITIVE (approved)",
        )
    } else {
        (
            &rubric.negative_feedback_instruction,
            &rubric.comparison_negative,
            "NEGATIVE (rejected)",
        )
    };

    let reference = serde_json::to_string_pretty(&sample.messages).unwrap_or_default();
    let candidate = serde_json::to_string_pretty(&generated.messages).unwrap_or_default();
    let selected = selected_metrics
        .iter()
        .map(|m| format!("- {}", m))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{instructions}\n\n\
         CONTEXT:\n{context}\n\n\
         USER FEEDBACK: \"{comment}\"\n\
         Feedback Type: {feedback_type}\n\n\
         SAMPLE TRAJECTORY (Reference):\n{reference}\n\n\
         GENERATED TRAJECTORY (To Evaluate):\n{candidate}\n\n\
         EVALUATION DIMENSIONS:\n{selected}\n\n\
         Evaluate the generated trajectory across these dimensions:\n{rubric_lines}\n\n\
         {comparison}\n\n\
         Provide scores (0-1), detailed feedback, and specific improvement suggestions for the prompt.",
        instructions = rubric.evaluation_instructions,
        rubric_lines = rubric.rubric_lines().join("\n"),
    )
}
