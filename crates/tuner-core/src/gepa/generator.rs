//! Trajectory generation under a candidate prompt

use super::Progress;
use crate::completion::{CompletionError, CompletionModel, ObjectRequest, Step, TextRequest};
use crate::config::UserConfigHandle;
use crate::trajectory::{ContentPart, Message, Sample, Trajectory};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;
use tuner_tools::ToolRegistry;

/// Sole assistant content when generation fails
pub const GENERATION_FAILED: &str = "[Error generating response]";

pub struct TrajectoryGenerator {
    model: Arc<dyn CompletionModel>,
    user_config: Arc<UserConfigHandle>,
}

impl TrajectoryGenerator {
    pub fn new(model: Arc<dyn CompletionModel>, user_config: Arc<UserConfigHandle>) -> Self {
        Self { model, user_config }
    }

    /// Run `sample`'s first user message under `system_prompt`.
    ///
    /// With a schema the model must return an object, which becomes the only
    /// assistant message. Without one, tools from the user config are offered,
    /// and the final text stands in when no step produced an assistant message.
    /// Never fails: a completion error yields a trajectory whose assistant
    /// message is [`GENERATION_FAILED`].
    pub async fn generate(
        &self,
        sample: &Sample,
        system_prompt: &str,
        model: &str,
        schema: Option<&Value>,
        progress: &Progress<'_>,
    ) -> Trajectory {
        let input = sample.first_user_input();
        let mut trajectory = Trajectory {
            id: format!("predicted-{}", sample.id),
            timestamp: chrono::Utc::now().to_rfc3339(),
            messages: vec![Message::user(&input)],
            feedback: None,
        };

        let outcome = match schema {
            Some(schema) => {
                progress
                    .sample_output(
                        &sample.id,
                        format!("Generating structured output for sample {}...", sample.id),
                    )
                    .await;
                self.generate_structured(system_prompt, &input, model, schema)
                    .await
            }
            None => {
                progress
                    .sample_output(
                        &sample.id,
                        format!("Generating response for sample {}...", sample.id),
                    )
                    .await;
                self.generate_free_form(system_prompt, &input, model).await
            }
        };

        match outcome {
            Ok((display, generated)) => {
                trajectory.messages.extend(generated);
                if !trajectory.has_assistant_message() {
                    trajectory.messages.push(Message::assistant(display.clone()));
                }
                progress.sample_output(&sample.id, display).await;
            }
            Err(e) => {
                warn!("Generation failed for sample {}: {}", sample.id, e);
                trajectory.messages.push(Message::assistant(GENERATION_FAILED));
            }
        }

        trajectory
    }

    async fn generate_structured(
        &self,
        system_prompt: &str,
        input: &str,
        model: &str,
        schema: &Value,
    ) -> Result<(String, Vec<Message>), CompletionError> {
        let object = self
            .model
            .generate_object(ObjectRequest {
                model,
                system: Some(system_prompt),
                prompt: input,
                schema,
            })
            .await?;
        let output = serde_json::to_string_pretty(&object)
            .map_err(|e| CompletionError::Parse(e.to_string()))?;
        Ok((output.clone(), vec![Message::assistant(output)]))
    }

    async fn generate_free_form(
        &self,
        system_prompt: &str,
        input: &str,
        model: &str,
    ) -> Result<(String, Vec<Message>), CompletionError> {
        let config = self.user_config.current();
        let tools = ToolRegistry::from_specs(&config.tools);
        let response = self
            .model
            .generate_text(TextRequest {
                model,
                system: Some(system_prompt),
                prompt: input,
                tools: Some(&tools),
            })
            .await?;

        Ok((response.text, steps_to_messages(&response.steps)))
    }
}

/// Per step: assistant tool calls, their results, then any free text
fn steps_to_messages(steps: &[Step]) -> Vec<Message> {
    let mut messages = Vec::new();
    for step in steps {
        if !step.tool_calls.is_empty() {
            messages.push(Message::assistant_parts(
                step.tool_calls
                    .iter()
                    .map(|call| ContentPart::ToolCall {
                        tool_call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        args: call.args.clone(),
                    })
                    .collect(),
            ));
            for result in &step.tool_results {
                messages.push(Message::tool(vec![ContentPart::ToolResult {
                    tool_call_id: result.id.clone(),
                    tool_name: result.name.clone(),
                    result: Value::String(result.output.clone()),
                    is_error: result.is_error,
                }]));
            }
        }
        if !step.text.is_empty() {
            messages.push(Message::assistant(step.text.clone()));
        }
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::testing::{text_reply, ScriptedModel};
    use crate::completion::{TextResponse, ToolCallRecord, ToolResultRecord};
    use crate::config::UserConfig;
    use crate::gepa::events::testing::CollectingSink;
    use crate::gepa::EventKind;
    use crate::trajectory::{MessageContent, Role};

    fn sample() -> Sample {
        serde_json::from_value(serde_json::json!({
            "id": "s1",
            "messages": [
                {"role": "user", "content": "Weather in Oslo?"},
                {"role": "assistant", "content": "Cold."}
            ],
            "feedback": {"rating": "positive"}
        }))
        .unwrap()
    }

    fn generator(model: ScriptedModel) -> TrajectoryGenerator {
        TrajectoryGenerator::new(
            Arc::new(model),
            Arc::new(UserConfigHandle::fixed(UserConfig::default())),
        )
    }

    #[tokio::test]
    async fn test_free_form_step_ordering() {
        let model = ScriptedModel::new(
            |req| {
                assert_eq!(req.prompt, "Weather in Oslo?");
                assert_eq!(req.system, Some("be helpful"));
                Ok(TextResponse {
                    text: "It is -3C.".to_string(),
                    steps: vec![
                        Step {
                            text: String::new(),
                            tool_calls: vec![ToolCallRecord {
                                id: "c1".to_string(),
                                name: "weather".to_string(),
                                args: serde_json::json!({"city": "Oslo"}),
                            }],
                            tool_results: vec![ToolResultRecord {
                                id: "c1".to_string(),
                                name: "weather".to_string(),
                                output: "-3C".to_string(),
                                is_error: false,
                            }],
                        },
                        Step {
                            text: "It is -3C.".to_string(),
                            ..Default::default()
                        },
                    ],
                })
            },
            |_| unreachable!(),
        );

        let trajectory = generator(model)
            .generate(&sample(), "be helpful", "m", None, &Progress::silent())
            .await;

        let roles: Vec<Role> = trajectory.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(trajectory.id, "predicted-s1");
        assert_eq!(
            trajectory.messages[3].content,
            MessageContent::Text("It is -3C.".to_string())
        );
    }

    #[tokio::test]
    async fn test_fallback_assistant_message_from_raw_text() {
        let model = ScriptedModel::new(
            |_| {
                Ok(TextResponse {
                    text: "raw".to_string(),
                    steps: vec![],
                })
            },
            |_| unreachable!(),
        );
        let trajectory = generator(model)
            .generate(&sample(), "p", "m", None, &Progress::silent())
            .await;
        assert_eq!(trajectory.messages.len(), 2);
        assert_eq!(trajectory.messages[1], Message::assistant("raw"));
    }

    #[tokio::test]
    async fn test_structured_output_is_pretty_json() {
        let model = ScriptedModel::new(
            |_| unreachable!(),
            |req| {
                assert_eq!(req.schema["type"], "object");
                Ok(serde_json::json!({"answer": 42}))
            },
        );
        let schema = serde_json::json!({"type": "object"});
        let trajectory = generator(model)
            .generate(&sample(), "p", "m", Some(&schema), &Progress::silent())
            .await;
        assert_eq!(
            trajectory.messages[1],
            Message::assistant("{\n  \"answer\": 42\n}")
        );
    }

    #[tokio::test]
    async fn test_failure_yields_sentinel_and_progress() {
        let sink = CollectingSink::default();
        let progress = Progress::new(&sink, 2, 1, 0.5);
        let trajectory = generator(ScriptedModel::failing())
            .generate(&sample(), "p", "m", None, &progress)
            .await;
        assert_eq!(trajectory.messages.len(), 2);
        assert_eq!(trajectory.messages[1], Message::assistant(GENERATION_FAILED));
        // start notification only, no final content
        assert_eq!(sink.kinds(), vec![EventKind::SampleOutput]);
    }

    #[tokio::test]
    async fn test_success_emits_start_and_final_content() {
        let sink = CollectingSink::default();
        let progress = Progress::new(&sink, 1, 1, 0.0);
        generator(ScriptedModel::new(|_| Ok(text_reply("hi")), |_| unreachable!()))
            .generate(&sample(), "p", "m", None, &progress)
            .await;
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].content.as_deref(), Some("hi"));
    }
}
