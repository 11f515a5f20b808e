//! Prompt rewriting from consolidated judge feedback

use crate::completion::{CompletionModel, TextRequest};
use std::sync::Arc;
use tracing::{debug, warn};

const SEPARATOR: &str = "\n\n---\n\n";

pub struct Reflector {
    model: Arc<dyn CompletionModel>,
}

impl Reflector {
    pub fn new(model: Arc<dyn CompletionModel>) -> Self {
        Self { model }
    }

    /// Ask the reflection model for a rewrite of `current`. Returns `current`
    /// unchanged if the call fails.
    pub async fn improve(
        &self,
        current: &str,
        suggestions: &[String],
        feedbacks: &[String],
        model: &str,
    ) -> String {
        debug!("Synthesizing {} suggestions", suggestions.len());
        let prompt = format_reflection_prompt(current, suggestions, feedbacks);

        match self
            .model
            .generate_text(TextRequest {
                model,
                system: None,
                prompt: &prompt,
                tools: None,
            })
            .await
        {
            Ok(response) if !response.text.trim().is_empty() => response.text.trim().to_string(),
            Ok(_) => {
                warn!("Reflection returned no text, keeping current prompt");
                current.to_string()
            }
            Err(e) => {
                warn!("Reflection failed, keeping current prompt: {}", e);
                current.to_string()
            }
        }
    }
}

pub fn format_reflection_prompt(current: &str, suggestions: &[String], feedbacks: &[String]) -> String {
    format!(
        r#"You are an expert prompt engineer. Improve the following prompt based on evaluation feedback.

CURRENT PROMPT:
"""
{current}
"""

EVALUATION FEEDBACKS FROM BATCH:
{feedbacks}

SUGGESTED IMPROVEMENTS FROM BATCH:
{suggestions}

Analyze all the feedback and suggestions above. Then write an IMPROVED version of the prompt that:
1. Addresses the most critical issues identified across all samples
2. Incorporates the suggested improvements where they make sense
3. Maintains clarity and specificity
4. Keeps what's working well

Return ONLY the improved prompt text, nothing else."#,
        feedbacks = feedbacks.join(SEPARATOR),
        suggestions = suggestions.join(SEPARATOR),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::testing::{text_reply, ScriptedModel};

    #[tokio::test]
    async fn test_improved_prompt_is_trimmed() {
        let model = ScriptedModel::new(
            |req| {
                assert!(req.tools.is_none());
                assert!(req.prompt.contains("be concise\n\n---\n\nuse tools"));
                Ok(text_reply("  Be concise and use tools.\n"))
            },
            |_| unreachable!(),
        );
        let improved = Reflector::new(Arc::new(model))
            .improve(
                "Be helpful.",
                &["be concise".to_string(), "use tools".to_string()],
                &["too long".to_string()],
                "reflect",
            )
            .await;
        assert_eq!(improved, "Be concise and use tools.");
    }

    #[tokio::test]
    async fn test_failure_returns_current_prompt() {
        let improved = Reflector::new(Arc::new(ScriptedModel::failing()))
            .improve("Be helpful.", &[], &[], "reflect")
            .await;
        assert_eq!(improved, "Be helpful.");
    }

    #[test]
    fn test_reflection_prompt_contains_current_prompt() {
        let prompt = format_reflection_prompt("Answer in French.", &["a".into()], &["b".into()]);
        assert!(prompt.contains("\"\"\"\nAnswer in French.\n\"\"\""));
        assert!(prompt.ends_with("Return ONLY the improved prompt text, nothing else."));
    }
}
