//! Conversation trajectories and labeled samples

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

/// One part of a structured message
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        args: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        result: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
}

/// Message content is either plain text or a list of parts
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Plain text, or the text of the first part when it is a text part
    pub fn first_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Parts(parts) => match parts.first() {
                Some(ContentPart::Text { text }) => Some(text),
                _ => None,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn assistant_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Parts(parts),
        }
    }

    pub fn tool(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Parts(parts),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Positive,
    Negative,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub rating: Rating,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// An ordered conversation. Stored samples and generated outputs share this shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub id: String,
    #[serde(default)]
    pub timestamp: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
}

/// A stored, labeled trajectory used as the reference during evaluation
pub type Sample = Trajectory;

impl Trajectory {
    /// The task input: the first user message's text, or empty
    pub fn first_user_input(&self) -> String {
        self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .and_then(|m| m.content.first_text())
            .unwrap_or_default()
            .to_string()
    }

    pub fn is_positive(&self) -> bool {
        matches!(
            self.feedback,
            Some(Feedback {
                rating: Rating::Positive,
                ..
            })
        )
    }

    pub fn has_assistant_message(&self) -> bool {
        self.messages.iter().any(|m| m.role == Role::Assistant)
    }
}
