//! Completion capability used by the generator, the judge and the reflector
//!
//! Any provider that can do free-form text generation (optionally with tool
//! calling) and schema-constrained object generation fits behind
//! [`CompletionModel`]. The bundled implementation speaks the OpenAI-compatible
//! chat completions protocol.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use tuner_tools::ToolRegistry;

use crate::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("completion timed out after {0:?}")]
    Timeout(Duration),
    #[error("model returned no content")]
    EmptyResponse,
    #[error("failed to parse model output: {0}")]
    Parse(String),
}

pub struct TextRequest<'a> {
    pub model: &'a str,
    pub system: Option<&'a str>,
    pub prompt: &'a str,
    pub tools: Option<&'a ToolRegistry>,
}

pub struct ObjectRequest<'a> {
    pub model: &'a str,
    pub system: Option<&'a str>,
    pub prompt: &'a str,
    pub schema: &'a Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub args: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolResultRecord {
    pub id: String,
    pub name: String,
    pub output: String,
    pub is_error: bool,
}

/// One model round-trip inside a text generation
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Step {
    pub text: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub tool_results: Vec<ToolResultRecord>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TextResponse {
    /// Text of the final step
    pub text: String,
    pub steps: Vec<Step>,
}

#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn generate_text(&self, request: TextRequest<'_>) -> Result<TextResponse, CompletionError>;
    async fn generate_object(&self, request: ObjectRequest<'_>) -> Result<Value, CompletionError>;
}

/// Treat an explicit `null` like a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    tool_calls: Vec<ApiToolCall>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    id: String,
    function: ApiFunction,
}

#[derive(Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    arguments: String,
}

/// Client for any OpenAI-compatible `/v1/chat/completions` endpoint
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    call_timeout: Duration,
    max_tool_steps: usize,
}

impl OpenAiCompatibleClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        call_timeout: Duration,
        max_tool_steps: usize,
    ) -> Result<Self, CompletionError> {
        let client = reqwest::Client::builder()
            .user_agent("Tuner/0.1.0")
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
            call_timeout,
            max_tool_steps: max_tool_steps.max(1),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, CompletionError> {
        Self::new(
            config.api_url.clone(),
            config.api_key.clone(),
            config.call_timeout,
            config.max_tool_steps,
        )
    }

    /// Resolve the chat completions endpoint from the base URL.
    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    async fn chat(&self, body: &Value) -> Result<ChatMessage, CompletionError> {
        let mut request = self.client.post(self.endpoint()).json(body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CompletionError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or(CompletionError::EmptyResponse)
    }

    async fn run_text(&self, request: TextRequest<'_>) -> Result<TextResponse, CompletionError> {
        let mut messages = opening_messages(request.system, request.prompt);
        let tools = request.tools.filter(|t| !t.is_empty());
        let tool_defs: Vec<Value> = tools
            .map(|t| t.definitions().iter().map(|d| d.to_openai()).collect())
            .unwrap_or_default();

        let mut steps = Vec::new();
        for step_num in 0..self.max_tool_steps {
            let mut body = json!({ "model": request.model, "messages": messages });
            if !tool_defs.is_empty() {
                body["tools"] = Value::Array(tool_defs.clone());
            }

            let reply = self.chat(&body).await?;
            let text = reply.content.clone().unwrap_or_default();

            let registry = match tools {
                Some(registry) if !reply.tool_calls.is_empty() => registry,
                _ => {
                    steps.push(Step {
                        text,
                        ..Default::default()
                    });
                    break;
                }
            };

            debug!(
                "Step {}: model requested {} tool call(s)",
                step_num,
                reply.tool_calls.len()
            );

            messages.push(json!({
                "role": "assistant",
                "content": reply.content,
                "tool_calls": reply.tool_calls.iter().map(|c| json!({
                    "id": c.id,
                    "type": "function",
                    "function": { "name": c.function.name, "arguments": c.function.arguments },
                })).collect::<Vec<_>>(),
            }));

            let mut step = Step {
                text,
                ..Default::default()
            };
            for call in reply.tool_calls {
                let args: Value = serde_json::from_str(&call.function.arguments)
                    .unwrap_or_else(|_| json!({}));
                let result = registry.execute(&call.function.name, &args).await;
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": call.id,
                    "content": result.content(),
                }));
                step.tool_results.push(ToolResultRecord {
                    id: call.id.clone(),
                    name: call.function.name.clone(),
                    output: result.content().to_string(),
                    is_error: !result.success,
                });
                step.tool_calls.push(ToolCallRecord {
                    id: call.id,
                    name: call.function.name,
                    args,
                });
            }
            steps.push(step);
        }

        let text = steps.last().map(|s| s.text.clone()).unwrap_or_default();
        Ok(TextResponse { text, steps })
    }

    async fn run_object(&self, request: ObjectRequest<'_>) -> Result<Value, CompletionError> {
        let body = json!({
            "model": request.model,
            "messages": opening_messages(request.system, request.prompt),
            "response_format": {
                "type": "json_schema",
                "json_schema": { "name": "response", "schema": request.schema },
            },
        });

        let reply = self.chat(&body).await?;
        let content = reply
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or(CompletionError::EmptyResponse)?;
        parse_json_object(&content)
    }
}

#[async_trait]
impl CompletionModel for OpenAiCompatibleClient {
    async fn generate_text(&self, request: TextRequest<'_>) -> Result<TextResponse, CompletionError> {
        tokio::time::timeout(self.call_timeout, self.run_text(request))
            .await
            .map_err(|_| CompletionError::Timeout(self.call_timeout))?
    }

    async fn generate_object(&self, request: ObjectRequest<'_>) -> Result<Value, CompletionError> {
        tokio::time::timeout(self.call_timeout, self.run_object(request))
            .await
            .map_err(|_| CompletionError::Timeout(self.call_timeout))?
    }
}

fn opening_messages(system: Option<&str>, prompt: &str) -> Vec<Value> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.push(json!({ "role": "user", "content": prompt }));
    messages
}

/// Parse a JSON object out of model output, tolerating surrounding prose or fences
pub fn parse_json_object(content: &str) -> Result<Value, CompletionError> {
    let json_str = match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => content,
    };
    serde_json::from_str(json_str).map_err(|e| CompletionError::Parse(e.to_string()))
}


#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> OpenAiCompatibleClient {
        OpenAiCompatibleClient::new(base, None, Duration::from_secs(5), 5).unwrap()
    }

    #[test]
    fn test_endpoint_resolution() {
        assert_eq!(
            client("http://localhost:8080/v1").endpoint(),
            "http://localhost:8080/v1/chat/completions"
        );
        assert_eq!(
            client("http://localhost:8080/").endpoint(),
            "http://localhost:8080/v1/chat/completions"
        );
        assert_eq!(
            client("https://api.example.com/v1/chat/completions").endpoint(),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_parse_json_object_with_prose() {
        let value = parse_json_object("Here you go:\n```json\n{\"a\": 1}\n```").unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_parse_json_object_rejects_garbage() {
        assert!(matches!(
            parse_json_object("no json here"),
            Err(CompletionError::Parse(_))
        ));
    }

    #[test]
    fn test_opening_messages_with_system() {
        let messages = opening_messages(Some("be brief"), "hi");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "hi");
        assert_eq!(opening_messages(None, "hi").len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_request_error() {
        let model = client("http://127.0.0.1:9/v1");
        let result = model
            .generate_text(TextRequest {
                model: "m",
                system: None,
                prompt: "hi",
                tools: None,
            })
            .await;
        assert!(matches!(
            result,
            Err(CompletionError::Request(_)) | Err(CompletionError::Timeout(_))
        ));
    }

    #[test]
    fn test_null_lists_decode_as_empty() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"Hello","tool_calls":null}}]}"#,
        )
        .unwrap();
        let message = &parsed.choices[0].message;
        assert_eq!(message.content.as_deref(), Some("Hello"));
        assert!(message.tool_calls.is_empty());

        let parsed: ChatResponse = serde_json::from_str(r#"{"choices":null}"#).unwrap();
        assert!(parsed.choices.is_empty());
    }

    mod live {
        use super::*;
        use axum::extract::State;
        use axum::routing::post;
        use axum::{Json, Router};
        use std::sync::{Arc, Mutex};
        use tuner_tools::StaticTool;

        #[derive(Clone)]
        struct MockState {
            replies: Arc<Vec<Value>>,
            requests: Arc<Mutex<Vec<Value>>>,
            delay: Duration,
        }

        async fn mock_chat(State(state): State<MockState>, Json(body): Json<Value>) -> Json<Value> {
            let n = {
                let mut requests = state.requests.lock().unwrap();
                requests.push(body);
                requests.len() - 1
            };
            tokio::time::sleep(state.delay).await;
            let reply = state
                .replies
                .get(n)
                .or(state.replies.last())
                .cloned()
                .unwrap_or(Value::Null);
            Json(reply)
        }

        /// Serve `replies` in order (the last one repeats); returns the base URL
        /// and the recorded request bodies
        async fn mock_endpoint(replies: Vec<Value>, delay: Duration) -> (String, Arc<Mutex<Vec<Value>>>) {
            let requests = Arc::new(Mutex::new(Vec::new()));
            let state = MockState {
                replies: Arc::new(replies),
                requests: requests.clone(),
                delay,
            };
            let app = Router::new()
                .route("/v1/chat/completions", post(mock_chat))
                .with_state(state);
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            (format!("http://{}/v1", addr), requests)
        }

        fn text_choice(text: &str) -> Value {
            json!({"choices": [{"message": {"role": "assistant", "content": text, "tool_calls": null}}]})
        }

        fn tool_choice(id: &str, name: &str, arguments: &str) -> Value {
            json!({"choices": [{"message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{"id": id, "type": "function", "function": {"name": name, "arguments": arguments}}]
            }}]})
        }

        fn weather_tools() -> ToolRegistry {
            let mut tools = ToolRegistry::new();
            tools.register(Arc::new(StaticTool::new(
                "weather",
                "Current weather",
                json!({"type": "object", "properties": {"city": {"type": "string"}}}),
                "Sunny",
            )));
            tools
        }

        fn recorded(requests: &Arc<Mutex<Vec<Value>>>) -> Vec<Value> {
            requests.lock().unwrap().clone()
        }

        #[tokio::test]
        async fn test_tool_call_round_trip() {
            let (base, requests) = mock_endpoint(
                vec![
                    tool_choice("c1", "weather", r#"{"city": "Oslo"}"#),
                    text_choice("Sunny in Oslo."),
                ],
                Duration::ZERO,
            )
            .await;
            let model = OpenAiCompatibleClient::new(base, None, Duration::from_secs(5), 5).unwrap();
            let tools = weather_tools();

            let response = model
                .generate_text(TextRequest {
                    model: "m",
                    system: None,
                    prompt: "Weather in Oslo?",
                    tools: Some(&tools),
                })
                .await
                .unwrap();

            assert_eq!(response.text, "Sunny in Oslo.");
            assert_eq!(response.steps.len(), 2);
            let first = &response.steps[0];
            assert_eq!(first.tool_calls[0].name, "weather");
            assert_eq!(first.tool_calls[0].args["city"], "Oslo");
            assert_eq!(first.tool_results[0].output, "Sunny");
            assert!(!first.tool_results[0].is_error);
            assert!(response.steps[1].tool_calls.is_empty());

            let bodies = recorded(&requests);
            assert_eq!(bodies.len(), 2);
            assert_eq!(bodies[0]["model"], "m");
            assert_eq!(bodies[0]["tools"][0]["function"]["name"], "weather");
            let messages = bodies[1]["messages"].as_array().unwrap();
            assert_eq!(messages.len(), 3);
            assert_eq!(messages[1]["role"], "assistant");
            assert_eq!(messages[1]["tool_calls"][0]["id"], "c1");
            assert_eq!(
                messages[2],
                json!({"role": "tool", "tool_call_id": "c1", "content": "Sunny"})
            );
        }

        #[tokio::test]
        async fn test_tool_loop_stops_at_step_limit() {
            let (base, requests) = mock_endpoint(
                vec![tool_choice("c1", "weather", "{}")],
                Duration::ZERO,
            )
            .await;
            let model = OpenAiCompatibleClient::new(base, None, Duration::from_secs(5), 2).unwrap();
            let tools = weather_tools();

            let response = model
                .generate_text(TextRequest {
                    model: "m",
                    system: Some("be brief"),
                    prompt: "hi",
                    tools: Some(&tools),
                })
                .await
                .unwrap();

            assert_eq!(response.steps.len(), 2);
            assert!(response.steps.iter().all(|s| s.tool_calls.len() == 1));
            assert_eq!(response.text, "");
            assert_eq!(recorded(&requests).len(), 2);
        }

        #[tokio::test]
        async fn test_object_request_and_prose_reply() {
            let (base, requests) = mock_endpoint(
                vec![text_choice("Sure, here it is: {\"answer\": 42} Hope that helps.")],
                Duration::ZERO,
            )
            .await;
            let model =
                OpenAiCompatibleClient::new(base, Some("sk-test".to_string()), Duration::from_secs(5), 5)
                    .unwrap();
            let schema = json!({"type": "object", "properties": {"answer": {"type": "number"}}});

            let value = model
                .generate_object(ObjectRequest {
                    model: "judge",
                    system: Some("grade it"),
                    prompt: "question",
                    schema: &schema,
                })
                .await
                .unwrap();

            assert_eq!(value, json!({"answer": 42}));
            let body = &recorded(&requests)[0];
            assert_eq!(body["response_format"]["type"], "json_schema");
            assert_eq!(body["response_format"]["json_schema"]["schema"], schema);
            assert_eq!(body["messages"][0]["role"], "system");
            assert!(body.get("tools").is_none());
        }

        #[tokio::test]
        async fn test_stalled_reply_times_out() {
            let (base, _requests) =
                mock_endpoint(vec![text_choice("late")], Duration::from_secs(2)).await;
            let model =
                OpenAiCompatibleClient::new(base, None, Duration::from_millis(100), 5).unwrap();

            let result = model
                .generate_object(ObjectRequest {
                    model: "m",
                    system: None,
                    prompt: "hi",
                    schema: &json!({"type": "object"}),
                })
                .await;

            assert!(matches!(result, Err(CompletionError::Timeout(_))));
        }

        #[tokio::test]
        async fn test_error_status_is_api_error() {
            let app = Router::new().route(
                "/v1/chat/completions",
                post(|| async { (axum::http::StatusCode::TOO_MANY_REQUESTS, "slow down") }),
            );
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            let model = client(&format!("http://{}", addr));

            let result = model
                .generate_text(TextRequest {
                    model: "m",
                    system: None,
                    prompt: "hi",
                    tools: None,
                })
                .await;

            match result {
                Err(CompletionError::Api { status, message }) => {
                    assert_eq!(status, 429);
                    assert_eq!(message, "slow down");
                }
                other => panic!("unexpected result {:?}", other.map(|r| r.text)),
            }
        }
    }
}
