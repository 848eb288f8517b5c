use std::time::Duration;

use async_trait::async_trait;
use patchwise_core::{LlmConfig, PatchwiseError, Provider};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Role in the chat conversation.
///
/// # Examples
///
/// ```
/// use patchwise_review::llm::Role;
///
/// let role = Role::Tool;
/// assert_eq!(serde_json::to_string(&role).unwrap(), "\"tool\"");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions.
    System,
    /// Human input.
    User,
    /// Model response.
    Assistant,
    /// Result of a tool call.
    Tool,
}

/// A model-initiated request to run a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned id, echoed back in the tool result.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Arguments as sent by the model; not yet validated.
    pub arguments: Value,
}

/// A message in a chat conversation with the LLM.
///
/// # Examples
///
/// ```
/// use patchwise_review::llm::{ChatMessage, Role};
///
/// let msg = ChatMessage::user("Review this code");
/// assert_eq!(msg.role, Role::User);
/// assert!(msg.tool_calls.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender.
    pub role: Role,
    /// Text content of the message.
    pub content: String,
    /// Tool calls requested by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Id of the call a tool message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    /// A human message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    /// A plain assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// A tool result answering `call_id`.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// A tool offered to the model: name, description, and JSON Schema for its input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// What the tool does, shown to the model.
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

/// A chat model that can answer with text and tool calls.
///
/// [`LlmClient`] is the production implementation; tests script their own.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier, for logging and reports.
    fn model(&self) -> &str;

    /// Send the conversation and return the single response message.
    ///
    /// The returned message has [`Role::Assistant`] and may carry tool calls.
    async fn invoke(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatMessage, PatchwiseError>;
}

/// HTTP client for the two supported providers.
///
/// OpenAI uses `/v1/chat/completions` with function tools; Anthropic uses
/// `/v1/messages` with `tool_use` content blocks. Requests that fail with
/// 429, a 5xx status, or a transport timeout are retried with exponential
/// backoff up to `max_retries` times.
///
/// # Examples
///
/// ```
/// use patchwise_core::{LlmConfig, Provider};
/// use patchwise_review::llm::LlmClient;
///
/// let config = LlmConfig {
///     provider: Some(Provider::OpenAi),
///     model: Some("gpt-4o".into()),
///     api_key: Some("test-key".into()),
///     ..LlmConfig::default()
/// };
/// let client = LlmClient::new(&config).unwrap();
/// ```
pub struct LlmClient {
    client: reqwest::Client,
    provider: Provider,
    model: String,
    api_key: String,
    base_url: String,
    temperature: f64,
    max_tokens: u32,
    max_retries: u32,
    retry_delay: Duration,
}

impl LlmClient {
    /// Create a new LLM client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PatchwiseError::Config`] if provider, model or key are
    /// missing, or [`PatchwiseError::Llm`] if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self, PatchwiseError> {
        let provider = config
            .provider
            .ok_or_else(|| PatchwiseError::Config("ai_provider is not set".into()))?;
        let model = config
            .model
            .clone()
            .ok_or_else(|| PatchwiseError::Config("ai_provider_model is not set".into()))?;
        let api_key = config.api_key.clone().ok_or(PatchwiseError::MissingApiKey {
            provider,
            input: provider.api_key_input(),
            env_var: provider.api_key_env(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PatchwiseError::Llm(format!("failed to create HTTP client: {e}")))?;

        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or(provider.default_base_url())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            provider,
            model,
            api_key,
            base_url,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(500),
        })
    }

    /// Override the initial backoff between retries.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Provider this client talks to.
    pub fn provider(&self) -> Provider {
        self.provider
    }

    async fn post_with_retry(
        &self,
        url: &str,
        body: &Value,
        headers: &[(&str, String)],
    ) -> Result<Value, PatchwiseError> {
        let mut attempt = 0;
        let mut delay = self.retry_delay;

        loop {
            let mut request = self.client.post(url).json(body);
            for (name, value) in headers {
                request = request.header(*name, value);
            }

            let retryable_error = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json().await.map_err(|e| {
                            PatchwiseError::Llm(format!("failed to parse response: {e}"))
                        });
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    let err = PatchwiseError::Llm(format!(
                        "{} API error {status}: {body_text}",
                        self.provider
                    ));
                    if status.as_u16() != 429 && !status.is_server_error() {
                        return Err(err);
                    }
                    err
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    PatchwiseError::Llm(format!("request failed: {e}"))
                }
                Err(e) => return Err(PatchwiseError::Llm(format!("request failed: {e}"))),
            };

            if attempt >= self.max_retries {
                return Err(retryable_error);
            }
            attempt += 1;
            warn!(
                provider = %self.provider,
                attempt,
                max_retries = self.max_retries,
                ?delay,
                "LLM request failed, retrying: {retryable_error}"
            );
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(Duration::from_secs(10));
        }
    }

    async fn invoke_openai(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatMessage, PatchwiseError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = openai_request(
            &self.model,
            messages,
            tools,
            self.temperature,
            self.max_tokens,
        );
        let headers = [("Authorization", format!("Bearer {}", self.api_key))];
        let response = self.post_with_retry(&url, &body, &headers).await?;
        parse_openai_response(&response)
    }

    async fn invoke_anthropic(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatMessage, PatchwiseError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = anthropic_request(
            &self.model,
            messages,
            tools,
            self.temperature,
            self.max_tokens,
        );
        let headers = [
            ("x-api-key", self.api_key.clone()),
            ("anthropic-version", "2023-06-01".to_string()),
        ];
        let response = self.post_with_retry(&url, &body, &headers).await?;
        parse_anthropic_response(&response)
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn invoke(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatMessage, PatchwiseError> {
        debug!(
            provider = %self.provider,
            model = %self.model,
            messages = messages.len(),
            tools = tools.len(),
            "invoking model"
        );
        match self.provider {
            Provider::OpenAi => self.invoke_openai(messages, tools).await,
            Provider::Anthropic => self.invoke_anthropic(messages, tools).await,
        }
    }
}

fn openai_request(
    model: &str,
    messages: &[ChatMessage],
    tools: &[ToolDefinition],
    temperature: f64,
    max_tokens: u32,
) -> Value {
    let wire_messages: Vec<Value> = messages
        .iter()
        .map(|m| match m.role {
            Role::System => json!({ "role": "system", "content": m.content }),
            Role::User => json!({ "role": "user", "content": m.content }),
            Role::Tool => json!({
                "role": "tool",
                "tool_call_id": m.tool_call_id.as_deref().unwrap_or_default(),
                "content": m.content,
            }),
            Role::Assistant if m.tool_calls.is_empty() => {
                json!({ "role": "assistant", "content": m.content })
            }
            Role::Assistant => {
                let calls: Vec<Value> = m
                    .tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": { "name": c.name, "arguments": c.arguments.to_string() },
                        })
                    })
                    .collect();
                let content = if m.content.is_empty() {
                    Value::Null
                } else {
                    Value::String(m.content.clone())
                };
                json!({ "role": "assistant", "content": content, "tool_calls": calls })
            }
        })
        .collect();

    let mut body = json!({
        "model": model,
        "messages": wire_messages,
        "temperature": temperature,
        "max_completion_tokens": max_tokens,
    });

    if !tools.is_empty() {
        let wire_tools: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    },
                })
            })
            .collect();
        body["tools"] = Value::Array(wire_tools);
        body["tool_choice"] = json!("auto");
    }

    body
}

fn parse_openai_response(response: &Value) -> Result<ChatMessage, PatchwiseError> {
    let message = response
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| PatchwiseError::Llm(format!("unexpected response structure: {response}")))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    let id = call.get("id")?.as_str()?.to_string();
                    let function = call.get("function")?;
                    let name = function.get("name")?.as_str()?.to_string();
                    let raw = function
                        .get("arguments")
                        .and_then(Value::as_str)
                        .unwrap_or("{}");
                    // unparseable arguments are left as a string for the tool boundary to reject
                    let arguments = serde_json::from_str(raw)
                        .unwrap_or_else(|_| Value::String(raw.to_string()));
                    Some(ToolCall {
                        id,
                        name,
                        arguments,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ChatMessage {
        role: Role::Assistant,
        content,
        tool_calls,
        tool_call_id: None,
    })
}

fn anthropic_request(
    model: &str,
    messages: &[ChatMessage],
    tools: &[ToolDefinition],
    temperature: f64,
    max_tokens: u32,
) -> Value {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();

    let mut wire_messages: Vec<(&'static str, Vec<Value>)> = Vec::new();
    for m in messages {
        let (role, blocks) = match m.role {
            Role::System => continue,
            Role::User => ("user", vec![json!({ "type": "text", "text": m.content })]),
            Role::Tool => (
                "user",
                vec![json!({
                    "type": "tool_result",
                    "tool_use_id": m.tool_call_id.as_deref().unwrap_or_default(),
                    "content": m.content,
                })],
            ),
            Role::Assistant => {
                let mut blocks = Vec::new();
                if !m.content.trim().is_empty() {
                    blocks.push(json!({ "type": "text", "text": m.content }));
                }
                for call in &m.tool_calls {
                    let input = if call.arguments.is_object() {
                        call.arguments.clone()
                    } else {
                        json!({})
                    };
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": input,
                    }));
                }
                if blocks.is_empty() {
                    blocks.push(json!({ "type": "text", "text": "(empty response)" }));
                }
                ("assistant", blocks)
            }
        };
        // consecutive turns of the same role are merged into one message
        match wire_messages.last_mut() {
            Some((last_role, last_blocks)) if *last_role == role => last_blocks.extend(blocks),
            _ => wire_messages.push((role, blocks)),
        }
    }

    let wire_messages: Vec<Value> = wire_messages
        .into_iter()
        .map(|(role, content)| json!({ "role": role, "content": content }))
        .collect();

    let mut body = json!({
        "model": model,
        "max_tokens": max_tokens,
        "temperature": temperature,
        "messages": wire_messages,
    });
    if !system.is_empty() {
        body["system"] = Value::String(system.join("\n\n"));
    }

    if !tools.is_empty() {
        let wire_tools: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();
        body["tools"] = Value::Array(wire_tools);
        body["tool_choice"] = json!({ "type": "auto" });
    }

    body
}

fn parse_anthropic_response(response: &Value) -> Result<ChatMessage, PatchwiseError> {
    let blocks = response
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| PatchwiseError::Llm(format!("unexpected response structure: {response}")))?;

    let mut content = String::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str(text);
                }
            }
            Some("tool_use") => {
                let id = block.get("id").and_then(Value::as_str);
                let name = block.get("name").and_then(Value::as_str);
                if let (Some(id), Some(name)) = (id, name) {
                    tool_calls.push(ToolCall {
                        id: id.to_string(),
                        name: name.to_string(),
                        arguments: block.get("input").cloned().unwrap_or_else(|| json!({})),
                    });
                }
            }
            _ => {}
        }
    }

    Ok(ChatMessage {
        role: Role::Assistant,
        content,
        tool_calls,
        tool_call_id: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weather_tool() -> ToolDefinition {
        ToolDefinition {
            name: "wikipedia".into(),
            description: "Look up a topic".into(),
            parameters: json!({ "type": "object", "properties": { "query": { "type": "string" } } }),
        }
    }

    fn conversation() -> Vec<ChatMessage> {
        vec![
            ChatMessage::system("You review code."),
            ChatMessage::user("What is tokio?"),
            ChatMessage {
                role: Role::Assistant,
                content: String::new(),
                tool_calls: vec![ToolCall {
                    id: "call_1".into(),
                    name: "wikipedia".into(),
                    arguments: json!({ "query": "tokio" }),
                }],
                tool_call_id: None,
            },
            ChatMessage::tool_result("call_1", "Tokio is an async runtime."),
            ChatMessage::user("Now review the file."),
        ]
    }

    #[test]
    fn client_requires_api_key() {
        let config = LlmConfig {
            provider: Some(Provider::Anthropic),
            model: Some("claude-sonnet-4-5".into()),
            ..LlmConfig::default()
        };
        let err = LlmClient::new(&config).err().unwrap();
        assert!(matches!(err, PatchwiseError::MissingApiKey { .. }));
    }

    #[test]
    fn model_returns_config_model() {
        let config = LlmConfig {
            provider: Some(Provider::OpenAi),
            model: Some("gpt-4o-mini".into()),
            api_key: Some("k".into()),
            ..LlmConfig::default()
        };
        let client = LlmClient::new(&config).unwrap();
        assert_eq!(client.model(), "gpt-4o-mini");
        assert_eq!(client.provider(), Provider::OpenAi);
    }

    #[test]
    fn chat_message_serializes() {
        let msg = ChatMessage::system("hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "system");
        assert_eq!(json["content"], "hello");
        assert!(json.get("tool_calls").is_none());
    }

    #[test]
    fn openai_request_encodes_tool_turns() {
        let body = openai_request(
            "gpt-4o",
            &conversation(),
            &[weather_tool()],
            0.1,
            512,
        );
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[2]["content"], Value::Null);
        assert_eq!(messages[2]["tool_calls"][0]["function"]["name"], "wikipedia");
        assert_eq!(
            messages[2]["tool_calls"][0]["function"]["arguments"],
            "{\"query\":\"tokio\"}"
        );
        assert_eq!(messages[3]["role"], "tool");
        assert_eq!(messages[3]["tool_call_id"], "call_1");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tool_choice"], "auto");
    }

    #[test]
    fn openai_request_without_tools_omits_tool_choice() {
        let body = openai_request(
            "gpt-4o",
            &[ChatMessage::user("hi")],
            &[],
            0.1,
            512,
        );
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
    }

    #[test]
    fn parse_openai_tool_calls() {
        let response = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [
                        { "id": "a", "type": "function", "function": { "name": "wikipedia", "arguments": "{\"query\":\"serde\"}" } },
                        { "id": "b", "type": "function", "function": { "name": "wikipedia", "arguments": "{not json" } }
                    ]
                }
            }]
        });
        let msg = parse_openai_response(&response).unwrap();
        assert_eq!(msg.content, "");
        assert_eq!(msg.tool_calls.len(), 2);
        assert_eq!(msg.tool_calls[0].arguments["query"], "serde");
        assert_eq!(msg.tool_calls[1].arguments, Value::String("{not json".into()));
    }

    #[test]
    fn parse_openai_rejects_unexpected_shape() {
        let err = parse_openai_response(&json!({ "error": "nope" })).unwrap_err();
        assert!(err.to_string().contains("unexpected response structure"));
    }

    #[test]
    fn anthropic_request_merges_tool_results_into_user_turn() {
        let body = anthropic_request(
            "claude-sonnet-4-5",
            &conversation(),
            &[weather_tool()],
            0.1,
            1024,
        );
        assert_eq!(body["system"], "You review code.");
        let messages = body["messages"].as_array().unwrap();
        // user, assistant(tool_use), user(tool_result + text)
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["content"][0]["type"], "tool_use");
        assert_eq!(messages[1]["content"][0]["input"]["query"], "tokio");
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"][0]["type"], "tool_result");
        assert_eq!(messages[2]["content"][0]["tool_use_id"], "call_1");
        assert_eq!(messages[2]["content"][1]["type"], "text");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(body["tool_choice"]["type"], "auto");
    }

    #[test]
    fn parse_anthropic_text_and_tool_use() {
        let response = json!({
            "content": [
                { "type": "text", "text": "Looking this up." },
                { "type": "tool_use", "id": "toolu_1", "name": "stack_exchange", "input": { "query": "borrowck" } }
            ],
            "stop_reason": "tool_use"
        });
        let msg = parse_anthropic_response(&response).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.content, "Looking this up.");
        assert_eq!(msg.tool_calls[0].id, "toolu_1");
        assert_eq!(msg.tool_calls[0].arguments["query"], "borrowck");
    }
}
