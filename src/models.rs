use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::context::{Role, SnapshotEntry};
use crate::settings::{GatewaySettings, ModelParams};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("completion service returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("completion call timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed completion response: {0}")]
    MalformedResponse(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Http { status, .. } => *status == 429 || *status >= 500,
            GatewayError::Network(_) | GatewayError::Timeout(_) => true,
            GatewayError::MalformedResponse(_) => false,
        }
    }
}

/// A function the model may call. Immutable once the owning agent is built.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub properties: serde_json::Map<String, Value>,
    pub required: Vec<String>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into(), properties: Default::default(), required: Vec::new() }
    }

    pub fn param(mut self, name: &str, kind: &str, description: &str, required: bool) -> Self {
        self.properties.insert(name.to_string(), json!({ "type": kind, "description": description }));
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    pub fn array_param(mut self, name: &str, item_kind: &str, description: &str, required: bool) -> Self {
        self.properties.insert(
            name.to_string(),
            json!({ "type": "array", "items": { "type": item_kind }, "description": description }),
        );
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    /// The shape the completion protocol expects.
    pub fn wire(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": {
                    "type": "object",
                    "properties": self.properties,
                    "required": self.required,
                }
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw argument payload exactly as the model produced it.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolErrorInfo {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolOutcome {
    Output(Value),
    Error(ToolErrorInfo),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub tool_call_id: String,
    #[serde(flatten)]
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn ok(tool_call_id: &str, output: Value) -> Self {
        Self { tool_call_id: tool_call_id.to_string(), outcome: ToolOutcome::Output(output) }
    }

    pub fn error(tool_call_id: &str, kind: &str, message: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.to_string(),
            outcome: ToolOutcome::Error(ToolErrorInfo { kind: kind.to_string(), message: message.into() }),
        }
    }

    pub fn output(&self) -> Option<&Value> {
        match &self.outcome {
            ToolOutcome::Output(v) => Some(v),
            ToolOutcome::Error(_) => None,
        }
    }

    /// Payload sent back to the model as the tool message content.
    pub fn payload(&self) -> String {
        match &self.outcome {
            ToolOutcome::Output(v) => v.to_string(),
            ToolOutcome::Error(e) => json!({ "error": e.kind, "message": e.message }).to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub model: Option<String>,
}

#[cfg(test)]
impl AssistantMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: Some(content.into()), ..Default::default() }
    }
}

/// Everything the opening completion was built from, kept so the tool-result
/// follow-up can be posted without the gateway holding session state.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub agent_id: String,
    pub system_prompt: Option<String>,
    pub history: Vec<SnapshotEntry>,
    pub content: String,
    pub tools: Vec<ToolDefinition>,
    pub assistant: AssistantMessage,
}

#[async_trait]
pub trait CompletionGateway: Send + Sync {
    async fn process_message(
        &self,
        content: &str,
        agent_id: &str,
        tools: Option<&[ToolDefinition]>,
        system_prompt: Option<&str>,
        history: &[SnapshotEntry],
    ) -> Result<AssistantMessage, GatewayError>;

    async fn send_tool_results(
        &self,
        exchange: &Exchange,
        tool_calls: &[ToolCall],
        results: &[ToolResult],
    ) -> Result<AssistantMessage, GatewayError>;

    /// `None` means the model answered directly in `content`.
    fn extract_tool_calls(&self, message: &AssistantMessage) -> Option<Vec<ToolCall>> {
        if message.tool_calls.is_empty() { None } else { Some(message.tool_calls.clone()) }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct OaiToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: OaiFunction,
}

fn function_kind() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct OaiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct OaiMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OaiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl OaiMessage {
    fn plain(role: &'static str, content: String) -> Self {
        Self { role, content: Some(content), tool_calls: None, tool_call_id: None }
    }
}

#[derive(Debug, Serialize)]
struct OaiChatRequest<'a> {
    model: &'a str,
    messages: Vec<OaiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")] temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")] max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")] top_p: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct OaiChatResponse {
    choices: Vec<OaiChoice>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OaiChoice { message: OaiResponseMessage }

#[derive(Debug, Deserialize)]
struct OaiResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OaiToolCall>,
}

/// Opening messages: agent prompt, session history, then the new user turn.
fn opening_messages(system_prompt: Option<&str>, history: &[SnapshotEntry], content: &str) -> Vec<OaiMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    if let Some(p) = system_prompt {
        messages.push(OaiMessage::plain("system", p.to_string()));
    }
    for entry in history {
        // tool summaries in the log carry no tool_call_id, so they go in as assistant notes
        let role = match entry.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant | Role::Tool => "assistant",
        };
        messages.push(OaiMessage::plain(role, entry.rendered()));
    }
    // the orchestrator logs the query before the first agent runs, so later
    // agents see it followed by earlier agents' replies
    let already_logged = history.iter().rev().find(|e| e.role == Role::User).is_some_and(|e| e.content == content);
    if !already_logged {
        messages.push(OaiMessage::plain("user", content.to_string()));
    }
    messages
}

fn to_wire_calls(calls: &[ToolCall]) -> Vec<OaiToolCall> {
    calls
        .iter()
        .map(|c| OaiToolCall {
            id: c.id.clone(),
            kind: function_kind(),
            function: OaiFunction { name: c.name.clone(), arguments: c.arguments.clone() },
        })
        .collect()
}

#[derive(Clone)]
pub struct OpenAICompatible {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub params: ModelParams,
    client: reqwest::Client,
}

impl OpenAICompatible {
    pub fn new(settings: &GatewaySettings) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            params: settings.model_params.clone(),
            client: reqwest::Client::new(),
        }
    }

    async fn complete(&self, messages: Vec<OaiMessage>, tools: &[ToolDefinition]) -> Result<AssistantMessage, GatewayError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = OaiChatRequest {
            model: &self.model,
            messages,
            tools: tools.iter().map(ToolDefinition::wire).collect(),
            temperature: self.params.temperature,
            max_tokens: self.params.max_tokens,
            top_p: self.params.top_p,
        };
        let mut rb = self.client.post(url).json(&body);
        if let Some(key) = &self.api_key {
            rb = rb.bearer_auth(key);
        }
        let resp = rb.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Http { status: status.as_u16(), body });
        }
        let v: OaiChatResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;
        let choice = v
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::MalformedResponse("no choices".into()))?;
        Ok(AssistantMessage {
            content: choice.message.content,
            tool_calls: choice
                .message
                .tool_calls
                .into_iter()
                .map(|c| ToolCall { id: c.id, name: c.function.name, arguments: c.function.arguments })
                .collect(),
            model: v.model,
        })
    }
}

#[async_trait]
impl CompletionGateway for OpenAICompatible {
    async fn process_message(
        &self,
        content: &str,
        agent_id: &str,
        tools: Option<&[ToolDefinition]>,
        system_prompt: Option<&str>,
        history: &[SnapshotEntry],
    ) -> Result<AssistantMessage, GatewayError> {
        tracing::debug!(agent = agent_id, history = history.len(), "completion request");
        let messages = opening_messages(system_prompt, history, content);
        self.complete(messages, tools.unwrap_or_default()).await
    }

    async fn send_tool_results(
        &self,
        exchange: &Exchange,
        tool_calls: &[ToolCall],
        results: &[ToolResult],
    ) -> Result<AssistantMessage, GatewayError> {
        let mut messages = opening_messages(exchange.system_prompt.as_deref(), &exchange.history, &exchange.content);
        messages.push(OaiMessage {
            role: "assistant",
            content: exchange.assistant.content.clone(),
            tool_calls: Some(to_wire_calls(tool_calls)),
            tool_call_id: None,
        });
        for r in results {
            messages.push(OaiMessage {
                role: "tool",
                content: Some(r.payload()),
                tool_calls: None,
                tool_call_id: Some(r.tool_call_id.clone()),
            });
        }
        tracing::debug!(agent = %exchange.agent_id, results = results.len(), "tool result follow-up");
        self.complete(messages, &exchange.tools).await
    }
}

/// Bounds every call with a timeout and retries retryable failures after a
/// random jitter.
pub struct ResilientGateway {
    inner: Arc<dyn CompletionGateway>,
    call_timeout: Duration,
    retries: u32,
    max_jitter: Duration,
}

impl ResilientGateway {
    pub fn new(inner: Arc<dyn CompletionGateway>, settings: &GatewaySettings) -> Self {
        Self {
            inner,
            call_timeout: settings.call_timeout,
            retries: settings.retries,
            max_jitter: settings.retry_jitter,
        }
    }

    async fn attempt<F, Fut>(&self, op: &'static str, call: F) -> Result<AssistantMessage, GatewayError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<AssistantMessage, GatewayError>>,
    {
        let mut attempt = 0;
        loop {
            let res = match tokio::time::timeout(self.call_timeout, call()).await {
                Ok(r) => r,
                Err(_) => Err(GatewayError::Timeout(self.call_timeout)),
            };
            match res {
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    attempt += 1;
                    let wait = jitter(self.max_jitter);
                    tracing::warn!(op, attempt, error = %e, wait_ms = wait.as_millis() as u64, "retrying completion call");
                    metrics::counter!("switchboard_gateway_retries_total", "op" => op).increment(1);
                    tokio::time::sleep(wait).await;
                }
                other => return other,
            }
        }
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

#[async_trait]
impl CompletionGateway for ResilientGateway {
    async fn process_message(
        &self,
        content: &str,
        agent_id: &str,
        tools: Option<&[ToolDefinition]>,
        system_prompt: Option<&str>,
        history: &[SnapshotEntry],
    ) -> Result<AssistantMessage, GatewayError> {
        let inner = &self.inner;
        self.attempt("process_message", move || inner.process_message(content, agent_id, tools, system_prompt, history))
            .await
    }

    async fn send_tool_results(
        &self,
        exchange: &Exchange,
        tool_calls: &[ToolCall],
        results: &[ToolResult],
    ) -> Result<AssistantMessage, GatewayError> {
        let inner = &self.inner;
        self.attempt("send_tool_results", move || inner.send_tool_results(exchange, tool_calls, results))
            .await
    }

    fn extract_tool_calls(&self, message: &AssistantMessage) -> Option<Vec<ToolCall>> {
        self.inner.extract_tool_calls(message)
    }
}
