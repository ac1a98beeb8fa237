use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use crate::agent::tools::{ToolContext, ToolRegistry};
use crate::context::{ConversationContext, Message, Role};
use crate::error::DispatchError;
use crate::models::{AssistantMessage, CompletionGateway, Exchange, GatewayError, ToolCall, ToolOutcome, ToolResult};
use crate::parsing::{ParseError, parse_structured};

/// Runs one round of model-requested tool calls for an agent and posts the
/// results back to the gateway.
pub struct ToolCallExecutor {
    gateway: Arc<dyn CompletionGateway>,
    tool_timeout: Duration,
}

impl ToolCallExecutor {
    pub fn new(gateway: Arc<dyn CompletionGateway>, tool_timeout: Duration) -> Self {
        Self { gateway, tool_timeout }
    }

    pub fn extract_tool_calls(&self, message: &AssistantMessage) -> Option<Vec<ToolCall>> {
        self.gateway.extract_tool_calls(message)
    }

    /// Resolves every call before returning. Failures never escape: each one
    /// becomes an error result carrying the failure kind.
    pub async fn execute(&self, tools: &ToolRegistry, calls: &[ToolCall], ctx: ToolContext<'_>) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let tctx = ToolContext { session_id: ctx.session_id, agent_id: ctx.agent_id, view: ctx.view };
            let result = match self.execute_one(tools, call, tctx).await {
                Ok(output) => {
                    tracing::debug!(agent = ctx.agent_id, tool = %call.name, "tool call ok");
                    metrics::counter!("switchboard_tool_calls_total", "tool" => call.name.clone(), "status" => "ok").increment(1);
                    ToolResult::ok(&call.id, output)
                }
                Err(e) => {
                    tracing::warn!(agent = ctx.agent_id, tool = %call.name, kind = e.kind(), error = %e, "tool call failed");
                    metrics::counter!("switchboard_tool_calls_total", "tool" => call.name.clone(), "status" => e.kind()).increment(1);
                    ToolResult::error(&call.id, e.kind(), e.to_string())
                }
            };
            results.push(result);
        }
        results
    }

    async fn execute_one(&self, tools: &ToolRegistry, call: &ToolCall, ctx: ToolContext<'_>) -> Result<Value, DispatchError> {
        let args = parse_arguments(call)?;
        let tool = tools.get(&call.name).ok_or_else(|| DispatchError::ToolNotImplemented(call.name.clone()))?;
        match tokio::time::timeout(self.tool_timeout, tool.run(ctx, args)).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(DispatchError::ToolExecution { tool: call.name.clone(), message: format!("{:#}", e) }),
            Err(_) => Err(DispatchError::Timeout(self.tool_timeout)),
        }
    }

    /// Logs a tool-role summary into the conversation, then asks the gateway
    /// for the agent's follow-up message.
    pub async fn send_tool_results(
        &self,
        conversation: &mut ConversationContext,
        exchange: &Exchange,
        calls: &[ToolCall],
        results: &[ToolResult],
    ) -> Result<AssistantMessage, GatewayError> {
        conversation.append(Message::tagged(Role::Tool, summarize(calls, results), &exchange.agent_id));
        self.gateway.send_tool_results(exchange, calls, results).await
    }
}

/// Arguments must decode to an object; an empty payload means "no arguments".
pub fn parse_arguments(call: &ToolCall) -> Result<Value, DispatchError> {
    let wrap = |source: ParseError| DispatchError::ArgumentParse { tool: call.name.clone(), source };
    if call.arguments.trim().is_empty() {
        return Ok(json!({}));
    }
    let v = parse_structured(&call.arguments).map_err(wrap)?;
    if !v.is_object() {
        return Err(wrap(ParseError::NotAnObject));
    }
    Ok(v)
}

/// One line per call: `name: ok` or `name: <kind>: <message>`.
pub fn summarize(calls: &[ToolCall], results: &[ToolResult]) -> String {
    results
        .iter()
        .map(|r| {
            let name = calls.iter().find(|c| c.id == r.tool_call_id).map(|c| c.name.as_str()).unwrap_or("unknown");
            match &r.outcome {
                ToolOutcome::Output(_) => format!("{}: ok", name),
                ToolOutcome::Error(e) => format!("{}: {}: {}", name, e.kind, e.message),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
