use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::tools::{Tool, ToolContext, ToolRegistry};
use super::{Agent, AgentContext, AgentOutcome, ToolCallExecutor};
use crate::error::DispatchError;
use crate::models::{CompletionGateway, Exchange, ToolCall, ToolResult};
use crate::plan::Plan;

/// A domain agent: one prompt, a set of tools, one plan slot.
///
/// Protocol depth is fixed at one round: the opening completion may request
/// tool calls, those are executed, and a single follow-up completion produces
/// the summary.
pub struct ToolAgent {
    slot: Option<String>,
    keywords: Vec<String>,
    prompt: String,
    tools: ToolRegistry,
    /// `(plan slot, view key)` pairs this agent may read.
    sees: Vec<(String, String)>,
    gateway: Arc<dyn CompletionGateway>,
    executor: Arc<ToolCallExecutor>,
}

pub struct ToolAgentBuilder {
    agent: ToolAgent,
}

impl ToolAgentBuilder {
    pub fn slot(mut self, slot: &str) -> Self {
        self.agent.slot = Some(slot.to_string());
        self
    }

    pub fn keywords(mut self, words: &[&str]) -> Self {
        self.agent.keywords = words.iter().map(|w| w.to_lowercase()).collect();
        self
    }

    pub fn prompt(mut self, prompt: &str) -> Self {
        self.agent.prompt = prompt.to_string();
        self
    }

    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.agent.tools.register(Box::new(tool));
        self
    }

    pub fn sees(mut self, slot: &str, as_key: &str) -> Self {
        self.agent.sees.push((slot.to_string(), as_key.to_string()));
        self
    }

    pub fn build(self) -> ToolAgent {
        self.agent
    }
}

impl ToolAgent {
    pub fn builder(gateway: Arc<dyn CompletionGateway>, executor: Arc<ToolCallExecutor>) -> ToolAgentBuilder {
        ToolAgentBuilder {
            agent: ToolAgent {
                slot: None,
                keywords: Vec::new(),
                prompt: String::new(),
                tools: ToolRegistry::new(),
                sees: Vec::new(),
                gateway,
                executor,
            },
        }
    }

    fn system_prompt(&self, view: &Value) -> String {
        match view.as_object() {
            Some(m) if !m.is_empty() => format!("{}\n\nShared plan context (JSON):\n{}", self.prompt, view),
            _ => self.prompt.clone(),
        }
    }
}

/// Used when the follow-up completion is missing or empty.
fn fallback_summary(calls: &[ToolCall], results: &[ToolResult]) -> String {
    let ok = results.iter().filter(|r| r.output().is_some()).count();
    if ok == 0 {
        return super::DEGRADED_SUMMARY.to_string();
    }
    let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
    format!("Completed {} of {} lookups ({}).", ok, results.len(), names.join(", "))
}

#[async_trait]
impl Agent for ToolAgent {
    fn slot(&self) -> Option<&str> {
        self.slot.as_deref()
    }

    fn keywords(&self) -> &[String] {
        &self.keywords
    }

    fn context_view(&self, plan: &Plan) -> Value {
        let keys: Vec<(&str, &str)> = self.sees.iter().map(|(s, k)| (s.as_str(), k.as_str())).collect();
        plan.project(&keys)
    }

    async fn process(&self, query: &str, ctx: &mut AgentContext<'_>) -> Result<AgentOutcome, DispatchError> {
        if ctx.cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }
        let agent_id = ctx.agent_id;
        let system_prompt = self.system_prompt(&ctx.view);
        let history = ctx.conversation.snapshot(agent_id);
        let defs = self.tools.definitions();
        let tools = (!self.tools.is_empty()).then_some(defs.as_slice());

        let first = match self
            .gateway
            .process_message(query, agent_id, tools, Some(&system_prompt), &history)
            .await
        {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(agent = agent_id, error = %e, "completion failed; returning degraded outcome");
                return Ok(AgentOutcome::degraded());
            }
        };

        let Some(calls) = self.executor.extract_tool_calls(&first) else {
            let text = first.content.as_deref().map(str::trim).unwrap_or_default();
            if text.is_empty() {
                return Ok(AgentOutcome::degraded());
            }
            return Ok(AgentOutcome::text(text));
        };

        tracing::info!(agent = agent_id, calls = calls.len(), "executing tool calls");
        let tctx = ToolContext { session_id: ctx.session_id, agent_id, view: &ctx.view };
        let results = self.executor.execute(&self.tools, &calls, tctx).await;
        // the last successful call is the most refined answer
        let data = results.iter().rev().find_map(|r| r.output().cloned());

        let exchange = Exchange {
            agent_id: agent_id.to_string(),
            system_prompt: Some(system_prompt),
            history,
            content: query.to_string(),
            tools: defs,
            assistant: first,
        };
        let summary = match self.executor.send_tool_results(ctx.conversation, &exchange, &calls, &results).await {
            Ok(reply) => {
                if !reply.tool_calls.is_empty() {
                    // one round only: a second batch of requests is never executed
                    tracing::debug!(agent = agent_id, ignored = reply.tool_calls.len(), "follow-up requested more tool calls");
                }
                reply
                    .content
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| fallback_summary(&calls, &results))
            }
            Err(e) => {
                tracing::warn!(agent = agent_id, error = %e, "follow-up completion failed");
                fallback_summary(&calls, &results)
            }
        };
        Ok(AgentOutcome { summary, data })
    }
}
