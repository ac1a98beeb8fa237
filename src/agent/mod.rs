//! Agents turn a query plus a read-only view of the plan into a summary and
//! optional structured data for the slot they own.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::context::ConversationContext;
use crate::error::DispatchError;
use crate::plan::Plan;

pub mod engine;
pub mod integrator;
pub mod profiles;
pub mod registry;
pub mod tool_agent;
pub mod tools;

pub use engine::ToolCallExecutor;
pub use integrator::IntegratorAgent;
pub use registry::AgentRegistry;
pub use tool_agent::ToolAgent;

/// Shown to users when an agent had to give up.
pub const DEGRADED_SUMMARY: &str = "Sorry, I couldn't complete that part of your request right now.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentOutcome {
    pub summary: String,
    pub data: Option<Value>,
}

impl AgentOutcome {
    pub fn text(summary: impl Into<String>) -> Self {
        Self { summary: summary.into(), data: None }
    }

    pub fn degraded() -> Self {
        Self::text(DEGRADED_SUMMARY)
    }
}

/// What an earlier agent reported during the current query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentReport {
    pub agent: String,
    pub summary: String,
    pub failed: bool,
}

pub struct AgentContext<'a> {
    pub session_id: Uuid,
    /// Registry id the agent runs under; also the gateway agent id and log tag.
    pub agent_id: &'a str,
    /// Projection of the plan produced by [`Agent::context_view`].
    pub view: Value,
    pub plan: &'a Plan,
    pub conversation: &'a mut ConversationContext,
    pub prior: &'a [AgentReport],
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait Agent: Send + Sync {
    /// Plan slot this agent writes, if any.
    fn slot(&self) -> Option<&str>;

    /// Lower-case routing keywords.
    fn keywords(&self) -> &[String];

    fn context_view(&self, _plan: &Plan) -> Value {
        Value::Object(Default::default())
    }

    /// Expected failures (gateway, tools) must come back as a degraded
    /// outcome; `Err` is reserved for failures the agent could not contain.
    async fn process(&self, query: &str, ctx: &mut AgentContext<'_>) -> Result<AgentOutcome, DispatchError>;
}
