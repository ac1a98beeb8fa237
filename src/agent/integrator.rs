use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{Agent, AgentContext, AgentOutcome};
use crate::error::DispatchError;
use crate::models::CompletionGateway;
use crate::plan::{Plan, assemble_itinerary};

/// Writes the user-facing reply from the whole plan. Always runs last.
pub struct IntegratorAgent {
    slot: Option<String>,
    prompt: String,
    gateway: Arc<dyn CompletionGateway>,
}

impl IntegratorAgent {
    /// Integrator that also records a day-by-day itinerary in `slot`.
    pub fn itinerary(gateway: Arc<dyn CompletionGateway>, slot: &str, prompt: &str) -> Self {
        Self { slot: Some(slot.to_string()), prompt: prompt.to_string(), gateway }
    }

    /// Integrator that only summarises.
    pub fn summary(gateway: Arc<dyn CompletionGateway>, prompt: &str) -> Self {
        Self { slot: None, prompt: prompt.to_string(), gateway }
    }

    fn brief(&self, query: &str, ctx: &AgentContext<'_>) -> String {
        let mut out = format!("User request: {}\n\nCurrent plan (JSON):\n{}", query, ctx.view);
        if !ctx.prior.is_empty() {
            out.push_str("\n\nSpecialist notes:");
            for r in ctx.prior {
                let marker = if r.failed { " (failed)" } else { "" };
                out.push_str(&format!("\n- {}{}: {}", r.agent, marker, r.summary));
            }
        }
        out
    }
}

#[async_trait]
impl Agent for IntegratorAgent {
    fn slot(&self) -> Option<&str> {
        self.slot.as_deref()
    }

    fn keywords(&self) -> &[String] {
        &[]
    }

    fn context_view(&self, plan: &Plan) -> Value {
        plan.to_value()
    }

    async fn process(&self, query: &str, ctx: &mut AgentContext<'_>) -> Result<AgentOutcome, DispatchError> {
        let data = if self.slot.is_some() { assemble_itinerary(ctx.plan).ok() } else { None };
        let content = self.brief(query, ctx);
        let history = ctx.conversation.snapshot(ctx.agent_id);
        let summary = match self
            .gateway
            .process_message(&content, ctx.agent_id, None, Some(&self.prompt), &history)
            .await
        {
            Ok(reply) => reply.content.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()),
            Err(e) => {
                tracing::warn!(agent = ctx.agent_id, error = %e, "integrator completion failed; using plan digest");
                None
            }
        };
        let summary = summary.unwrap_or_else(|| format!("Here is where your plan stands:\n{}", ctx.plan.describe()));
        Ok(AgentOutcome { summary, data })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    use super::*;
    use crate::agent::AgentReport;
    use crate::context::ConversationContext;
    use crate::models::GatewayError;
    use crate::models::testing::ScriptedGateway;

    fn travel_plan() -> Plan {
        let mut plan = Plan::new();
        plan.merge("flights", json!({"origin": "SEA", "destination": "SFO", "options": [{"price": 180.0}]})).unwrap();
        plan.merge("hotels", json!({"location": "SFO", "nights": 1, "options": [{"name": "Inn", "pricePerNight": 100.0}]})).unwrap();
        plan
    }

    #[tokio::test]
    async fn brief_includes_plan_and_specialist_notes() {
        let gw = ScriptedGateway::new();
        gw.text("itinerary", "Your trip to SFO is set.");
        let agent = IntegratorAgent::itinerary(gw.clone(), "itinerary", "Summarise the trip.");
        let plan = travel_plan();
        let mut conv = ConversationContext::new("sys", 10);
        let prior = vec![
            AgentReport { agent: "flight".into(), summary: "3 flights".into(), failed: false },
            AgentReport { agent: "hotel".into(), summary: "sorry".into(), failed: true },
        ];
        let mut ctx = AgentContext {
            session_id: Uuid::new_v4(),
            agent_id: "itinerary",
            view: agent.context_view(&plan),
            plan: &plan,
            conversation: &mut conv,
            prior: &prior,
            cancel: CancellationToken::new(),
        };
        let out = agent.process("plan it", &mut ctx).await.unwrap();
        assert_eq!(out.summary, "Your trip to SFO is set.");
        assert_eq!(out.data.unwrap()["destination"], "SFO");

        let sent = &gw.calls_for("itinerary")[0];
        assert!(sent.content.contains("\"aggregate\""));
        assert!(sent.content.contains("- hotel (failed): sorry"));
        assert!(sent.tool_names.is_empty());
    }

    #[tokio::test]
    async fn gateway_failure_falls_back_to_plan_digest() {
        let gw = ScriptedGateway::new();
        gw.reply("summary", Err(GatewayError::Http { status: 502, body: String::new() }));
        let agent = IntegratorAgent::summary(gw.clone(), "Summarise.");
        let plan = travel_plan();
        let mut conv = ConversationContext::new("sys", 10);
        let mut ctx = AgentContext {
            session_id: Uuid::new_v4(),
            agent_id: "summary",
            view: agent.context_view(&plan),
            plan: &plan,
            conversation: &mut conv,
            prior: &[],
            cancel: CancellationToken::new(),
        };
        let out = agent.process("status?", &mut ctx).await.unwrap();
        assert!(out.summary.contains("estimated total: $280.00"));
        assert!(out.data.is_none());
    }
}
