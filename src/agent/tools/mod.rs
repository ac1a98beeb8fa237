use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use uuid::Uuid;

use crate::models::ToolDefinition;

pub mod recruiter_tools;
pub mod travel_tools;

pub struct ToolContext<'a> {
    pub session_id: Uuid,
    pub agent_id: &'a str,
    /// The calling agent's read-only projection of the plan.
    pub view: &'a Value,
}

pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send + 'a>>;

pub trait Tool: Send + Sync {
    fn definition(&self) -> &ToolDefinition;
    fn run<'a>(&'a self, ctx: ToolContext<'a>, args: Value) -> ToolFuture<'a>;

    fn name(&self) -> &str {
        &self.definition().name
    }
}

/// Tools owned by one agent, in declaration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self { Self { tools: Vec::new() } }

    #[cfg(test)]
    pub fn with(mut self, t: impl Tool + 'static) -> Self {
        self.register(Box::new(t));
        self
    }

    /// A tool with an already registered name replaces it in place.
    pub fn register(&mut self, t: Box<dyn Tool>) {
        match self.tools.iter_mut().find(|existing| existing.name() == t.name()) {
            Some(slot) => {
                tracing::debug!(tool = %t.name(), "replacing registered tool");
                *slot = t;
            }
            None => self.tools.push(t),
        }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().map(|b| b.as_ref()).find(|t| t.name() == name)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition().clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

pub(crate) fn str_arg<'v>(args: &'v Value, key: &str) -> Option<&'v str> {
    args.get(key).and_then(|v| v.as_str()).map(str::trim).filter(|s| !s.is_empty())
}

/// Location from the arguments, else the destination the flight agent recorded.
pub(crate) fn location_or_destination(args: &Value, view: &Value, key: &str) -> anyhow::Result<String> {
    str_arg(args, key)
        .or_else(|| view.pointer("/flightInfo/destination").and_then(|v| v.as_str()))
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("missing {} and no flight destination in context", key))
}
