use std::time::Duration;

use thiserror::Error;

use crate::models::GatewayError;
use crate::parsing::ParseError;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Carries the id as the caller wrote it, which may not be a valid UUID.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("agent not registered: {0}")]
    AgentNotRegistered(String),

    #[error("could not parse arguments for {tool}: {source}")]
    ArgumentParse {
        tool: String,
        #[source]
        source: ParseError,
    },

    #[error("tool not implemented: {0}")]
    ToolNotImplemented(String),

    #[error("tool {tool} failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("completion gateway failure: {0}")]
    CompletionGateway(#[from] GatewayError),

    #[error("slot name is reserved: {0}")]
    ReservedSlot(String),

    #[error("insufficient plan data: {0}")]
    InsufficientPlan(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,
}

impl DispatchError {
    /// Short machine-readable tag used in tool results and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "session_not_found",
            Self::AgentNotRegistered(_) => "agent_not_registered",
            Self::ArgumentParse { .. } => "argument_parse_error",
            Self::ToolNotImplemented(_) => "tool_not_implemented",
            Self::ToolExecution { .. } => "tool_execution_failure",
            Self::CompletionGateway(_) => "completion_gateway_failure",
            Self::ReservedSlot(_) => "reserved_slot",
            Self::InsufficientPlan(_) => "insufficient_plan",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}
