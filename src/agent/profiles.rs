//! Registry factories for the built-in agent line-ups.

use std::sync::Arc;

use super::tools::recruiter_tools::{RecordFeedbackTool, SearchCandidatesTool};
use super::tools::travel_tools::{SearchActivitiesTool, SearchFlightsTool, SearchHotelsTool};
use super::{AgentRegistry, IntegratorAgent, ToolAgent, ToolCallExecutor};
use crate::error::DispatchError;
use crate::models::CompletionGateway;
use crate::settings::{Profile, Settings};

const FLIGHT_PROMPT: &str = "You are the flight specialist. Use search_flights with IATA airport codes \
and YYYY-MM-DD dates, then summarise the best options in two sentences.";
const HOTEL_PROMPT: &str = "You are the hotel specialist. Use search_hotels; when the traveller gives no \
location, search near the flight destination from the shared plan.";
const ACTIVITY_PROMPT: &str = "You are the activities specialist. Use search_activities for the trip \
destination and the traveller's stated interests.";
const TRAVEL_GENERAL_PROMPT: &str = "You are a friendly travel assistant. Answer general questions briefly \
and suggest what the traveller could ask for next (flights, hotels, activities).";
const ITINERARY_PROMPT: &str = "You are the trip planner. Turn the current plan and the specialists' notes \
into one short, friendly reply. Mention the estimated total when it is known.";

const TRAIT_PROMPT: &str = "You are the talent specialist. Use search_candidates_by_traits with the traits \
the recruiter asks for and summarise the strongest matches.";
const FEEDBACK_PROMPT: &str = "You record interview feedback. Use record_feedback with a 1-5 rating; when \
no candidate id is given, the top shortlisted candidate is meant.";
const RECRUITER_GENERAL_PROMPT: &str = "You are a recruiting assistant. Answer general questions briefly.";
const SUMMARY_PROMPT: &str = "You brief the recruiter. Summarise the shortlist and any recorded feedback \
in a few sentences.";

/// Builds the registry for `profile`. Every agent shares one gateway and one
/// executor; tool calls are bounded by the gateway call timeout.
pub fn build_registry(
    profile: Profile,
    gateway: Arc<dyn CompletionGateway>,
    settings: &Settings,
) -> Result<AgentRegistry, DispatchError> {
    let executor = Arc::new(ToolCallExecutor::new(gateway.clone(), settings.gateway.call_timeout));
    let registry = match profile {
        Profile::Travel => travel(gateway, executor)?,
        Profile::Recruiter => recruiter(gateway, executor)?,
    };
    tracing::info!(?profile, agents = registry.len(), "agent registry built");
    Ok(registry)
}

fn travel(gateway: Arc<dyn CompletionGateway>, executor: Arc<ToolCallExecutor>) -> Result<AgentRegistry, DispatchError> {
    let mut reg = AgentRegistry::new();
    reg.register(
        "flight",
        Arc::new(
            ToolAgent::builder(gateway.clone(), executor.clone())
                .slot("flights")
                .keywords(&["flight", "fly", "airport", "airline"])
                .prompt(FLIGHT_PROMPT)
                .tool(SearchFlightsTool::new())
                .build(),
        ),
    );
    reg.register(
        "hotel",
        Arc::new(
            ToolAgent::builder(gateway.clone(), executor.clone())
                .slot("hotels")
                .keywords(&["hotel", "stay", "accommodation", "lodging"])
                .prompt(HOTEL_PROMPT)
                .tool(SearchHotelsTool::new())
                .sees("flights", "flightInfo")
                .build(),
        ),
    );
    reg.register(
        "activity",
        Arc::new(
            ToolAgent::builder(gateway.clone(), executor.clone())
                .slot("activities")
                .keywords(&["activit", "things to do", "tour", "sightseeing", "museum"])
                .prompt(ACTIVITY_PROMPT)
                .tool(SearchActivitiesTool::new())
                .sees("flights", "flightInfo")
                .sees("hotels", "hotelInfo")
                .build(),
        ),
    );
    reg.register(
        "general",
        Arc::new(ToolAgent::builder(gateway.clone(), executor).prompt(TRAVEL_GENERAL_PROMPT).build()),
    );
    reg.register("itinerary", Arc::new(IntegratorAgent::itinerary(gateway, "itinerary", ITINERARY_PROMPT)));
    reg.set_fallback("general")?;
    reg.set_integrator("itinerary")?;
    Ok(reg)
}

fn recruiter(gateway: Arc<dyn CompletionGateway>, executor: Arc<ToolCallExecutor>) -> Result<AgentRegistry, DispatchError> {
    let mut reg = AgentRegistry::new();
    reg.register(
        "trait",
        Arc::new(
            ToolAgent::builder(gateway.clone(), executor.clone())
                .slot("candidates")
                .keywords(&["candidate", "trait", "empath", "personality", "hire"])
                .prompt(TRAIT_PROMPT)
                .tool(SearchCandidatesTool::new())
                .build(),
        ),
    );
    reg.register(
        "feedback",
        Arc::new(
            ToolAgent::builder(gateway.clone(), executor.clone())
                .slot("feedback")
                .keywords(&["feedback", "rating", "interview", "review"])
                .prompt(FEEDBACK_PROMPT)
                .tool(RecordFeedbackTool::new())
                .sees("candidates", "candidates")
                .build(),
        ),
    );
    reg.register(
        "general",
        Arc::new(ToolAgent::builder(gateway.clone(), executor).prompt(RECRUITER_GENERAL_PROMPT).build()),
    );
    reg.register("summary", Arc::new(IntegratorAgent::summary(gateway, SUMMARY_PROMPT)));
    reg.set_fallback("general")?;
    reg.set_integrator("summary")?;
    Ok(reg)
}
