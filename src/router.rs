//! Query routing. The orchestrator only depends on [`RoutingStrategy`], so the
//! keyword matcher can be swapped for a classifier.

use serde::Serialize;

use crate::agent::AgentRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    /// Agent ids in execution order.
    pub agents: Vec<String>,
}

pub trait RoutingStrategy: Send + Sync {
    /// Must be deterministic for a given query and registry.
    fn select(&self, query: &str, registry: &AgentRegistry) -> RoutingDecision;
}

/// Case-insensitive substring matching against each agent's keywords.
///
/// Matches keep registry declaration order. With no match the registry's
/// fallback agent runs. The integrator is always appended last.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordRouter;

impl RoutingStrategy for KeywordRouter {
    fn select(&self, query: &str, registry: &AgentRegistry) -> RoutingDecision {
        let q = query.to_lowercase();
        let reserved = |id: &str| Some(id) == registry.integrator() || Some(id) == registry.fallback();

        let mut agents: Vec<String> = registry
            .iter()
            .filter(|(id, _)| !reserved(*id))
            .filter(|(_, agent)| agent.keywords().iter().any(|k| !k.is_empty() && q.contains(k.as_str())))
            .map(|(id, _)| id.to_string())
            .collect();

        if agents.is_empty() {
            if let Some(fallback) = registry.fallback() {
                agents.push(fallback.to_string());
            }
        }
        if let Some(integrator) = registry.integrator() {
            agents.push(integrator.to_string());
        }

        tracing::debug!(query = %query, agents = ?agents, "routing decision");
        RoutingDecision { agents }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::agent::profiles::build_registry;
    use crate::agent::testing::FixedAgent;
    use crate::models::testing::ScriptedGateway;
    use crate::settings::{Profile, Settings};

    fn registry(profile: Profile) -> AgentRegistry {
        build_registry(profile, ScriptedGateway::new(), &Settings::default()).unwrap()
    }

    #[test]
    fn empathetic_candidates_route_to_trait_then_summary() {
        let reg = registry(Profile::Recruiter);
        for _ in 0..3 {
            let d = KeywordRouter.select("Find empathetic candidates", &reg);
            assert_eq!(d.agents, vec!["trait", "summary"]);
        }
    }

    #[test]
    fn multiple_matches_keep_declaration_order() {
        let reg = registry(Profile::Travel);
        let d = KeywordRouter.select("Need a HOTEL and a flight, plus a museum tour", &reg);
        assert_eq!(d.agents, vec!["flight", "hotel", "activity", "itinerary"]);
    }

    #[test]
    fn unmatched_queries_use_fallback() {
        let reg = registry(Profile::Travel);
        let d = KeywordRouter.select("what's the weather like?", &reg);
        assert_eq!(d.agents, vec!["general", "itinerary"]);
    }

    #[test]
    fn registry_without_roles_only_returns_matches() {
        let mut reg = AgentRegistry::new();
        reg.register("reel", Arc::new(FixedAgent::new(Some("reels"), &["reel", "video"], None)));
        assert_eq!(KeywordRouter.select("post a Video", &reg).agents, vec!["reel"]);
        assert!(KeywordRouter.select("hello", &reg).agents.is_empty());
    }
}
