use std::sync::Arc;

use super::Agent;
use crate::error::DispatchError;

/// Agents keyed by id, kept in declaration order. Built once at startup.
#[derive(Default)]
pub struct AgentRegistry {
    entries: Vec<(String, Arc<dyn Agent>)>,
    integrator: Option<String>,
    fallback: Option<String>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `agent` under `id`. A duplicate id replaces the earlier agent
    /// but keeps its declaration position.
    pub fn register(&mut self, id: impl Into<String>, agent: Arc<dyn Agent>) {
        let id = id.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == id) {
            Some(entry) => {
                tracing::debug!(agent = %id, "replacing registered agent");
                entry.1 = agent;
            }
            None => self.entries.push((id, agent)),
        }
    }

    pub fn set_integrator(&mut self, id: &str) -> Result<(), DispatchError> {
        self.get(id)?;
        self.integrator = Some(id.to_string());
        Ok(())
    }

    pub fn set_fallback(&mut self, id: &str) -> Result<(), DispatchError> {
        self.get(id)?;
        self.fallback = Some(id.to_string());
        Ok(())
    }

    pub fn integrator(&self) -> Option<&str> {
        self.integrator.as_deref()
    }

    pub fn fallback(&self) -> Option<&str> {
        self.fallback.as_deref()
    }

    pub fn get(&self, id: &str) -> Result<&Arc<dyn Agent>, DispatchError> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, a)| a)
            .ok_or_else(|| DispatchError::AgentNotRegistered(id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Agent>)> {
        self.entries.iter().map(|(id, a)| (id.as_str(), a))
    }

    /// Slots owned by the integrator, excluded from recommendations.
    pub fn integrator_slot(&self) -> Option<&str> {
        self.integrator.as_deref().and_then(|id| self.get(id).ok()).and_then(|a| a.slot())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
