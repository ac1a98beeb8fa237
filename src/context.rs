//! Bounded per-session message log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_tag: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), agent_tag: None, created_at: Utc::now() }
    }

    pub fn tagged(role: Role, content: impl Into<String>, agent: &str) -> Self {
        Self { agent_tag: Some(agent.to_string()), ..Self::new(role, content) }
    }
}

/// One entry of a snapshot handed to the gateway.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_tag: Option<String>,
    pub current_agent: bool,
}

impl SnapshotEntry {
    /// Content as the model should see it; other agents' turns are labelled.
    pub fn rendered(&self) -> String {
        match (&self.agent_tag, self.current_agent) {
            (Some(tag), false) if self.role != Role::System => format!("[{}] {}", tag, self.content),
            _ => self.content.clone(),
        }
    }
}

/// Ordered log with a fixed system message at index 0.
///
/// At most `max_history` entries are kept after the system message. When the
/// bound is exceeded the oldest user turn is evicted together with everything
/// up to and including the assistant reply that answered it.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationContext {
    system: Message,
    entries: Vec<Message>,
    max_history: usize,
}

impl ConversationContext {
    pub fn new(system_prompt: impl Into<String>, max_history: usize) -> Self {
        Self {
            system: Message::new(Role::System, system_prompt),
            entries: Vec::new(),
            max_history: max_history.max(1),
        }
    }

    pub fn append(&mut self, message: Message) {
        if message.role == Role::System {
            // the system slot is fixed; extra system text is kept as a regular entry
            self.entries.push(Message { role: Role::Assistant, ..message });
        } else {
            self.entries.push(message);
        }
        while self.len() > self.max_history {
            self.evict_oldest();
        }
    }

    fn evict_oldest(&mut self) {
        if self.entries.first().map(|m| m.role) != Some(Role::User) {
            self.entries.remove(0);
            return;
        }
        let end = self
            .entries
            .iter()
            .skip(1)
            .position(|m| m.role == Role::Assistant || m.role == Role::User)
            .map(|i| i + 1);
        match end {
            Some(i) if self.entries[i].role == Role::Assistant => {
                self.entries.drain(..=i);
            }
            _ => {
                self.entries.remove(0);
            }
        }
    }

    /// Number of entries excluding the system message.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// All messages, system first.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        std::iter::once(&self.system).chain(self.entries.iter())
    }

    pub fn snapshot(&self, agent_tag: &str) -> Vec<SnapshotEntry> {
        self.messages()
            .map(|m| SnapshotEntry {
                role: m.role,
                content: m.content.clone(),
                agent_tag: m.agent_tag.clone(),
                current_agent: m.agent_tag.as_deref() == Some(agent_tag),
            })
            .collect()
    }

    /// Drops everything but the system message.
    pub fn reset(&mut self) {
        self.entries.clear();
    }
}
