//! Reference recruiting tools over a fixed candidate pool.

use chrono::Utc;
use serde_json::{Value, json};

use super::{Tool, ToolContext, ToolFuture, str_arg};
use crate::models::ToolDefinition;

struct Candidate {
    id: &'static str,
    name: &'static str,
    role: &'static str,
    traits: &'static [&'static str],
}

static POOL: [Candidate; 4] = [
    Candidate { id: "CAND-101", name: "Ana Ruiz", role: "Support Lead", traits: &["empathetic", "patient", "organized"] },
    Candidate { id: "CAND-102", name: "Sam Okafor", role: "Backend Engineer", traits: &["analytical", "curious"] },
    Candidate { id: "CAND-103", name: "Lee Park", role: "Product Designer", traits: &["empathetic", "creative"] },
    Candidate { id: "CAND-104", name: "Jo Novak", role: "Sales Manager", traits: &["persuasive", "resilient"] },
];

fn candidate(id: &str) -> Option<&'static Candidate> {
    POOL.iter().find(|c| c.id.eq_ignore_ascii_case(id))
}

pub struct SearchCandidatesTool {
    def: ToolDefinition,
}

impl SearchCandidatesTool {
    pub fn new() -> Self {
        Self {
            def: ToolDefinition::new("search_candidates_by_traits", "Find candidates whose assessed traits match")
                .array_param("traits", "string", "Personality traits to look for", true)
                .param("limit", "integer", "Maximum number of candidates", false),
        }
    }

    async fn call(&self, _ctx: ToolContext<'_>, args: Value) -> anyhow::Result<Value> {
        let wanted: Vec<String> = args
            .get("traits")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str()).map(|s| s.trim().to_ascii_lowercase()).collect())
            .unwrap_or_default();
        if wanted.is_empty() {
            anyhow::bail!("traits must name at least one trait");
        }
        let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(10) as usize;
        let mut scored: Vec<(usize, &Candidate)> = POOL
            .iter()
            .map(|c| (wanted.iter().filter(|w| c.traits.contains(&w.as_str())).count(), c))
            .filter(|(score, _)| *score > 0)
            .collect();
        // stable: equal scores keep pool order
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        let candidates: Vec<Value> = scored
            .into_iter()
            .take(limit)
            .map(|(score, c)| json!({ "id": c.id, "name": c.name, "role": c.role, "traits": c.traits, "matchScore": score }))
            .collect();
        Ok(json!({ "traits": wanted, "candidates": candidates }))
    }
}

impl Tool for SearchCandidatesTool {
    fn definition(&self) -> &ToolDefinition { &self.def }

    fn run<'a>(&'a self, ctx: ToolContext<'a>, args: Value) -> ToolFuture<'a> {
        Box::pin(self.call(ctx, args))
    }
}

pub struct RecordFeedbackTool {
    def: ToolDefinition,
}

impl RecordFeedbackTool {
    pub fn new() -> Self {
        Self {
            def: ToolDefinition::new("record_feedback", "Record interviewer feedback for a candidate")
                .param("candidateId", "string", "Candidate id; defaults to the top current candidate", false)
                .param("rating", "integer", "Score from 1 to 5", true)
                .param("notes", "string", "Free-form notes", false),
        }
    }

    async fn call(&self, ctx: ToolContext<'_>, args: Value) -> anyhow::Result<Value> {
        let id = str_arg(&args, "candidateId")
            .or_else(|| ctx.view.pointer("/candidates/candidates/0/id").and_then(|v| v.as_str()))
            .ok_or_else(|| anyhow::anyhow!("missing candidateId and no current candidates"))?;
        let c = candidate(id).ok_or_else(|| anyhow::anyhow!("unknown candidate {}", id))?;
        let rating = args.get("rating").and_then(|v| v.as_u64()).ok_or_else(|| anyhow::anyhow!("missing rating"))?;
        if !(1..=5).contains(&rating) {
            anyhow::bail!("rating must be between 1 and 5, got {}", rating);
        }
        Ok(json!({
            "candidateId": c.id,
            "candidateName": c.name,
            "rating": rating,
            "notes": str_arg(&args, "notes"),
            "recordedAt": Utc::now().to_rfc3339(),
            "recordedBy": ctx.agent_id,
        }))
    }
}

impl Tool for RecordFeedbackTool {
    fn definition(&self) -> &ToolDefinition { &self.def }

    fn run<'a>(&'a self, ctx: ToolContext<'a>, args: Value) -> ToolFuture<'a> {
        Box::pin(self.call(ctx, args))
    }
}
