//! Top-level coordinator: routes a query, runs the selected agents in order
//! against the session's plan, and returns the integrator's reply.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::{Agent, AgentContext, AgentOutcome, AgentRegistry, AgentReport, DEGRADED_SUMMARY};
use crate::context::{Message, Role};
use crate::error::DispatchError;
use crate::plan::{Plan, synthesize_itinerary};
use crate::router::RoutingStrategy;
use crate::session::{SessionInfo, SessionStore};
use crate::settings::Settings;

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub response: String,
    pub plan: Plan,
    pub agents: Vec<AgentReport>,
}

pub struct Orchestrator {
    registry: AgentRegistry,
    router: Box<dyn RoutingStrategy>,
    sessions: SessionStore,
    agent_timeout: Duration,
    idle_ttl: Duration,
}

impl Orchestrator {
    pub fn new(registry: AgentRegistry, router: Box<dyn RoutingStrategy>, settings: &Settings) -> Self {
        Self {
            registry,
            router,
            sessions: SessionStore::new(settings.system_prompt.clone(), settings.max_history),
            agent_timeout: settings.agent_timeout,
            idle_ttl: settings.session_idle_ttl,
        }
    }

    /// Adds or replaces an agent. Only valid before the orchestrator is shared.
    pub fn register_agent(&mut self, id: &str, agent: Arc<dyn Agent>) {
        self.registry.register(id, agent);
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub async fn initialize_session(&self, user_id: &str) -> Result<Uuid, DispatchError> {
        if user_id.trim().is_empty() {
            return Err(DispatchError::InvalidRequest("userId is required".into()));
        }
        Ok(self.sessions.create(user_id.trim()).await)
    }

    pub async fn end_session(&self, id: Uuid) -> Result<(), DispatchError> {
        self.sessions.end(id).await
    }

    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions.list().await
    }

    /// Runs one query. Queries on the same session are serialized by the
    /// session lock; agents run strictly in routing order.
    pub async fn process_query(
        &self,
        session_id: Uuid,
        query: &str,
        cancel: CancellationToken,
    ) -> Result<QueryOutcome, DispatchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(DispatchError::InvalidRequest("query is required".into()));
        }
        let started = Instant::now();
        let mut guard = tokio::select! {
            res = self.sessions.lock(session_id) => res?,
            _ = cancel.cancelled() => return Err(DispatchError::Cancelled),
        };
        let session = &mut *guard;
        session.touch();
        session.context.append(Message::new(Role::User, query));
        metrics::counter!("switchboard_queries_total").increment(1);

        let decision = self.router.select(query, &self.registry);
        tracing::info!(session = %session_id, agents = ?decision.agents, "routing query");

        let integrator = self.registry.integrator();
        let mut reports: Vec<AgentReport> = Vec::with_capacity(decision.agents.len());
        let mut response = None;

        for agent_id in &decision.agents {
            if cancel.is_cancelled() {
                tracing::info!(session = %session_id, "query cancelled; skipping remaining agents");
                return Err(DispatchError::Cancelled);
            }
            let agent = match self.registry.get(agent_id) {
                Ok(a) => a,
                Err(e) => {
                    tracing::warn!(agent = %agent_id, error = %e, "routed to unknown agent");
                    continue;
                }
            };

            tracing::debug!(session = %session_id, agent = %agent_id, "agent started");
            let result = {
                let mut ctx = AgentContext {
                    session_id,
                    agent_id,
                    view: agent.context_view(&session.plan),
                    plan: &session.plan,
                    conversation: &mut session.context,
                    prior: &reports,
                    cancel: cancel.clone(),
                };
                self.run_agent(agent.as_ref(), query, &mut ctx).await
            };

            match result {
                Ok(AgentOutcome { summary, data }) => {
                    if let (Some(slot), Some(data)) = (agent.slot(), data) {
                        if let Err(e) = session.plan.merge(slot, data) {
                            tracing::warn!(session = %session_id, agent = %agent_id, error = %e, "agent output not merged");
                        }
                    }
                    session.context.append(Message::tagged(Role::Assistant, summary.clone(), agent_id));
                    metrics::counter!("switchboard_agent_runs_total", "agent" => agent_id.clone(), "status" => "ok")
                        .increment(1);
                    tracing::debug!(session = %session_id, agent = %agent_id, "agent finished");
                    if Some(agent_id.as_str()) == integrator {
                        response = Some(summary.clone());
                    }
                    reports.push(AgentReport { agent: agent_id.clone(), summary, failed: false });
                }
                Err(e) => {
                    tracing::warn!(session = %session_id, agent = %agent_id, kind = e.kind(), error = %e, "agent failed; skipping");
                    metrics::counter!("switchboard_agent_runs_total", "agent" => agent_id.clone(), "status" => e.kind())
                        .increment(1);
                    reports.push(AgentReport { agent: agent_id.clone(), summary: DEGRADED_SUMMARY.into(), failed: true });
                }
            }
        }

        let response = response.unwrap_or_else(|| fallback_response(integrator.is_some(), &reports, &session.plan));
        session.touch();
        metrics::histogram!("switchboard_query_seconds").record(started.elapsed().as_secs_f64());
        Ok(QueryOutcome { response, plan: session.plan.clone(), agents: reports })
    }

    /// Bounds one agent by the agent timeout and the query's cancellation.
    async fn run_agent(
        &self,
        agent: &dyn Agent,
        query: &str,
        ctx: &mut AgentContext<'_>,
    ) -> Result<AgentOutcome, DispatchError> {
        let cancel = ctx.cancel.clone();
        tokio::select! {
            res = tokio::time::timeout(self.agent_timeout, agent.process(query, ctx)) => {
                res.unwrap_or(Err(DispatchError::Timeout(self.agent_timeout)))
            }
            _ = cancel.cancelled() => Err(DispatchError::Cancelled),
        }
    }

    pub async fn plan(&self, id: Uuid) -> Result<Plan, DispatchError> {
        Ok(self.sessions.lock(id).await?.plan.clone())
    }

    /// Domain slots of the plan, without the integrator's own slot.
    pub async fn recommendations(&self, id: Uuid) -> Result<Value, DispatchError> {
        let exclude: Vec<&str> = self.registry.integrator_slot().into_iter().collect();
        Ok(self.sessions.lock(id).await?.plan.recommendations(&exclude))
    }

    pub async fn itinerary(&self, id: Uuid) -> Result<Value, DispatchError> {
        synthesize_itinerary(&self.sessions.lock(id).await?.plan)
    }

    pub async fn history(&self, id: Uuid) -> Result<Vec<Message>, DispatchError> {
        Ok(self.sessions.lock(id).await?.context.messages().cloned().collect())
    }

    pub async fn evict_idle(&self) -> usize {
        self.sessions.evict_idle(self.idle_ttl).await
    }

    /// Periodically evicts idle sessions until `shutdown` fires.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let evicted = self.evict_idle().await;
                        if evicted > 0 {
                            let remaining = self.sessions.len().await;
                            tracing::info!(evicted, remaining, "idle sessions swept");
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    }
}

fn fallback_response(has_integrator: bool, reports: &[AgentReport], plan: &Plan) -> String {
    if !has_integrator {
        let ok: Vec<&str> = reports.iter().filter(|r| !r.failed).map(|r| r.summary.as_str()).collect();
        if !ok.is_empty() {
            return ok.join("\n\n");
        }
    }
    format!("Here is where your plan stands:\n{}", plan.describe())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::agent::testing::FixedAgent;
    use crate::agent::profiles::build_registry;
    use crate::agent::tools::{Tool, ToolContext, ToolFuture};
    use crate::agent::{ToolAgent, ToolCallExecutor};
    use crate::models::ToolDefinition;
    use crate::models::testing::ScriptedGateway;
    use crate::router::KeywordRouter;
    use crate::settings::Profile;

    fn settings() -> Settings {
        Settings { agent_timeout: Duration::from_secs(2), ..Settings::default() }
    }

    fn travel(gw: Arc<ScriptedGateway>) -> Orchestrator {
        let s = settings();
        let reg = build_registry(Profile::Travel, gw, &s).unwrap();
        Orchestrator::new(reg, Box::new(KeywordRouter), &s)
    }

    fn fixed(agents: Vec<(&str, FixedAgent)>, integrator: Option<&str>, s: &Settings) -> Orchestrator {
        let mut reg = AgentRegistry::new();
        for (id, a) in agents {
            reg.register(id, Arc::new(a));
        }
        if let Some(id) = integrator {
            reg.set_integrator(id).unwrap();
        }
        Orchestrator::new(reg, Box::new(KeywordRouter), s)
    }

    #[tokio::test]
    async fn flights_then_hotels_near_there() {
        let gw = ScriptedGateway::new();
        gw.tool_call("flight", "search_flights", r#"{"origin":"SEA","destination":"SFO","date":"2024-12-15"}"#);
        gw.tool_call("hotel", "search_hotels", "{}");
        let orch = travel(gw.clone());
        let sid = orch.initialize_session("u1").await.unwrap();

        let first = orch
            .process_query(sid, "Flights from SEA to SFO on 2024-12-15", CancellationToken::new())
            .await
            .unwrap();
        let flights = first.plan.get("flights").unwrap();
        assert_eq!(flights["origin"], "SEA");
        assert_eq!(flights["destination"], "SFO");
        assert_eq!(first.response, "itinerary has nothing to add");
        assert!(first.plan.get("itinerary").is_none());

        let second = orch.process_query(sid, "Hotels near there", CancellationToken::new()).await.unwrap();
        let hotel_call = &gw.calls_for("hotel")[0];
        assert!(hotel_call.system_prompt.as_deref().unwrap().contains("\"destination\":\"SFO\""));
        assert_eq!(second.plan.get("hotels").unwrap()["location"], "SFO");
        assert_eq!(second.plan.get("flights"), first.plan.get("flights"));
        assert_eq!(second.plan.get("itinerary").unwrap()["destination"], "SFO");
        assert!(hotel_call
            .history
            .iter()
            .any(|e| e.role == Role::Assistant && e.agent_tag.as_deref() == Some("flight") && !e.current_agent));
        assert_eq!(gw.agents_called(), vec!["flight", "itinerary", "hotel", "itinerary"]);
    }

    #[tokio::test]
    async fn same_slot_is_last_write_wins_across_queries() {
        let gw = ScriptedGateway::new();
        gw.tool_call("flight", "search_flights", r#"{"origin":"SEA","destination":"SFO"}"#);
        gw.tool_call("flight", "search_flights", r#"{"origin":"SEA","destination":"LAX"}"#);
        let orch = travel(gw);
        let sid = orch.initialize_session("u1").await.unwrap();
        orch.process_query(sid, "flight to SFO", CancellationToken::new()).await.unwrap();
        let out = orch.process_query(sid, "flight to LAX instead", CancellationToken::new()).await.unwrap();
        assert_eq!(out.plan.get("flights").unwrap()["destination"], "LAX");
        assert!(out.plan.get("flights").unwrap().to_string().find("SFO").is_none());
    }

    #[tokio::test]
    async fn failing_agent_does_not_abort_the_pipeline() {
        let s = settings();
        let orch = fixed(
            vec![
                ("flight", FixedAgent::new(Some("flights"), &["flight"], Some(json!({"origin": "SEA"})))),
                ("hotel", FixedAgent::failing("hotels", &["hotel"])),
                ("activity", FixedAgent::new(Some("activities"), &["tour"], Some(json!([{"name": "tour"}])))),
                ("itinerary", FixedAgent::new(None, &[], None)),
            ],
            Some("itinerary"),
            &s,
        );
        let sid = orch.initialize_session("u1").await.unwrap();
        let out = orch
            .process_query(sid, "flight, hotel and a tour", CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.plan.get("flights"), Some(&json!({"origin": "SEA"})));
        assert!(out.plan.get("hotels").is_none());
        assert_eq!(out.plan.get("activities"), Some(&json!([{"name": "tour"}])));
        assert_eq!(out.response, "None done");
        assert_eq!(out.agents.iter().filter(|r| r.failed).map(|r| r.agent.as_str()).collect::<Vec<_>>(), vec!["hotel"]);
    }

    struct FixedHotel {
        def: ToolDefinition,
    }

    impl Tool for FixedHotel {
        fn definition(&self) -> &ToolDefinition {
            &self.def
        }

        fn run<'a>(&'a self, _ctx: ToolContext<'a>, _args: Value) -> ToolFuture<'a> {
            Box::pin(async { Ok::<_, anyhow::Error>(json!({"id": "HTL789", "pricePerNight": 199.99})) })
        }
    }

    #[tokio::test]
    async fn tool_output_reaches_plan_unmodified() {
        let gw = ScriptedGateway::new();
        gw.tool_call("hotel", "lookup_hotel", "{}");
        let s = settings();
        let executor = Arc::new(ToolCallExecutor::new(gw.clone(), Duration::from_secs(1)));
        let hotel = ToolAgent::builder(gw.clone(), executor)
            .slot("hotels")
            .keywords(&["hotel"])
            .tool(FixedHotel { def: ToolDefinition::new("lookup_hotel", "one hotel") })
            .build();
        let mut orch = Orchestrator::new(AgentRegistry::new(), Box::new(KeywordRouter), &s);
        orch.register_agent("hotel", Arc::new(hotel));
        let sid = orch.initialize_session("u1").await.unwrap();
        let out = orch.process_query(sid, "book the hotel", CancellationToken::new()).await.unwrap();
        assert_eq!(out.plan.get("hotels"), Some(&json!({"id": "HTL789", "pricePerNight": 199.99})));
        assert_eq!(out.response, "hotel summarised its results");
    }

    #[tokio::test]
    async fn ended_session_rejects_queries() {
        let orch = travel(ScriptedGateway::new());
        let sid = orch.initialize_session("u1").await.unwrap();
        orch.end_session(sid).await.unwrap();
        let err = orch.process_query(sid, "flights", CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, DispatchError::SessionNotFound(id) if id == sid.to_string()));
        assert!(matches!(orch.plan(sid).await, Err(DispatchError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn blank_input_is_invalid() {
        let orch = travel(ScriptedGateway::new());
        assert!(matches!(orch.initialize_session("  ").await, Err(DispatchError::InvalidRequest(_))));
        let sid = orch.initialize_session("u1").await.unwrap();
        assert!(matches!(
            orch.process_query(sid, " ", CancellationToken::new()).await,
            Err(DispatchError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn history_stays_bounded_with_system_first() {
        let s = Settings { max_history: 4, ..settings() };
        let orch = Orchestrator::new(build_registry(Profile::Travel, ScriptedGateway::new(), &s).unwrap(), Box::new(KeywordRouter), &s);
        let sid = orch.initialize_session("u1").await.unwrap();
        for i in 0..6 {
            orch.process_query(sid, &format!("question {}", i), CancellationToken::new()).await.unwrap();
            let history = orch.history(sid).await.unwrap();
            assert!(history.len() <= 5);
            assert_eq!(history[0].role, Role::System);
            assert_eq!(history[0].content, s.system_prompt);
        }
    }

    struct Slow {
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        delay: Duration,
    }

    #[async_trait]
    impl Agent for Slow {
        fn slot(&self) -> Option<&str> {
            Some("slow")
        }

        fn keywords(&self) -> &[String] {
            &[]
        }

        async fn process(&self, _query: &str, _ctx: &mut AgentContext<'_>) -> Result<AgentOutcome, DispatchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(AgentOutcome { summary: "slow done".into(), data: Some(json!({"n": now})) })
        }
    }

    fn slow_registry(delay: Duration) -> (AgentRegistry, Arc<AtomicUsize>) {
        let peak = Arc::new(AtomicUsize::new(0));
        let mut reg = AgentRegistry::new();
        reg.register("slow", Arc::new(Slow { in_flight: Arc::new(AtomicUsize::new(0)), peak: peak.clone(), delay }));
        reg.set_fallback("slow").unwrap();
        (reg, peak)
    }

    fn slow_orchestrator(delay: Duration, s: &Settings) -> (Arc<Orchestrator>, Arc<AtomicUsize>) {
        let (reg, peak) = slow_registry(delay);
        (Arc::new(Orchestrator::new(reg, Box::new(KeywordRouter), s)), peak)
    }

    /// Starts a query and cancels it once `after` has elapsed.
    async fn cancel_midway(orch: &Arc<Orchestrator>, sid: Uuid, after: Duration) -> Result<QueryOutcome, DispatchError> {
        let cancel = CancellationToken::new();
        let task = {
            let orch = orch.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { orch.process_query(sid, "anything", cancel).await })
        };
        tokio::time::sleep(after).await;
        cancel.cancel();
        task.await.unwrap()
    }

    #[tokio::test]
    async fn concurrent_queries_on_one_session_are_serialized() {
        let (orch, peak) = slow_orchestrator(Duration::from_millis(30), &settings());
        let sid = orch.initialize_session("u1").await.unwrap();
        let (a, b) = tokio::join!(
            orch.process_query(sid, "one", CancellationToken::new()),
            orch.process_query(sid, "two", CancellationToken::new()),
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_agent_times_out_as_contained_failure() {
        let s = Settings { agent_timeout: Duration::from_millis(10), ..settings() };
        let (orch, _) = slow_orchestrator(Duration::from_millis(200), &s);
        let sid = orch.initialize_session("u1").await.unwrap();
        let out = orch.process_query(sid, "anything", CancellationToken::new()).await.unwrap();
        assert!(out.agents[0].failed);
        assert!(out.plan.is_empty());
        assert!(out.response.contains("Nothing has been planned yet."));
    }

    #[tokio::test]
    async fn cancelled_query_is_aborted() {
        let (orch, _) = slow_orchestrator(Duration::from_millis(1), &settings());
        let sid = orch.initialize_session("u1").await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(orch.process_query(sid, "x", cancel).await, Err(DispatchError::Cancelled)));
    }

    #[tokio::test]
    async fn cancellation_during_an_agent_fails_only_that_agent() {
        let (orch, _) = slow_orchestrator(Duration::from_millis(200), &settings());
        let sid = orch.initialize_session("u1").await.unwrap();
        let out = cancel_midway(&orch, sid, Duration::from_millis(20)).await.unwrap();
        assert_eq!(out.agents.len(), 1);
        assert!(out.agents[0].failed);
        assert_eq!(out.agents[0].summary, DEGRADED_SUMMARY);
        assert!(out.plan.is_empty());
    }

    #[tokio::test]
    async fn cancellation_during_an_agent_skips_the_agents_after_it() {
        let s = settings();
        let (mut reg, _) = slow_registry(Duration::from_millis(200));
        reg.register("wrap", Arc::new(FixedAgent::new(Some("summary"), &[], Some(json!({"done": true})))));
        reg.set_integrator("wrap").unwrap();
        let orch = Arc::new(Orchestrator::new(reg, Box::new(KeywordRouter), &s));
        let sid = orch.initialize_session("u1").await.unwrap();

        let err = cancel_midway(&orch, sid, Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, DispatchError::Cancelled));
        let plan = orch.plan(sid).await.unwrap();
        assert!(plan.get("summary").is_none());
        assert!(plan.get("slow").is_none());

        let out = orch.process_query(sid, "anything", CancellationToken::new()).await.unwrap();
        assert_eq!(out.agents.iter().map(|r| r.agent.as_str()).collect::<Vec<_>>(), vec!["slow", "wrap"]);
        assert_eq!(out.plan.get("summary"), Some(&json!({"done": true})));
    }

    #[tokio::test]
    async fn reserved_slot_output_is_dropped_without_failing_the_query() {
        let s = settings();
        let orch = fixed(
            vec![
                ("flight", FixedAgent::new(Some("flights"), &["flight"], Some(json!({"options": [{"price": 90.0}]})))),
                ("shadow", FixedAgent::new(Some("aggregate"), &["flight"], Some(json!({"totalCost": 0})))),
            ],
            None,
            &s,
        );
        let sid = orch.initialize_session("u1").await.unwrap();
        let out = orch.process_query(sid, "flight", CancellationToken::new()).await.unwrap();
        assert!(out.agents.iter().all(|r| !r.failed));
        assert!(out.plan.get("aggregate").is_none());
        assert_eq!(out.plan.aggregate().total_cost, Some(90.0));
    }

    #[tokio::test]
    async fn recommendations_and_itinerary_views() {
        let gw = ScriptedGateway::new();
        gw.tool_call("flight", "search_flights", r#"{"origin":"SEA","destination":"SFO","date":"2024-12-15"}"#);
        let orch = travel(gw);
        let sid = orch.initialize_session("u1").await.unwrap();
        orch.process_query(sid, "flight please", CancellationToken::new()).await.unwrap();
        assert!(matches!(orch.itinerary(sid).await, Err(DispatchError::InsufficientPlan(_))));
        let rec = orch.recommendations(sid).await.unwrap();
        assert!(rec.get("flights").is_some());
        assert!(rec.get("itinerary").is_none());
    }

    #[tokio::test]
    async fn sweeper_evicts_idle_sessions() {
        let s = Settings { session_idle_ttl: Duration::ZERO, ..settings() };
        let orch = Arc::new(Orchestrator::new(AgentRegistry::new(), Box::new(KeywordRouter), &s));
        let sid = orch.initialize_session("u1").await.unwrap();
        let shutdown = CancellationToken::new();
        let handle = orch.clone().spawn_sweeper(Duration::from_millis(5), shutdown.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        handle.await.unwrap();
        assert!(matches!(orch.plan(sid).await, Err(DispatchError::SessionNotFound(_))));
    }
}
