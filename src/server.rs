use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing::{get, post}};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::{net::SocketAddr, sync::Arc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::context::Message;
use crate::error::DispatchError;
use crate::orchestrator::{Orchestrator, QueryOutcome};
use crate::plan::Plan;
use crate::session::SessionInfo;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Parent of every request's cancellation token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, shutdown: CancellationToken) -> Self {
        Self { orchestrator, shutdown }
    }
}

pub struct ApiError(DispatchError);

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self(DispatchError::InvalidRequest(e.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DispatchError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::InvalidRequest(_) | DispatchError::InsufficientPlan(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(kind = self.0.kind(), error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Unparseable ids can never name a session; the error echoes what was sent.
fn session_id(raw: &str) -> Result<Uuid, ApiError> {
    let raw = raw.trim();
    Uuid::parse_str(raw).map_err(|_| ApiError(DispatchError::SessionNotFound(raw.to_string())))
}

fn required(field: Option<String>, name: &str) -> Result<String, ApiError> {
    field
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError(DispatchError::InvalidRequest(format!("{} is required", name))))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionBody {
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
}

async fn create_session(
    State(state): State<AppState>,
    body: Result<Json<CreateSessionBody>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let Json(body) = body?;
    let user_id = required(body.user_id, "userId")?;
    let session_id = state.orchestrator.initialize_session(&user_id).await?;
    Ok((StatusCode::CREATED, Json(CreateSessionResponse { session_id })))
}

#[derive(Debug, Serialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<SessionInfo>,
}

async fn list_sessions(State(state): State<AppState>) -> Json<ListSessionsResponse> {
    Json(ListSessionsResponse { sessions: state.orchestrator.sessions().await })
}

async fn end_session(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let id = session_id(&id)?;
    state.orchestrator.end_session(id).await?;
    Ok(Json(json!({ "message": format!("session {} ended", id) })))
}

async fn get_plan(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Plan>, ApiError> {
    Ok(Json(state.orchestrator.plan(session_id(&id)?).await?))
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    messages: Vec<Message>,
}

async fn get_history(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<HistoryResponse>, ApiError> {
    let messages = state.orchestrator.history(session_id(&id)?).await?;
    Ok(Json(HistoryResponse { messages }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryBody {
    pub session_id: Option<String>,
    pub query: Option<String>,
}

async fn query(
    State(state): State<AppState>,
    body: Result<Json<QueryBody>, JsonRejection>,
) -> Result<Json<QueryOutcome>, ApiError> {
    let Json(body) = body?;
    let raw_id = required(body.session_id, "sessionId")?;
    let text = required(body.query, "query")?;
    let id = session_id(&raw_id)?;
    let outcome = state.orchestrator.process_query(id, &text, state.shutdown.child_token()).await?;
    Ok(Json(outcome))
}

async fn recommendations(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let recommendations = state.orchestrator.recommendations(session_id(&id)?).await?;
    Ok(Json(json!({ "recommendations": recommendations })))
}

async fn itinerary(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let itinerary = state.orchestrator.itinerary(session_id(&id)?).await?;
    Ok(Json(json!({ "itinerary": itinerary })))
}

async fn healthz(State(state): State<AppState>) -> Json<Value> {
    let agents: Vec<&str> = state.orchestrator.registry().iter().map(|(id, _)| id).collect();
    Json(json!({ "status": "ok", "agents": agents }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/sessions", post(create_session).get(list_sessions))
        .route("/v1/sessions/:id", axum::routing::delete(end_session))
        .route("/v1/sessions/:id/plan", get(get_plan))
        .route("/v1/sessions/:id/history", get(get_history))
        .route("/v1/query", post(query))
        .route("/v1/recommendations/:session_id", get(recommendations))
        .route("/v1/itinerary/:session_id", get(itinerary))
        .route("/healthz", get(healthz))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::profiles::build_registry;
    use crate::models::testing::ScriptedGateway;
    use crate::router::KeywordRouter;
    use crate::settings::{Profile, Settings};

    async fn spawn(gw: Arc<ScriptedGateway>) -> String {
        let settings = Settings::default();
        let registry = build_registry(Profile::Travel, gw, &settings).unwrap();
        let orchestrator = Arc::new(Orchestrator::new(registry, Box::new(KeywordRouter), &settings));
        let state = AppState::new(orchestrator, CancellationToken::new());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router(state)).await.unwrap() });
        format!("http://{}", addr)
    }

    async fn new_session(client: &reqwest::Client, base: &str) -> String {
        let res = client.post(format!("{}/v1/sessions", base)).json(&json!({"userId": "u1"})).send().await.unwrap();
        assert_eq!(res.status(), 201);
        let body: Value = res.json().await.unwrap();
        body["sessionId"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn session_lifecycle_over_http() {
        let base = spawn(ScriptedGateway::new()).await;
        let client = reqwest::Client::new();

        let res = client.post(format!("{}/v1/sessions", base)).json(&json!({})).send().await.unwrap();
        assert_eq!(res.status(), 400);
        let body: Value = res.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("userId"));

        let sid = new_session(&client, &base).await;
        let listed: Value = client.get(format!("{}/v1/sessions", base)).send().await.unwrap().json().await.unwrap();
        assert_eq!(listed["sessions"][0]["sessionId"], sid.as_str());

        let res = client.delete(format!("{}/v1/sessions/{}", base, sid)).send().await.unwrap();
        assert_eq!(res.status(), 200);
        let body: Value = res.json().await.unwrap();
        assert!(body["message"].as_str().unwrap().contains(&sid));

        let res = client.delete(format!("{}/v1/sessions/{}", base, sid)).send().await.unwrap();
        assert_eq!(res.status(), 404);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["error"], format!("session not found: {}", sid));

        let res = client.delete(format!("{}/v1/sessions/not-a-uuid", base)).send().await.unwrap();
        assert_eq!(res.status(), 404);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["error"], "session not found: not-a-uuid");
        assert!(!body["error"].as_str().unwrap().contains(&Uuid::nil().to_string()));

        let res = client
            .post(format!("{}/v1/query", base))
            .json(&json!({"sessionId": "bogus-id", "query": "flights"}))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 404);
        let body: Value = res.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("bogus-id"));
    }

    #[tokio::test]
    async fn query_validates_input_and_returns_plan() {
        let gw = ScriptedGateway::new();
        gw.tool_call("flight", "search_flights", r#"{"origin":"SEA","destination":"SFO","date":"2024-12-15"}"#);
        gw.tool_call("hotel", "search_hotels", r#"{"nights":2}"#);
        let base = spawn(gw).await;
        let client = reqwest::Client::new();
        let sid = new_session(&client, &base).await;
        let url = format!("{}/v1/query", base);

        let res = client.post(&url).json(&json!({"sessionId": sid})).send().await.unwrap();
        assert_eq!(res.status(), 400);
        let res = client.post(&url).body("not json").header("content-type", "application/json").send().await.unwrap();
        assert_eq!(res.status(), 400);
        let res = client
            .post(&url)
            .json(&json!({"sessionId": Uuid::new_v4().to_string(), "query": "flights"}))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 404);

        let itinerary_url = format!("{}/v1/itinerary/{}", base, sid);
        assert_eq!(client.get(&itinerary_url).send().await.unwrap().status(), 400);

        let res = client
            .post(&url)
            .json(&json!({"sessionId": sid, "query": "Flights from SEA to SFO on 2024-12-15"}))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["plan"]["flights"]["origin"], "SEA");
        assert!(body["response"].is_string());

        client
            .post(&url)
            .json(&json!({"sessionId": sid, "query": "Hotels near there"}))
            .send()
            .await
            .unwrap();

        let rec: Value = client
            .get(format!("{}/v1/recommendations/{}", base, sid))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(rec["recommendations"]["hotels"]["location"], "SFO");
        assert!(rec["recommendations"].get("itinerary").is_none());

        let res = client.get(&itinerary_url).send().await.unwrap();
        assert_eq!(res.status(), 200);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["itinerary"]["days"].as_array().unwrap().len(), 3);

        let history: Value = client
            .get(format!("{}/v1/sessions/{}/history", base, sid))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(history["messages"][0]["role"], "system");
    }

    #[tokio::test]
    async fn health_lists_agents() {
        let base = spawn(ScriptedGateway::new()).await;
        let body: Value = reqwest::get(format!("{}/healthz", base)).await.unwrap().json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["agents"].as_array().unwrap().len(), 5);
    }
}
