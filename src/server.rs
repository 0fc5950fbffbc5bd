//! HTTP surface over the persona engine.
//!
//! Routes are nested under `/v1` except the health check. Handlers are thin:
//! parse, delegate to `PersonaEngine`, map `InputError` to a client status.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::display::{self, ClusterCard, PersonaCard};
use crate::error::InputError;
use crate::pipeline::chat::{ChatTurn, ReplySource};
use crate::pipeline::{GenerationResult, PersonaEngine};

#[derive(Clone)]
pub struct ServerState {
    pub engine: Arc<PersonaEngine>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    population_size: usize,
}

#[derive(Debug, Deserialize)]
struct AnalyzeGoalRequest {
    goal: String,
}

#[derive(Debug, Deserialize)]
struct GenerateClustersRequest {
    goal: String,
    k_min: Option<usize>,
    k_max: Option<usize>,
    min_cluster_pct: Option<f64>,
}

#[derive(Debug, Serialize)]
struct GenerateClustersResponse {
    goal: String,
    intent: String,
    confidence: f64,
    subset_size: usize,
    sampling: serde_json::Value,
    subset_downsampled: bool,
    k: usize,
    quality: f64,
    degenerate: bool,
    clusters: Vec<ClusterCard>,
}

#[derive(Debug, Deserialize)]
struct PersonasQuery {
    goal: Option<String>,
}

#[derive(Debug, Serialize)]
struct PersonasResponse {
    cluster_id: usize,
    goal: String,
    personas: Vec<PersonaCard>,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    goal: Option<String>,
    #[serde(default)]
    history: Vec<ChatTurn>,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    persona: PersonaCard,
    reply: String,
    source: ReplySource,
    history: Vec<ChatTurn>,
}

pub async fn serve(engine: Arc<PersonaEngine>) -> Result<()> {
    let bind_addr = std::env::var("PERSONA_BIND")
        .unwrap_or_else(|_| "127.0.0.1:8600".to_string())
        .parse::<SocketAddr>()
        .context("Invalid PERSONA_BIND (expected host:port)")?;

    let state = ServerState { engine };

    let v1 = Router::new()
        .route("/goal/analyze", post(analyze_goal))
        .route("/clusters/generate", post(generate_clusters))
        .route("/personas/:cluster_id", get(list_personas))
        .route("/personas/:persona_id/chat", post(chat))
        .with_state(state.clone());

    let app = Router::new()
        .route("/health", get(health))
        .nest("/v1", v1)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind server to {}", bind_addr))?;
    tracing::info!("Persona engine listening on http://{}", bind_addr);
    axum::serve(listener, app)
        .await
        .context("Server failed")?;
    Ok(())
}

fn input_error(err: InputError) -> (StatusCode, String) {
    let status = match err {
        InputError::UnknownCluster { .. } | InputError::UnknownPersona(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_REQUEST,
    };
    (status, err.to_string())
}

fn internal_error(err: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        population_size: state.engine.population().len(),
    })
}

async fn analyze_goal(
    State(state): State<ServerState>,
    Json(request): Json<AnalyzeGoalRequest>,
) -> Json<serde_json::Value> {
    let analysis = state.engine.analyze_goal(&request.goal);
    Json(serde_json::to_value(&analysis).unwrap_or_else(|_| serde_json::json!({})))
}

async fn generate_clusters(
    State(state): State<ServerState>,
    Json(request): Json<GenerateClustersRequest>,
) -> Result<Json<GenerateClustersResponse>, (StatusCode, String)> {
    let config = state.engine.config();
    let result = state
        .engine
        .generate_clusters(
            &request.goal,
            request.k_min.unwrap_or(config.default_k_min),
            request.k_max.unwrap_or(config.default_k_max),
            request
                .min_cluster_pct
                .unwrap_or(config.default_min_cluster_share),
        )
        .map_err(input_error)?;
    Ok(Json(to_clusters_response(request.goal, result)?))
}

fn to_clusters_response(
    goal: String,
    result: GenerationResult,
) -> Result<GenerateClustersResponse, (StatusCode, String)> {
    let sampling = serde_json::to_value(&result.sampling_method).map_err(internal_error)?;
    Ok(GenerateClustersResponse {
        goal,
        intent: result.analysis.intent.as_str().to_string(),
        confidence: result.analysis.confidence,
        subset_size: result.subset_size,
        sampling,
        subset_downsampled: result.subset_downsampled,
        k: result.k,
        quality: result.quality,
        degenerate: result.degenerate,
        clusters: display::cluster_cards(&result.clusters),
    })
}

async fn list_personas(
    State(state): State<ServerState>,
    Path(cluster_id): Path<usize>,
    Query(query): Query<PersonasQuery>,
) -> Result<Json<PersonasResponse>, (StatusCode, String)> {
    let goal = query
        .goal
        .unwrap_or_else(|| state.engine.config().default_goal.clone());
    let personas = state
        .engine
        .generate_personas(&goal, cluster_id)
        .map_err(input_error)?;
    Ok(Json(PersonasResponse {
        cluster_id,
        goal,
        personas: display::persona_cards(&personas),
    }))
}

async fn chat(
    State(state): State<ServerState>,
    Path(persona_id): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    let goal = request
        .goal
        .unwrap_or_else(|| state.engine.config().default_goal.clone());
    let outcome = state
        .engine
        .chat(&persona_id, &goal, request.history, &request.message)
        .await
        .map_err(input_error)?;
    Ok(Json(ChatResponse {
        persona: PersonaCard::from_persona(&outcome.persona),
        reply: outcome.reply.text,
        source: outcome.reply.source,
        history: outcome.history,
    }))
}
