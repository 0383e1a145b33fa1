//! HTTP API gateway for Chatbox.
//!
//! Thin request/response mapping over the conversation pipeline:
//!
//! - `POST /generate-response`           — run the full pipeline
//! - `POST /summarize`                   — direct condenser invocation
//! - `POST /validation`                  — direct validator invocation
//! - `GET  /history/{session_id}`        — all recorded turns of a session
//! - `DELETE /delete-history/{session_id}` — bulk delete
//! - `GET  /health`                      — liveness probe
//!
//! Built on Axum. Clients always receive either a well-formed success
//! payload or an error status with a `detail` string; internal error text
//! is logged, never leaked.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use chatbox_chat::{ChatPipeline, CondenseMode, Verdict};
use chatbox_config::AppConfig;
use chatbox_core::error::{Error, InferenceError, StoreError};
use chatbox_core::inference::{InferenceBackend, TokenEstimator};
use chatbox_core::store::TurnStore;
use chatbox_core::turn::{ConversationTurn, SessionId};
use chatbox_store::SqliteTurnStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

const MALFORMED_CHAT_DETAIL: &str = "Invalid request format. The content must be a JSON \
     object with 2 keys: 'session_id' and 'request'.";
const MALFORMED_SUMMARIZE_DETAIL: &str = "Invalid request format. The content must be a JSON \
     object with 2 keys: 'mode' and 'request'.";
const MALFORMED_VALIDATION_DETAIL: &str = "Invalid request format. The content must be a JSON \
     object with 1 key: 'request'.";
const NO_CONVERSATIONS_DETAIL: &str = "No conversations found for the given session_id";

/// Shared application state for the gateway.
pub struct AppState {
    pub pipeline: ChatPipeline,
    pub store: Arc<dyn TurnStore>,
    pub max_request_chars: usize,
}

type SharedState = Arc<AppState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/generate-response", post(generate_response_handler))
        .route("/summarize", post(summarize_handler))
        .route("/validation", post(validation_handler))
        .route("/history/{session_id}", get(history_handler))
        .route("/delete-history/{session_id}", delete(delete_history_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway HTTP server.
///
/// The inference backend and token estimator are injected by the caller
/// (the CLI wires up the local backend); the turn store is opened here
/// from the configured database URL.
pub async fn start(
    config: AppConfig,
    backend: Arc<dyn InferenceBackend>,
    estimator: Arc<dyn TokenEstimator>,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let store: Arc<dyn TurnStore> = Arc::new(SqliteTurnStore::new(&config.database.url).await?);
    let pipeline = ChatPipeline::new(backend, store.clone(), estimator, &config);

    let state = Arc::new(AppState {
        pipeline,
        store,
        max_request_chars: config.server.max_request_chars,
    });

    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ── Errors ─────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

enum ApiError {
    Unprocessable(&'static str),
    NotFound(&'static str),
    Internal(Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::Unprocessable(detail) => (StatusCode::UNPROCESSABLE_ENTITY, detail.to_string()),
            Self::NotFound(detail) => (StatusCode::NOT_FOUND, detail.to_string()),
            Self::Internal(e) => {
                // Full error text stays in the logs; clients get a
                // generic detail.
                error!(error = %e, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorBody { detail })).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self::Internal(e)
    }
}

impl From<InferenceError> for ApiError {
    fn from(e: InferenceError) -> Self {
        Self::Internal(e.into())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::Internal(e.into())
    }
}

// ── Handlers ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct GenerateRequest {
    session_id: String,
    request: String,
}

#[derive(Serialize)]
struct GenerateResponse {
    session_id: String,
    /// The request text as sent to the model (condensed form when the
    /// original exceeded the input budget).
    request: String,
    response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    summarized_response: Option<String>,
    context: Vec<String>,
}

async fn generate_response_handler(
    State(state): State<SharedState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let Json(payload) = payload.map_err(|_| ApiError::Unprocessable(MALFORMED_CHAT_DETAIL))?;

    let chars = payload.request.chars().count();
    if chars == 0 || chars > state.max_request_chars {
        return Err(ApiError::Unprocessable(MALFORMED_CHAT_DETAIL));
    }

    let session_id = SessionId(payload.session_id.clone());
    let outcome = state.pipeline.handle(&session_id, &payload.request).await?;

    Ok(Json(GenerateResponse {
        session_id: payload.session_id,
        request: outcome.user_text,
        response: outcome.response,
        summarized_response: outcome.summarized_response,
        context: outcome.context,
    }))
}

#[derive(Deserialize)]
struct SummarizeRequest {
    mode: CondenseMode,
    request: String,
}

#[derive(Serialize)]
struct SummarizeResponse {
    request: String,
    summary: String,
}

async fn summarize_handler(
    State(state): State<SharedState>,
    payload: Result<Json<SummarizeRequest>, JsonRejection>,
) -> Result<Json<SummarizeResponse>, ApiError> {
    let Json(payload) =
        payload.map_err(|_| ApiError::Unprocessable(MALFORMED_SUMMARIZE_DETAIL))?;

    let summary = state.pipeline.condense(&payload.request, payload.mode).await?;
    Ok(Json(SummarizeResponse {
        request: payload.request,
        summary,
    }))
}

#[derive(Deserialize)]
struct ValidationRequest {
    request: String,
}

async fn validation_handler(
    State(state): State<SharedState>,
    payload: Result<Json<ValidationRequest>, JsonRejection>,
) -> Result<Json<SummarizeResponse>, ApiError> {
    let Json(payload) =
        payload.map_err(|_| ApiError::Unprocessable(MALFORMED_VALIDATION_DETAIL))?;

    let verdict = state.pipeline.validate(&payload.request).await?;
    let summary = match verdict {
        Verdict::Accepted => chatbox_chat::validate::ACCEPT_TOKEN,
        Verdict::Rejected => chatbox_chat::validate::REJECT_TOKEN,
    };

    Ok(Json(SummarizeResponse {
        request: payload.request,
        summary: summary.to_string(),
    }))
}

/// One recorded turn under the canonical wire names, matching the
/// `/generate-response` payload.
#[derive(Serialize)]
struct TurnView {
    session_id: String,
    request: String,
    response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    summarized_response: Option<String>,
}

impl From<ConversationTurn> for TurnView {
    fn from(turn: ConversationTurn) -> Self {
        Self {
            session_id: turn.session_id.0,
            request: turn.user_text,
            response: turn.response_text,
            summarized_response: turn.condensed_response_text,
        }
    }
}

#[derive(Serialize)]
struct HistoryResponse {
    session_id: String,
    turns: Vec<TurnView>,
    count: usize,
}

async fn history_handler(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let turns: Vec<TurnView> = state
        .store
        .history(&SessionId(session_id.clone()))
        .await?
        .into_iter()
        .map(TurnView::from)
        .collect();
    let count = turns.len();
    Ok(Json(HistoryResponse {
        session_id,
        turns,
        count,
    }))
}

#[derive(Serialize)]
struct DeleteResponse {
    message: String,
}

async fn delete_history_handler(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let removed = state
        .store
        .delete_session(&SessionId(session_id.clone()))
        .await?;

    if removed == 0 {
        return Err(ApiError::NotFound(NO_CONVERSATIONS_DETAIL));
    }

    info!(session_id = %session_id, removed, "Conversation history deleted");
    Ok(Json(DeleteResponse {
        message: format!("Deleted {removed} conversation turns for session {session_id}"),
    }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
