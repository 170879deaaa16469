//! HTTP gateway for crabwire.
//!
//! Endpoints:
//!
//! - `POST /chat`                  — Send a message, get an SSE event stream
//! - `GET  /history/{session_id}`  — Recent conversation history
//! - `GET  /health`                — Health check
//!
//! The gateway enforces at-most-one active generation per session: a new
//! `/chat` request for a session cancels that session's in-flight one
//! before starting.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::{Path, Query, State},
    response::Json,
    response::sse::{Event as SseEvent, Sse},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crabwire_agent::{AgentRuntime, ChatParams};
use crabwire_core::message::Message;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub runtime: AgentRuntime,
    /// Cancellation token of each session's in-flight generation
    generations: RwLock<HashMap<String, CancellationToken>>,
}

impl GatewayState {
    pub fn new(runtime: AgentRuntime) -> Self {
        Self {
            runtime,
            generations: RwLock::new(HashMap::new()),
        }
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/history/{session_id}", get(history_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway HTTP server with subsystems built from config.
pub async fn start(config: crabwire_config::AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let router = crabwire_providers::ModelRouter::from_config(&config);
    let tools = crabwire_tools::default_registry(&config)?;

    let mut runtime = AgentRuntime::new(
        Arc::new(router),
        Arc::new(tools),
        &config.model,
        config.agent.clone(),
    );

    if config.storage.enabled {
        let store =
            crabwire_storage::SqliteStore::new(&config.storage.database_path()).await?;
        runtime = runtime.with_store(Arc::new(store));
    }

    if config.audit.enabled {
        let sink = crabwire_audit::JsonlAuditSink::new(&config.audit.log_path())?;
        info!(path = %sink.path().display(), "Audit log enabled");
        runtime = runtime.with_audit(Arc::new(sink));
    }

    let app = build_router(Arc::new(GatewayState::new(runtime)));

    info!(addr = %addr, "Gateway listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ── Handlers ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ChatRequest {
    /// Session the message belongs to; the caller owns session identity.
    session_id: String,
    /// The user's message.
    message: String,
    /// Sender identity for owner checks and audit records.
    #[serde(default = "default_sender")]
    sender_id: String,
}

fn default_sender() -> String {
    "web".into()
}

/// `POST /chat` — send a message, receive the turn as an SSE stream.
async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    info!(
        session = %payload.session_id,
        chars = payload.message.len(),
        "Chat request"
    );

    let cancel = CancellationToken::new();
    {
        // At most one active generation per session.
        let mut generations = state.generations.write().await;
        if let Some(previous) = generations.insert(payload.session_id.clone(), cancel.clone()) {
            previous.cancel();
        }
    }

    let params = ChatParams::new(payload.sender_id).with_cancel(cancel);
    let rx = state.runtime.chat(&payload.session_id, &payload.message, params);

    let stream = ReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().event(event.event_type()).data(data))
    });

    Sse::new(stream)
}

#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    offset: u32,
}

fn default_limit() -> u32 {
    50
}

#[derive(Serialize)]
struct HistoryResponse {
    session_id: String,
    messages: Vec<Message>,
}

/// `GET /history/{session_id}` — recent messages, newest last.
async fn history_handler(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Json<HistoryResponse> {
    let messages = state
        .runtime
        .get_history(&session_id, query.limit, query.offset)
        .await;
    Json(HistoryResponse {
        session_id,
        messages,
    })
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
