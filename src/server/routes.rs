//! HTTP route handlers for the companion engine API.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::companion::profile::Companion;
use crate::companion::traits::PersonalityTraits;
use crate::core::errors::EngineError;
use crate::core::ids::{CompanionId, OwnerId};
use crate::session::coordinator::{ChatRequest, ChatStreamEvent};
use crate::session::turn::ConversationTurn;

use super::state::AppState;

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/companions", post(create_companion))
        .route("/api/companions/{id}", get(get_companion))
        .route("/api/companions/{id}/deactivate", post(deactivate_companion))
        .route("/api/chat", post(chat))
        .route("/api/chat/stream", post(chat_stream))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "companion-engine",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Error payload returned on any failed request.
#[derive(Debug, Serialize)]
pub struct ApiError {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = status_for_code(&self.code);
        (status, Json(self)).into_response()
    }
}

fn status_for_code(code: &str) -> StatusCode {
    match code {
        "ValidationError" => StatusCode::BAD_REQUEST,
        "NotFound" => StatusCode::NOT_FOUND,
        "Busy" => StatusCode::CONFLICT,
        "Timeout" => StatusCode::GATEWAY_TIMEOUT,
        "EmbeddingFailure" | "GenerationFailure" => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Companion creation request.
#[derive(Debug, Deserialize)]
pub struct CreateCompanionRequest {
    /// Owning user.
    pub owner_id: OwnerId,
    /// Display name.
    pub name: String,
    /// Personality traits, each in [0, 1].
    pub traits: PersonalityTraits,
    /// Interest topics.
    #[serde(default)]
    pub interests: Vec<String>,
}

/// Handle companion creation.
async fn create_companion(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateCompanionRequest>,
) -> Result<Json<Companion>, ApiError> {
    let companion = state
        .registry
        .create(
            request.owner_id,
            &request.name,
            request.traits,
            request.interests,
        )
        .await?;
    Ok(Json(companion))
}

/// Handle companion lookup.
async fn get_companion(
    State(state): State<Arc<AppState>>,
    Path(id): Path<CompanionId>,
) -> Result<Json<Companion>, ApiError> {
    let companion = state.registry.get(id).await?;
    Ok(Json(companion))
}

/// Handle companion deactivation.
async fn deactivate_companion(
    State(state): State<Arc<AppState>>,
    Path(id): Path<CompanionId>,
) -> Result<StatusCode, ApiError> {
    state.registry.deactivate(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// One history entry in a chat request.
#[derive(Debug, Deserialize)]
pub struct HistoryTurn {
    /// "user" or "companion".
    pub role: String,
    /// Message content.
    pub content: String,
}

/// Chat request body, shared by both chat endpoints.
#[derive(Debug, Deserialize)]
pub struct ChatBody {
    /// Target companion.
    pub companion_id: CompanionId,
    /// User message.
    pub message: String,
    /// Recent conversation window, oldest first.
    #[serde(default)]
    pub history: Vec<HistoryTurn>,
    /// Optional external context, rendered verbatim into the prompt.
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

impl ChatBody {
    fn into_request(self) -> ChatRequest {
        let history = self
            .history
            .into_iter()
            .map(|turn| {
                if turn.role == "companion" {
                    ConversationTurn::companion(turn.content)
                } else {
                    ConversationTurn::user(turn.content)
                }
            })
            .collect();
        ChatRequest {
            companion_id: self.companion_id,
            message: self.message,
            history,
            context: self.context,
        }
    }
}

/// Chat response metadata.
#[derive(Debug, Serialize)]
pub struct ChatMetadata {
    /// Tokens consumed by the generation call.
    pub tokens_used: u32,
    /// Wall-clock processing time.
    pub processing_time_ms: u64,
}

/// Non-streaming chat response.
#[derive(Debug, Serialize)]
pub struct ChatResponseBody {
    /// Generated text.
    pub text: String,
    /// Emotion label for the turn.
    pub emotion: String,
    /// Best-effort follow-up suggestions.
    pub suggestions: Vec<String>,
    /// Call metadata.
    pub metadata: ChatMetadata,
}

/// Handle non-streaming chat.
async fn chat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatBody>,
) -> Result<Json<ChatResponseBody>, ApiError> {
    let response = state.coordinator.chat(body.into_request()).await?;
    Ok(Json(ChatResponseBody {
        text: response.text,
        emotion: response.emotion,
        suggestions: response.suggestions,
        metadata: ChatMetadata {
            tokens_used: response.tokens_used,
            processing_time_ms: response.processing_time_ms,
        },
    }))
}

/// Handle streaming chat over SSE.
///
/// Dropping the connection cancels the in-flight turn; nothing is committed
/// for a cancelled turn.
async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let turn = state.coordinator.chat_stream(body.into_request()).await?;
    let stream = turn.events.map(|event| {
        let payload = match event {
            ChatStreamEvent::Chunk { content } => serde_json::json!({
                "type": "chunk",
                "content": content,
                "finished": false,
            }),
            ChatStreamEvent::Complete => serde_json::json!({"type": "complete"}),
            ChatStreamEvent::Error { code, message } => serde_json::json!({
                "type": "error",
                "code": code,
                "message": message,
            }),
        };
        Ok(Event::default().data(payload.to_string()))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
