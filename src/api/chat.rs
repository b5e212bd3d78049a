use crate::api::auth::AuthUser;
use crate::api::error::ApiError;
use crate::api::AppState;
use crate::pipeline::{open_turn, ChatJob, Job, AGENT_FAILED};
use crate::store::{ChatMessage, ChatSession, MessageUpdate, ReportStatus};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    #[serde(flatten)]
    pub session: ChatSession,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub session: Option<Uuid>,
    pub content: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PostMessageResponse {
    pub ai_message_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PendingResponse {
    pub pending: String,
}

/// Session for a completed report, created on first access
pub async fn get_session(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(report_id): Path<Uuid>,
) -> Result<Json<SessionResponse>, ApiError> {
    let report = state.store.get_report(report_id).await?;
    if report.user_id != auth.id() {
        return Err(ApiError::NotFound("report"));
    }
    if report.status != ReportStatus::Completed {
        return Err(ApiError::BadRequest(format!(
            "Report {} is not ready for chat ({})",
            report.id, report.status
        )));
    }

    let (session, created) = state
        .store
        .get_or_create_session(auth.id(), report.id)
        .await?;
    if created {
        info!(session_id = %session.id, report_id = %report.id, "Chat session opened");
    }
    let messages = state.store.list_messages(session.id).await?;

    Ok(Json(SessionResponse { session, messages }))
}

/// Store the question, queue the answer and hand back the reply's id
pub async fn post_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<PostMessageRequest>,
) -> Result<(StatusCode, Json<PostMessageResponse>), ApiError> {
    let session_id = payload
        .session
        .ok_or_else(|| ApiError::BadRequest("session is required".to_string()))?;
    let content = payload
        .content
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::BadRequest("content is required".to_string()))?;

    let session = state.store.get_session(session_id).await?;
    if session.user_id != auth.id() {
        return Err(ApiError::NotFound("chat session"));
    }

    let (_, ai) = open_turn(state.store.as_ref(), session.id, &content).await?;
    if let Err(err) = state
        .queue
        .enqueue(Job::Chat(ChatJob {
            ai_message_id: ai.id,
            report_id: session.report_id,
            user_query: content,
        }))
        .await
    {
        error!(ai_message_id = %ai.id, error = %err, "Failed to queue chat turn");
        state
            .store
            .update_message(ai.id, MessageUpdate::failed(AGENT_FAILED))
            .await?;
        return Err(err.into());
    }
    info!(session_id = %session.id, ai_message_id = %ai.id, "Chat turn queued");

    Ok((
        StatusCode::ACCEPTED,
        Json(PostMessageResponse {
            ai_message_id: ai.id,
        }),
    ))
}

/// 200 with the message once it is final, 202 while it is still being worked on
pub async fn get_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(message_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let message = state.store.get_message(message_id).await?;
    let session = state.store.get_session(message.session_id).await?;
    if session.user_id != auth.id() {
        return Err(ApiError::NotFound("chat message"));
    }

    if message.status.is_terminal() {
        return Ok(Json(message).into_response());
    }

    let pending = PendingResponse {
        pending: format!(
            "Your message is still being {}.",
            message.status.as_str().to_lowercase()
        ),
    };
    Ok((StatusCode::ACCEPTED, Json(pending)).into_response())
}
