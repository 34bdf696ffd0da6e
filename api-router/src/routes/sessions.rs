use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use common::storage::types::{
    message::{Message, MessageRole},
    session::Session,
};
use serde::{Deserialize, Serialize};

use crate::{api_state::ApiState, auth::require_principal, error::ApiError};

/// Session as the API serves it, with plain RFC 3339 timestamps.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiSession {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Session> for ApiSession {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            title: session.title,
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiMessage {
    pub id: String,
    pub role: String,
    pub content: String,
    pub sources: Vec<String>,
    pub source_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for ApiMessage {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            role: match message.role {
                MessageRole::User => "user".to_string(),
                MessageRole::Assistant => "assistant".to_string(),
            },
            content: message.content,
            sources: message.sources,
            source_urls: message.source_urls,
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameSessionRequest {
    pub title: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct MessagePage {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub after: Option<DateTime<Utc>>,
}

pub async fn create_session(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<CreateSessionRequest>,
) -> Result<Json<ApiSession>, ApiError> {
    let principal = require_principal(&headers, &state.db).await?;

    let title = body
        .title
        .filter(|title| !title.trim().is_empty())
        .unwrap_or_else(|| "새 상담".to_string());
    let session = Session::new(&principal, title);

    state
        .db
        .store_item(session.clone())
        .await
        .map_err(|e| ApiError::from(common::error::AppError::from(e)))?;

    Ok(Json(session.into()))
}

pub async fn list_sessions(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ApiSession>>, ApiError> {
    let principal = require_principal(&headers, &state.db).await?;

    let sessions = Session::list_for_principal(&principal, &state.db).await?;
    Ok(Json(sessions.into_iter().map(ApiSession::from).collect()))
}

pub async fn list_messages(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Query(page): Query<MessagePage>,
) -> Result<Json<Vec<ApiMessage>>, ApiError> {
    let principal = require_principal(&headers, &state.db).await?;
    Session::get_owned(&session_id, &principal, &state.db).await?;

    let messages = Message::list_for_session(&session_id, page.limit, page.after, &state.db).await?;
    Ok(Json(messages.into_iter().map(ApiMessage::from).collect()))
}

pub async fn rename_session(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Json(body): Json<RenameSessionRequest>,
) -> Result<Json<ApiSession>, ApiError> {
    let principal = require_principal(&headers, &state.db).await?;

    if body.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".to_string()));
    }

    let session = Session::rename(&session_id, &principal, body.title.trim(), &state.db).await?;
    Ok(Json(session.into()))
}

pub async fn delete_session(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let principal = require_principal(&headers, &state.db).await?;

    Session::delete_cascade(&session_id, &principal, &state.db).await?;
    state.context.evict(&session_id).await;

    Ok(StatusCode::NO_CONTENT)
}
