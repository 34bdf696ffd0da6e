#![allow(clippy::module_name_repetitions)]
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, types::StoredObject},
    stored_object,
};

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq)]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    /// Label used when a conversation window is replayed inside an agent
    /// prompt; the router and synthesizer both speak Korean.
    pub const fn prompt_label(&self) -> &'static str {
        match self {
            MessageRole::User => "수험생",
            MessageRole::Assistant => "상담사",
        }
    }
}

stored_object!(Message, "message", {
    session_id: String,
    role: MessageRole,
    content: String,
    sources: Vec<String>,
    source_urls: Vec<String>
});

impl Message {
    pub fn new(
        session_id: String,
        role: MessageRole,
        content: String,
        sources: Vec<String>,
        source_urls: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            session_id,
            role,
            content,
            sources,
            source_urls,
        }
    }

    /// Oldest-first message page for a session. `after` is an exclusive
    /// `created_at` lower bound for cursor pagination.
    pub async fn list_for_session(
        session_id: &str,
        limit: Option<usize>,
        after: Option<DateTime<Utc>>,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let limit = i64::try_from(limit.unwrap_or(200)).unwrap_or(i64::MAX);
        let after = after.unwrap_or(DateTime::<Utc>::MIN_UTC);

        let messages: Vec<Message> = db
            .client
            .query(
                "SELECT * FROM type::table($table_name) \
                 WHERE session_id = $session_id AND created_at > $after \
                 ORDER BY created_at ASC LIMIT $limit",
            )
            .bind(("table_name", Self::table_name()))
            .bind(("session_id", session_id.to_string()))
            .bind(("after", surrealdb::sql::Datetime::from(after)))
            .bind(("limit", limit))
            .await?
            .take(0)?;

        Ok(messages)
    }

    /// The most recent `max` messages of a session, returned oldest-first.
    pub async fn recent_for_session(
        session_id: &str,
        max: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let limit = i64::try_from(max).unwrap_or(i64::MAX);

        let mut messages: Vec<Message> = db
            .client
            .query(
                "SELECT * FROM type::table($table_name) \
                 WHERE session_id = $session_id \
                 ORDER BY created_at DESC LIMIT $limit",
            )
            .bind(("table_name", Self::table_name()))
            .bind(("session_id", session_id.to_string()))
            .bind(("limit", limit))
            .await?
            .take(0)?;

        messages.reverse();
        Ok(messages)
    }
}

/// Renders a conversation window the way the agent prompts expect it: one
/// `역할: 내용` line per turn, oldest first.
pub fn format_history(history: &[Message]) -> String {
    let mut lines = Vec::with_capacity(history.len());
    for message in history {
        lines.push(format!(
            "{}: {}",
            message.role.prompt_label(),
            message.content
        ));
    }
    lines.join("\n")
}
