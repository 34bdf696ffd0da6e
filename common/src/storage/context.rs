use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::error::AppError;
use crate::storage::db::SurrealDbClient;
use crate::storage::types::message::{Message, MessageRole};
use crate::storage::types::session::Session;

/// Number of user/assistant turn pairs kept in the fast path per session.
pub const CONTEXT_TURNS: usize = 20;

/// Per-session bounded window over recent messages. Appends for one session
/// are serialized behind that session's lock, which is what makes message
/// timestamps strictly increasing even under concurrent turns. Owned by the
/// application state; there is no process-global instance.
pub struct ContextCache {
    window_messages: usize,
    sessions: Mutex<HashMap<String, Arc<Mutex<SessionWindow>>>>,
}

struct SessionWindow {
    hydrated: bool,
    last_created_at: Option<DateTime<Utc>>,
    messages: VecDeque<Message>,
}

impl SessionWindow {
    fn empty() -> Self {
        Self {
            hydrated: false,
            last_created_at: None,
            messages: VecDeque::new(),
        }
    }
}

impl ContextCache {
    pub fn new(context_turns: usize) -> Self {
        Self {
            window_messages: context_turns * 2,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    async fn window_handle(&self, session_id: &str) -> Arc<Mutex<SessionWindow>> {
        let mut sessions = self.sessions.lock().await;
        Arc::clone(
            sessions
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(SessionWindow::empty()))),
        )
    }

    async fn hydrate(
        &self,
        window: &mut SessionWindow,
        session_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        if window.hydrated {
            return Ok(());
        }

        let recent = Message::recent_for_session(session_id, self.window_messages, db).await?;
        window.last_created_at = recent.last().map(|m| m.created_at);
        window.messages = recent.into();
        window.hydrated = true;

        Ok(())
    }

    /// Append a message to a session: assigns a per-session monotone
    /// timestamp, persists the row, bumps the session, and updates the
    /// in-memory window.
    pub async fn append_message(
        &self,
        db: &SurrealDbClient,
        session_id: &str,
        role: MessageRole,
        content: String,
        sources: Vec<String>,
        source_urls: Vec<String>,
    ) -> Result<Message, AppError> {
        let handle = self.window_handle(session_id).await;
        let mut window = handle.lock().await;
        self.hydrate(&mut window, session_id, db).await?;

        let mut message = Message::new(session_id.to_string(), role, content, sources, source_urls);
        if let Some(last) = window.last_created_at {
            if message.created_at <= last {
                message.created_at = last + Duration::milliseconds(1);
                message.updated_at = message.created_at;
            }
        }

        db.store_item(message.clone()).await?;
        // The message row is the source of truth; a failed session bump only
        // costs listing freshness.
        if let Err(e) = Session::touch_at(session_id, message.created_at.max(Utc::now()), db).await
        {
            tracing::warn!(error = %e, session_id, "Failed to bump session updated_at");
        }

        window.last_created_at = Some(message.created_at);
        window.messages.push_back(message.clone());
        while window.messages.len() > self.window_messages {
            window.messages.pop_front();
        }

        Ok(message)
    }

    /// The bounded conversation context: at most `turns` user/assistant pairs,
    /// oldest-first, with pairs never split at either edge of the window.
    pub async fn recent_context(
        &self,
        db: &SurrealDbClient,
        session_id: &str,
        turns: usize,
    ) -> Result<Vec<Message>, AppError> {
        let handle = self.window_handle(session_id).await;
        let mut window = handle.lock().await;
        self.hydrate(&mut window, session_id, db).await?;

        let messages: Vec<Message> = window.messages.iter().cloned().collect();
        Ok(bound_pairs(messages, turns))
    }

    /// Drop a session's window, e.g. after the session is deleted.
    pub async fn evict(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(session_id);
    }
}

/// Keeps at most `max_turns` pairs from the tail of the history. A trailing
/// user message whose assistant reply does not exist yet is dropped, and a
/// leading assistant reply whose user turn fell out of the window is dropped
/// with it.
fn bound_pairs(mut messages: Vec<Message>, max_turns: usize) -> Vec<Message> {
    if messages
        .last()
        .is_some_and(|last| last.role == MessageRole::User)
    {
        messages.pop();
    }

    let max_messages = max_turns * 2;
    let overflow = messages.len().saturating_sub(max_messages);
    let mut window: Vec<Message> = messages.drain(overflow..).collect();

    if window
        .first()
        .is_some_and(|first| first.role == MessageRole::Assistant)
    {
        window.remove(0);
    }

    window
}
