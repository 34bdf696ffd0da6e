use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{get, post},
    Router,
};
use routes::{
    chat::stream_chat,
    probes::{live, ready},
    sessions::{create_session, delete_session, list_messages, list_sessions, rename_session},
};

pub mod api_state;
pub mod auth;
pub mod error;
pub mod routes;

/// Upper bound on a chat request body; generous enough for an attached score
/// report image.
const CHAT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Router for the service API: the streaming chat endpoint (anonymous
/// allowed, IP quota applies), authenticated session management, and probe
/// endpoints for orchestration environments.
pub fn api_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    Router::new()
        .route("/api/live", get(live))
        .route("/api/ready", get(ready))
        .route(
            "/api/chat/stream",
            post(stream_chat).layer(DefaultBodyLimit::max(CHAT_MAX_BODY_BYTES)),
        )
        .route("/api/sessions", post(create_session).get(list_sessions))
        .route("/api/sessions/{id}/messages", get(list_messages))
        .route(
            "/api/sessions/{id}",
            axum::routing::patch(rename_session).delete(delete_session),
        )
}
