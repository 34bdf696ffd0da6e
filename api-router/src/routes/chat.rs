use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use agents::orchestrator::{TurnRequest, EVENT_CHANNEL_CAPACITY};
use axum::{
    extract::{ConnectInfo, Multipart, Request, State},
    http::header::CONTENT_TYPE,
    response::sse::{Event, KeepAlive, KeepAliveStream, Sse},
    RequestExt,
};
use common::{error::AppError, llm::ImageAttachment, storage::types::session::Session};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{api_state::ApiState, auth::principal_or_ip, error::ApiError};

type EventStream = Pin<Box<dyn Stream<Item = Result<Event, axum::Error>> + Send>>;
type SseResponse = Sse<KeepAliveStream<EventStream>>;

fn sse_with_keep_alive(stream: EventStream) -> SseResponse {
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// JSON body of the streaming endpoint; the multipart variant carries the
/// same fields plus an `image` part.
#[derive(Debug, Deserialize)]
struct ChatStreamRequest {
    message: String,
    #[serde(default)]
    session_id: Option<String>,
}

struct ParsedChatRequest {
    message: String,
    session_id: Option<String>,
    image: Option<ImageAttachment>,
}

async fn parse_multipart(mut multipart: Multipart) -> Result<ParsedChatRequest, ApiError> {
    let mut message = None;
    let mut session_id = None;
    let mut image = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        match field.name().unwrap_or_default() {
            "message" => {
                message = Some(field.text().await.map_err(|e| {
                    ApiError::BadRequest(format!("invalid message field: {e}"))
                })?);
            }
            "session_id" => {
                session_id = Some(field.text().await.map_err(|e| {
                    ApiError::BadRequest(format!("invalid session_id field: {e}"))
                })?);
            }
            "image" => {
                let content_type = field.content_type().unwrap_or_default().to_string();
                let parsed: mime::Mime = content_type
                    .parse()
                    .map_err(|_| ApiError::BadRequest("unrecognized image type".to_string()))?;
                if parsed.type_() != mime::IMAGE {
                    return Err(ApiError::BadRequest(
                        "image part must be an image".to_string(),
                    ));
                }
                let bytes = field.bytes().await.map_err(|e| {
                    ApiError::BadRequest(format!("invalid image field: {e}"))
                })?;
                image = Some(ImageAttachment {
                    bytes: bytes.to_vec(),
                    content_type,
                });
            }
            _ => {}
        }
    }

    Ok(ParsedChatRequest {
        message: message
            .ok_or_else(|| ApiError::BadRequest("message field is required".to_string()))?,
        session_id: session_id.filter(|id| !id.is_empty()),
        image,
    })
}

async fn parse_request(request: Request) -> Result<ParsedChatRequest, ApiError> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    if content_type.starts_with("multipart/form-data") {
        let multipart = request
            .extract::<Multipart, _>()
            .await
            .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?;
        return parse_multipart(multipart).await;
    }

    let bytes = axum::body::to_bytes(request.into_body(), 1024 * 1024)
        .await
        .map_err(|e| ApiError::BadRequest(format!("unreadable body: {e}")))?;
    let body: ChatStreamRequest = serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))?;

    Ok(ParsedChatRequest {
        message: body.message,
        session_id: body.session_id.filter(|id| !id.is_empty()),
        image: None,
    })
}

/// Start a streamed turn. Anonymous callers are admitted under the IP quota;
/// the turn's event sequence is framed as `data: <json>` SSE messages, and a
/// client disconnect cancels the in-flight turn via a drop guard.
pub async fn stream_chat(
    State(state): State<ApiState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
) -> Result<SseResponse, ApiError> {
    let headers = request.headers().clone();
    let principal = principal_or_ip(&headers, addr, &state.db).await?;

    let parsed = parse_request(request).await?;
    if parsed.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message is required".to_string()));
    }

    // Create or reuse the session before streaming begins
    let session = match &parsed.session_id {
        Some(id) => Session::get_owned(id, &principal, &state.db).await?,
        None => {
            let session = Session::new(&principal, Session::derive_title(&parsed.message));
            state
                .db
                .store_item(session.clone())
                .await
                .map_err(|e| ApiError::from(AppError::from(e)))?;
            session
        }
    };

    // An attached image becomes auxiliary router context; a failed
    // description never blocks the turn.
    let image_description = match &parsed.image {
        Some(image) => match state.gateway.describe_image(image).await {
            Ok(description) => Some(description),
            Err(e) => {
                warn!(error = %e, "Image description failed, continuing without");
                None
            }
        },
        None => None,
    };

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();

    let turn = TurnRequest {
        session_id: session.id,
        principal,
        message: parsed.message,
        image_description,
    };
    let orchestrator = Arc::clone(&state.orchestrator);
    let turn_cancel = cancel.clone();
    tokio::spawn(async move {
        orchestrator.run_turn(turn, tx, turn_cancel).await;
    });

    let guard = cancel.drop_guard();
    let event_stream: EventStream = async_stream::stream! {
        // Cancels the turn if the client hangs up before the stream ends
        let _guard = guard;
        let mut rx = rx;
        while let Some(event) = rx.recv().await {
            match Event::default().json_data(&event) {
                Ok(sse_event) => yield Ok(sse_event),
                Err(e) => warn!(error = %e, "Failed to serialize turn event"),
            }
        }
    }
    .boxed();

    Ok(sse_with_keep_alive(event_stream))
}
