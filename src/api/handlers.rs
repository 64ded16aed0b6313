//! Request handlers.

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{AppendHeaders, IntoResponse, Response};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::archive::{
    ARCHIVE_BUCKET, REHYDRATE_BATCH_SIZE, archive_object_name, rehydrate_conversation,
};
use crate::conversation::Role;

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    if !state.db.is_healthy().await {
        return Err(ApiError::ServiceUnavailable("database unavailable".to_string()));
    }
    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

/// Exchange the shared secret for a session cookie.
pub async fn issue_token(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(ApiError::Unauthorized("No token provided".to_string()))?;

    let cookie = state.auth.issue_session_cookie(authorization)?;
    let set_cookie = cookie
        .parse::<axum::http::HeaderValue>()
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    Ok((
        AppendHeaders([(header::SET_COOKIE, set_cookie)]),
        "Token created",
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub thread_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub thread_id: String,
    pub response: String,
}

/// Send a message to the assistant, recording both sides of the exchange.
pub async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    state.auth.authorize(&headers)?;
    if request.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }

    let repo = state.repo();
    let thread_id = match request.thread_id {
        Some(thread_id) => {
            let conversation = repo
                .get(&thread_id)
                .await?
                .ok_or(ApiError::NotFound("Not found".to_string()))?;
            // Appending to an emptied message table would reissue sequence
            // numbers the archived rows still hold; fetch the messages first.
            if conversation.archived {
                return Err(ApiError::BadRequest(
                    "Conversation is archived; fetch its messages to restore it first".to_string(),
                ));
            }
            state
                .assistant
                .add_user_message(&thread_id, &request.message)
                .await?;
            thread_id
        }
        None => {
            let thread_id = state.assistant.create_thread(&request.message).await?;
            repo.create(&thread_id, None).await?;
            thread_id
        }
    };

    repo.append_message(&thread_id, Role::User, &request.message)
        .await?;

    let reply = state.assistant.run_to_completion(&thread_id).await?;
    repo.append_message(&thread_id, Role::Assistant, &reply)
        .await?;

    info!(thread_id, "chat exchange recorded");
    Ok(Json(ChatResponse {
        thread_id,
        response: reply,
    }))
}

/// All messages of a conversation.
///
/// Unarchived conversations are served straight from the database. Archived
/// ones are rehydrated: the archived object is opened before any byte of the
/// response is sent (so a missing object is still a structured 404), then rows
/// are streamed to the client as they are re-inserted. A failure after
/// streaming has begun can only truncate the body.
pub async fn get_conversation_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Response> {
    let repo = state.repo();
    let conversation = repo
        .get(&conversation_id)
        .await?
        .ok_or(ApiError::NotFound("Not found".to_string()))?;

    if !conversation.archived {
        let messages = repo.list_messages(&conversation_id).await?;
        return Ok(Json(messages).into_response());
    }

    let archive = state
        .store
        .get_stream(ARCHIVE_BUCKET, &archive_object_name(&conversation_id))
        .await
        .map_err(crate::archive::ArchiveError::Storage)?;

    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(16);
    let pool = state.db.pool().clone();
    tokio::spawn(async move {
        if tx.send(Ok(Bytes::from_static(b"["))).await.is_err() {
            return;
        }
        match rehydrate_conversation(&pool, archive, &conversation_id, REHYDRATE_BATCH_SIZE, &tx)
            .await
        {
            Ok(outcome) => {
                if !outcome.flag_flipped {
                    warn!(conversation_id, "rehydrated but archived flag not cleared");
                }
                // Closing bracket only on success; an aborted stream stays
                // visibly truncated instead of parsing as a shorter array.
                let _ = tx.send(Ok(Bytes::from_static(b"]"))).await;
            }
            Err(err) => {
                warn!(conversation_id, %err, "rehydration aborted mid-stream");
            }
        }
    });

    let body = Body::from_stream(ReceiverStream::new(rx));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body)
        .map_err(|err| ApiError::Internal(err.to_string()))
}

/// Render the conversation to HTML and store it in the export bucket.
pub async fn export_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let repo = state.repo();
    if repo.get(&conversation_id).await?.is_none() {
        return Err(ApiError::NotFound("Not found".to_string()));
    }

    crate::archive::export_conversation(state.db.pool(), &state.store, &conversation_id).await?;
    Ok(Json(json!({ "message": "Conversation exported successfully" })))
}
