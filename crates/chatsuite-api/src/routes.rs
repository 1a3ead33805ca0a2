//! HTTP routes.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chatsuite_core::models::{Chat, Document, Message};
use chatsuite_runtime::{ChatRequest, IncomingFile, StreamEvent, TurnStream, UploadReceipt};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{AuthUser, authenticate};
use crate::error::{ApiError, ApiResultExt};
use crate::state::AppState;

/// Header carrying `{cost, remaining}` for the turn being streamed.
pub const CREDIT_USAGE_HEADER: &str = "x-credit-usage";

/// Room for multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn router(state: AppState) -> Router {
    let upload_limit = usize::try_from(state.uploads.max_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([axum::http::HeaderName::from_static(CREDIT_USAGE_HEADER)]);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/chat", post(chat).delete(delete_chat))
        .route("/chats", get(list_chats))
        .route("/chat/{id}/messages", get(chat_messages))
        .route("/document", get(document))
        .route(
            "/files/upload",
            post(upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/user/credits", get(credits))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct RootResponse {
    name: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// ============================================================================
// Chat
// ============================================================================

async fn chat(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body?;
    let turn = state
        .chats
        .start_turn(&user, request)
        .await
        .or_api(state.config.environment)?;

    let usage = turn.usage.header_value();
    let sse = Sse::new(event_stream(turn))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)));
    Ok(([(CREDIT_USAGE_HEADER, usage)], sse).into_response())
}

/// SSE frames for a turn. Dropping the stream cancels the turn.
fn event_stream(turn: TurnStream) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(turn, |mut turn| async move {
        let event = turn.next_event().await?;
        Some((Ok(sse_event(&event)), turn))
    })
}

fn sse_event(event: &StreamEvent) -> Event {
    Event::default()
        .event(event.name())
        .json_data(event)
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to encode {} event: {e}", event.name());
            Event::default()
                .event("error")
                .data(json!({ "type": "error", "message": "encoding failed" }).to_string())
        })
}

#[derive(Debug, Deserialize)]
struct ChatIdQuery {
    id: String,
}

async fn delete_chat(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    query: Result<Query<ChatIdQuery>, QueryRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Query(query) = query?;
    state
        .chats
        .delete_chat(&user, &query.id)
        .await
        .or_api(state.config.environment)?;
    Ok(Json(json!({ "id": query.id, "deleted": true })))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<i64>,
}

async fn list_chats(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<Chat>>, ApiError> {
    let Query(query) = query?;
    let chats = state
        .chats
        .list_chats(&user, query.limit)
        .await
        .or_api(state.config.environment)?;
    Ok(Json(chats))
}

async fn chat_messages(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let messages = state
        .chats
        .transcript(&user, &id)
        .await
        .or_api(state.config.environment)?;
    Ok(Json(messages))
}

#[derive(Debug, Deserialize)]
struct DocumentQuery {
    id: String,
}

async fn document(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    query: Result<Query<DocumentQuery>, QueryRejection>,
) -> Result<Json<Document>, ApiError> {
    let Query(query) = query?;
    let document = state
        .chats
        .document(&user, &query.id)
        .await
        .or_api(state.config.environment)?;
    Ok(Json(document))
}

// ============================================================================
// Uploads
// ============================================================================

async fn upload(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    mut multipart: Multipart,
) -> Result<Json<UploadReceipt>, ApiError> {
    let mut file: Option<(String, String, Vec<u8>)> = None;
    let mut chat_id = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().map(ToOwned::to_owned);
        match field_name.as_deref() {
            Some("file") => {
                let name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                file = Some((name, content_type, bytes.to_vec()));
            }
            Some("chatId") => {
                chat_id = Some(field.text().await.map_err(multipart_error)?);
            }
            _ => {}
        }
    }

    let Some((name, content_type, bytes)) = file else {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "INVALID_REQUEST",
            "No file uploaded",
        ));
    };

    let receipt = state
        .uploads
        .ingest(
            &user,
            IncomingFile {
                chat_id: chat_id.unwrap_or_default(),
                name,
                content_type,
                bytes,
            },
        )
        .await
        .or_api(state.config.environment)?;
    Ok(Json(receipt))
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "FILE_TOO_LARGE",
            "File exceeds the upload size limit",
        )
    } else {
        ApiError::new(err.status(), "INVALID_REQUEST", err.body_text())
    }
}

// ============================================================================
// Credits
// ============================================================================

#[derive(Debug, Serialize)]
struct CreditsResponse {
    credits: i64,
}

/// Reports zero rather than an error body when anything fails.
async fn credits(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let user = match authenticate(&state, &headers).await {
        Ok(user) => user,
        Err(err) => return (err.status(), Json(CreditsResponse { credits: 0 })).into_response(),
    };

    match state.db.credits_for(&user.id).await {
        Ok(credits) => Json(CreditsResponse { credits }).into_response(),
        Err(e) => {
            tracing::error!(user_id = %user.id, "Failed to read credits: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(CreditsResponse { credits: 0 }),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
#[path = "routes_tests.rs"]
mod tests;
