//! Route tests driven through the router with `oneshot`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use chatsuite_core::config::UploadConfig;
use chatsuite_core::{Config, Database, Error};
use chatsuite_runtime::gateway::{DeltaSink, TurnOutput, TurnRequest};
use chatsuite_runtime::web::{SearchHit, WebResearch};
use chatsuite_runtime::{
    ApiKeys, ChatService, LanguageModel, ModelHandle, ResolveModel, ToolRegistry, UploadService,
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use super::{CREDIT_USAGE_HEADER, router};
use crate::state::AppState;

struct EchoModel;

#[async_trait]
impl LanguageModel for EchoModel {
    fn model_id(&self) -> &str {
        "echo"
    }

    async fn stream_turn(
        &self,
        _request: &TurnRequest,
        on_delta: DeltaSink<'_>,
    ) -> chatsuite_core::Result<TurnOutput> {
        on_delta("Hello ");
        on_delta("back");
        Ok(TurnOutput {
            text: "Hello back".to_string(),
            ..TurnOutput::default()
        })
    }
}

struct EchoResolver;

impl ResolveModel for EchoResolver {
    fn resolve(&self, _model_id: &str, _api_keys: &ApiKeys) -> chatsuite_core::Result<ModelHandle> {
        Ok(Arc::new(EchoModel))
    }
}

struct NoWeb;

#[async_trait]
impl WebResearch for NoWeb {
    async fn search(&self, _query: &str, _limit: usize) -> chatsuite_core::Result<Vec<SearchHit>> {
        Err(Error::Config("search disabled".to_string()))
    }

    async fn read(&self, _url: &str) -> chatsuite_core::Result<String> {
        Err(Error::Config("reader disabled".to_string()))
    }
}

struct TestApp {
    app: Router,
    db: Arc<Database>,
    _dir: TempDir,
}

async fn test_app(max_upload_bytes: u64) -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = Config::default();
    config.database = dir.path().join("chatsuite.db");
    config.uploads_dir = dir.path().join("uploads");
    config.uploads = UploadConfig {
        max_bytes: max_upload_bytes,
        ..UploadConfig::default()
    };

    let db = Arc::new(Database::open(&config.database).await.expect("open db"));
    let tools = Arc::new(ToolRegistry::new(Arc::clone(&db), Arc::new(NoWeb), &config.web));
    let chats = Arc::new(ChatService::new(
        Arc::clone(&db),
        Arc::new(EchoResolver),
        tools,
        &config,
    ));
    let uploads = Arc::new(UploadService::new(
        Arc::clone(&db),
        None,
        config.uploads_dir.clone(),
        config.uploads.clone(),
    ));
    let state = AppState {
        config: Arc::new(config),
        db: Arc::clone(&db),
        chats,
        uploads,
    };

    TestApp {
        app: router(state),
        db,
        _dir: dir,
    }
}

async fn token_with_credits(db: &Database, credits: i64) -> (String, String) {
    let (profile, token) = db.create_profile(None, credits).await.expect("profile");
    (profile.id, token)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn chat_request(token: &str, body: &Value) -> Request<Body> {
    Request::post("/chat")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn multipart_request(token: &str, chat_id: &str, content_type: &str, data: &[u8]) -> Request<Body> {
    let boundary = "chatsuite-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"chatId\"\r\n\r\n{chat_id}\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"notes.txt\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::post("/files/upload")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .expect("request")
}

#[tokio::test]
async fn health_is_public() {
    let app = test_app(1024).await;
    let response = app
        .app
        .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"status": "ok"}));
}

#[tokio::test]
async fn credits_fail_safe_without_auth() {
    let app = test_app(1024).await;
    let response = app
        .app
        .oneshot(Request::get("/user/credits").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await, json!({"credits": 0}));
}

#[tokio::test]
async fn credits_report_balance() {
    let app = test_app(1024).await;
    let (_, token) = token_with_credits(&app.db, 7).await;
    let response = app
        .app
        .oneshot(
            Request::get("/user/credits")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"credits": 7}));
}

#[tokio::test]
async fn chat_requires_auth() {
    let app = test_app(1024).await;
    let response = app
        .app
        .oneshot(chat_request("cs_unknown", &json!({"id": "c1", "messages": []})))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn chat_streams_with_credit_header() {
    let app = test_app(1024).await;
    let (user_id, token) = token_with_credits(&app.db, 5).await;

    let response = app
        .app
        .oneshot(chat_request(
            &token,
            &json!({
                "id": "chat-1",
                "messages": [{"role": "user", "content": "Hello"}],
                "isBrowseEnabled": false
            }),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let usage: Value = serde_json::from_str(
        response.headers()[CREDIT_USAGE_HEADER]
            .to_str()
            .expect("header"),
    )
    .expect("usage json");
    assert_eq!(usage, json!({"cost": 1, "remaining": 4}));
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .expect("content type")
            .starts_with("text/event-stream")
    );

    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let text = String::from_utf8(bytes.to_vec()).expect("utf8");
    assert!(text.contains("event: text-delta"));
    assert!(text.contains("event: done"));
    assert!(text.contains("\"remaining\":4"));

    assert_eq!(app.db.credits_for(&user_id).await.expect("credits"), 4);
    assert_eq!(app.db.count_messages("chat-1").await.expect("count"), 2);
}

#[tokio::test]
async fn chat_without_credits_is_payment_required() {
    let app = test_app(1024).await;
    let (_, token) = token_with_credits(&app.db, 0).await;

    let response = app
        .app
        .oneshot(chat_request(
            &token,
            &json!({"id": "chat-2", "messages": [{"role": "user", "content": "Hello"}]}),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "INSUFFICIENT_CREDITS");
    assert!(!body["message"].as_str().expect("message").is_empty());
}

#[tokio::test]
async fn chat_with_only_blank_messages_is_bad_request() {
    let app = test_app(1024).await;
    let (_, token) = token_with_credits(&app.db, 5).await;

    let response = app
        .app
        .oneshot(chat_request(
            &token,
            &json!({"id": "chat-3", "messages": [{"role": "user", "content": "   "}]}),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "NO_VALID_MESSAGES");
}

#[tokio::test]
async fn malformed_chat_body_is_invalid_request() {
    let app = test_app(1024).await;
    let (user_id, token) = token_with_credits(&app.db, 5).await;

    let response = app
        .app
        .oneshot(chat_request(
            &token,
            &json!({"messages": [{"role": "user", "content": "hi"}]}),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "INVALID_REQUEST");
    assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));
    assert_eq!(app.db.credits_for(&user_id).await.expect("credits"), 5);
}

#[tokio::test]
async fn document_without_id_is_invalid_request() {
    let app = test_app(1024).await;
    let (_, token) = token_with_credits(&app.db, 5).await;

    let response = app
        .app
        .oneshot(
            Request::get("/document")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "INVALID_REQUEST");
}

#[tokio::test]
async fn delete_missing_chat_is_not_found() {
    let app = test_app(1024).await;
    let (_, token) = token_with_credits(&app.db, 5).await;

    let response = app
        .app
        .oneshot(
            Request::delete("/chat?id=nope")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_and_read_are_scoped_to_owner() {
    let app = test_app(1024).await;
    let (_, owner) = token_with_credits(&app.db, 5).await;
    let (_, other) = token_with_credits(&app.db, 5).await;

    let response = app
        .app
        .clone()
        .oneshot(chat_request(
            &owner,
            &json!({"id": "chat-4", "messages": [{"role": "user", "content": "Hi"}]}),
        ))
        .await
        .expect("response");
    to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("drain stream");

    let response = app
        .app
        .clone()
        .oneshot(
            Request::get("/chat/chat-4/messages")
                .header(header::AUTHORIZATION, format!("Bearer {other}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .app
        .clone()
        .oneshot(
            Request::delete("/chat?id=chat-4")
                .header(header::AUTHORIZATION, format!("Bearer {other}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .app
        .clone()
        .oneshot(
            Request::get("/chat/chat-4/messages")
                .header(header::AUTHORIZATION, format!("Bearer {owner}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let messages = body_json(response).await;
    assert_eq!(messages.as_array().expect("messages").len(), 2);

    let response = app
        .app
        .oneshot(
            Request::delete("/chat?id=chat-4")
                .header(header::AUTHORIZATION, format!("Bearer {owner}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(app.db.get_chat("chat-4").await.expect("get").is_none());
}

#[tokio::test]
async fn upload_returns_url_and_path() {
    let app = test_app(1024).await;
    let (user_id, token) = token_with_credits(&app.db, 5).await;

    let response = app
        .app
        .oneshot(multipart_request(&token, "chat-5", "text/plain", b"meeting notes"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["url"].as_str().expect("url").starts_with("file://"));
    assert!(body["path"].as_str().expect("path").starts_with(&user_id));
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let app = test_app(16).await;
    let (_, token) = token_with_credits(&app.db, 5).await;

    let response = app
        .app
        .oneshot(multipart_request(&token, "chat-6", "text/plain", &[b'a'; 17]))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body_json(response).await["error"], "FILE_TOO_LARGE");
}

#[tokio::test]
async fn unsupported_upload_type_is_rejected() {
    let app = test_app(1024).await;
    let (_, token) = token_with_credits(&app.db, 5).await;

    let response = app
        .app
        .oneshot(multipart_request(&token, "chat-7", "image/png", b"\x89PNG"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body_json(response).await["error"], "UNSUPPORTED_FILE_TYPE");
}

#[tokio::test]
async fn missing_document_is_not_found() {
    let app = test_app(1024).await;
    let (_, token) = token_with_credits(&app.db, 5).await;

    let response = app
        .app
        .oneshot(
            Request::get("/document?id=missing")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "NOT_FOUND");
}
