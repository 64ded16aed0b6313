//! End-to-end API tests against an in-memory stack.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use chatvault::archive::{
    ARCHIVE_BUCKET, ARCHIVE_PAGE_SIZE, ArchiveJob, EXPORT_BUCKET,
};
use chatvault::conversation::{ConversationMessage, Role};

use common::TestContext;

async fn send(ctx: &TestContext, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = ctx.app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn seed_conversation(ctx: &TestContext, id: &str, count: usize) {
    let repo = ctx.repo();
    repo.create(id, None).await.unwrap();
    for i in 1..=count {
        let role = if i % 2 == 1 { Role::User } else { Role::Assistant };
        repo.append_message(id, role, &format!("message {i}")).await.unwrap();
    }
}

async fn archive_everything(ctx: &TestContext) {
    // Backdate so a zero-month threshold catches every conversation.
    sqlx::query("UPDATE conversations SET updated_at = '2000-01-01T00:00:00+00:00'")
        .execute(ctx.db.pool())
        .await
        .unwrap();
    let job = ArchiveJob::new(
        ctx.db.pool().clone(),
        ctx.store.clone(),
        "0 MONTHS".parse().unwrap(),
        ARCHIVE_PAGE_SIZE,
    );
    let summary = job.run().await.unwrap();
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn health_reports_ok() {
    let ctx = TestContext::new().await;
    let (status, body) = send(&ctx, get("/health")).await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn unknown_routes_and_conversations_return_not_found() {
    let ctx = TestContext::new().await;

    let (status, body) = send(&ctx, get("/no/such/route")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "Not found");

    let (status, _) = send(&ctx, get("/conversation/missing/messages")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&ctx, post_json("/conversation/missing/export", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unarchived_conversation_serves_messages_from_database() {
    let ctx = TestContext::new().await;
    seed_conversation(&ctx, "thread_live", 3).await;

    let (status, body) = send(&ctx, get("/conversation/thread_live/messages")).await;
    assert_eq!(status, StatusCode::OK);

    let messages: Vec<ConversationMessage> = serde_json::from_slice(&body).unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].message_text, "message 1");
    assert_eq!(messages[2].sequence_number, 3);
}

#[tokio::test]
async fn archived_conversation_is_rehydrated_and_streamed() {
    for count in [1usize, 7, 8, 9, 16] {
        let ctx = TestContext::new().await;
        let id = format!("thread_{count}");
        seed_conversation(&ctx, &id, count).await;
        archive_everything(&ctx).await;

        // Rows are gone, the archive object exists, flag is set.
        assert_eq!(ctx.repo().count_messages(&id).await.unwrap(), 0);
        assert!(ctx
            .store
            .object(ARCHIVE_BUCKET, &format!("{id}_messages"))
            .is_some());
        assert!(ctx.repo().get(&id).await.unwrap().unwrap().archived);

        let (status, body) = send(&ctx, get(&format!("/conversation/{id}/messages"))).await;
        assert_eq!(status, StatusCode::OK, "count={count}");

        let messages: Vec<ConversationMessage> = serde_json::from_slice(&body).unwrap();
        assert_eq!(messages.len(), count);
        for (i, message) in messages.iter().enumerate() {
            assert_eq!(message.sequence_number, (i + 1) as i64);
            assert_eq!(message.message_text, format!("message {}", i + 1));
        }

        // Restored: rows back in the database, flag cleared, and a second read
        // is served straight from the database.
        assert_eq!(ctx.repo().count_messages(&id).await.unwrap(), count as i64);
        assert!(!ctx.repo().get(&id).await.unwrap().unwrap().archived);

        let (status, body) = send(&ctx, get(&format!("/conversation/{id}/messages"))).await;
        assert_eq!(status, StatusCode::OK);
        let again: Vec<ConversationMessage> = serde_json::from_slice(&body).unwrap();
        assert_eq!(again, messages);
    }
}

#[tokio::test]
async fn export_stores_html_and_confirms() {
    let ctx = TestContext::new().await;
    seed_conversation(&ctx, "thread_export", 2).await;

    let (status, body) = send(&ctx, post_json("/conversation/thread_export/export", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["message"], "Conversation exported successfully");

    let html = String::from_utf8(
        ctx.store
            .object(EXPORT_BUCKET, "thread_export_export.html")
            .unwrap(),
    )
    .unwrap();
    assert!(html.contains("<li><p>message 1</p></li>"));
    assert!(html.contains("<li><p>message 2</p></li>"));
}

#[tokio::test]
async fn chat_records_both_sides_of_each_exchange() {
    let ctx = TestContext::new().await;

    let (status, body) = send(&ctx, post_json("/chat", json!({ "message": "hello" }))).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    let thread_id = json["threadId"].as_str().unwrap().to_string();
    assert_eq!(json["response"], "echo: hello");

    let (status, _) = send(
        &ctx,
        post_json("/chat", json!({ "threadId": thread_id, "message": "again" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let messages = ctx.repo().list_messages(&thread_id).await.unwrap();
    let summary: Vec<(i64, Role, &str)> = messages
        .iter()
        .map(|m| (m.sequence_number, m.role, m.message_text.as_str()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (1, Role::User, "hello"),
            (2, Role::Assistant, "echo: hello"),
            (3, Role::User, "again"),
            (4, Role::Assistant, "echo: again"),
        ]
    );
}

#[tokio::test]
async fn chat_to_archived_conversation_is_rejected() {
    let ctx = TestContext::new().await;
    seed_conversation(&ctx, "thread_cold", 2).await;
    archive_everything(&ctx).await;

    let (status, body) = send(
        &ctx,
        post_json("/chat", json!({ "threadId": "thread_cold", "message": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert!(json["error"].as_str().unwrap().contains("archived"));

    // Nothing was appended; rehydration later restores exactly the two
    // archived records.
    let (status, body) = send(&ctx, get("/conversation/thread_cold/messages")).await;
    assert_eq!(status, StatusCode::OK);
    let messages: Vec<ConversationMessage> = serde_json::from_slice(&body).unwrap();
    assert_eq!(messages.len(), 2);
}

#[tokio::test]
async fn chat_to_unknown_thread_returns_not_found() {
    let ctx = TestContext::new().await;
    let (status, _) = send(
        &ctx,
        post_json("/chat", json!({ "threadId": "missing", "message": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn chat_rejects_empty_messages() {
    let ctx = TestContext::new().await;
    let (status, _) = send(&ctx, post_json("/chat", json!({ "message": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn token_endpoint_requires_enabled_auth() {
    let ctx = TestContext::new().await;
    let request = Request::builder()
        .uri("/auth/token")
        .header(header::AUTHORIZATION, "anything")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&ctx, request).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
