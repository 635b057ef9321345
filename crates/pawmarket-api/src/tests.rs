use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{Method, Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use pawmarket_db::Database;
use pawmarket_gateway::identity::issue_token;
use pawmarket_gateway::{ChatService, DbNotifier, GroupRegistry, JwtIdentity};
use pawmarket_types::events::OutboundFrame;

const SECRET: &str = "test-secret";

struct TestApp {
    app: Router,
    service: ChatService,
    db: Arc<Database>,
    tokens: Vec<String>,
    ids: Vec<i64>,
}

fn test_app() -> TestApp {
    let db = Arc::new(Database::open_in_memory().expect("db"));
    let mut ids = Vec::new();
    let mut tokens = Vec::new();
    for name in ["alice", "bob", "carol"] {
        let user = db.create_user(name, None, None).expect("user");
        tokens.push(issue_token(SECRET, user.id, name, chrono::Duration::hours(1)).expect("token"));
        ids.push(user.id);
    }

    let service = ChatService::new(
        db.clone(),
        GroupRegistry::new(),
        Arc::new(JwtIdentity::new(SECRET, db.clone())),
        Arc::new(DbNotifier::new(db.clone())),
    );

    TestApp {
        app: crate::router(service.clone()),
        service,
        db,
        tokens,
        ids,
    }
}

async fn call(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request");

    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

#[tokio::test]
async fn requests_without_valid_token_are_unauthorized() {
    let t = test_app();

    let (status, body) = call(&t.app, Method::GET, "/api/chats", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let (status, _) = call(&t.app, Method::GET, "/api/chats", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn start_conversation_creates_then_reuses() {
    let t = test_app();
    let body = json!({ "receiverId": t.ids[1] });

    let (status, created) = call(&t.app, Method::POST, "/api/chats", Some(&t.tokens[0]), Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["participants"].as_array().map(Vec::len), Some(2));
    assert!(created["lastMessage"].is_null());

    let body = json!({ "receiverId": t.ids[0] });
    let (status, existing) = call(&t.app, Method::POST, "/api/chats", Some(&t.tokens[1]), Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(existing["id"], created["id"]);
}

#[tokio::test]
async fn start_conversation_with_self_or_unknown_user_fails() {
    let t = test_app();

    let body = json!({ "receiverId": t.ids[0] });
    let (status, err) = call(&t.app, Method::POST, "/api/chats", Some(&t.tokens[0]), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"]["code"], "validation_error");

    let body = json!({ "receiverId": 9999 });
    let (status, err) = call(&t.app, Method::POST, "/api/chats", Some(&t.tokens[0]), Some(body)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["error"]["code"], "not_found");
}

#[tokio::test]
async fn send_and_read_history_scenario() {
    let t = test_app();
    let (_, conv) = call(
        &t.app,
        Method::POST,
        "/api/chats",
        Some(&t.tokens[0]),
        Some(json!({ "receiverId": t.ids[1] })),
    )
    .await;
    let id = conv["id"].as_i64().expect("id");

    let (status, sent) = call(
        &t.app,
        Method::POST,
        &format!("/api/chats/{}/send", id),
        Some(&t.tokens[0]),
        Some(json!({ "text": "Hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(sent["senderId"], t.ids[0]);
    assert_eq!(sent["text"], "Hello");
    assert_eq!(sent["isRead"], false);

    let (status, history) = call(&t.app, Method::GET, &format!("/api/chats/{}/messages", id), Some(&t.tokens[1]), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().map(Vec::len), Some(1));
    assert_eq!(history[0]["id"], sent["id"]);

    // carol is not a participant
    let (status, err) = call(
        &t.app,
        Method::POST,
        &format!("/api/chats/{}/send", id),
        Some(&t.tokens[2]),
        Some(json!({ "text": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(err["error"]["code"], "forbidden");

    let (status, _) = call(&t.app, Method::GET, &format!("/api/chats/{}/messages", id), Some(&t.tokens[2]), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, history) = call(&t.app, Method::GET, &format!("/api/chats/{}/messages", id), Some(&t.tokens[0]), None).await;
    assert_eq!(history.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn blank_text_is_rejected() {
    let t = test_app();
    let (conv, _) = t.service.start_conversation(t.ids[0], t.ids[1]).await.expect("conv");

    let (status, err) = call(
        &t.app,
        Method::POST,
        &format!("/api/chats/{}/messages/send", conv.id),
        Some(&t.tokens[0]),
        Some(json!({ "text": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"]["code"], "validation_error");
    assert!(t.db.list_messages(conv.id).expect("list").is_empty());
}

#[tokio::test]
async fn fallback_send_is_pushed_to_live_members() {
    let t = test_app();
    let (conv, _) = t.service.start_conversation(t.ids[0], t.ids[1]).await.expect("conv");
    let mut live = t.service.registry().join(conv.id, t.ids[1]).await;

    let (status, sent) = call(
        &t.app,
        Method::POST,
        &format!("/api/chats/{}/messages/send", conv.id),
        Some(&t.tokens[0]),
        Some(json!({ "text": "via http" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let frame = live.rx.recv().await.expect("frame");
    match serde_json::from_str::<OutboundFrame>(&frame).expect("frame json") {
        OutboundFrame::Message { message } => {
            assert_eq!(Some(message.id), sent["id"].as_i64());
            assert_eq!(message.text, "via http");
        }
        other => panic!("unexpected frame {:?}", other),
    }
}

#[tokio::test]
async fn history_after_cursor() {
    let t = test_app();
    let (conv, _) = t.service.start_conversation(t.ids[0], t.ids[1]).await.expect("conv");
    let mut sent = Vec::new();
    for i in 0..4 {
        sent.push(t.service.send_message(conv.id, t.ids[i % 2], &format!("m{}", i)).await.expect("send"));
    }

    let uri = format!("/api/chats/{}/messages?after={}&limit=2", conv.id, sent[0].id);
    let (status, page) = call(&t.app, Method::GET, &uri, Some(&t.tokens[0]), None).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<_> = page.as_array().expect("array").iter().map(|m| m["id"].as_i64()).collect();
    assert_eq!(ids, vec![Some(sent[1].id), Some(sent[2].id)]);
}

#[tokio::test]
async fn list_and_get_conversations() {
    let t = test_app();
    let (older, _) = t.service.start_conversation(t.ids[0], t.ids[1]).await.expect("conv");
    let (newer, _) = t.service.start_conversation(t.ids[2], t.ids[0]).await.expect("conv");
    t.service.send_message(older.id, t.ids[1], "bump").await.expect("send");

    let (status, list) = call(&t.app, Method::GET, "/api/chats", Some(&t.tokens[0]), None).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<_> = list.as_array().expect("array").iter().map(|c| c["id"].as_i64()).collect();
    assert_eq!(ids, vec![Some(older.id), Some(newer.id)]);
    assert_eq!(list[0]["lastMessage"]["text"], "bump");

    let (status, one) = call(&t.app, Method::GET, &format!("/api/chats/{}", newer.id), Some(&t.tokens[2]), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(one["id"], newer.id);

    let (status, _) = call(&t.app, Method::GET, &format!("/api/chats/{}", newer.id), Some(&t.tokens[1]), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(&t.app, Method::GET, "/api/chats/9999", Some(&t.tokens[1]), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_conversation_removes_history() {
    let t = test_app();
    let (conv, _) = t.service.start_conversation(t.ids[0], t.ids[1]).await.expect("conv");
    t.service.send_message(conv.id, t.ids[0], "soon gone").await.expect("send");

    let (status, _) = call(&t.app, Method::DELETE, &format!("/api/chats/{}", conv.id), Some(&t.tokens[2]), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(&t.app, Method::DELETE, &format!("/api/chats/{}", conv.id), Some(&t.tokens[1]), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_null());
    assert!(t.db.list_messages(conv.id).expect("list").is_empty());
    assert!(t.db.get_conversation(conv.id).expect("get").is_none());
}

#[tokio::test]
async fn malformed_requests_get_the_error_envelope() {
    let t = test_app();
    let (conv, _) = t.service.start_conversation(t.ids[0], t.ids[1]).await.expect("conv");
    let token = Some(t.tokens[0].as_str());

    let (status, err) = call(&t.app, Method::POST, "/api/chats", token, Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"]["code"], "validation_error");

    let (status, err) = call(&t.app, Method::GET, "/api/chats/abc", token, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"]["code"], "validation_error");

    let (status, err) = call(&t.app, Method::GET, "/api/chats/abc/messages", token, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"]["code"], "validation_error");

    let uri = format!("/api/chats/{}/messages?limit=lots", conv.id);
    let (status, err) = call(&t.app, Method::GET, &uri, token, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"]["code"], "validation_error");

    let uri = format!("/api/chats/{}/send", conv.id);
    let (status, err) = call(&t.app, Method::POST, &uri, token, Some(json!(["not", "an", "object"]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"]["code"], "validation_error");
    assert!(t.db.list_messages(conv.id).expect("list").is_empty());

    // The caller is still authenticated before the input is looked at
    let (status, _) = call(&t.app, Method::GET, "/api/chats/abc", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
