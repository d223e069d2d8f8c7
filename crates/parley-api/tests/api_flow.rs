use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use parley_api::media::MediaStore;
use parley_api::{AppState, AppStateInner, router};
use parley_db::Database;
use parley_gateway::Dispatcher;
use parley_types::events::ServerEvent;

const AVATAR_URL: &str = "https://media.test/avatar.png";
const PIXEL: &str = "data:image/png;base64,iVBORw0KGgo=";

/// Records every upload and answers with a fixed URL.
#[derive(Default)]
struct FakeMedia {
    uploads: Mutex<Vec<String>>,
}

#[async_trait]
impl MediaStore for FakeMedia {
    async fn upload(&self, data_uri: &str) -> anyhow::Result<String> {
        self.uploads.lock().unwrap().push(data_uri.to_string());
        Ok(AVATAR_URL.to_string())
    }
}

struct BrokenMedia;

#[async_trait]
impl MediaStore for BrokenMedia {
    async fn upload(&self, _data_uri: &str) -> anyhow::Result<String> {
        anyhow::bail!("service down")
    }
}

fn app(media: Arc<dyn MediaStore>) -> (Router, AppState) {
    let state: AppState = Arc::new(AppStateInner {
        db: Database::open_in_memory().unwrap(),
        jwt_secret: "test-secret".into(),
        dispatcher: Dispatcher::new(),
        media,
    });
    (router::build(state.clone()), state)
}

async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let req = match body {
        Some(body) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

/// Sign up and return (user id, token).
async fn signup(app: &Router, name: &str, email: &str, password: &str) -> (Uuid, String) {
    let (_, body) = call(
        app,
        Method::POST,
        "/api/auth/signup",
        None,
        Some(json!({ "fullName": name, "email": email, "password": password, "bio": "hi" })),
    )
    .await;
    assert_eq!(body["success"], true, "signup failed: {}", body);
    let id = body["userData"]["user"]["_id"].as_str().unwrap().parse().unwrap();
    let token = body["userData"]["token"].as_str().unwrap().to_string();
    (id, token)
}

#[tokio::test]
async fn status_endpoint_is_plain_text() {
    let (app, _) = app(Arc::new(FakeMedia::default()));
    let resp = app
        .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"API is working!");
}

#[tokio::test]
async fn signup_returns_sanitized_user_and_token() {
    let (app, _) = app(Arc::new(FakeMedia::default()));
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/auth/signup",
        None,
        Some(json!({ "fullName": "Ada", "email": "ada@x.io", "password": "pw", "bio": "math" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let user = &body["userData"]["user"];
    assert_eq!(user["fullName"], "Ada");
    assert_eq!(user["profilePic"], "");
    assert!(user.get("password").is_none());
    assert!(body["userData"]["token"].as_str().is_some());
}

#[tokio::test]
async fn duplicate_email_is_refused_without_creating_a_user() {
    let (app, state) = app(Arc::new(FakeMedia::default()));
    let (first, _) = signup(&app, "Ada", "ada@x.io", "pw").await;

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/auth/signup",
        None,
        Some(json!({ "fullName": "Imposter", "email": "ada@x.io", "password": "x", "bio": "x" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": false, "message": "User already exists" }));

    let stored = state.db.get_user_by_email("ada@x.io").unwrap().unwrap();
    assert_eq!(stored.id, first.to_string());
    assert_eq!(stored.full_name, "Ada");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_signups_for_one_email_create_one_account() {
    let (app, state) = app(Arc::new(FakeMedia::default()));
    let body = json!({ "fullName": "Ada", "email": "dup@x.io", "password": "pw", "bio": "b" });

    let (a, b) = tokio::join!(
        call(&app, Method::POST, "/api/auth/signup", None, Some(body.clone())),
        call(&app, Method::POST, "/api/auth/signup", None, Some(body)),
    );

    let mut messages = vec![
        a.1["message"].as_str().unwrap().to_string(),
        b.1["message"].as_str().unwrap().to_string(),
    ];
    messages.sort();
    assert_eq!(messages, ["Account created successfully", "User already exists"]);

    let winner = [&a.1, &b.1]
        .into_iter()
        .find(|r| r["success"] == true)
        .unwrap()["userData"]["user"]["_id"]
        .as_str()
        .unwrap()
        .to_string();
    let stored = state.db.get_user_by_email("dup@x.io").unwrap().unwrap();
    assert_eq!(stored.id, winner);
}

#[tokio::test]
async fn signup_with_missing_fields_fails_validation() {
    let (app, _) = app(Arc::new(FakeMedia::default()));
    let (_, body) = call(
        &app,
        Method::POST,
        "/api/auth/signup",
        None,
        Some(json!({ "fullName": "Ada", "email": "ada@x.io", "password": "pw" })),
    )
    .await;
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Missing Details");
}

#[tokio::test]
async fn login_checks_email_then_password() {
    let (app, _) = app(Arc::new(FakeMedia::default()));
    let (id, _) = signup(&app, "Ada", "ada@x.io", "correct horse").await;

    let (_, ok) = call(
        &app,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({ "email": "ada@x.io", "password": "correct horse" })),
    )
    .await;
    assert_eq!(ok["success"], true);
    assert_eq!(ok["userData"]["user"]["_id"], id.to_string());

    let (_, wrong) = call(
        &app,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({ "email": "ada@x.io", "password": "battery staple" })),
    )
    .await;
    assert_eq!(wrong["success"], false);
    assert_eq!(wrong["message"], "Invalid Credentials");
    assert!(wrong.get("userData").is_none());

    let (_, unknown) = call(
        &app,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({ "email": "nobody@x.io", "password": "x" })),
    )
    .await;
    assert_eq!(unknown["message"], "User does not exist");
}

#[tokio::test]
async fn malformed_json_is_reported_in_band() {
    let (app, _) = app(Arc::new(FakeMedia::default()));
    let req = Request::post("/api/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn check_requires_a_valid_token() {
    let (app, _) = app(Arc::new(FakeMedia::default()));
    let (id, token) = signup(&app, "Ada", "ada@x.io", "pw").await;

    let (status, missing) = call(&app, Method::GET, "/api/auth/check", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(missing["success"], false);

    let (_, forged) = call(&app, Method::GET, "/api/auth/check", Some("abc.def.ghi"), None).await;
    assert_eq!(forged["success"], false);

    let (_, ok) = call(&app, Method::GET, "/api/auth/check", Some(&token), None).await;
    assert_eq!(ok["success"], true);
    assert_eq!(ok["user"]["_id"], id.to_string());
    assert!(ok["user"].get("password").is_none());
}

#[tokio::test]
async fn profile_update_without_avatar_keeps_avatar() {
    let media = Arc::new(FakeMedia::default());
    let (app, _) = app(media.clone());
    let (_, token) = signup(&app, "Ada", "ada@x.io", "pw").await;

    let (_, with_pic) = call(
        &app,
        Method::PUT,
        "/api/auth/update-profile",
        Some(&token),
        Some(json!({ "profilePic": PIXEL, "bio": "b1", "fullName": "Ada L" })),
    )
    .await;
    assert_eq!(with_pic["success"], true);
    assert_eq!(with_pic["user"]["profilePic"], AVATAR_URL);
    assert_eq!(media.uploads.lock().unwrap().as_slice(), [PIXEL.to_string()]);

    let (_, without_pic) = call(
        &app,
        Method::PUT,
        "/api/auth/update-profile",
        Some(&token),
        Some(json!({ "bio": "b2", "fullName": "Ada Lovelace" })),
    )
    .await;
    assert_eq!(without_pic["success"], true);
    assert_eq!(without_pic["user"]["profilePic"], AVATAR_URL);
    assert_eq!(without_pic["user"]["bio"], "b2");
    assert_eq!(without_pic["user"]["fullName"], "Ada Lovelace");
    assert_eq!(media.uploads.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn failed_avatar_upload_leaves_profile_untouched() {
    let (app, state) = app(Arc::new(BrokenMedia));
    let (id, token) = signup(&app, "Ada", "ada@x.io", "pw").await;

    let (_, body) = call(
        &app,
        Method::PUT,
        "/api/auth/update-profile",
        Some(&token),
        Some(json!({ "profilePic": PIXEL, "bio": "changed" })),
    )
    .await;
    assert_eq!(body["success"], false);

    let stored = state.db.get_user_by_id(&id.to_string()).unwrap().unwrap();
    assert_eq!(stored.bio, "hi");
    assert_eq!(stored.profile_pic, "");
}

#[tokio::test]
async fn send_pushes_to_online_recipient_with_real_sender() {
    let (app, state) = app(Arc::new(FakeMedia::default()));
    let (alice, alice_token) = signup(&app, "Alice", "alice@x.io", "pw").await;
    let (bob, _) = signup(&app, "Bob", "bob@x.io", "pw").await;

    let mut bob_conn = state.dispatcher.connect(Some(bob)).await;

    let (_, body) = call(
        &app,
        Method::POST,
        &format!("/api/messages/send/{}", bob),
        Some(&alice_token),
        Some(json!({ "text": "hello bob" })),
    )
    .await;
    assert_eq!(body["success"], true);
    assert_eq!(body["message"]["senderId"], alice.to_string());

    match bob_conn.targeted.recv().await {
        Some(ServerEvent::NewMessage(msg)) => {
            assert_eq!(msg.sender_id, alice);
            assert_eq!(msg.receiver_id, bob);
            assert_eq!(msg.text.as_deref(), Some("hello bob"));
        }
        other => panic!("expected newMessage, got {:?}", other),
    }
}

#[tokio::test]
async fn send_to_offline_recipient_is_only_visible_on_fetch() {
    let (app, state) = app(Arc::new(FakeMedia::default()));
    let (_, alice_token) = signup(&app, "Alice", "alice@x.io", "pw").await;
    let (bob, bob_token) = signup(&app, "Bob", "bob@x.io", "pw").await;

    let (_, body) = call(
        &app,
        Method::POST,
        &format!("/api/messages/send/{}", bob),
        Some(&alice_token),
        Some(json!({ "text": "while you were out" })),
    )
    .await;
    assert_eq!(body["success"], true);

    // Nothing is queued for a later connection.
    let mut late = state.dispatcher.connect(Some(bob)).await;
    assert!(late.targeted.try_recv().is_err());

    let alice_id = body["message"]["senderId"].as_str().unwrap().to_string();
    let (_, thread) = call(
        &app,
        Method::GET,
        &format!("/api/messages/{}", alice_id),
        Some(&bob_token),
        None,
    )
    .await;
    assert_eq!(thread["messages"][0]["text"], "while you were out");
}

#[tokio::test]
async fn thread_is_shared_and_ordered_and_unseen_counts_reset() {
    let (app, _) = app(Arc::new(FakeMedia::default()));
    let (alice, alice_token) = signup(&app, "Alice", "alice@x.io", "pw").await;
    let (bob, bob_token) = signup(&app, "Bob", "bob@x.io", "pw").await;

    for (token, to, text) in [
        (&alice_token, bob, "1"),
        (&bob_token, alice, "2"),
        (&alice_token, bob, "3"),
        (&alice_token, bob, "4"),
    ] {
        let (_, body) = call(
            &app,
            Method::POST,
            &format!("/api/messages/send/{}", to),
            Some(token),
            Some(json!({ "text": text })),
        )
        .await;
        assert_eq!(body["success"], true);
    }

    let (_, users) = call(&app, Method::GET, "/api/messages/users", Some(&bob_token), None).await;
    assert_eq!(users["users"].as_array().unwrap().len(), 1);
    assert_eq!(users["users"][0]["_id"], alice.to_string());
    assert_eq!(users["unseenMessages"][alice.to_string()], 3);

    for (token, other) in [(&alice_token, bob), (&bob_token, alice)] {
        let (_, thread) = call(
            &app,
            Method::GET,
            &format!("/api/messages/{}", other),
            Some(token),
            None,
        )
        .await;
        let texts: Vec<&str> = thread["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["text"].as_str().unwrap())
            .collect();
        assert_eq!(texts, ["1", "2", "3", "4"]);
    }

    let (_, users) = call(&app, Method::GET, "/api/messages/users", Some(&bob_token), None).await;
    assert_eq!(users["unseenMessages"], json!({}));
}

#[tokio::test]
async fn image_message_stores_media_url() {
    let (app, _) = app(Arc::new(FakeMedia::default()));
    let (_, alice_token) = signup(&app, "Alice", "alice@x.io", "pw").await;
    let (bob, _) = signup(&app, "Bob", "bob@x.io", "pw").await;

    let (_, body) = call(
        &app,
        Method::POST,
        &format!("/api/messages/send/{}", bob),
        Some(&alice_token),
        Some(json!({ "image": PIXEL })),
    )
    .await;
    assert_eq!(body["success"], true);
    assert_eq!(body["message"]["image"], AVATAR_URL);
    assert!(body["message"].get("text").is_none());
}

#[tokio::test]
async fn empty_or_misaddressed_sends_are_rejected() {
    let (app, _) = app(Arc::new(FakeMedia::default()));
    let (_, alice_token) = signup(&app, "Alice", "alice@x.io", "pw").await;
    let (bob, _) = signup(&app, "Bob", "bob@x.io", "pw").await;

    let (_, empty) = call(
        &app,
        Method::POST,
        &format!("/api/messages/send/{}", bob),
        Some(&alice_token),
        Some(json!({ "text": "   " })),
    )
    .await;
    assert_eq!(empty["success"], false);

    let (_, nobody) = call(
        &app,
        Method::POST,
        &format!("/api/messages/send/{}", Uuid::new_v4()),
        Some(&alice_token),
        Some(json!({ "text": "hello?" })),
    )
    .await;
    assert_eq!(nobody["message"], "User does not exist");

    let (status, bad_id) = call(
        &app,
        Method::POST,
        "/api/messages/send/not-a-uuid",
        Some(&alice_token),
        Some(json!({ "text": "hello?" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bad_id["success"], false);
}

#[tokio::test]
async fn only_the_receiver_can_mark_a_message_seen() {
    let (app, _) = app(Arc::new(FakeMedia::default()));
    let (_, alice_token) = signup(&app, "Alice", "alice@x.io", "pw").await;
    let (bob, bob_token) = signup(&app, "Bob", "bob@x.io", "pw").await;

    let (_, sent) = call(
        &app,
        Method::POST,
        &format!("/api/messages/send/{}", bob),
        Some(&alice_token),
        Some(json!({ "text": "read me" })),
    )
    .await;
    let id = sent["message"]["_id"].as_str().unwrap();
    let uri = format!("/api/messages/mark/{}", id);

    let (_, by_sender) = call(&app, Method::PUT, &uri, Some(&alice_token), None).await;
    assert_eq!(by_sender["success"], false);

    let (_, by_receiver) = call(&app, Method::PUT, &uri, Some(&bob_token), None).await;
    assert_eq!(by_receiver, json!({ "success": true }));

    let (_, users) = call(&app, Method::GET, "/api/messages/users", Some(&bob_token), None).await;
    assert_eq!(users["unseenMessages"], json!({}));
}
