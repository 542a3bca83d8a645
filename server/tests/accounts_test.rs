//! Integration tests for registration, sign-in, sessions and the profile API.

mod common;

use common::{post_message, register, register_admin, session_token, start_test_server};
use serde_json::{json, Value};

async fn login(server: &common::TestServer, username: &str, password: &str) -> reqwest::Response {
    server
        .client
        .post(server.url("/api/login"))
        .json(&json!({ "username": username, "password": password }))
        .send()
        .await
        .unwrap()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_health_check() {
    let server = start_test_server().await;
    for path in ["/health", "/api/health"] {
        let resp = server.client.get(server.url(path)).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert!(body["version"].is_string());
    }
}

#[tokio::test]
async fn test_register_login_logout() {
    let server = start_test_server().await;

    let resp = server
        .client
        .post(server.url("/api/register"))
        .json(&json!({
            "username": "alice",
            "email": "alice@example.com",
            "password": "correct horse battery",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let token = session_token(&resp);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Registration successful");
    assert_eq!(body["user"]["role"], "user");
    assert!(body["user"].get("password_hash").is_none());

    let status: Value = server
        .client
        .get(server.url("/api/login-status"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["is_logged_in"], true);
    assert_eq!(status["user"]["username"], "alice");

    // The cookie alone carries the session.
    let status: Value = server
        .client
        .get(server.url("/api/login-status"))
        .header("Cookie", format!("timeline_session={}", token))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["is_logged_in"], true);

    let anonymous: Value = server
        .client
        .get(server.url("/api/login-status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(anonymous["is_logged_in"], false);
    assert!(anonymous.get("user").is_none());

    let resp = login(&server, "alice", "correct horse battery").await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Login successful");

    let resp = login(&server, "alice", "wrong").await;
    assert_eq!(resp.status(), 401);
    let resp = login(&server, "nobody", "wrong").await;
    assert_eq!(resp.status(), 401);

    let resp = server
        .client
        .post(server.url("/api/logout"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let cookie = resp.headers()["set-cookie"].to_str().unwrap().to_string();
    assert!(cookie.starts_with("timeline_session=;"), "Cookie cleared: {}", cookie);
    assert!(cookie.contains("Max-Age=0"));
}

#[tokio::test]
async fn test_register_validation_and_uniqueness() {
    let server = start_test_server().await;
    register(&server, "alice", None).await;

    let cases = [
        (json!({ "username": "alice", "email": "other@example.com", "password": "pw" }), "Username already exists"),
        (json!({ "username": "alice2", "email": "alice@example.com", "password": "pw" }), "Email already exists"),
        (json!({ "username": "", "email": "x@example.com", "password": "pw" }), "Username, email and password are required"),
    ];
    for (body, expected) in cases {
        let resp = server
            .client
            .post(server.url("/api/register"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["message"], expected);
    }
}

#[tokio::test]
async fn test_setup_token_grants_admin_once() {
    let server = start_test_server().await;

    // A client-supplied role is ignored.
    let resp = server
        .client
        .post(server.url("/api/register"))
        .json(&json!({
            "username": "sneaky",
            "email": "sneaky@example.com",
            "password": "pw",
            "role": "admin",
            "setup_token": "not-the-token",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["user"]["role"], "user");

    let (admin_token, _) = register_admin(&server).await;
    let profile: Value = server
        .client
        .get(server.url("/api/user/profile"))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(profile["user"]["role"], "admin");

    let token = server.setup_token.clone();
    let (_, second_id) = register(&server, "second", Some(&token)).await;
    let resp = server
        .client
        .get(server.url(&format!("/api/admin/users/{}", second_id)))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["user"]["role"], "user", "Setup token is single-use");
}

#[tokio::test]
async fn test_deactivated_account_cannot_sign_in() {
    let server = start_test_server().await;
    let (admin_token, _) = register_admin(&server).await;
    let (user_token, user_id) = register(&server, "alice", None).await;

    let resp = server
        .client
        .post(server.url(&format!("/api/admin/users/{}/toggle-status", user_id)))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = login(&server, "alice", "correct horse battery").await;
    assert_eq!(resp.status(), 403);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Account has been disabled");

    // Existing sessions stop working as well.
    let resp = server
        .client
        .get(server.url("/api/user/profile"))
        .bearer_auth(&user_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_invalid_session_token_is_rejected() {
    let server = start_test_server().await;
    let resp = server
        .client
        .get(server.url("/api/user/profile"))
        .bearer_auth("not.a.jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = server
        .client
        .get(server.url("/api/user/profile"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_profile_update_and_password_change() {
    let server = start_test_server().await;
    let (token, _) = register(&server, "alice", None).await;
    register(&server, "bob", None).await;

    let resp = server
        .client
        .put(server.url("/api/user/profile"))
        .bearer_auth(&token)
        .json(&json!({ "username": "bob" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400, "Username must stay unique");

    let resp = server
        .client
        .put(server.url("/api/user/profile"))
        .bearer_auth(&token)
        .json(&json!({ "username": "alicia", "bio": "Hello there" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["user"]["username"], "alicia");
    assert_eq!(body["user"]["bio"], "Hello there");
    assert_eq!(body["user"]["email"], "alice@example.com");

    let resp = server
        .client
        .put(server.url("/api/user/password"))
        .bearer_auth(&token)
        .json(&json!({ "current_password": "nope", "new_password": "new secret" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Current password is incorrect");

    let resp = server
        .client
        .put(server.url("/api/user/password"))
        .bearer_auth(&token)
        .json(&json!({ "current_password": "correct horse battery", "new_password": "new secret" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    assert_eq!(login(&server, "alicia", "correct horse battery").await.status(), 401);
    assert_eq!(login(&server, "alicia", "new secret").await.status(), 200);
}

#[tokio::test]
async fn test_avatar_upload_and_default() {
    let server = start_test_server().await;
    let (token, _) = register(&server, "alice", None).await;

    let profile: Value = server
        .client
        .get(server.url("/api/user/profile"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(profile["user"]["avatar_url"], "/api/avatar/default/A");

    let svg = server
        .client
        .get(server.url("/api/avatar/default/A"))
        .send()
        .await
        .unwrap();
    assert_eq!(svg.status(), 200);
    assert_eq!(svg.headers()["content-type"], "image/svg+xml");
    assert!(svg.text().await.unwrap().contains(">A</text>"));

    let upload = |bytes: Vec<u8>, name: &'static str| {
        let form = reqwest::multipart::Form::new()
            .part("avatar", reqwest::multipart::Part::bytes(bytes).file_name(name));
        server
            .client
            .post(server.url("/api/user/avatar"))
            .bearer_auth(&token)
            .multipart(form)
            .send()
    };

    let resp = upload(b"not an image".to_vec(), "notes.txt").await.unwrap();
    assert_eq!(resp.status(), 400, "Only images are accepted");

    let resp = upload(b"first".to_vec(), "me.png").await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let first_url = body["avatar_url"].as_str().unwrap().to_string();
    assert!(first_url.starts_with("/uploads/avatar_"));

    let resp = upload(b"second".to_vec(), "me.jpg").await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let second_url = body["avatar_url"].as_str().unwrap().to_string();

    assert_eq!(common::file_count(&server.upload_dir), 1, "Old avatar removed");
    let old = server.client.get(server.url(&first_url)).send().await.unwrap();
    assert_eq!(old.status(), 404);
    let new = server.client.get(server.url(&second_url)).send().await.unwrap();
    assert_eq!(new.bytes().await.unwrap().as_ref(), b"second");
}

#[tokio::test]
async fn test_user_stats_and_own_content() {
    let server = start_test_server().await;
    let (alice, _) = register(&server, "alice", None).await;
    let (bob, _) = register(&server, "bob", None).await;

    let resp = post_message(&server, &alice, "Alice's post").await;
    let body: Value = resp.json().await.unwrap();
    let message_id = body["data"]["id"].as_i64().unwrap();
    post_message(&server, &bob, "Bob's post").await;

    server
        .client
        .post(server.url(&format!("/api/messages/{}/like", message_id)))
        .bearer_auth(&bob)
        .send()
        .await
        .unwrap();
    server
        .client
        .post(server.url(&format!("/api/messages/{}/comments", message_id)))
        .bearer_auth(&alice)
        .json(&json!({ "content": "Replying to myself" }))
        .send()
        .await
        .unwrap();

    let stats: Value = server
        .client
        .get(server.url("/api/user/stats"))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["message_count"], 1);
    assert_eq!(stats["likes_received"], 1);
    assert_eq!(stats["comment_count"], 1);

    let mine: Value = server
        .client
        .get(server.url("/api/user/messages"))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let messages = mine["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["content"], "Alice's post");

    let comments: Value = server
        .client
        .get(server.url("/api/user/comments"))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(comments["comments"][0]["content"], "Replying to myself");
    assert_eq!(comments["pagination"]["total"], 1);
}
