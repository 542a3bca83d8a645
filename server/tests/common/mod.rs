//! Shared harness: boots the router on an ephemeral port over a temp data dir.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;

pub struct TestServer {
    pub base_url: String,
    pub setup_token: String,
    pub upload_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub client: reqwest::Client,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

pub async fn start_test_server() -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = timeline_server::db::init_db(&data_dir).expect("Failed to init DB");
    let session_secret = timeline_server::auth::session::load_or_generate_session_secret(&data_dir)
        .expect("Failed to generate session secret");
    let setup_token = timeline_server::admin::setup::maybe_generate_setup_token(&db)
        .expect("Failed to generate setup token")
        .expect("Expected setup token");

    let upload_dir = tmp_dir.path().join("uploads");
    let backup_dir = tmp_dir.path().join("backups");
    std::fs::create_dir_all(&upload_dir).unwrap();

    let state = timeline_server::state::AppState {
        db,
        session_secret,
        session_ttl_hours: 1,
        secure_cookies: false,
        upload_dir: upload_dir.clone(),
        backup_dir: backup_dir.clone(),
        max_upload_bytes: 5 * 1024 * 1024,
        auth_burst: 50,
    };

    let app = timeline_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    TestServer {
        base_url: format!("http://{}", addr),
        setup_token,
        upload_dir,
        backup_dir,
        client: reqwest::Client::new(),
    }
}

/// Pull the session token out of a `Set-Cookie` response header.
pub fn session_token(resp: &reqwest::Response) -> String {
    resp.headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|cookie| {
            cookie
                .strip_prefix("timeline_session=")
                .and_then(|rest| rest.split(';').next())
                .filter(|token| !token.is_empty())
                .map(|token| token.to_string())
        })
        .expect("Response should set the session cookie")
}

/// Register an account and return (session token, user id).
pub async fn register(server: &TestServer, username: &str, setup_token: Option<&str>) -> (String, i64) {
    let mut body = json!({
        "username": username,
        "email": format!("{}@example.com", username),
        "password": "correct horse battery",
    });
    if let Some(token) = setup_token {
        body["setup_token"] = json!(token);
    }

    let resp = server
        .client
        .post(server.url("/api/register"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201, "Registration failed for {}", username);
    let token = session_token(&resp);
    let body: Value = resp.json().await.unwrap();
    (token, body["user"]["id"].as_i64().unwrap())
}

/// Register the first account with the setup token, making it admin.
pub async fn register_admin(server: &TestServer) -> (String, i64) {
    let token = server.setup_token.clone();
    register(server, "admin", Some(&token)).await
}

/// An unlock date between `secs` and `secs + 1` seconds from now, at the
/// whole-second precision the API accepts.
pub fn unlock_in(secs: i64) -> String {
    (chrono::Utc::now() + chrono::Duration::seconds(secs + 1))
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}

pub async fn create_capsule(
    server: &TestServer,
    token: &str,
    answer: &str,
    unlock_date: &str,
) -> i64 {
    let resp = server
        .client
        .post(server.url("/api/time-capsules"))
        .bearer_auth(token)
        .json(&json!({
            "title": "Letter to future me",
            "content": "The treasure is under the oak.",
            "question": "Capital of France?",
            "answer": answer,
            "unlock_date": unlock_date,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201, "Capsule creation failed");
    let body: Value = resp.json().await.unwrap();
    body["id"].as_i64().unwrap()
}

pub async fn post_message(server: &TestServer, token: &str, content: &str) -> reqwest::Response {
    let form = reqwest::multipart::Form::new().text("content", content.to_string());
    server
        .client
        .post(server.url("/api/messages"))
        .bearer_auth(token)
        .multipart(form)
        .send()
        .await
        .unwrap()
}

pub async fn add_keyword(server: &TestServer, admin_token: &str, keyword: &str) -> i64 {
    let resp = server
        .client
        .post(server.url("/api/admin/keyword-filters"))
        .bearer_auth(admin_token)
        .json(&json!({ "keyword": keyword }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201, "Keyword creation failed");
    let body: Value = resp.json().await.unwrap();
    body["filter"]["id"].as_i64().unwrap()
}

/// Number of regular files directly inside `dir` (0 when it does not exist).
pub fn file_count(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
                .count()
        })
        .unwrap_or(0)
}
