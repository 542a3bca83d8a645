//! Integration tests for user administration and backup/restore.

mod common;

use common::{add_keyword, create_capsule, post_message, register, register_admin, start_test_server, unlock_in};
use serde_json::{json, Value};

async fn admin_get(server: &common::TestServer, token: &str, path: &str) -> Value {
    let resp = server
        .client
        .get(server.url(path))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200, "GET {} failed", path);
    resp.json().await.unwrap()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_admin_routes_require_admin() {
    let server = start_test_server().await;
    register_admin(&server).await;
    let (user_token, _) = register(&server, "alice", None).await;

    for path in ["/api/admin/users", "/api/admin/users/count", "/api/admin/backups", "/api/admin/messages"] {
        let resp = server
            .client
            .get(server.url(path))
            .bearer_auth(&user_token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 403, "{} should be admin-only", path);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["message"], "Admin privileges required");

        let resp = server.client.get(server.url(path)).send().await.unwrap();
        assert_eq!(resp.status(), 401, "{} should require sign-in", path);
    }
}

#[tokio::test]
async fn test_user_listing_and_counts() {
    let server = start_test_server().await;
    let (admin_token, _) = register_admin(&server).await;
    let (alice_token, alice_id) = register(&server, "alice", None).await;
    register(&server, "bob", None).await;
    post_message(&server, &alice_token, "Hello").await;

    let counts = admin_get(&server, &admin_token, "/api/admin/users/count").await;
    assert_eq!(counts["total"], 3);
    assert_eq!(counts["active"], 3);
    assert_eq!(counts["inactive"], 0);
    assert_eq!(counts["admins"], 1);

    let list = admin_get(&server, &admin_token, "/api/admin/users?search=ali").await;
    let users = list["users"].as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["username"], "alice");
    assert_eq!(users[0]["stats"]["message_count"], 1);
    assert_eq!(list["pagination"]["total"], 1);

    let list = admin_get(&server, &admin_token, "/api/admin/users?role=admin").await;
    assert_eq!(list["users"].as_array().unwrap().len(), 1);

    let list = admin_get(&server, &admin_token, "/api/admin/users?per_page=2").await;
    assert_eq!(list["users"].as_array().unwrap().len(), 2);
    assert_eq!(list["pagination"]["pages"], 2);

    let detail = admin_get(&server, &admin_token, &format!("/api/admin/users/{}", alice_id)).await;
    assert_eq!(detail["user"]["email"], "alice@example.com");
    assert!(detail["activities"].is_array());

    let resp = server
        .client
        .get(server.url("/api/admin/users/999"))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_update_user_validates_role_and_logs_activity() {
    let server = start_test_server().await;
    let (admin_token, _) = register_admin(&server).await;
    let (_, alice_id) = register(&server, "alice", None).await;
    let url = server.url(&format!("/api/admin/users/{}", alice_id));

    let resp = server
        .client
        .put(&url)
        .bearer_auth(&admin_token)
        .json(&json!({ "role": "superuser" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = server
        .client
        .put(&url)
        .bearer_auth(&admin_token)
        .json(&json!({ "bio": "Edited by admin", "role": "admin" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["user"]["role"], "admin");
    assert_eq!(body["user"]["bio"], "Edited by admin");

    let detail = admin_get(&server, &admin_token, &format!("/api/admin/users/{}", alice_id)).await;
    let activities = detail["activities"].as_array().unwrap();
    assert!(
        activities.iter().any(|a| a["action_type"] == "admin_update"),
        "Admin edit should be recorded: {:?}",
        activities
    );
}

#[tokio::test]
async fn test_admins_cannot_be_deactivated_or_deleted() {
    let server = start_test_server().await;
    let (admin_token, admin_id) = register_admin(&server).await;

    let resp = server
        .client
        .post(server.url(&format!("/api/admin/users/{}/toggle-status", admin_id)))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = server
        .client
        .delete(server.url(&format!("/api/admin/users/{}", admin_id)))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_delete_user_removes_their_content() {
    let server = start_test_server().await;
    let (admin_token, _) = register_admin(&server).await;
    let (alice_token, alice_id) = register(&server, "alice", None).await;
    post_message(&server, &alice_token, "Soon gone").await;

    let resp = server
        .client
        .delete(server.url(&format!("/api/admin/users/{}", alice_id)))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let board: Value = server
        .client
        .get(server.url("/api/messages"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(board["pagination"]["total"], 0);

    let resp = server
        .client
        .get(server.url("/api/user/profile"))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401, "Deleted account's session is dead");
}

#[tokio::test]
async fn test_batch_actions_skip_administrators() {
    let server = start_test_server().await;
    let (admin_token, admin_id) = register_admin(&server).await;
    let (_, alice_id) = register(&server, "alice", None).await;
    let (_, bob_id) = register(&server, "bob", None).await;
    let url = server.url("/api/admin/users/batch");

    let resp = server
        .client
        .post(&url)
        .bearer_auth(&admin_token)
        .json(&json!({ "user_ids": [admin_id, alice_id, bob_id], "action": "deactivate" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success_count"], 2);
    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].as_str().unwrap().contains("admin"));

    let counts = admin_get(&server, &admin_token, "/api/admin/users/count").await;
    assert_eq!(counts["inactive"], 2);

    for body in [
        json!({ "user_ids": [alice_id], "action": "promote" }),
        json!({ "user_ids": [], "action": "delete" }),
    ] {
        let resp = server
            .client
            .post(&url)
            .bearer_auth(&admin_token)
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "Expected 400 for {}", body);
    }

    let resp = server
        .client
        .post(&url)
        .bearer_auth(&admin_token)
        .json(&json!({ "user_ids": [9998, 9999], "action": "activate" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = server
        .client
        .post(&url)
        .bearer_auth(&admin_token)
        .json(&json!({ "user_ids": [alice_id, bob_id], "action": "delete" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let counts = admin_get(&server, &admin_token, "/api/admin/users/count").await;
    assert_eq!(counts["total"], 1);
}

#[tokio::test]
async fn test_backup_lifecycle_and_restore() {
    let server = start_test_server().await;
    let (admin_token, _) = register_admin(&server).await;
    let (alice_token, _) = register(&server, "alice", None).await;
    add_keyword(&server, &admin_token, "spam").await;

    let form = reqwest::multipart::Form::new()
        .text("title", "First day")
        .text("content", "It begins");
    let resp = server
        .client
        .post(server.url("/api/timeline"))
        .bearer_auth(&alice_token)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let capsule_id = create_capsule(&server, &alice_token, "Paris", &unlock_in(3600)).await;

    let resp = server
        .client
        .post(server.url("/api/admin/backup"))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let filename = body["filename"].as_str().unwrap().to_string();
    assert!(filename.starts_with("backup_") && filename.ends_with(".json"));
    assert_eq!(body["counts"]["time_capsules"], 1);
    assert_eq!(body["counts"]["timeline_entries"], 1);

    let list = admin_get(&server, &admin_token, "/api/admin/backups").await;
    let backups = list["backups"].as_array().unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0]["filename"], filename.as_str());

    let resp = server
        .client
        .get(server.url(&format!("/api/admin/backups/{}/download", filename)))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.headers()["content-disposition"]
        .to_str()
        .unwrap()
        .contains(&filename));
    let document = resp.bytes().await.unwrap().to_vec();
    let parsed: Value = serde_json::from_slice(&document).unwrap();
    assert!(
        parsed["time_capsules"][0].get("answer").is_none(),
        "Backups carry the commitment, not the answer"
    );

    // Wipe the capsule, then restore it from the downloaded document.
    let resp = server
        .client
        .delete(server.url(&format!("/api/time-capsules/{}", capsule_id)))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let form = reqwest::multipart::Form::new().part(
        "backup_file",
        reqwest::multipart::Part::bytes(document).file_name("restore.json"),
    );
    let resp = server
        .client
        .post(server.url("/api/admin/restore"))
        .bearer_auth(&admin_token)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["restored"]["time_capsules"], 1);

    let capsules: Value = server
        .client
        .get(server.url("/api/time-capsules"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(capsules[0]["id"].as_i64(), Some(capsule_id));
    assert_eq!(capsules[0]["is_unlocked"], false);

    let resp = server
        .client
        .delete(server.url(&format!("/api/admin/backups/{}", filename.trim_end_matches(".json"))))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let list = admin_get(&server, &admin_token, "/api/admin/backups").await;
    assert_eq!(list["backups"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_restore_removes_media_of_dropped_rows() {
    let server = start_test_server().await;
    let (admin_token, _) = register_admin(&server).await;
    let (alice_token, _) = register(&server, "alice", None).await;

    let form = reqwest::multipart::Form::new().text("title", "Kept").part(
        "media",
        reqwest::multipart::Part::bytes(b"png".to_vec()).file_name("kept.png"),
    );
    let body: Value = server
        .client
        .post(server.url("/api/timeline"))
        .multipart(form)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let kept_url = body["entry"]["media_url"].as_str().unwrap().to_string();

    let body: Value = server
        .client
        .post(server.url("/api/admin/backup"))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let filename = body["filename"].as_str().unwrap().to_string();
    let document = server
        .client
        .get(server.url(&format!("/api/admin/backups/{}/download", filename)))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap()
        .to_vec();

    // Board posts are not part of a backup, so this image loses its row.
    let form = reqwest::multipart::Form::new().text("content", "After the backup").part(
        "images",
        reqwest::multipart::Part::bytes(b"gif".to_vec()).file_name("late.gif"),
    );
    let body: Value = server
        .client
        .post(server.url("/api/messages"))
        .bearer_auth(&alice_token)
        .multipart(form)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let dropped_url = body["data"]["images"][0]["url"].as_str().unwrap().to_string();
    assert_eq!(common::file_count(&server.upload_dir), 2);

    let form = reqwest::multipart::Form::new().part(
        "backup_file",
        reqwest::multipart::Part::bytes(document).file_name("restore.json"),
    );
    let resp = server
        .client
        .post(server.url("/api/admin/restore"))
        .bearer_auth(&admin_token)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    assert_eq!(common::file_count(&server.upload_dir), 1, "Only the restored entry's media remains");
    let kept = server.client.get(server.url(&kept_url)).send().await.unwrap();
    assert_eq!(kept.status(), 200);
    let dropped = server.client.get(server.url(&dropped_url)).send().await.unwrap();
    assert_eq!(dropped.status(), 404);
}

#[tokio::test]
async fn test_invalid_restore_is_rejected() {
    let server = start_test_server().await;
    let (admin_token, _) = register_admin(&server).await;

    let cases: [(&[u8], &str); 3] = [
        (b"{ not json", "broken.json"),
        (br#"{"timeline_entries": []}"#, "partial.json"),
        (b"{}", "backup.txt"),
    ];
    for (bytes, name) in cases {
        let form = reqwest::multipart::Form::new().part(
            "backup_file",
            reqwest::multipart::Part::bytes(bytes.to_vec()).file_name(name),
        );
        let resp = server
            .client
            .post(server.url("/api/admin/restore"))
            .bearer_auth(&admin_token)
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "Expected 400 for {}", name);
    }

    let resp = server
        .client
        .get(server.url("/api/admin/backups/backup_missing.json/download"))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
