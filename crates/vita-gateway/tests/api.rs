//! HTTP-level tests against the assembled router in no-API-key mode: the
//! rule-based extraction paths keep ingestion working, so the whole surface
//! can be exercised without an upstream.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use vita_core::config::Settings;

struct TestServer {
    router: Router,
    _data_dir: tempfile::TempDir,
}

fn server() -> TestServer {
    let data_dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.database_url = data_dir
        .path()
        .join("vita.db")
        .to_string_lossy()
        .to_string();
    settings.chroma_persist_dir = data_dir
        .path()
        .join("vectors")
        .to_string_lossy()
        .to_string();
    settings.upload_dir = data_dir.path().join("uploads").to_string_lossy().to_string();
    settings.admin_password = "test-password".to_string();

    let state = Arc::new(vita_gateway::app::AppState::new(settings).unwrap());
    TestServer {
        router: vita_gateway::app::build_router(state),
        _data_dir: data_dir,
    }
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, value)
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn multipart_request(uri: &str, fields: &[(&str, &str)]) -> Request<Body> {
    let boundary = "vita-test-boundary";
    let mut body = String::new();
    for (name, value) in fields {
        body.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    body.push_str(&format!("--{boundary}--\r\n"));
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn login(router: &Router) -> String {
    let (status, body) = send(
        router,
        json_request(
            "POST",
            "/api/auth/login",
            serde_json::json!({"password": "test-password"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_reports_degraded_mode() {
    let server = server();
    let (status, body) = send(
        &server.router,
        Request::get("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["ai_configured"], false);
    assert_eq!(body["auth_configured"], true);
}

#[tokio::test]
async fn login_rejects_wrong_password() {
    let server = server();
    let (status, _) = send(
        &server.router,
        json_request(
            "POST",
            "/api/auth/login",
            serde_json::json!({"password": "nope"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_lifecycle() {
    let server = server();
    let token = login(&server.router).await;

    let (status, body) = send(
        &server.router,
        json_request(
            "POST",
            "/api/auth/verify",
            serde_json::json!({"token": token}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);

    send(
        &server.router,
        json_request(
            "POST",
            "/api/auth/logout",
            serde_json::json!({"token": token}),
        ),
    )
    .await;
    let (_, body) = send(
        &server.router,
        json_request(
            "POST",
            "/api/auth/verify",
            serde_json::json!({"token": token}),
        ),
    )
    .await;
    assert_eq!(body["valid"], false);
}

#[tokio::test]
async fn feed_commits_in_mock_mode() {
    let server = server();
    let (status, body) = send(
        &server.router,
        multipart_request(
            "/api/feed",
            &[
                ("text", "just walked 5 km"),
                ("client_time", "2026-02-05T10:00:00+08:00"),
            ],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["category"], "MOOD");
    assert!(body["id"].as_str().is_some());
    assert!(body["tags"]
        .as_array()
        .unwrap()
        .iter()
        .any(|t| t == "#time/forenoon"));
    // Without an embedder upstream the vector write is the only casualty.
    assert_eq!(body["failed_phases"], serde_json::json!(["rag_index"]));

    // The record shows up in history and detail.
    let id = body["id"].as_str().unwrap();
    let (status, listing) = send(
        &server.router,
        Request::get("/api/feed/history?limit=10")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["items"].as_array().unwrap().len(), 1);

    let (status, detail) = send(
        &server.router,
        Request::get(format!("/api/feed/{id}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["id"], id.to_string());
}

#[tokio::test]
async fn empty_feed_is_bad_request() {
    let server = server();
    let (status, _) = send(&server.router, multipart_request("/api/feed", &[])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn delete_requires_auth_and_soft_deletes() {
    let server = server();
    let (_, created) = send(
        &server.router,
        multipart_request("/api/feed", &[("text", "note to remove")]),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &server.router,
        Request::delete(format!("/api/feed/{id}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let token = login(&server.router).await;
    let (status, _) = send(
        &server.router,
        Request::delete(format!("/api/feed/{id}"))
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &server.router,
        Request::get(format!("/api/feed/{id}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The export still sees the row, flagged deleted.
    let (_, export) = send(
        &server.router,
        Request::get("/api/feed/export")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(export["count"], 1);
    assert_eq!(export["items"][0]["is_deleted"], true);
}

#[tokio::test]
async fn history_rejects_unknown_category() {
    let server = server();
    let (status, _) = send(
        &server.router,
        Request::get("/api/feed/history?category=NAP")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn image_proxy_blocks_traversal() {
    let server = server();
    let (status, _) = send(
        &server.router,
        Request::get("/api/feed/image/2026/02/../../../../etc/passwd.jpg")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert!(status == StatusCode::BAD_REQUEST || status == StatusCode::NOT_FOUND);

    let (status, _) = send(
        &server.router,
        Request::get("/api/feed/image/2026/02/file.exe")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chat_message_degrades_without_upstream() {
    let server = server();
    let (status, body) = send(
        &server.router,
        json_request(
            "POST",
            "/api/chat/message",
            serde_json::json!({"message": "how was my week?"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "markdown");
    assert!(body["content"].as_str().unwrap().contains("[overview]"));
}

#[tokio::test]
async fn conversation_crud() {
    let server = server();
    let (status, created) = send(
        &server.router,
        json_request(
            "POST",
            "/api/chat/conversations",
            serde_json::json!({"title": "planning"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id = created["id"].as_str().unwrap().to_string();

    let (status, fetched) = send(
        &server.router,
        Request::get(format!("/api/chat/conversations/{id}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["conversation"]["title"], "planning");

    let (status, _) = send(
        &server.router,
        json_request(
            "PATCH",
            &format!("/api/chat/conversations/{id}"),
            serde_json::json!({"title": "renamed"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &server.router,
        Request::delete(format!("/api/chat/conversations/{id}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &server.router,
        Request::get(format!("/api/chat/conversations/{id}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn usage_endpoints_require_auth() {
    let server = server();
    let (status, _) = send(
        &server.router,
        Request::get("/api/tokens/stats")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let token = login(&server.router).await;
    let (status, body) = send(
        &server.router,
        Request::get("/api/tokens/stats")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["overall"].is_object());
}

#[tokio::test]
async fn nickname_round_trip() {
    let server = server();
    let (status, body) = send(
        &server.router,
        Request::get("/api/settings/nickname")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["nickname"].is_null());

    let token = login(&server.router).await;
    let req = Request::builder()
        .method("PUT")
        .uri("/api/settings/nickname")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(
            serde_json::json!({"nickname": "Momo"}).to_string(),
        ))
        .unwrap();
    let (status, _) = send(&server.router, req).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(
        &server.router,
        Request::get("/api/settings/nickname")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(body["nickname"], "Momo");
}
