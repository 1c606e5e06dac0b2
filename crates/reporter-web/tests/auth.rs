mod common;

use axum::http::{header::AUTHORIZATION, HeaderValue, StatusCode};
use common::{TestApp, PASSWORD, USERNAME};
use serde_json::{json, Value};

#[tokio::test]
async fn login_returns_token_and_user() {
    let app = TestApp::new().await;

    let response = app
        .server
        .post("/api/v1/auth/login")
        .json(&json!({"username": USERNAME, "password": PASSWORD}))
        .await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    assert!(!body["token"].as_str().unwrap().is_empty());
    assert_eq!(body["user"]["username"], USERNAME);
    assert!(body["user"].get("password").is_none());

    let token = body["token"].as_str().unwrap();
    app.server
        .get("/api/v1/user/me")
        .add_header(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        )
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn login_failures() {
    let app = TestApp::new().await;

    app.server
        .post("/api/v1/auth/login")
        .json(&json!({"username": USERNAME}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let unknown = app
        .server
        .post("/api/v1/auth/login")
        .json(&json!({"username": "nobody", "password": PASSWORD}))
        .await;
    unknown.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(unknown.json::<Value>()["message"], "User not found");

    let wrong = app
        .server
        .post("/api/v1/auth/login")
        .json(&json!({"username": USERNAME, "password": "wrong-password"}))
        .await;
    wrong.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.json::<Value>()["message"], "Invalid password");
}

#[tokio::test]
async fn protected_routes_require_token() {
    let app = TestApp::new().await;

    let missing = app.server.get("/api/v1/doctor").await;
    missing.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(missing.json::<Value>()["kind"], "UnauthenticatedError");

    app.server
        .get("/api/v1/usg-report")
        .add_header(AUTHORIZATION, HeaderValue::from_static("Bearer not-a-token"))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    app.server
        .get("/api/v1/patient")
        .add_header(AUTHORIZATION, HeaderValue::from_static("Basic abc"))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_of_deleted_user_is_rejected() {
    let app = TestApp::new().await;
    let user = app
        .repos
        .users
        .find_user_by_username(USERNAME)
        .await
        .unwrap()
        .unwrap();
    app.repos.users.delete_user(user.id).await.unwrap();

    let response = app.get("/api/v1/user/me").await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<Value>()["message"], "User no longer exists");
}

#[tokio::test]
async fn current_user_hides_password() {
    let app = TestApp::new().await;

    let me = app.get("/api/v1/user/me").await.json::<Value>();
    assert_eq!(me["username"], USERNAME);
    assert_eq!(me["firstName"], "Front");
    assert!(me.get("password").is_none());
    assert!(me.get("_id").is_none());
}

#[tokio::test]
async fn profile_update_keeps_username() {
    let app = TestApp::new().await;

    let response = app
        .put("/api/v1/user/me")
        .json(&json!({"firstName": "Reception"}))
        .await;
    response.assert_status_ok();
    let me = response.json::<Value>();
    assert_eq!(me["firstName"], "Reception");
    assert_eq!(me["lastName"], "Desk");

    app.put("/api/v1/user/me")
        .json(&json!({"username": "someone-else"}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn password_change_takes_effect() {
    let app = TestApp::new().await;

    app.put("/api/v1/user/me/password")
        .json(&json!({"password": "short"}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    app.put("/api/v1/user/me/password")
        .json(&json!({"password": "a-much-longer-secret"}))
        .await
        .assert_status(StatusCode::NO_CONTENT);

    app.server
        .post("/api/v1/auth/login")
        .json(&json!({"username": USERNAME, "password": PASSWORD}))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    app.server
        .post("/api/v1/auth/login")
        .json(&json!({"username": USERNAME, "password": "a-much-longer-secret"}))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn google_login_url_uses_client_id() {
    let app = TestApp::new().await;

    let body = app
        .get("/api/v1/auth/get-google-login-url")
        .await
        .json::<Value>();
    let url = body["url"].as_str().unwrap();
    assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth"));
    assert!(url.contains("client_id=client-123"));
    assert!(url.contains("access_type=offline"));
}

#[tokio::test]
async fn google_login_requires_code() {
    let app = TestApp::new().await;

    app.post("/api/v1/auth/google-login")
        .json(&json!({}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_reports_missing_google_login() {
    let app = TestApp::new().await;

    let response = app.server.get("/health").await;
    response.assert_status_ok();
    let health = response.json::<Value>();
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["components"]["storage"]["status"], "healthy");
    assert_eq!(health["components"]["google"]["status"], "degraded");
    assert_eq!(health["components"]["outbox"]["status"], "healthy");
}

#[tokio::test]
async fn metrics_count_requests() {
    let app = TestApp::new().await;
    app.create_doctor("Dr. Pillai").await;

    let response = app.server.get("/metrics").await;
    response.assert_status_ok();
    let text = response.text();
    assert!(text.contains("http_requests_total"));
    assert!(text.contains("method=\"POST\""));
}

#[tokio::test]
async fn password_length_includes_surrounding_spaces() {
    let app = TestApp::new().await;

    app.put("/api/v1/user/me/password")
        .json(&json!({"password": "  abcd  "}))
        .await
        .assert_status(StatusCode::NO_CONTENT);
    app.server
        .post("/api/v1/auth/login")
        .json(&json!({"username": USERNAME, "password": "  abcd  "}))
        .await
        .assert_status_ok();
}
