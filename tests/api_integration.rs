// Router-level tests: requests go through the full axum stack in-process

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use pump_verification::{
    build_router, db, AppState, NewUser, PageSettings, Role, Service, SessionContext,
};
use serde_json::{json, Value};
use tower::ServiceExt;

struct TestApp {
    router: Router,
    admin_token: String,
    operator_token: String,
}

const OPERATOR_PASSWORD: &str = "field-pass-123";

fn setup() -> TestApp {
    setup_with(Service::new(db::open_in_memory().unwrap()))
}

fn setup_with(service: Service) -> TestApp {
    let system = SessionContext::system();

    let admin = service
        .create_user(
            &system,
            &NewUser {
                username: "admin".to_string(),
                full_name: "Station Admin".to_string(),
                role: Role::Admin,
                password: None,
            },
        )
        .unwrap();
    let operator = service
        .create_user(
            &system,
            &NewUser {
                username: "op".to_string(),
                full_name: "Field Operator".to_string(),
                role: Role::Operator,
                password: Some(OPERATOR_PASSWORD.to_string()),
            },
        )
        .unwrap();

    TestApp {
        router: build_router(AppState::new(service, PageSettings::default())),
        admin_token: admin.token,
        operator_token: operator.token,
    }
}

async fn send(
    app: &TestApp,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// Create a station with one pump carrying tags A and B; returns (station_id, pump_id)
async fn seed_pump(app: &TestApp) -> (i64, i64) {
    let (status, body) = send(
        app,
        Method::POST,
        "/api/v1/stations",
        Some(&app.admin_token),
        Some(json!({"name": "North", "location": "Route 9"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let station_id = body["data"]["id"].as_i64().unwrap();

    let (status, body) = send(
        app,
        Method::POST,
        &format!("/api/v1/stations/{}/pumps", station_id),
        Some(&app.admin_token),
        Some(json!({
            "pumpNumber": 1,
            "mainRfidTag": "MAIN-1",
            "expectedChildTags": [
                {"tagId": "A", "description": "hose"},
                {"tagId": "B", "description": "nozzle"}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "LOCKED");
    let pump_id = body["data"]["id"].as_i64().unwrap();

    (station_id, pump_id)
}

#[tokio::test]
async fn test_health_needs_no_token() {
    let app = setup();
    let (status, body) = send(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], pump_verification::VERSION);
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let app = setup();
    let (status, body) = send(&app, Method::GET, "/api/v1/stations", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    assert!(body.get("data").is_none());

    let (status, _) = send(&app, Method::GET, "/api/v1/stations", Some("nope"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

async fn login(app: &TestApp, username: &str, password: &str) -> (StatusCode, Value) {
    send(
        app,
        Method::POST,
        "/api/v1/auth/login",
        None,
        Some(json!({"username": username, "password": password})),
    )
    .await
}

#[tokio::test]
async fn test_login_then_logout() {
    let app = setup();
    let (status, body) = login(&app, "op", OPERATOR_PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["tokenType"], "Bearer");
    assert_eq!(body["data"]["user"]["username"], "op");
    assert!(body["data"]["expiresIn"].as_i64().unwrap() > 0);
    let token = body["data"]["accessToken"].as_str().unwrap().to_string();

    let (status, _) = send(&app, Method::GET, "/api/v1/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, Method::POST, "/api/v1/auth/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["loggedOut"], true);

    let (status, body) = send(&app, Method::GET, "/api/v1/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    // The API token issued at creation is unaffected
    let (status, _) = send(
        &app,
        Method::GET,
        "/api/v1/auth/me",
        Some(&app.operator_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_login_with_wrong_password_is_unauthorized() {
    let app = setup();
    let (status, body) = login(&app, "op", "wrong-password").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    // admin has no password: API token only
    let (status, _) = login(&app, "admin", "wrong-password").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/auth/login",
        None,
        Some(json!({"username": "op"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_expired_login_token_is_unauthorized() {
    let service =
        Service::new(db::open_in_memory().unwrap()).with_session_ttl(chrono::Duration::seconds(-1));
    let app = setup_with(service);

    let (status, body) = login(&app, "op", OPERATOR_PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
    let token = body["data"]["accessToken"].as_str().unwrap().to_string();

    let (status, body) = send(&app, Method::GET, "/api/v1/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_me_returns_token_owner() {
    let app = setup();
    let (status, body) = send(
        &app,
        Method::GET,
        "/api/v1/auth/me",
        Some(&app.operator_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["username"], "op");
    assert_eq!(body["data"]["role"], "OPERATOR");
}

#[tokio::test]
async fn test_operator_cannot_create_station() {
    let app = setup();
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/stations",
        Some(&app.operator_token),
        Some(json!({"name": "South", "location": "Dock"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");
}

#[tokio::test]
async fn test_station_listing_is_paginated() {
    let app = setup();
    for name in ["A", "B", "C"] {
        let (status, _) = send(
            &app,
            Method::POST,
            "/api/v1/stations",
            Some(&app.admin_token),
            Some(json!({"name": name, "location": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = send(
        &app,
        Method::GET,
        "/api/v1/stations?page=2&limit=2",
        Some(&app.operator_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["pagination"]["page"], 2);
    assert_eq!(body["pagination"]["total"], 3);
    assert_eq!(body["pagination"]["totalPages"], 2);
}

#[tokio::test]
async fn test_out_of_range_page_is_empty_not_an_error() {
    let app = setup();
    let (status, body) = send(
        &app,
        Method::GET,
        "/api/v1/stations?page=9223372036854775807&limit=100",
        Some(&app.operator_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
    assert_eq!(body["pagination"]["total"], 0);
}

#[tokio::test]
async fn test_verify_round_trip() {
    let app = setup();
    let (station_id, pump_id) = seed_pump(&app).await;

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/v1/pumps/{}/verify", pump_id),
        Some(&app.operator_token),
        Some(json!({"mainTagScanned": "MAIN-1", "scannedChildTags": ["B", "A"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let session = &body["data"];
    assert_eq!(session["result"], "success");
    assert_eq!(session["pumpStatus"], "UNLOCKED");
    assert_eq!(session["previousStatus"], "LOCKED");
    assert_eq!(session["details"]["expectedCount"], 2);
    assert_eq!(session["details"]["mainTagMatches"], true);

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/v1/pumps/{}/verify", pump_id),
        Some(&app.operator_token),
        Some(json!({"mainTagScanned": "MAIN-1", "scannedChildTags": ["A", "X"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let session = &body["data"];
    assert_eq!(session["result"], "failed");
    assert_eq!(session["pumpStatus"], "LOCKED");
    assert_eq!(session["details"]["missingTags"], json!(["B"]));
    assert_eq!(session["details"]["unexpectedTags"], json!(["X"]));

    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/api/v1/pumps/{}", pump_id),
        Some(&app.operator_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "LOCKED");
    assert!(body["data"]["lastVerificationAt"].is_string());

    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/api/v1/pumps/{}/verifications?result=failed", pump_id),
        Some(&app.operator_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["pagination"]["total"], 1);

    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/api/v1/admin/stations/{}/logs", station_id),
        Some(&app.admin_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["recentVerifications"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_verify_rejects_empty_tag() {
    let app = setup();
    let (_, pump_id) = seed_pump(&app).await;

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/v1/pumps/{}/verify", pump_id),
        Some(&app.operator_token),
        Some(json!({"mainTagScanned": "MAIN-1", "scannedChildTags": ["A", ""]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_TAG");

    let (_, body) = send(
        &app,
        Method::GET,
        &format!("/api/v1/pumps/{}/verifications", pump_id),
        Some(&app.operator_token),
        None,
    )
    .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_unknown_pump_is_not_found() {
    let app = setup();
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/pumps/999/verify",
        Some(&app.operator_token),
        Some(json!({"mainTagScanned": "MAIN-1", "scannedChildTags": []})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_malformed_requests_are_validation_errors() {
    let app = setup();

    let (status, body) = send(
        &app,
        Method::GET,
        "/api/v1/pumps/abc",
        Some(&app.operator_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/stations",
        Some(&app.admin_token),
        Some(json!({"name": "missing location"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, body) = send(
        &app,
        Method::GET,
        "/api/v1/pumps?status=EXPLODED",
        Some(&app.operator_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_delete_station_with_pumps_is_conflict() {
    let app = setup();
    let (station_id, pump_id) = seed_pump(&app).await;

    let uri = format!("/api/v1/stations/{}", station_id);
    let (status, body) = send(&app, Method::DELETE, &uri, Some(&app.admin_token), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    let (status, body) = send(
        &app,
        Method::DELETE,
        &format!("/api/v1/pumps/{}", pump_id),
        Some(&app.admin_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["deleted"], true);

    let (status, _) = send(&app, Method::DELETE, &uri, Some(&app.admin_token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, Method::GET, &uri, Some(&app.admin_token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_audit_trail_and_analytics() {
    let app = setup();
    let (_, pump_id) = seed_pump(&app).await;
    send(
        &app,
        Method::POST,
        &format!("/api/v1/pumps/{}/verify", pump_id),
        Some(&app.operator_token),
        Some(json!({"mainTagScanned": "MAIN-1", "scannedChildTags": ["A", "B"]})),
    )
    .await;

    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/api/v1/admin/audit-logs?entityType=PUMP&entityId={}", pump_id),
        Some(&app.admin_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let entries = body["data"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["action"], "CREATE");

    let (status, body) = send(
        &app,
        Method::GET,
        "/api/v1/admin/analytics",
        Some(&app.admin_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let stats = &body["data"];
    assert_eq!(stats["totalStations"], 1);
    assert_eq!(stats["totalPumps"], 1);
    assert_eq!(stats["verificationsTodayCount"], 1);
    assert_eq!(stats["successRate"], 100.0);
    assert_eq!(stats["pumpsByStatus"]["UNLOCKED"], 1);
    assert_eq!(stats["pumpsByStatus"]["BROKEN"], 0);

    let (status, _) = send(
        &app,
        Method::GET,
        "/api/v1/admin/analytics",
        Some(&app.operator_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_creates_user_with_working_token() {
    let app = setup();
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/admin/users",
        Some(&app.admin_token),
        Some(json!({"username": "night", "fullName": "Night Shift", "role": "OPERATOR"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let token = body["data"]["token"].as_str().unwrap().to_string();

    let (status, body) = send(&app, Method::GET, "/api/v1/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["username"], "night");
}
