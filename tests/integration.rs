#![cfg(test)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use mockall::mock;
use movesmart_backend::{
    api,
    base::{
        config::{Config, ConfigInner},
        types::Res,
    },
    collector::tasks,
    geo::{BoundingBox, CITIES, Point},
    runtime::Runtime,
    service::{
        db::DbClient,
        llm::LlmClient,
        traffic::{GenericTrafficApi, GeocodeResult, ReverseGeocodeResult, TrafficClient},
    },
};
use serde_json::{Value, json};
use tower::ServiceExt;

// Mocks.

// Mock traffic API client for testing.

mock! {
    pub Traffic {}

    #[async_trait]
    impl GenericTrafficApi for Traffic {
        async fn flow_segment(&self, point: Point) -> Res<Value>;
        async fn incidents(&self, bbox: &BoundingBox, category_filter: Option<&'static str>) -> Res<Value>;
        async fn geocode(&self, query: &str) -> Res<Option<GeocodeResult>>;
        async fn reverse_geocode(&self, point: Point) -> Res<Option<ReverseGeocodeResult>>;
        async fn route_traffic(&self, start: Point, end: Point) -> Res<Value>;
    }
}

/// A mock where every upstream call fails, for fallback-path tests.
fn get_unavailable_traffic() -> MockTraffic {
    let mut mock = MockTraffic::new();

    mock.expect_flow_segment().returning(|_| Err(anyhow::anyhow!("connection refused")));
    mock.expect_incidents().returning(|_, _| Err(anyhow::anyhow!("connection refused")));
    mock.expect_geocode().returning(|_| Err(anyhow::anyhow!("connection refused")));
    mock.expect_reverse_geocode().returning(|_| Err(anyhow::anyhow!("connection refused")));
    mock.expect_route_traffic().returning(|_, _| Err(anyhow::anyhow!("connection refused")));

    mock
}

fn sample_flow(current: f64, free: f64) -> Value {
    json!({
        "flowSegmentData": {
            "currentSpeed": current,
            "freeFlowSpeed": free,
            "currentTravelTime": 120,
            "freeFlowTravelTime": 60,
            "currentTime": "2025-06-02T08:30:00Z",
        }
    })
}

fn sample_incidents() -> Value {
    json!({
        "incidents": [
            {
                "geometry": {"type": "Point", "coordinates": [36.8219, -1.2921]},
                "properties": {
                    "id": "tt-1",
                    "iconCategory": 1,
                    "magnitudeOfDelay": 2,
                    "events": [{"description": "Accident", "code": 1}],
                    "roadNumbers": ["A104"],
                    "length": 200,
                    "delay": 90,
                }
            },
            {
                "geometry": {"type": "LineString", "coordinates": [[36.80, -1.28], [36.81, -1.29]]},
                "properties": {
                    "id": "tt-2",
                    "iconCategory": 8,
                    "events": [{"description": "Roadworks", "code": 4}],
                }
            }
        ]
    })
}

// Harness.

/// Set up a runtime backed by the in-memory database, the heuristic analyzer,
/// and the given traffic mock.
async fn setup_runtime(traffic: MockTraffic) -> Runtime {
    let config = Config::from_inner(ConfigInner {
        db_endpoint: "mem://".to_string(),
        ..Default::default()
    });

    let db = DbClient::surreal_memory().await.expect("Failed to create DB client");
    let traffic = TrafficClient::new(Arc::new(traffic));
    let llm = LlmClient::heuristic();

    Runtime { config, db, traffic, llm }
}

async fn send(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri).header("content-type", "application/json");

    if let Some(token) = token {
        request = request.header("authorization", format!("Token {token}"));
    }

    let body = match body {
        Some(value) => Body::from(serde_json::to_vec(&value).unwrap()),
        None => Body::empty(),
    };

    let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap_or(Value::Null) };

    (status, value)
}

/// Register a user and return their token.
async fn register(app: &Router, username: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({
            "username": username,
            "email": format!("{username}@example.com"),
            "password": "password123",
        })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED, "registration failed: {body}");
    body["token"].as_str().unwrap().to_string()
}

/// Overwrite a user's roles directly in the database.
async fn set_roles(runtime: &Runtime, username: &str, roles: &[&str]) {
    let mut user = runtime.db.get_user(username).await.unwrap().unwrap();
    user.roles = roles.iter().map(|r| r.to_string()).collect();
    runtime.db.update_user(&user).await.unwrap();
}

// Tests.

#[tokio::test]
async fn test_register_login_profile_flow() {
    let runtime = setup_runtime(MockTraffic::new()).await;
    let app = api::router(runtime.clone());

    let token = register(&app, "alice").await;

    // Registration assigns the default viewer role.
    let (status, body) = send(&app, "GET", "/auth/profile", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["username"], "alice");
    assert_eq!(body["user"]["roles"], json!(["viewer"]));
    assert!(body["user"]["permissions"].as_array().unwrap().contains(&json!("traffic:read")));

    // Login returns the same token and stamps last_login.
    let (status, body) = send(&app, "POST", "/auth/login", None, Some(json!({"username": "alice", "password": "password123"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token"].as_str().unwrap(), token);

    let user = runtime.db.get_user("alice").await.unwrap().unwrap();
    assert!(user.last_login.is_some());

    // Wrong password is rejected.
    let (status, _) = send(&app, "POST", "/auth/login", None, Some(json!({"username": "alice", "password": "wrong"}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Duplicate registration is rejected.
    let (status, body) = send(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"username": "alice", "email": "other@example.com", "password": "password123"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Username already exists");
}

#[tokio::test]
async fn test_requests_without_token_are_rejected() {
    let runtime = setup_runtime(MockTraffic::new()).await;
    let app = api::router(runtime);

    let (status, body) = send(&app, "GET", "/auth/profile", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Authentication credentials were not provided.");

    let (status, body) = send(&app, "GET", "/api/incidents", Some("bogus-token"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid token.");

    // The health probe stays public.
    let (status, _) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_logout_revokes_token() {
    let runtime = setup_runtime(MockTraffic::new()).await;
    let app = api::router(runtime);

    let token = register(&app, "alice").await;

    let (status, _) = send(&app, "POST", "/auth/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, "GET", "/auth/profile", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_change_password_rotates_token() {
    let runtime = setup_runtime(MockTraffic::new()).await;
    let app = api::router(runtime);

    let token = register(&app, "alice").await;

    let (status, body) = send(
        &app,
        "POST",
        "/auth/change-password",
        Some(&token),
        Some(json!({"current_password": "password123", "new_password": "evenbetter456"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let new_token = body["token"].as_str().unwrap().to_string();
    assert_ne!(new_token, token);

    // The old token no longer works; the new one does.
    let (status, _) = send(&app, "GET", "/auth/profile", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, "GET", "/auth/profile", Some(&new_token), None).await;
    assert_eq!(status, StatusCode::OK);

    // Only the new password logs in.
    let (status, _) = send(&app, "POST", "/auth/login", None, Some(json!({"username": "alice", "password": "password123"}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, "POST", "/auth/login", None, Some(json!({"username": "alice", "password": "evenbetter456"}))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_incident_permissions_and_lifecycle() {
    let runtime = setup_runtime(MockTraffic::new()).await;
    let app = api::router(runtime.clone());

    let token = register(&app, "alice").await;

    let incident = json!({
        "title": "Crash on Uhuru Highway",
        "description": "Two vehicles blocking the left lane",
        "incident_type": "accident",
        "severity": "high",
        "location": "Uhuru Highway, Nairobi",
        "latitude": -1.2921,
        "longitude": 36.8219,
    });

    // A viewer cannot create incidents.
    let (status, body) = send(&app, "POST", "/api/incidents", Some(&token), Some(incident.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "You do not have permission to perform this action.");

    // An incident manager can.
    set_roles(&runtime, "alice", &["incident_manager"]).await;

    let (status, created) = send(&app, "POST", "/api/incidents", Some(&token), Some(incident)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "active");
    assert_eq!(created["reported_by"], "alice");

    let id = created["id"].as_str().unwrap().to_string();

    // Resolving stamps resolved_at and writes an audit entry.
    let (status, resolved) = send(&app, "POST", &format!("/api/incidents/{id}/resolve"), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resolved["status"], "resolved");
    assert!(!resolved["resolved_at"].is_null());

    let audit = runtime.db.list_audit_logs(Some("incident_resolve")).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].username.as_deref(), Some("alice"));

    // Statistics reflect the resolved incident.
    let (status, stats) = send(&app, "GET", "/api/incidents/statistics", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_incidents"], 1);
    assert_eq!(stats["resolved_incidents"], 1);
    assert_eq!(stats["incident_types"]["accident"], 1);

    // Active list is now empty.
    let (status, active) = send(&app, "GET", "/api/incidents/active", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(active.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_incident_comments() {
    let runtime = setup_runtime(MockTraffic::new()).await;
    let app = api::router(runtime.clone());

    let token = register(&app, "alice").await;
    set_roles(&runtime, "alice", &["incident_manager"]).await;

    let (_, created) = send(
        &app,
        "POST",
        "/api/incidents",
        Some(&token),
        Some(json!({
            "title": "Roadworks",
            "description": "",
            "incident_type": "construction",
            "location": "Thika Road",
            "latitude": -1.2,
            "longitude": 36.9,
        })),
    )
    .await;
    let incident_id = created["id"].as_str().unwrap().to_string();

    let (status, comment) = send(
        &app,
        "POST",
        "/api/comments",
        Some(&token),
        Some(json!({"incident_id": incident_id, "comment": "Cleared by 10am"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(comment["user"], "alice");

    // Comments against unknown incidents are rejected.
    let (status, _) = send(&app, "POST", "/api/comments", Some(&token), Some(json!({"incident_id": "missing", "comment": "hi"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, comments) = send(&app, "GET", &format!("/api/comments?incident_id={incident_id}"), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(comments.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_live_incidents_endpoint() {
    let mut traffic = MockTraffic::new();
    traffic.expect_incidents().returning(|_, _| Ok(sample_incidents()));

    let runtime = setup_runtime(traffic).await;
    let app = api::router(runtime);

    let token = register(&app, "alice").await;

    let (status, body) = send(&app, "GET", "/api/incidents/live?city=nairobi", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_count"], 2);
    assert_eq!(body["city"], "Nairobi");
    assert_eq!(body["incidents"][0]["id"], "tt-1");
    assert_eq!(body["incidents"][0]["source"], "tomtom");

    // Unknown cities fall back to Nairobi.
    let (status, body) = send(&app, "GET", "/api/incidents/live?city=gotham", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["city"], "Nairobi");
}

#[tokio::test]
async fn test_live_traffic_and_summary() {
    let mut traffic = MockTraffic::new();
    traffic.expect_flow_segment().returning(|_| Ok(sample_flow(30.0, 60.0)));
    traffic.expect_incidents().returning(|_, _| Ok(sample_incidents()));

    let runtime = setup_runtime(traffic).await;
    let app = api::router(runtime);

    let token = register(&app, "alice").await;

    let (status, body) = send(&app, "GET", "/api/traffic/live?city=mombasa", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["city"], "Mombasa");
    assert_eq!(body["traffic_flow"]["flowSegmentData"]["currentSpeed"], 30.0);
    assert_eq!(body["timestamp"], "2025-06-02T08:30:00Z");

    let (status, summary) = send(&app, "GET", "/api/traffic/summary?city=nairobi", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["congestionLevel"], 50);
    assert_eq!(summary["avgTravelTime"], 20);
    assert_eq!(summary["liveIncidents"], 2);

    // Unsupported cities get a 400 with the supported list.
    let (status, body) = send(&app, "GET", "/api/traffic/live?city=gotham", Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("nairobi"));
}

#[tokio::test]
async fn test_report_generation_survives_upstream_failure() {
    // Every upstream call fails; the report must still be generated from the
    // heuristic fallback path.
    let runtime = setup_runtime(get_unavailable_traffic()).await;
    let app = api::router(runtime.clone());

    let token = register(&app, "alice").await;
    set_roles(&runtime, "alice", &["traffic_analyst"]).await;

    let (status, report) = send(
        &app,
        "POST",
        "/api/traffic/reports/generate-report",
        Some(&token),
        Some(json!({"location": "Nairobi"})),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED, "report generation failed: {report}");
    assert_eq!(report["location"], "Nairobi");
    assert!(!report["ai_analysis"].as_str().unwrap().is_empty());
    assert!(!report["ai_recommendations"].as_str().unwrap().is_empty());
    assert_eq!(report["generated_by"], "alice");
}

#[tokio::test]
async fn test_detailed_report_includes_metrics() {
    let mut traffic = MockTraffic::new();
    traffic.expect_flow_segment().returning(|_| Ok(sample_flow(20.0, 80.0)));
    traffic.expect_incidents().returning(|_, _| Ok(sample_incidents()));
    traffic.expect_route_traffic().returning(|_, _| {
        Ok(json!({"routes": [{"summary": {"travelTimeInSeconds": 1800, "lengthInMeters": 15000, "trafficDelayInSeconds": 300}}]}))
    });

    let runtime = setup_runtime(traffic).await;
    let app = api::router(runtime.clone());

    let token = register(&app, "alice").await;
    set_roles(&runtime, "alice", &["traffic_analyst"]).await;

    let (status, report) = send(
        &app,
        "POST",
        "/api/traffic/reports/generate-detailed-report",
        Some(&token),
        Some(json!({"location": "Nairobi", "latitude": -1.2921, "longitude": 36.8219, "radius_km": 10})),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED, "detailed report failed: {report}");

    let metrics = &report["detailed_metrics"];
    assert_eq!(metrics["analysis_radius_km"], 10.0);
    assert_eq!(metrics["sampling_points"], 9);
    assert_eq!(metrics["report_type"], "detailed");
    assert!(metrics["congested_areas_count"].as_u64().unwrap() > 0);
    assert!(metrics["major_routes_analyzed"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_users_cannot_see_each_others_reports() {
    let runtime = setup_runtime(get_unavailable_traffic()).await;
    let app = api::router(runtime.clone());

    let alice = register(&app, "alice").await;
    let bob = register(&app, "bob").await;
    set_roles(&runtime, "alice", &["traffic_analyst"]).await;
    set_roles(&runtime, "bob", &["traffic_analyst"]).await;

    let (_, alice_report) = send(&app, "POST", "/api/traffic/reports/generate-report", Some(&alice), Some(json!({"location": "Nairobi"}))).await;
    send(&app, "POST", "/api/traffic/reports/generate-report", Some(&bob), Some(json!({"location": "Mombasa"}))).await;

    // Each analyst lists only their own reports.
    let (_, alice_list) = send(&app, "GET", "/api/traffic/reports", Some(&alice), None).await;
    assert_eq!(alice_list.as_array().unwrap().len(), 1);
    assert_eq!(alice_list[0]["generated_by"], "alice");

    // Bob cannot read Alice's report directly.
    let alice_report_id = alice_report["id"].as_str().unwrap();
    let (status, _) = send(&app, "GET", &format!("/api/traffic/reports/{alice_report_id}"), Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // An admin sees everything.
    let admin = register(&app, "root").await;
    set_roles(&runtime, "root", &["admin"]).await;

    let (_, admin_list) = send(&app, "GET", "/api/traffic/reports", Some(&admin), None).await;
    assert_eq!(admin_list.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_admin_role_assignment() {
    let runtime = setup_runtime(MockTraffic::new()).await;
    let app = api::router(runtime.clone());

    let alice = register(&app, "alice").await;
    let admin = register(&app, "root").await;
    set_roles(&runtime, "root", &["admin"]).await;

    // Non-admins cannot touch role administration.
    let (status, _) = send(&app, "GET", "/auth/admin/roles/list_roles", Some(&alice), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, "GET", "/auth/admin/roles/list_roles", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["roles"].as_array().unwrap().len(), 5);

    // Invalid roles are rejected.
    let (status, _) = send(
        &app,
        "POST",
        "/auth/admin/roles/assign",
        Some(&admin),
        Some(json!({"username": "alice", "roles": ["superhero"]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Unknown users 404.
    let (status, _) = send(
        &app,
        "POST",
        "/auth/admin/roles/assign",
        Some(&admin),
        Some(json!({"username": "nobody", "roles": ["viewer"]})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // A valid assignment takes effect and is audited.
    let (status, body) = send(
        &app,
        "POST",
        "/auth/admin/roles/assign",
        Some(&admin),
        Some(json!({"username": "alice", "roles": ["incident_manager"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let user = runtime.db.get_user("alice").await.unwrap().unwrap();
    assert_eq!(user.roles, vec!["incident_manager"]);

    let audit = runtime.db.list_audit_logs(Some("role_change")).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].details["to"], json!(["incident_manager"]));

    // Alice can now manage incidents.
    let (status, _) = send(
        &app,
        "POST",
        "/api/incidents",
        Some(&alice),
        Some(json!({
            "title": "New powers",
            "description": "",
            "incident_type": "other",
            "location": "Nairobi",
            "latitude": -1.29,
            "longitude": 36.82,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_collector_upserts_and_logs() {
    let mut traffic = MockTraffic::new();
    traffic.expect_incidents().returning(|_, _| Ok(sample_incidents()));
    traffic.expect_flow_segment().returning(|_| Ok(sample_flow(40.0, 60.0)));

    let runtime = setup_runtime(traffic).await;
    let nairobi = &CITIES[0];

    // First run creates both incidents.
    let stats = tasks::collect_incident_data(&runtime.db, &runtime.traffic, nairobi).await.unwrap();
    assert_eq!(stats.total_found, 2);
    assert_eq!(stats.new_records, 2);
    assert_eq!(stats.updated_records, 0);
    assert_eq!(stats.errors, 0);

    // Second run updates the same incidents instead of duplicating them.
    let stats = tasks::collect_incident_data(&runtime.db, &runtime.traffic, nairobi).await.unwrap();
    assert_eq!(stats.new_records, 0);
    assert_eq!(stats.updated_records, 2);

    // Flow collection samples the full grid (a 4x4 grid plus the center).
    let stats = tasks::collect_traffic_flow_data(&runtime.db, &runtime.traffic, nairobi).await.unwrap();
    assert_eq!(stats.total_found, 17);
    assert_eq!(stats.new_records, 17);

    // All three runs are logged and counted.
    let collection_stats = runtime.db.collection_statistics(chrono::Utc::now() - chrono::Duration::hours(1)).await.unwrap();
    assert_eq!(collection_stats.collection_runs, 3);
    assert_eq!(collection_stats.successful_runs, 3);
    assert_eq!(collection_stats.incidents_collected, 2);
    assert_eq!(collection_stats.traffic_flow_collected, 17);
}

#[tokio::test]
async fn test_collector_counts_invalid_incidents_as_errors() {
    let mut traffic = MockTraffic::new();
    traffic.expect_incidents().returning(|_, _| {
        Ok(json!({
            "incidents": [
                {"geometry": {"coordinates": [36.82, -1.29]}, "properties": {"id": "good-1"}},
                {"geometry": {"coordinates": []}, "properties": {"id": "bad-1"}},
                {"geometry": {"coordinates": [999.0, -1.29]}, "properties": {"id": "bad-2"}},
            ]
        }))
    });

    let runtime = setup_runtime(traffic).await;

    let stats = tasks::collect_incident_data(&runtime.db, &runtime.traffic, &CITIES[0]).await.unwrap();

    assert_eq!(stats.total_found, 3);
    assert_eq!(stats.new_records, 1);
    assert_eq!(stats.errors, 2);
}

#[tokio::test]
async fn test_collector_marks_run_failed_when_upstream_is_down() {
    let runtime = setup_runtime(get_unavailable_traffic()).await;

    let result = tasks::collect_incident_data(&runtime.db, &runtime.traffic, &CITIES[0]).await;
    assert!(result.is_err());

    let stats = runtime.db.collection_statistics(chrono::Utc::now() - chrono::Duration::hours(1)).await.unwrap();
    assert_eq!(stats.collection_runs, 1);
    assert_eq!(stats.failed_runs, 1);
}

#[tokio::test]
async fn test_seed_creates_demo_admin() {
    let runtime = setup_runtime(MockTraffic::new()).await;
    runtime.seed(true).await.unwrap();

    let app = api::router(runtime.clone());

    let (status, body) = send(&app, "POST", "/auth/login", None, Some(json!({"username": "admin", "password": "admin123"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["username"], "admin");

    // Seeding twice is a no-op.
    runtime.seed(true).await.unwrap();
}

#[tokio::test]
async fn test_routes_and_optimize() {
    let runtime = setup_runtime(MockTraffic::new()).await;
    let app = api::router(runtime.clone());

    let token = register(&app, "alice").await;
    set_roles(&runtime, "alice", &["traffic_controller"]).await;

    let (status, route) = send(
        &app,
        "POST",
        "/api/traffic/routes",
        Some(&token),
        Some(json!({
            "name": "CBD to Westlands",
            "start_location": "CBD",
            "end_location": "Westlands",
            "start_latitude": -1.2864,
            "start_longitude": 36.8172,
            "end_latitude": -1.2648,
            "end_longitude": 36.8028,
            "distance": 5.2,
            "estimated_time": 18,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let id = route["id"].as_str().unwrap();
    let (status, fetched) = send(&app, "GET", &format!("/api/traffic/routes/{id}"), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "CBD to Westlands");

    let (status, optimized) = send(
        &app,
        "POST",
        "/api/traffic/routes/optimize",
        Some(&token),
        Some(json!({"start_location": "CBD", "end_location": "Westlands"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(optimized["alternative_routes"].as_array().unwrap().len(), 2);

    // Missing fields are a 400.
    let (status, _) = send(&app, "POST", "/api/traffic/routes/optimize", Some(&token), Some(json!({"start_location": "CBD"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
