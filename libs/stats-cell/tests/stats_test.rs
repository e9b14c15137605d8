use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};
use stats_cell::router::stats_routes;

struct TestContext {
    mock_server: MockServer,
    app: Router,
    jwt_secret: String,
}

impl TestContext {
    async fn new() -> Self {
        let mock_server = MockServer::start().await;
        let test_config = TestConfig::with_supabase_url(&mock_server.uri());
        let app = stats_routes(Arc::new(test_config.to_app_config()));
        Self {
            mock_server,
            app,
            jwt_secret: test_config.jwt_secret,
        }
    }

    async fn get(self, user: &TestUser, uri: &str) -> (StatusCode, Value) {
        let token = JwtTestUtils::create_test_token(user, &self.jwt_secret, None);
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .header("Authorization", format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();

        let response = self.app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }
}

fn visit(id: i64, doctor_id: i64, at: &str, amount: Option<f64>, rating: Option<i32>) -> Value {
    json!({
        "appointment_id": id,
        "doctor_id": doctor_id,
        "appointment_time": at,
        "invoice": amount.map(|amount| json!({"amount": amount})),
        "review": rating.map(|rating| json!({"rating": rating})),
        "doctor": {
            "user": {"first_name": "Minh", "last_name": "Pham"},
            "specialty": {"name": "Dermatology"}
        }
    })
}

#[tokio::test]
async fn test_quarter_stats_query_completed_visits_in_range() {
    let ctx = TestContext::new().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.Completed"))
        .and(query_param("appointment_time", "gte.2025-10-01"))
        .and(query_param("appointment_time", "lt.2026-01-01"))
        .and(query_param("doctor_id", "eq.42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            visit(1, 42, "2025-10-03T09:00:00", Some(300000.0), Some(5)),
            visit(2, 42, "2025-11-03T09:00:00", Some(300000.0), Some(3)),
            visit(3, 42, "2025-12-03T09:00:00", None, None)
        ])))
        .expect(1)
        .mount(&ctx.mock_server)
        .await;

    let (status, body) = ctx
        .get(&TestUser::admin(1), "/appointments?year=2025&quarter=4&doctor_id=42")
        .await;

    assert_eq!(status, StatusCode::OK);
    let stats = body["stats"].as_array().unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0]["appointment_count"], 2);
    assert_eq!(stats[0]["total_revenue"], 600000.0);
    assert_eq!(stats[0]["average_rating"], 4.0);
    assert_eq!(stats[0]["specialty_name"], "Dermatology");
}

#[tokio::test]
async fn test_monthly_revenue_buckets() {
    let ctx = TestContext::new().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("appointment_time", "gte.2025-03-01"))
        .and(query_param("appointment_time", "lt.2025-04-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            visit(1, 42, "2025-03-03T09:00:00", Some(100.0), None),
            visit(2, 43, "2025-03-28T09:00:00", Some(50.0), None)
        ])))
        .mount(&ctx.mock_server)
        .await;

    let (status, body) = ctx.get(&TestUser::admin(1), "/revenue?year=2025&month=3").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revenue"], json!([
        {"year": 2025, "month": 3, "appointment_count": 2, "total_revenue": 150.0}
    ]));
}

#[tokio::test]
async fn test_month_outside_quarter_returns_nothing_without_querying() {
    let ctx = TestContext::new().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&ctx.mock_server)
        .await;

    let (status, body) = ctx.get(&TestUser::admin(1), "/revenue?year=2025&quarter=1&month=7").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revenue"], json!([]));
}

#[tokio::test]
async fn test_invalid_month_is_rejected() {
    let ctx = TestContext::new().await;
    let (status, body) = ctx.get(&TestUser::admin(1), "/revenue?year=2025&month=13").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Month must be between 1 and 12");
}

#[tokio::test]
async fn test_stats_are_admin_only() {
    let ctx = TestContext::new().await;
    let (status, _) = ctx.get(&TestUser::doctor(42), "/appointments").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
