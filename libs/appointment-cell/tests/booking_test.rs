use std::sync::Arc;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt;
use serde_json::{json, Value};
use wiremock::{MockServer, Mock, ResponseTemplate};
use wiremock::matchers::{body_partial_json, method, path, query_param};
use chrono::{Duration, NaiveDateTime, Utc};

use appointment_cell::router::appointment_routes;
use shared_utils::test_utils::{TestConfig, TestUser, JwtTestUtils, MockSupabaseResponses};

const PATIENT_ID: i64 = 7;
const DOCTOR_ID: i64 = 42;

struct TestContext {
    mock_server: MockServer,
    app: Router,
    jwt_secret: String,
}

impl TestContext {
    async fn new() -> Self {
        let mock_server = MockServer::start().await;
        let test_config = TestConfig::with_supabase_url(&mock_server.uri());
        let app = appointment_routes(Arc::new(test_config.to_app_config()));
        Self {
            mock_server,
            app,
            jwt_secret: test_config.jwt_secret,
        }
    }

    fn token_for(&self, user: &TestUser) -> String {
        JwtTestUtils::create_test_token(user, &self.jwt_secret, None)
    }

    async fn send(self, user: &TestUser, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("Authorization", format!("Bearer {}", self.token_for(user)))
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = self.app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }
}

fn future_time(days: i64) -> NaiveDateTime {
    (Utc::now().naive_utc() + Duration::days(days))
        .date()
        .and_hms_opt(9, 0, 0)
        .unwrap()
}

fn slot_json(slot_id: i64, starts_at: NaiveDateTime, is_booked: bool) -> Value {
    MockSupabaseResponses::slot_response(
        slot_id,
        DOCTOR_ID,
        starts_at.date(),
        starts_at.time(),
        starts_at.time() + Duration::minutes(30),
        is_booked,
    )
}

fn appointment_json(appointment_id: i64, slot_id: Option<i64>, at: NaiveDateTime, status: &str) -> Value {
    MockSupabaseResponses::appointment_response(appointment_id, PATIENT_ID, DOCTOR_ID, slot_id, at, status)
}

async fn mount_appointment(server: &MockServer, appointment: Value) {
    let id = appointment["appointment_id"].as_i64().unwrap();
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("appointment_id", format!("eq.{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([appointment])))
        .mount(server)
        .await;
}

async fn mount_slot(server: &MockServer, slot: Value) {
    let id = slot["slot_id"].as_i64().unwrap();
    Mock::given(method("GET"))
        .and(path("/rest/v1/available_slots"))
        .and(query_param("slot_id", format!("eq.{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([slot])))
        .mount(server)
        .await;
}

async fn expect_claim(server: &MockServer, slot_id: i64, result: Value, times: u64) {
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/available_slots"))
        .and(query_param("slot_id", format!("eq.{}", slot_id)))
        .and(query_param("is_booked", "eq.false"))
        .and(body_partial_json(json!({"is_booked": true})))
        .respond_with(ResponseTemplate::new(200).set_body_json(result))
        .expect(times)
        .mount(server)
        .await;
}

async fn expect_release(server: &MockServer, slot_id: i64, result: Value, times: u64) {
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/available_slots"))
        .and(query_param("slot_id", format!("eq.{}", slot_id)))
        .and(body_partial_json(json!({"is_booked": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(result))
        .expect(times)
        .mount(server)
        .await;
}

// ==============================================================================
// BOOKING
// ==============================================================================

#[tokio::test]
async fn test_book_appointment_creates_appointment_and_invoice() {
    let ctx = TestContext::new().await;
    let starts_at = future_time(3);
    let slot = slot_json(8, starts_at, false);

    mount_slot(&ctx.mock_server, slot.clone()).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .and(query_param("doctor_id", format!("eq.{}", DOCTOR_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::doctor_response(DOCTOR_ID, 250000.0)
        ])))
        .mount(&ctx.mock_server)
        .await;

    let mut claimed = slot.clone();
    claimed["is_booked"] = json!(true);
    expect_claim(&ctx.mock_server, 8, json!([claimed]), 1).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({
            "patient_id": PATIENT_ID,
            "doctor_id": DOCTOR_ID,
            "slot_id": 8,
            "duration_minutes": 30,
            "status": "Scheduled"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            appointment_json(100, Some(8), starts_at, "Scheduled")
        ])))
        .expect(1)
        .mount(&ctx.mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/invoices"))
        .and(body_partial_json(json!({"appointment_id": 100, "amount": 250000.0, "status": "Pending"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::invoice_response(500, 100, 250000.0, "Pending")
        ])))
        .expect(1)
        .mount(&ctx.mock_server)
        .await;

    let (status, body) = ctx
        .send(&TestUser::patient(PATIENT_ID), "POST", "/", json!({"slot_id": 8, "reason": "Headache"}))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["appointment"]["appointment_id"], 100);
    assert_eq!(body["invoice"]["status"], "Pending");
}

#[tokio::test]
async fn test_booking_a_booked_slot_fails() {
    let ctx = TestContext::new().await;
    mount_slot(&ctx.mock_server, slot_json(8, future_time(3), true)).await;

    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&ctx.mock_server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&ctx.mock_server)
        .await;

    let (status, body) = ctx
        .send(&TestUser::patient(PATIENT_ID), "POST", "/", json!({"slot_id": 8}))
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Slot already booked");
}

#[tokio::test]
async fn test_booking_missing_slot_fails() {
    let ctx = TestContext::new().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/available_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&ctx.mock_server)
        .await;

    let (status, body) = ctx
        .send(&TestUser::patient(PATIENT_ID), "POST", "/", json!({"slot_id": 99}))
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Slot not found");
}

#[tokio::test]
async fn test_booking_loses_race_on_conditional_claim() {
    let ctx = TestContext::new().await;
    mount_slot(&ctx.mock_server, slot_json(8, future_time(3), false)).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::doctor_response(DOCTOR_ID, 250000.0)
        ])))
        .mount(&ctx.mock_server)
        .await;

    // Another request flipped the flag between our read and our claim
    expect_claim(&ctx.mock_server, 8, json!([]), 1).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&ctx.mock_server)
        .await;

    let (status, body) = ctx
        .send(&TestUser::patient(PATIENT_ID), "POST", "/", json!({"slot_id": 8}))
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Slot already booked");
}

#[tokio::test]
async fn test_failed_invoice_rolls_back_booking() {
    let ctx = TestContext::new().await;
    let starts_at = future_time(3);
    let slot = slot_json(8, starts_at, false);
    mount_slot(&ctx.mock_server, slot.clone()).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::doctor_response(DOCTOR_ID, 250000.0)
        ])))
        .mount(&ctx.mock_server)
        .await;

    expect_claim(&ctx.mock_server, 8, json!([slot.clone()]), 1).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            appointment_json(100, Some(8), starts_at, "Scheduled")
        ])))
        .mount(&ctx.mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/invoices"))
        .respond_with(ResponseTemplate::new(500).set_body_json(
            MockSupabaseResponses::error_response("duplicate key", "23505")
        ))
        .mount(&ctx.mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("appointment_id", "eq.100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&ctx.mock_server)
        .await;

    expect_release(&ctx.mock_server, 8, json!([slot]), 1).await;

    let (status, body) = ctx
        .send(&TestUser::patient(PATIENT_ID), "POST", "/", json!({"slot_id": 8}))
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "System error while booking appointment");
}

#[tokio::test]
async fn test_doctors_cannot_book() {
    let ctx = TestContext::new().await;
    let (status, _) = ctx
        .send(&TestUser::doctor(DOCTOR_ID), "POST", "/", json!({"slot_id": 8}))
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

// ==============================================================================
// CANCELLATION
// ==============================================================================

#[tokio::test]
async fn test_cancel_inside_notice_window_changes_nothing() {
    let ctx = TestContext::new().await;
    let starts_at = Utc::now().naive_utc() + Duration::hours(5);
    mount_appointment(&ctx.mock_server, appointment_json(100, Some(8), starts_at, "Scheduled")).await;

    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&ctx.mock_server)
        .await;

    let (status, body) = ctx
        .send(&TestUser::patient(PATIENT_ID), "POST", "/100/cancel", json!({"reason": "Busy"}))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Appointments can only be cancelled at least 24 hours in advance");
}

#[tokio::test]
async fn test_cancel_with_notice_cancels_invoice_and_frees_slot() {
    let ctx = TestContext::new().await;
    let starts_at = future_time(3);
    mount_appointment(&ctx.mock_server, appointment_json(100, Some(8), starts_at, "Scheduled")).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.Scheduled"))
        .and(body_partial_json(json!({"status": "CancelledByPatient", "cancellation_reason": "Busy"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            appointment_json(100, Some(8), starts_at, "CancelledByPatient")
        ])))
        .expect(1)
        .mount(&ctx.mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/invoices"))
        .and(query_param("appointment_id", "eq.100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::invoice_response(500, 100, 250000.0, "Pending")
        ])))
        .mount(&ctx.mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/invoices"))
        .and(query_param("invoice_id", "eq.500"))
        .and(query_param("status", "eq.Pending"))
        .and(body_partial_json(json!({"status": "Cancelled"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::invoice_response(500, 100, 250000.0, "Cancelled")
        ])))
        .expect(1)
        .mount(&ctx.mock_server)
        .await;

    // An unpaid checkout must not be completable after cancellation
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/payments"))
        .and(query_param("invoice_id", "eq.500"))
        .and(query_param("status", "eq.Pending"))
        .and(body_partial_json(json!({"status": "Failed"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::payment_response(900, 500, 250000.0, "Failed")
        ])))
        .expect(1)
        .mount(&ctx.mock_server)
        .await;

    expect_release(&ctx.mock_server, 8, json!([slot_json(8, starts_at, false)]), 1).await;

    let (status, body) = ctx
        .send(&TestUser::patient(PATIENT_ID), "POST", "/100/cancel", json!({"reason": "Busy"}))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["appointment"]["status"], "CancelledByPatient");
    assert_eq!(body["slot_released"], true);
    assert_eq!(body["payment_refunded"], false);
}

#[tokio::test]
async fn test_doctor_cancel_of_paid_appointment_refunds_payment() {
    let ctx = TestContext::new().await;
    let starts_at = future_time(2);
    mount_appointment(&ctx.mock_server, appointment_json(100, Some(8), starts_at, "Scheduled")).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({"status": "CancelledByDoctor"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            appointment_json(100, Some(8), starts_at, "CancelledByDoctor")
        ])))
        .expect(1)
        .mount(&ctx.mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/invoices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::invoice_response(500, 100, 250000.0, "Paid")
        ])))
        .mount(&ctx.mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/payments"))
        .and(query_param("invoice_id", "eq.500"))
        .and(query_param("status", "eq.Completed"))
        .and(body_partial_json(json!({"status": "Refunded"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::payment_response(900, 500, 250000.0, "Refunded")
        ])))
        .expect(1)
        .mount(&ctx.mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/invoices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::invoice_response(500, 100, 250000.0, "Cancelled")
        ])))
        .expect(1)
        .mount(&ctx.mock_server)
        .await;

    expect_release(&ctx.mock_server, 8, json!([slot_json(8, starts_at, false)]), 1).await;

    let (status, body) = ctx
        .send(&TestUser::doctor(DOCTOR_ID), "POST", "/100/cancel", json!({"reason": "Conference"}))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["appointment"]["status"], "CancelledByDoctor");
    assert_eq!(body["payment_refunded"], true);
}

#[tokio::test]
async fn test_cancel_legacy_appointment_finds_slot_by_time() {
    let ctx = TestContext::new().await;
    let starts_at = future_time(4);
    mount_appointment(&ctx.mock_server, appointment_json(100, None, starts_at, "Scheduled")).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            appointment_json(100, None, starts_at, "CancelledByPatient")
        ])))
        .mount(&ctx.mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/invoices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&ctx.mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/available_slots"))
        .and(query_param("doctor_id", format!("eq.{}", DOCTOR_ID)))
        .and(query_param("slot_date", format!("eq.{}", starts_at.date().format("%Y-%m-%d"))))
        .and(query_param("start_time", "eq.09:00:00"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([slot_json(15, starts_at, true)])))
        .expect(1)
        .mount(&ctx.mock_server)
        .await;

    expect_release(&ctx.mock_server, 15, json!([slot_json(15, starts_at, false)]), 1).await;

    let (status, body) = ctx
        .send(&TestUser::patient(PATIENT_ID), "POST", "/100/cancel", json!({}))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["slot_released"], true);
}

#[tokio::test]
async fn test_cancel_succeeds_when_slot_is_gone() {
    let ctx = TestContext::new().await;
    let starts_at = future_time(4);
    mount_appointment(&ctx.mock_server, appointment_json(100, Some(8), starts_at, "Scheduled")).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            appointment_json(100, Some(8), starts_at, "CancelledByPatient")
        ])))
        .mount(&ctx.mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/invoices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&ctx.mock_server)
        .await;

    expect_release(&ctx.mock_server, 8, json!([]), 1).await;

    let (status, body) = ctx
        .send(&TestUser::patient(PATIENT_ID), "POST", "/100/cancel", json!({}))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["slot_released"], false);
}

#[tokio::test]
async fn test_cancel_restores_appointment_when_invoice_lookup_fails() {
    let ctx = TestContext::new().await;
    let starts_at = future_time(3);
    mount_appointment(&ctx.mock_server, appointment_json(100, Some(8), starts_at, "Scheduled")).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.Scheduled"))
        .and(body_partial_json(json!({"status": "CancelledByPatient"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            appointment_json(100, Some(8), starts_at, "CancelledByPatient")
        ])))
        .expect(1)
        .mount(&ctx.mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/invoices"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({"message": "unavailable"})))
        .mount(&ctx.mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("appointment_id", "eq.100"))
        .and(query_param("status", "eq.CancelledByPatient"))
        .and(body_partial_json(json!({"status": "Scheduled"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            appointment_json(100, Some(8), starts_at, "Scheduled")
        ])))
        .expect(1)
        .mount(&ctx.mock_server)
        .await;

    expect_release(&ctx.mock_server, 8, json!([]), 0).await;

    let (status, _) = ctx
        .send(&TestUser::patient(PATIENT_ID), "POST", "/100/cancel", json!({"reason": "Busy"}))
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_cancel_restores_invoice_and_appointment_when_payment_update_fails() {
    let ctx = TestContext::new().await;
    let starts_at = future_time(3);
    mount_appointment(&ctx.mock_server, appointment_json(100, Some(8), starts_at, "Scheduled")).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.Scheduled"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            appointment_json(100, Some(8), starts_at, "CancelledByPatient")
        ])))
        .expect(1)
        .mount(&ctx.mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/invoices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::invoice_response(500, 100, 250000.0, "Pending")
        ])))
        .mount(&ctx.mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/invoices"))
        .and(query_param("status", "eq.Pending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::invoice_response(500, 100, 250000.0, "Cancelled")
        ])))
        .expect(1)
        .mount(&ctx.mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/payments"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({"message": "unavailable"})))
        .mount(&ctx.mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/invoices"))
        .and(query_param("status", "eq.Cancelled"))
        .and(body_partial_json(json!({"status": "Pending"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::invoice_response(500, 100, 250000.0, "Pending")
        ])))
        .expect(1)
        .mount(&ctx.mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.CancelledByPatient"))
        .and(body_partial_json(json!({"status": "Scheduled"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            appointment_json(100, Some(8), starts_at, "Scheduled")
        ])))
        .expect(1)
        .mount(&ctx.mock_server)
        .await;

    expect_release(&ctx.mock_server, 8, json!([]), 0).await;

    let (status, _) = ctx
        .send(&TestUser::patient(PATIENT_ID), "POST", "/100/cancel", json!({}))
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_other_patients_cannot_cancel() {
    let ctx = TestContext::new().await;
    mount_appointment(&ctx.mock_server, appointment_json(100, Some(8), future_time(3), "Scheduled")).await;

    let (status, _) = ctx
        .send(&TestUser::patient(PATIENT_ID + 1), "POST", "/100/cancel", json!({}))
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_cancel_completed_appointment_is_rejected() {
    let ctx = TestContext::new().await;
    mount_appointment(&ctx.mock_server, appointment_json(100, Some(8), future_time(3), "Completed")).await;

    let (status, body) = ctx
        .send(&TestUser::patient(PATIENT_ID), "POST", "/100/cancel", json!({}))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Appointment cannot be modified in current status: Completed");
}

// ==============================================================================
// RESCHEDULE
// ==============================================================================

#[tokio::test]
async fn test_reschedule_to_booked_slot_leaves_state_untouched() {
    let ctx = TestContext::new().await;
    let starts_at = future_time(3);
    mount_appointment(&ctx.mock_server, appointment_json(100, Some(8), starts_at, "Scheduled")).await;
    mount_slot(&ctx.mock_server, slot_json(9, future_time(5), true)).await;

    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&ctx.mock_server)
        .await;

    let (status, body) = ctx
        .send(&TestUser::patient(PATIENT_ID), "PATCH", "/100/reschedule", json!({"new_slot_id": 9}))
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "New slot already booked");
}

#[tokio::test]
async fn test_reschedule_moves_appointment_and_swaps_slots() {
    let ctx = TestContext::new().await;
    let old_time = future_time(3);
    let new_time = future_time(6);
    mount_appointment(&ctx.mock_server, appointment_json(100, Some(8), old_time, "Scheduled")).await;
    mount_slot(&ctx.mock_server, slot_json(9, new_time, false)).await;

    expect_claim(&ctx.mock_server, 9, json!([slot_json(9, new_time, true)]), 1).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.Scheduled"))
        .and(body_partial_json(json!({"slot_id": 9, "doctor_id": DOCTOR_ID, "reason": "Later please"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            appointment_json(100, Some(9), new_time, "Scheduled")
        ])))
        .expect(1)
        .mount(&ctx.mock_server)
        .await;

    expect_release(&ctx.mock_server, 8, json!([slot_json(8, old_time, false)]), 1).await;
    expect_release(&ctx.mock_server, 9, json!([]), 0).await;

    // The invoice keeps the fee agreed at booking.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/invoices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&ctx.mock_server)
        .await;

    let (status, body) = ctx
        .send(
            &TestUser::patient(PATIENT_ID),
            "PATCH",
            "/100/reschedule",
            json!({"new_slot_id": 9, "reason": "Later please"}),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["appointment"]["slot_id"], 9);
}

#[tokio::test]
async fn test_reschedule_is_undone_when_old_slot_cannot_be_released() {
    let ctx = TestContext::new().await;
    let old_time = future_time(3);
    let new_time = future_time(6);
    mount_appointment(&ctx.mock_server, appointment_json(100, Some(8), old_time, "Scheduled")).await;
    mount_slot(&ctx.mock_server, slot_json(9, new_time, false)).await;

    expect_claim(&ctx.mock_server, 9, json!([slot_json(9, new_time, true)]), 1).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({"slot_id": 9})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            appointment_json(100, Some(9), new_time, "Scheduled")
        ])))
        .expect(1)
        .mount(&ctx.mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/available_slots"))
        .and(query_param("slot_id", "eq.8"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({"message": "unavailable"})))
        .expect(1)
        .mount(&ctx.mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("slot_id", "eq.9"))
        .and(query_param("status", "eq.Scheduled"))
        .and(body_partial_json(json!({"slot_id": 8, "doctor_id": DOCTOR_ID})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            appointment_json(100, Some(8), old_time, "Scheduled")
        ])))
        .expect(1)
        .mount(&ctx.mock_server)
        .await;

    expect_release(&ctx.mock_server, 9, json!([slot_json(9, new_time, false)]), 1).await;

    let (status, _) = ctx
        .send(&TestUser::patient(PATIENT_ID), "PATCH", "/100/reschedule", json!({"new_slot_id": 9}))
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_reschedule_inside_notice_window_is_rejected() {
    let ctx = TestContext::new().await;
    let starts_at = Utc::now().naive_utc() + Duration::hours(2);
    mount_appointment(&ctx.mock_server, appointment_json(100, Some(8), starts_at, "Scheduled")).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/available_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&ctx.mock_server)
        .await;

    let (status, _) = ctx
        .send(&TestUser::patient(PATIENT_ID), "PATCH", "/100/reschedule", json!({"new_slot_id": 9}))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ==============================================================================
// COMPLETION / NO-SHOW
// ==============================================================================

#[tokio::test]
async fn test_doctor_completes_future_appointment() {
    let ctx = TestContext::new().await;
    let starts_at = future_time(3);
    mount_appointment(&ctx.mock_server, appointment_json(100, Some(8), starts_at, "Scheduled")).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({"status": "Completed"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            appointment_json(100, Some(8), starts_at, "Completed")
        ])))
        .expect(1)
        .mount(&ctx.mock_server)
        .await;

    let (status, body) = ctx
        .send(&TestUser::doctor(DOCTOR_ID), "POST", "/100/complete", json!({}))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["appointment"]["status"], "Completed");
}

#[tokio::test]
async fn test_only_treating_doctor_completes() {
    let ctx = TestContext::new().await;
    mount_appointment(&ctx.mock_server, appointment_json(100, Some(8), future_time(1), "Scheduled")).await;

    let (status, _) = ctx
        .send(&TestUser::doctor(DOCTOR_ID + 1), "POST", "/100/complete", json!({}))
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_no_show_before_start_is_rejected() {
    let ctx = TestContext::new().await;
    mount_appointment(&ctx.mock_server, appointment_json(100, Some(8), future_time(1), "Scheduled")).await;

    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&ctx.mock_server)
        .await;

    let (status, _) = ctx
        .send(&TestUser::doctor(DOCTOR_ID), "POST", "/100/no-show", json!({}))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_no_show_after_start_is_recorded() {
    let ctx = TestContext::new().await;
    let started = Utc::now().naive_utc() - Duration::hours(1);
    mount_appointment(&ctx.mock_server, appointment_json(100, Some(8), started, "Scheduled")).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({"status": "NoShow"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            appointment_json(100, Some(8), started, "NoShow")
        ])))
        .expect(1)
        .mount(&ctx.mock_server)
        .await;

    let (status, body) = ctx
        .send(&TestUser::doctor(DOCTOR_ID), "POST", "/100/no-show", json!({}))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["appointment"]["status"], "NoShow");
}

// ==============================================================================
// QUERIES
// ==============================================================================

#[tokio::test]
async fn test_my_appointments_are_paginated_newest_first() {
    let ctx = TestContext::new().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("patient_id", format!("eq.{}", PATIENT_ID)))
        .and(query_param("order", "appointment_time.desc"))
        .and(query_param("limit", "6"))
        .and(query_param("offset", "6"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            appointment_json(100, Some(8), future_time(3), "Scheduled")
        ])))
        .expect(1)
        .mount(&ctx.mock_server)
        .await;

    let (status, body) = ctx
        .send(&TestUser::patient(PATIENT_ID), "GET", "/mine?page=2", json!({}))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["page"], 2);
    assert_eq!(body["data"]["appointments"][0]["appointment_id"], 100);
}
