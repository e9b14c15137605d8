use std::sync::Arc;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::json;

use shared_config::AppConfig;
use shared_models::auth::User;

use crate::jwt::{issue_token, TokenSubject};

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_service_key: String,
    pub vnpay_hash_secret: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_service_key: "test-service-key".to_string(),
            vnpay_hash_secret: "TESTVNPAYHASHSECRET".to_string(),
        }
    }
}

impl TestConfig {
    pub fn with_supabase_url(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_service_key: self.supabase_service_key.clone(),
            jwt_secret: self.jwt_secret.clone(),
            jwt_ttl_hours: 24,
            vnpay_tmn_code: "TESTTMN1".to_string(),
            vnpay_hash_secret: self.vnpay_hash_secret.clone(),
            vnpay_url: "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".to_string(),
            vnpay_return_url: "http://localhost:3000/payments/vnpay/return".to_string(),
            slot_duration_minutes: 30,
            cancellation_notice_hours: 24,
            server_port: 3000,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: i64,
    pub email: String,
    pub role: String,
}

impl TestUser {
    pub fn new(id: i64, email: &str, role: &str) -> Self {
        Self {
            id,
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn doctor(id: i64) -> Self {
        Self::new(id, &format!("doctor{}@example.com", id), "doctor")
    }

    pub fn patient(id: i64) -> Self {
        Self::new(id, &format!("patient{}@example.com", id), "patient")
    }

    pub fn admin(id: i64) -> Self {
        Self::new(id, &format!("admin{}@example.com", id), "admin")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.to_string(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            username: None,
            created_at: None,
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let subject = TokenSubject {
            user_id: user.id,
            email: Some(&user.email),
            username: None,
            role: &user.role,
        };
        issue_token(&subject, secret, exp_hours.unwrap_or(24))
            .expect("test secret is never empty")
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

/// Row fixtures shaped like the PostgREST tables.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn slot_response(slot_id: i64, doctor_id: i64, date: NaiveDate, start: NaiveTime, end: NaiveTime, is_booked: bool) -> serde_json::Value {
        json!({
            "slot_id": slot_id,
            "doctor_id": doctor_id,
            "slot_date": date.format("%Y-%m-%d").to_string(),
            "start_time": start.format("%H:%M:%S").to_string(),
            "end_time": end.format("%H:%M:%S").to_string(),
            "is_booked": is_booked
        })
    }

    pub fn doctor_response(doctor_id: i64, consultation_fee: f64) -> serde_json::Value {
        json!({
            "doctor_id": doctor_id,
            "hospital_id": 1,
            "specialty_id": 1,
            "years_experience": 10,
            "educational_level": "MD",
            "bio": "Experienced general practitioner",
            "consultation_fee": consultation_fee,
            "average_rating": 4.5
        })
    }

    pub fn appointment_response(
        appointment_id: i64,
        patient_id: i64,
        doctor_id: i64,
        slot_id: Option<i64>,
        appointment_time: NaiveDateTime,
        status: &str,
    ) -> serde_json::Value {
        json!({
            "appointment_id": appointment_id,
            "patient_id": patient_id,
            "doctor_id": doctor_id,
            "slot_id": slot_id,
            "appointment_time": appointment_time.format("%Y-%m-%dT%H:%M:%S").to_string(),
            "duration_minutes": 30,
            "reason": "General check-up",
            "status": status,
            "consultation_type": "Offline",
            "cancellation_reason": null
        })
    }

    pub fn invoice_response(invoice_id: i64, appointment_id: i64, amount: f64, status: &str) -> serde_json::Value {
        json!({
            "invoice_id": invoice_id,
            "appointment_id": appointment_id,
            "amount": amount,
            "issue_date": "2026-01-01T08:00:00",
            "due_date": null,
            "status": status
        })
    }

    pub fn payment_response(payment_id: i64, invoice_id: i64, amount: f64, status: &str) -> serde_json::Value {
        json!({
            "payment_id": payment_id,
            "invoice_id": invoice_id,
            "amount_paid": amount,
            "payment_method": "VNPay",
            "transaction_id": null,
            "status": status,
            "payment_date": "2026-01-01T08:00:00",
            "notes": null
        })
    }

    pub fn user_response(user_id: i64, username: &str, role: &str, is_active: bool) -> serde_json::Value {
        json!({
            "user_id": user_id,
            "email": format!("{}@example.com", username),
            "username": username,
            "first_name": "Test",
            "last_name": "User",
            "phone_number": format!("090000{:04}", user_id),
            "address": "1 Clinic Street",
            "date_of_birth": "1990-05-01",
            "gender": "OTHER",
            "role": role,
            "avatar": null,
            "is_active": is_active,
            "created_at": "2026-01-01T08:00:00",
            "updated_at": "2026-01-01T08:00:00"
        })
    }

    pub fn error_response(message: &str, code: &str) -> serde_json::Value {
        json!({
            "message": message,
            "code": code
        })
    }
}
