use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};

use appointment_cell::{AppointmentBookingService, AppointmentError};
use shared_config::AppConfig;
use shared_models::auth::{User, ROLE_ADMIN};
use shared_models::error::AppError;

use crate::models::PaymentError;
use crate::services::{InvoiceService, PaymentService};

const DEFAULT_CLIENT_IP: &str = "127.0.0.1";

fn map_payment_error(e: PaymentError) -> AppError {
    match e {
        PaymentError::AppointmentNotFound | PaymentError::PaymentNotFound => {
            AppError::NotFound(e.to_string())
        }
        PaymentError::InvoiceNotPayable => AppError::Conflict(e.to_string()),
        PaymentError::AppointmentNotPayable
        | PaymentError::InvalidSignature
        | PaymentError::AmountMismatch
        | PaymentError::Declined(_) => AppError::BadRequest(e.to_string()),
        PaymentError::GatewayNotConfigured | PaymentError::Gateway(_) => {
            AppError::ExternalService(e.to_string())
        }
        PaymentError::DatabaseError(msg) => AppError::Database(msg),
    }
}

/// First hop of `X-Forwarded-For`, or loopback when absent.
fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .unwrap_or(DEFAULT_CLIENT_IP)
        .to_string()
}

#[axum::debug_handler]
pub async fn create_vnpay_payment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<i64>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let appointment = AppointmentBookingService::new(&state)
        .get_appointment(appointment_id)
        .await
        .map_err(|e| match e {
            AppointmentError::NotFound => map_payment_error(PaymentError::AppointmentNotFound),
            other => AppError::Database(other.to_string()),
        })?;

    let is_owner = user.is_patient() && user.is_user(appointment.patient_id);
    if !is_owner && !user.is_admin() {
        return Err(AppError::Forbidden("Not authorized to pay for this appointment".to_string()));
    }

    let checkout = PaymentService::new(&state)
        .create_vnpay_payment(appointment_id, &client_ip(&headers))
        .await
        .map_err(map_payment_error)?;

    Ok(Json(json!({
        "success": true,
        "payment": checkout.payment,
        "payment_url": checkout.payment_url,
        "message": "Redirect to the payment gateway to complete payment"
    })))
}

/// Browser return from VNPay. Signature checked before anything is written.
#[axum::debug_handler]
pub async fn vnpay_return(
    State(state): State<Arc<AppConfig>>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Result<Json<Value>, AppError> {
    let outcome = PaymentService::new(&state)
        .process_callback(&params)
        .await
        .map_err(map_payment_error)?;

    let message = if outcome.already_processed {
        "Payment was already processed"
    } else {
        "Payment completed successfully"
    };

    Ok(Json(json!({
        "success": true,
        "payment_id": outcome.payment_id,
        "invoice_id": outcome.invoice_id,
        "status": outcome.status,
        "message": message
    })))
}

#[axum::debug_handler]
pub async fn mark_overdue_invoices(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    user.require_role(ROLE_ADMIN)?;

    let invoices = InvoiceService::new(&state)
        .mark_overdue_invoices(Utc::now().date_naive())
        .await
        .map_err(map_payment_error)?;

    Ok(Json(json!({
        "success": true,
        "invoices": invoices,
        "message": format!("{} invoices marked overdue", invoices.len())
    })))
}
