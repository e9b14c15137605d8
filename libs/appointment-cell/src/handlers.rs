use std::sync::Arc;

use axum::{
    extract::{Path, Query, State, Extension},
    Json,
};
use serde_json::{json, Value};

use shared_config::AppConfig;
use shared_models::auth::{User, ROLE_PATIENT};
use shared_models::error::AppError;

use crate::models::{
    Appointment, AppointmentError, AppointmentListQuery, BookAppointmentRequest,
    CancelAppointmentRequest, CancelledBy, RescheduleAppointmentRequest,
};
use crate::services::booking::AppointmentBookingService;

fn map_appointment_error(e: AppointmentError) -> AppError {
    match e {
        AppointmentError::NotFound
        | AppointmentError::SlotNotFound
        | AppointmentError::NewSlotNotFound
        | AppointmentError::DoctorNotFound
        | AppointmentError::InvoiceNotFound => AppError::NotFound(e.to_string()),
        AppointmentError::SlotAlreadyBooked
        | AppointmentError::NewSlotAlreadyBooked
        | AppointmentError::ConcurrentModification => AppError::Conflict(e.to_string()),
        AppointmentError::CancellationWindowClosed(_)
        | AppointmentError::RescheduleWindowClosed(_)
        | AppointmentError::InvalidStatusTransition(_)
        | AppointmentError::InvalidTime(_) => AppError::BadRequest(e.to_string()),
        AppointmentError::Unauthorized => AppError::Forbidden(e.to_string()),
        AppointmentError::ValidationError(msg) => AppError::ValidationError(msg),
        AppointmentError::BookingFailed => AppError::Internal(e.to_string()),
        AppointmentError::DatabaseError(msg) => AppError::Database(msg),
    }
}

fn is_participant(user: &User, appointment: &Appointment) -> bool {
    (user.is_patient() && user.is_user(appointment.patient_id))
        || (user.is_doctor() && user.is_user(appointment.doctor_id))
}

fn ensure_can_view(user: &User, appointment: &Appointment) -> Result<(), AppError> {
    if user.is_admin() || is_participant(user, appointment) {
        Ok(())
    } else {
        Err(AppError::Forbidden("Not authorized to view this appointment".to_string()))
    }
}

fn ensure_treating_doctor(user: &User, appointment: &Appointment) -> Result<(), AppError> {
    if user.is_doctor() && user.is_user(appointment.doctor_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden("Only the treating doctor can update this appointment".to_string()))
    }
}

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    user.require_role(ROLE_PATIENT)?;
    let patient_id = user.user_id()?;

    let booking_service = AppointmentBookingService::new(&state);
    let outcome = booking_service.book_appointment(patient_id, request).await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": outcome.appointment,
        "invoice": outcome.invoice,
        "message": "Appointment booked successfully"
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<i64>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let booking_service = AppointmentBookingService::new(&state);
    let appointment = booking_service.get_appointment(appointment_id).await
        .map_err(map_appointment_error)?;

    ensure_can_view(&user, &appointment)?;

    Ok(Json(json!({ "success": true, "appointment": appointment })))
}

#[axum::debug_handler]
pub async fn get_appointment_invoice(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<i64>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let booking_service = AppointmentBookingService::new(&state);
    let appointment = booking_service.get_appointment(appointment_id).await
        .map_err(map_appointment_error)?;
    ensure_can_view(&user, &appointment)?;

    let invoice = booking_service.get_invoice_for_appointment(appointment_id).await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({ "success": true, "invoice": invoice })))
}

/// Appointments of the calling patient or doctor, newest first.
#[axum::debug_handler]
pub async fn get_my_appointments(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
    Query(query): Query<AppointmentListQuery>,
) -> Result<Json<Value>, AppError> {
    let user_id = user.user_id()?;
    let booking_service = AppointmentBookingService::new(&state);

    let page = if user.is_patient() {
        booking_service.get_patient_appointments(user_id, &query).await
    } else if user.is_doctor() {
        booking_service.get_doctor_appointments(user_id, &query).await
    } else {
        return Err(AppError::Forbidden("Only patients and doctors have appointments".to_string()));
    }
    .map_err(map_appointment_error)?;

    Ok(Json(json!({ "success": true, "data": page })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<i64>,
    Extension(user): Extension<User>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let booking_service = AppointmentBookingService::new(&state);
    let appointment = booking_service.get_appointment(appointment_id).await
        .map_err(map_appointment_error)?;

    let cancelled_by = if user.is_admin() {
        request.cancelled_by.unwrap_or(CancelledBy::Doctor)
    } else if user.is_patient() && user.is_user(appointment.patient_id) {
        CancelledBy::Patient
    } else if user.is_doctor() && user.is_user(appointment.doctor_id) {
        CancelledBy::Doctor
    } else {
        return Err(AppError::Forbidden("Not authorized to cancel this appointment".to_string()));
    };

    let outcome = booking_service
        .cancel_appointment(appointment_id, request.reason, cancelled_by)
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": outcome.appointment,
        "slot_released": outcome.slot_released,
        "payment_refunded": outcome.payment_refunded,
        "message": "Appointment cancelled successfully"
    })))
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<i64>,
    Extension(user): Extension<User>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let booking_service = AppointmentBookingService::new(&state);
    let appointment = booking_service.get_appointment(appointment_id).await
        .map_err(map_appointment_error)?;

    let is_owner = user.is_patient() && user.is_user(appointment.patient_id);
    if !is_owner && !user.is_admin() {
        return Err(AppError::Forbidden("Not authorized to reschedule this appointment".to_string()));
    }

    let updated = booking_service.reschedule_appointment(appointment_id, request).await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": updated,
        "message": "Appointment rescheduled successfully"
    })))
}

#[axum::debug_handler]
pub async fn complete_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<i64>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let booking_service = AppointmentBookingService::new(&state);
    let appointment = booking_service.get_appointment(appointment_id).await
        .map_err(map_appointment_error)?;
    ensure_treating_doctor(&user, &appointment)?;

    let updated = booking_service.complete_appointment(appointment_id).await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": updated,
        "message": "Appointment marked as completed"
    })))
}

#[axum::debug_handler]
pub async fn mark_no_show(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<i64>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let booking_service = AppointmentBookingService::new(&state);
    let appointment = booking_service.get_appointment(appointment_id).await
        .map_err(map_appointment_error)?;
    ensure_treating_doctor(&user, &appointment)?;

    let updated = booking_service.mark_no_show(appointment_id).await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": updated,
        "message": "Appointment marked as no-show"
    })))
}
