use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde_json::{json, Value};

use shared_config::AppConfig;
use shared_models::auth::{User, ROLE_ADMIN, ROLE_DOCTOR, ROLE_PATIENT};
use shared_models::error::AppError;

use crate::models::{
    AddReviewRequest, DayOfWeek, DoctorError, DoctorReplyRequest, DoctorSearchQuery,
    GenerateSlotsRequest, SlotFilters, SubmitLicenseRequest, UpdateReviewRequest,
    UpsertAvailabilityRequest,
};
use crate::services::{
    AvailabilityService, DoctorService, LicenseService, ReviewService, SlotService,
};

fn map_doctor_error(e: DoctorError) -> AppError {
    match e {
        DoctorError::NotFound
        | DoctorError::SlotNotFound
        | DoctorError::LicenseNotFound
        | DoctorError::ReviewNotFound => AppError::NotFound(e.to_string()),
        DoctorError::ReviewNotAllowed => AppError::Forbidden(e.to_string()),
        DoctorError::LicenseAlreadyVerified
        | DoctorError::DuplicateLicense(_)
        | DoctorError::AlreadyReviewed
        | DoctorError::ReviewAlreadyEdited
        | DoctorError::ReplyAlreadyEdited => AppError::Conflict(e.to_string()),
        DoctorError::ValidationError(msg) => AppError::ValidationError(msg),
        DoctorError::DatabaseError(msg) => AppError::Database(msg),
    }
}

/// Doctors may only manage their own schedule; admins may manage any.
fn ensure_self_or_admin(user: &User, doctor_id: i64) -> Result<(), AppError> {
    if user.is_admin() || (user.is_doctor() && user.is_user(doctor_id)) {
        Ok(())
    } else {
        Err(AppError::Forbidden("Not authorized to manage this doctor".to_string()))
    }
}

// ==============================================================================
// PUBLIC HANDLERS (NO AUTHENTICATION REQUIRED)
// ==============================================================================

#[axum::debug_handler]
pub async fn search_doctors(
    State(state): State<Arc<AppConfig>>,
    Query(query): Query<DoctorSearchQuery>,
) -> Result<Json<Value>, AppError> {
    let doctors = DoctorService::new(&state)
        .search_doctors(&query)
        .await
        .map_err(map_doctor_error)?;

    Ok(Json(json!({
        "success": true,
        "total": doctors.len(),
        "doctors": doctors
    })))
}

#[axum::debug_handler]
pub async fn get_doctor(
    State(state): State<Arc<AppConfig>>,
    Path(doctor_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let doctor = DoctorService::new(&state)
        .get_doctor(doctor_id)
        .await
        .map_err(map_doctor_error)?;

    Ok(Json(json!({ "success": true, "doctor": doctor })))
}

#[axum::debug_handler]
pub async fn list_hospitals(
    State(state): State<Arc<AppConfig>>,
) -> Result<Json<Value>, AppError> {
    let hospitals = DoctorService::new(&state)
        .list_hospitals()
        .await
        .map_err(map_doctor_error)?;

    Ok(Json(json!({ "success": true, "hospitals": hospitals })))
}

#[axum::debug_handler]
pub async fn list_specialties(
    State(state): State<Arc<AppConfig>>,
) -> Result<Json<Value>, AppError> {
    let specialties = DoctorService::new(&state)
        .list_specialties()
        .await
        .map_err(map_doctor_error)?;

    Ok(Json(json!({ "success": true, "specialties": specialties })))
}

#[axum::debug_handler]
pub async fn get_available_slots(
    State(state): State<Arc<AppConfig>>,
    Query(filters): Query<SlotFilters>,
) -> Result<Json<Value>, AppError> {
    let page = SlotService::new(&state)
        .get_available_slots(&filters)
        .await
        .map_err(map_doctor_error)?;

    Ok(Json(json!({ "success": true, "data": page })))
}

#[axum::debug_handler]
pub async fn get_availabilities(
    State(state): State<Arc<AppConfig>>,
    Path(doctor_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let availabilities = AvailabilityService::new(&state)
        .get_availabilities(doctor_id)
        .await
        .map_err(map_doctor_error)?;

    Ok(Json(json!({ "success": true, "availabilities": availabilities })))
}

#[axum::debug_handler]
pub async fn get_availability_by_day(
    State(state): State<Arc<AppConfig>>,
    Path((doctor_id, day)): Path<(i64, DayOfWeek)>,
) -> Result<Json<Value>, AppError> {
    let availability = AvailabilityService::new(&state)
        .get_availability_by_day(doctor_id, day)
        .await
        .map_err(map_doctor_error)?
        .ok_or_else(|| AppError::NotFound(format!("No availability on {}", day)))?;

    Ok(Json(json!({ "success": true, "availability": availability })))
}

#[axum::debug_handler]
pub async fn list_doctor_reviews(
    State(state): State<Arc<AppConfig>>,
    Path(doctor_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let reviews = ReviewService::new(&state)
        .list_doctor_reviews(doctor_id)
        .await
        .map_err(map_doctor_error)?;

    Ok(Json(json!({ "success": true, "reviews": reviews })))
}

// ==============================================================================
// SCHEDULE MANAGEMENT
// ==============================================================================

#[axum::debug_handler]
pub async fn upsert_availability(
    State(state): State<Arc<AppConfig>>,
    Path(doctor_id): Path<i64>,
    Extension(user): Extension<User>,
    Json(request): Json<UpsertAvailabilityRequest>,
) -> Result<Json<Value>, AppError> {
    ensure_self_or_admin(&user, doctor_id)?;

    let availability = AvailabilityService::new(&state)
        .upsert_availability(doctor_id, request)
        .await
        .map_err(map_doctor_error)?;

    Ok(Json(json!({
        "success": true,
        "availability": availability,
        "message": "Availability saved"
    })))
}

#[axum::debug_handler]
pub async fn generate_slots(
    State(state): State<Arc<AppConfig>>,
    Path(doctor_id): Path<i64>,
    Extension(user): Extension<User>,
    Json(request): Json<GenerateSlotsRequest>,
) -> Result<Json<Value>, AppError> {
    ensure_self_or_admin(&user, doctor_id)?;

    let slots = AvailabilityService::new(&state)
        .generate_slots(doctor_id, request.from_date, request.to_date)
        .await
        .map_err(map_doctor_error)?;

    Ok(Json(json!({
        "success": true,
        "created": slots.len(),
        "slots": slots,
        "message": format!("{} slots generated", slots.len())
    })))
}

// ==============================================================================
// LICENSES
// ==============================================================================

#[axum::debug_handler]
pub async fn submit_license(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
    Json(request): Json<SubmitLicenseRequest>,
) -> Result<Json<Value>, AppError> {
    user.require_role(ROLE_DOCTOR)?;
    let doctor_id = user.user_id()?;

    let license = LicenseService::new(&state)
        .submit_license(doctor_id, request)
        .await
        .map_err(map_doctor_error)?;

    Ok(Json(json!({
        "success": true,
        "license": license,
        "message": "License submitted for verification"
    })))
}

#[axum::debug_handler]
pub async fn list_doctor_licenses(
    State(state): State<Arc<AppConfig>>,
    Path(doctor_id): Path<i64>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    ensure_self_or_admin(&user, doctor_id)?;

    let licenses = LicenseService::new(&state)
        .list_doctor_licenses(doctor_id)
        .await
        .map_err(map_doctor_error)?;

    Ok(Json(json!({ "success": true, "licenses": licenses })))
}

#[axum::debug_handler]
pub async fn list_pending_licenses(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    user.require_role(ROLE_ADMIN)?;

    let licenses = LicenseService::new(&state)
        .list_pending_licenses()
        .await
        .map_err(map_doctor_error)?;

    Ok(Json(json!({ "success": true, "licenses": licenses })))
}

#[axum::debug_handler]
pub async fn verify_license(
    State(state): State<Arc<AppConfig>>,
    Path(license_id): Path<i64>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    user.require_role(ROLE_ADMIN)?;
    let admin_id = user.user_id()?;

    let license = LicenseService::new(&state)
        .verify_license(license_id, admin_id)
        .await
        .map_err(map_doctor_error)?;

    Ok(Json(json!({
        "success": true,
        "license": license,
        "message": "License verified and doctor account activated"
    })))
}

// ==============================================================================
// REVIEWS
// ==============================================================================

#[axum::debug_handler]
pub async fn add_review(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
    Json(request): Json<AddReviewRequest>,
) -> Result<Json<Value>, AppError> {
    user.require_role(ROLE_PATIENT)?;
    let patient_id = user.user_id()?;

    let review = ReviewService::new(&state)
        .add_review(patient_id, request)
        .await
        .map_err(map_doctor_error)?;

    Ok(Json(json!({
        "success": true,
        "review": review,
        "message": "Review submitted"
    })))
}

#[axum::debug_handler]
pub async fn update_review(
    State(state): State<Arc<AppConfig>>,
    Path(review_id): Path<i64>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateReviewRequest>,
) -> Result<Json<Value>, AppError> {
    user.require_role(ROLE_PATIENT)?;
    let patient_id = user.user_id()?;

    let review = ReviewService::new(&state)
        .update_review(review_id, patient_id, request)
        .await
        .map_err(map_doctor_error)?;

    Ok(Json(json!({
        "success": true,
        "review": review,
        "message": "Review updated"
    })))
}

#[axum::debug_handler]
pub async fn delete_review(
    State(state): State<Arc<AppConfig>>,
    Path(review_id): Path<i64>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    user.require_role(ROLE_PATIENT)?;
    let patient_id = user.user_id()?;

    let doctor_id = ReviewService::new(&state)
        .delete_review(review_id, patient_id)
        .await
        .map_err(map_doctor_error)?;

    Ok(Json(json!({
        "success": true,
        "doctor_id": doctor_id,
        "message": "Review deleted"
    })))
}

#[axum::debug_handler]
pub async fn reply_to_review(
    State(state): State<Arc<AppConfig>>,
    Path(review_id): Path<i64>,
    Extension(user): Extension<User>,
    Json(request): Json<DoctorReplyRequest>,
) -> Result<Json<Value>, AppError> {
    user.require_role(ROLE_DOCTOR)?;
    let doctor_id = user.user_id()?;

    let review = ReviewService::new(&state)
        .doctor_reply(review_id, doctor_id, &request.response)
        .await
        .map_err(map_doctor_error)?;

    Ok(Json(json!({
        "success": true,
        "review": review,
        "message": "Reply saved"
    })))
}
