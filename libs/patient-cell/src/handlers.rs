use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde_json::{json, Value};

use shared_config::AppConfig;
use shared_models::auth::{User, ROLE_ADMIN, ROLE_DOCTOR};
use shared_models::error::AppError;

use crate::models::{
    DoctorPatientsQuery, PatientError, PatientSearchQuery, RecordDiagnosisRequest,
    UpdateHealthRecordRequest, UpdatePatientRequest,
};
use crate::services::{HealthRecordService, PatientService};

fn map_patient_error(e: PatientError) -> AppError {
    match e {
        PatientError::NotFound
        | PatientError::RecordNotFound
        | PatientError::AppointmentNotFound => AppError::NotFound(e.to_string()),
        PatientError::NotTreatingDoctor | PatientError::Unauthorized => AppError::Forbidden(e.to_string()),
        PatientError::AppointmentCancelled | PatientError::AppointmentNotStarted => {
            AppError::BadRequest(e.to_string())
        }
        PatientError::ValidationError(msg) => AppError::ValidationError(msg),
        PatientError::DatabaseError(msg) => AppError::Database(msg),
    }
}

/// Admins, the patient themself, and doctors who have seen the patient.
async fn ensure_can_view_patient(
    service: &PatientService,
    user: &User,
    patient_id: i64,
) -> Result<(), AppError> {
    if user.is_admin() || (user.is_patient() && user.is_user(patient_id)) {
        return Ok(());
    }
    if user.is_doctor() {
        let doctor_id = user.user_id()?;
        if service.has_doctor_with_patient(doctor_id, patient_id).await.map_err(map_patient_error)? {
            return Ok(());
        }
    }
    Err(map_patient_error(PatientError::Unauthorized))
}

// ==============================================================================
// ADMINISTRATION
// ==============================================================================

#[axum::debug_handler]
pub async fn search_patients(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
    Query(query): Query<PatientSearchQuery>,
) -> Result<Json<Value>, AppError> {
    user.require_role(ROLE_ADMIN)?;

    let service = PatientService::new(&state);
    let patients = service.search_patients(&query).await.map_err(map_patient_error)?;
    let total = service.count_patients().await.map_err(map_patient_error)?;

    Ok(Json(json!({
        "success": true,
        "patients": patients,
        "total": total
    })))
}

#[axum::debug_handler]
pub async fn get_patient(
    State(state): State<Arc<AppConfig>>,
    Path(patient_id): Path<i64>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let service = PatientService::new(&state);
    ensure_can_view_patient(&service, &user, patient_id).await?;

    let result = service.get_patient_with_records(patient_id).await.map_err(map_patient_error)?;

    Ok(Json(json!({
        "success": true,
        "patient": result.patient,
        "records": result.records
    })))
}

#[axum::debug_handler]
pub async fn update_patient(
    State(state): State<Arc<AppConfig>>,
    Path(patient_id): Path<i64>,
    Extension(user): Extension<User>,
    Json(mut request): Json<UpdatePatientRequest>,
) -> Result<Json<Value>, AppError> {
    if !user.is_admin() {
        if !(user.is_patient() && user.is_user(patient_id)) {
            return Err(map_patient_error(PatientError::Unauthorized));
        }
        // Only admins activate or deactivate accounts
        request.is_active = None;
    }

    let patient = PatientService::new(&state)
        .update_patient(patient_id, request)
        .await
        .map_err(map_patient_error)?;

    Ok(Json(json!({
        "success": true,
        "patient": patient,
        "message": "Patient updated successfully"
    })))
}

#[axum::debug_handler]
pub async fn delete_patient(
    State(state): State<Arc<AppConfig>>,
    Path(patient_id): Path<i64>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    user.require_role(ROLE_ADMIN)?;

    PatientService::new(&state)
        .delete_patient(patient_id)
        .await
        .map_err(map_patient_error)?;

    Ok(Json(json!({
        "success": true,
        "message": "Patient deleted successfully"
    })))
}

// ==============================================================================
// DOCTOR VIEWS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_my_patients(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
    Query(query): Query<DoctorPatientsQuery>,
) -> Result<Json<Value>, AppError> {
    user.require_role(ROLE_DOCTOR)?;
    let doctor_id = user.user_id()?;

    let page = PatientService::new(&state)
        .get_patients_by_doctor(doctor_id, &query)
        .await
        .map_err(map_patient_error)?;

    Ok(Json(json!({ "success": true, "data": page })))
}

/// Last visit and per-status appointment counts between the calling doctor and a patient.
#[axum::debug_handler]
pub async fn get_visit_summary(
    State(state): State<Arc<AppConfig>>,
    Path(patient_id): Path<i64>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    user.require_role(ROLE_DOCTOR)?;
    let doctor_id = user.user_id()?;

    let service = PatientService::new(&state);
    if !service.has_doctor_with_patient(doctor_id, patient_id).await.map_err(map_patient_error)? {
        return Err(map_patient_error(PatientError::Unauthorized));
    }

    let last_visit = service.get_last_visit_date(patient_id, doctor_id).await.map_err(map_patient_error)?;
    let status_counts = service.get_appointment_status_count(patient_id, doctor_id).await
        .map_err(map_patient_error)?;

    Ok(Json(json!({
        "success": true,
        "patient_id": patient_id,
        "last_visit": last_visit,
        "status_counts": status_counts
    })))
}

// ==============================================================================
// HEALTH RECORDS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_patient_records(
    State(state): State<Arc<AppConfig>>,
    Path(patient_id): Path<i64>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    ensure_can_view_patient(&PatientService::new(&state), &user, patient_id).await?;

    let records = HealthRecordService::new(&state)
        .get_records_by_patient(patient_id, 10)
        .await
        .map_err(map_patient_error)?;

    Ok(Json(json!({ "success": true, "records": records })))
}

#[axum::debug_handler]
pub async fn update_health_record(
    State(state): State<Arc<AppConfig>>,
    Path(record_id): Path<i64>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateHealthRecordRequest>,
) -> Result<Json<Value>, AppError> {
    let service = HealthRecordService::new(&state);
    let record = service.get_record(record_id).await.map_err(map_patient_error)?;

    let is_author = user.is_doctor() && record.user_id.is_some_and(|author| user.is_user(author));
    if !is_author && !user.is_admin() {
        return Err(AppError::Forbidden("Only the authoring doctor can edit this record".to_string()));
    }

    let updated = service.update_health_record(record_id, request).await.map_err(map_patient_error)?;

    Ok(Json(json!({
        "success": true,
        "record": updated,
        "message": "Health record updated successfully"
    })))
}

#[axum::debug_handler]
pub async fn delete_health_record(
    State(state): State<Arc<AppConfig>>,
    Path(record_id): Path<i64>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    user.require_role(ROLE_ADMIN)?;

    HealthRecordService::new(&state)
        .delete_health_record(record_id)
        .await
        .map_err(map_patient_error)?;

    Ok(Json(json!({
        "success": true,
        "message": "Health record deleted successfully"
    })))
}

#[axum::debug_handler]
pub async fn record_diagnosis(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<i64>,
    Extension(user): Extension<User>,
    Json(request): Json<RecordDiagnosisRequest>,
) -> Result<Json<Value>, AppError> {
    user.require_role(ROLE_DOCTOR)?;
    let doctor_id = user.user_id()?;

    let record = HealthRecordService::new(&state)
        .record_diagnosis(appointment_id, doctor_id, request)
        .await
        .map_err(map_patient_error)?;

    Ok(Json(json!({
        "success": true,
        "record": record,
        "message": "Diagnosis recorded successfully"
    })))
}
