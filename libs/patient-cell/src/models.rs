use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A `users` row with role patient, with its `patients` row embedded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub user_id: i64,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub is_active: bool,
    pub created_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub patient: Option<PatientDetails>,
}

impl Patient {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn age_on(&self, today: NaiveDate) -> Option<i32> {
        calculate_age(self.date_of_birth, today)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientDetails {
    pub medical_history_summary: Option<String>,
}

/// Whole years between `date_of_birth` and `today`.
pub fn calculate_age(date_of_birth: Option<NaiveDate>, today: NaiveDate) -> Option<i32> {
    let dob = date_of_birth?;
    let mut years = today.year() - dob.year();
    if (today.month(), today.day()) < (dob.month(), dob.day()) {
        years -= 1;
    }
    Some(years.max(0))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientSearchQuery {
    pub q: Option<String>,
    pub active: Option<bool>,
    pub inactive: Option<bool>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Fields split between `users` and `patients`; anything absent is left alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePatientRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub is_active: Option<bool>,
    pub medical_history_summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientWithRecords {
    pub patient: Patient,
    pub records: Vec<HealthRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DoctorPatientsQuery {
    pub q: Option<String>,
    pub status: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// One of a doctor's patients together with their shared visit history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorPatient {
    pub patient: Patient,
    pub age: Option<i32>,
    pub last_visit: Option<NaiveDateTime>,
    pub status_counts: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorPatientPage {
    pub patients: Vec<DoctorPatient>,
    pub total: usize,
    pub page: i64,
    pub per_page: i64,
}

/// The slice of an appointment row needed for doctor/patient views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitRow {
    pub patient_id: i64,
    pub status: String,
    pub appointment_time: NaiveDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisitSummary {
    pub last_visit: Option<NaiveDateTime>,
    pub status_counts: BTreeMap<String, i64>,
}

/// Fold a doctor's appointment rows into one summary per patient.
pub fn summarize_visits(rows: &[VisitRow]) -> BTreeMap<i64, VisitSummary> {
    let mut summaries: BTreeMap<i64, VisitSummary> = BTreeMap::new();
    for row in rows {
        let summary = summaries.entry(row.patient_id).or_default();
        *summary.status_counts.entry(row.status.clone()).or_insert(0) += 1;
        if summary.last_visit.map_or(true, |last| row.appointment_time > last) {
            summary.last_visit = Some(row.appointment_time);
        }
    }
    summaries
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub record_id: i64,
    pub patient_id: i64,
    pub appointment_id: Option<i64>,
    /// Author of the entry; empty for the record created at registration.
    pub user_id: Option<i64>,
    pub record_date: NaiveDate,
    pub symptoms: Option<String>,
    pub diagnosis: Option<String>,
    pub prescription: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateHealthRecordRequest {
    pub record_date: Option<NaiveDate>,
    pub symptoms: Option<String>,
    pub diagnosis: Option<String>,
    pub prescription: Option<String>,
    pub notes: Option<String>,
}

impl UpdateHealthRecordRequest {
    pub fn is_empty(&self) -> bool {
        self.record_date.is_none()
            && self.symptoms.is_none()
            && self.diagnosis.is_none()
            && self.prescription.is_none()
            && self.notes.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordDiagnosisRequest {
    pub symptoms: Option<String>,
    pub diagnosis: String,
    pub prescription: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum PatientError {
    #[error("Patient not found")]
    NotFound,

    #[error("Health record not found")]
    RecordNotFound,

    #[error("Appointment not found")]
    AppointmentNotFound,

    #[error("Only the treating doctor can record a diagnosis")]
    NotTreatingDoctor,

    #[error("Cannot record a diagnosis for a cancelled appointment")]
    AppointmentCancelled,

    #[error("Diagnosis can only be recorded once the appointment has started")]
    AppointmentNotStarted,

    #[error("Unauthorized access to patient data")]
    Unauthorized,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}
