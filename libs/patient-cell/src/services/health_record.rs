use chrono::{NaiveDateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use appointment_cell::{AppointmentBookingService, AppointmentError};
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{HealthRecord, PatientError, RecordDiagnosisRequest, UpdateHealthRecordRequest};

pub struct HealthRecordService {
    supabase: SupabaseClient,
    appointments: AppointmentBookingService,
}

impl HealthRecordService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            appointments: AppointmentBookingService::new(config),
        }
    }

    /// Blank record opened when a patient registers.
    pub async fn create_empty_health_record(&self, patient_id: i64) -> Result<HealthRecord, PatientError> {
        let rows: Vec<HealthRecord> = self.supabase
            .insert("health_records", json!({
                "patient_id": patient_id,
                "appointment_id": null,
                "user_id": null,
                "record_date": Utc::now().date_naive(),
            }))
            .await
            .map_err(|e| PatientError::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .next()
            .ok_or_else(|| PatientError::DatabaseError("Failed to create health record".to_string()))
    }

    /// Newest first.
    pub async fn get_records_by_patient(&self, patient_id: i64, limit: i64) -> Result<Vec<HealthRecord>, PatientError> {
        debug!("Fetching health records for patient {}", patient_id);

        let path = format!(
            "/rest/v1/health_records?patient_id=eq.{}&order=record_date.desc,record_id.desc&limit={}",
            patient_id, limit
        );
        self.supabase
            .select(&path)
            .await
            .map_err(|e| PatientError::DatabaseError(e.to_string()))
    }

    pub async fn get_record(&self, record_id: i64) -> Result<HealthRecord, PatientError> {
        let path = format!("/rest/v1/health_records?record_id=eq.{}", record_id);
        self.supabase
            .select_one::<HealthRecord>(&path)
            .await
            .map_err(|e| PatientError::DatabaseError(e.to_string()))?
            .ok_or(PatientError::RecordNotFound)
    }

    pub async fn update_health_record(
        &self,
        record_id: i64,
        request: UpdateHealthRecordRequest,
    ) -> Result<HealthRecord, PatientError> {
        if request.is_empty() {
            return Err(PatientError::ValidationError("Nothing to update".to_string()));
        }

        let mut fields = Map::new();
        if let Some(record_date) = request.record_date {
            fields.insert("record_date".to_string(), json!(record_date));
        }
        if let Some(symptoms) = request.symptoms {
            fields.insert("symptoms".to_string(), json!(symptoms));
        }
        if let Some(diagnosis) = request.diagnosis {
            fields.insert("diagnosis".to_string(), json!(diagnosis));
        }
        if let Some(prescription) = request.prescription {
            fields.insert("prescription".to_string(), json!(prescription));
        }
        if let Some(notes) = request.notes {
            fields.insert("notes".to_string(), json!(notes));
        }

        let path = format!("/rest/v1/health_records?record_id=eq.{}", record_id);
        let rows: Vec<HealthRecord> = self.supabase
            .update(&path, Value::Object(fields))
            .await
            .map_err(|e| PatientError::DatabaseError(e.to_string()))?;

        rows.into_iter().next().ok_or(PatientError::RecordNotFound)
    }

    pub async fn delete_health_record(&self, record_id: i64) -> Result<(), PatientError> {
        let path = format!("/rest/v1/health_records?record_id=eq.{}", record_id);
        let removed: Vec<HealthRecord> = self.supabase
            .delete(&path)
            .await
            .map_err(|e| PatientError::DatabaseError(e.to_string()))?;

        if removed.is_empty() {
            return Err(PatientError::RecordNotFound);
        }
        info!("Health record {} deleted", record_id);
        Ok(())
    }

    /// Write the treating doctor's findings for an appointment.
    ///
    /// The appointment must belong to `doctor_id`, must not be cancelled and
    /// must have started. A second call updates the same record.
    pub async fn record_diagnosis(
        &self,
        appointment_id: i64,
        doctor_id: i64,
        request: RecordDiagnosisRequest,
    ) -> Result<HealthRecord, PatientError> {
        if request.diagnosis.trim().is_empty() {
            return Err(PatientError::ValidationError("Diagnosis is required".to_string()));
        }

        let appointment = self.appointments.get_appointment(appointment_id).await
            .map_err(|e| match e {
                AppointmentError::NotFound => PatientError::AppointmentNotFound,
                other => PatientError::DatabaseError(other.to_string()),
            })?;

        if appointment.doctor_id != doctor_id {
            warn!("Doctor {} tried to record a diagnosis for appointment {}", doctor_id, appointment_id);
            return Err(PatientError::NotTreatingDoctor);
        }
        if appointment.status.is_cancelled() {
            return Err(PatientError::AppointmentCancelled);
        }
        if appointment.appointment_time > now() {
            return Err(PatientError::AppointmentNotStarted);
        }

        let existing_path = format!("/rest/v1/health_records?appointment_id=eq.{}", appointment_id);
        let existing: Option<HealthRecord> = self.supabase
            .select_one(&existing_path)
            .await
            .map_err(|e| PatientError::DatabaseError(e.to_string()))?;

        let fields = json!({
            "symptoms": request.symptoms,
            "diagnosis": request.diagnosis.trim(),
            "prescription": request.prescription,
            "notes": request.notes,
            "user_id": doctor_id,
        });

        let rows: Vec<HealthRecord> = match existing {
            Some(record) => {
                let path = format!("/rest/v1/health_records?record_id=eq.{}", record.record_id);
                self.supabase.update(&path, fields).await
            }
            None => {
                let mut row = fields;
                row["patient_id"] = json!(appointment.patient_id);
                row["appointment_id"] = json!(appointment_id);
                row["record_date"] = json!(appointment.appointment_time.date());
                self.supabase.insert("health_records", row).await
            }
        }
        .map_err(|e| PatientError::DatabaseError(e.to_string()))?;

        let record = rows
            .into_iter()
            .next()
            .ok_or_else(|| PatientError::DatabaseError("Failed to store diagnosis".to_string()))?;

        info!("Diagnosis recorded for appointment {} (record {})", appointment_id, record.record_id);
        Ok(record)
    }
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}
