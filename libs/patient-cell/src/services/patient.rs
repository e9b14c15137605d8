use std::collections::{BTreeMap, BTreeSet};

use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    summarize_visits, DoctorPatient, DoctorPatientPage, DoctorPatientsQuery, Patient, PatientError,
    PatientSearchQuery, PatientWithRecords, UpdatePatientRequest, VisitRow,
};
use crate::services::health_record::HealthRecordService;

const PATIENT_SELECT: &str =
    "/rest/v1/users?select=*,patient:patients(medical_history_summary)&role=eq.patient";
const DEFAULT_SEARCH_LIMIT: i64 = 50;
const DEFAULT_DOCTOR_PAGE_SIZE: i64 = 10;
const RECENT_RECORDS: i64 = 10;

pub struct PatientService {
    supabase: SupabaseClient,
    records: HealthRecordService,
}

impl PatientService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            records: HealthRecordService::new(config),
        }
    }

    pub async fn search_patients(&self, query: &PatientSearchQuery) -> Result<Vec<Patient>, PatientError> {
        debug!("Searching patients with query: {:?}", query);

        let path = format!(
            "{}{}&order=last_name.asc,first_name.asc&limit={}&offset={}",
            PATIENT_SELECT,
            patient_search_filter(query),
            query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).clamp(1, 500),
            query.offset.unwrap_or(0).max(0)
        );

        self.supabase
            .select(&path)
            .await
            .map_err(|e| PatientError::DatabaseError(e.to_string()))
    }

    pub async fn get_all_patients(&self, limit: i64, offset: i64) -> Result<Vec<Patient>, PatientError> {
        self.search_patients(&PatientSearchQuery {
            limit: Some(limit),
            offset: Some(offset),
            ..Default::default()
        })
        .await
    }

    pub async fn count_patients(&self) -> Result<usize, PatientError> {
        let ids: Vec<Value> = self.supabase
            .select("/rest/v1/users?select=user_id&role=eq.patient")
            .await
            .map_err(|e| PatientError::DatabaseError(e.to_string()))?;
        Ok(ids.len())
    }

    pub async fn get_patient(&self, patient_id: i64) -> Result<Patient, PatientError> {
        debug!("Fetching patient: {}", patient_id);

        let path = format!("{}&user_id=eq.{}", PATIENT_SELECT, patient_id);
        self.supabase
            .select_one::<Patient>(&path)
            .await
            .map_err(|e| PatientError::DatabaseError(e.to_string()))?
            .ok_or(PatientError::NotFound)
    }

    pub async fn get_patient_with_records(&self, patient_id: i64) -> Result<PatientWithRecords, PatientError> {
        let patient = self.get_patient(patient_id).await?;
        let records = self.records.get_records_by_patient(patient_id, RECENT_RECORDS).await?;
        Ok(PatientWithRecords { patient, records })
    }

    pub async fn update_patient(
        &self,
        patient_id: i64,
        request: UpdatePatientRequest,
    ) -> Result<Patient, PatientError> {
        self.get_patient(patient_id).await?;

        let mut user_fields = Map::new();
        if let Some(first_name) = request.first_name {
            user_fields.insert("first_name".to_string(), json!(first_name.trim()));
        }
        if let Some(last_name) = request.last_name {
            user_fields.insert("last_name".to_string(), json!(last_name.trim()));
        }
        if let Some(phone_number) = request.phone_number {
            user_fields.insert("phone_number".to_string(), json!(phone_number.trim()));
        }
        if let Some(address) = request.address {
            user_fields.insert("address".to_string(), json!(address));
        }
        if let Some(date_of_birth) = request.date_of_birth {
            if date_of_birth > Utc::now().date_naive() {
                return Err(PatientError::ValidationError("Date of birth cannot be in the future".to_string()));
            }
            user_fields.insert("date_of_birth".to_string(), json!(date_of_birth));
        }
        if let Some(gender) = request.gender {
            user_fields.insert("gender".to_string(), json!(gender));
        }
        if let Some(is_active) = request.is_active {
            user_fields.insert("is_active".to_string(), json!(is_active));
        }

        if !user_fields.is_empty() {
            user_fields.insert("updated_at".to_string(), json!(now()));
            let path = format!("/rest/v1/users?user_id=eq.{}&role=eq.patient", patient_id);
            let _: Vec<Value> = self.supabase
                .update(&path, Value::Object(user_fields))
                .await
                .map_err(|e| PatientError::DatabaseError(e.to_string()))?;
        }

        if let Some(summary) = request.medical_history_summary {
            let path = format!("/rest/v1/patients?patient_id=eq.{}", patient_id);
            let _: Vec<Value> = self.supabase
                .update(&path, json!({ "medical_history_summary": summary }))
                .await
                .map_err(|e| PatientError::DatabaseError(e.to_string()))?;
        }

        info!("Patient {} updated", patient_id);
        self.get_patient(patient_id).await
    }

    /// Remove the `patients` row, then the owning `users` row.
    pub async fn delete_patient(&self, patient_id: i64) -> Result<(), PatientError> {
        self.get_patient(patient_id).await?;

        let _: Vec<Value> = self.supabase
            .delete(&format!("/rest/v1/patients?patient_id=eq.{}", patient_id))
            .await
            .map_err(|e| PatientError::DatabaseError(e.to_string()))?;

        let removed: Vec<Value> = self.supabase
            .delete(&format!("/rest/v1/users?user_id=eq.{}&role=eq.patient", patient_id))
            .await
            .map_err(|e| PatientError::DatabaseError(e.to_string()))?;
        if removed.is_empty() {
            warn!("User row for patient {} was already gone", patient_id);
        }

        info!("Patient {} deleted", patient_id);
        Ok(())
    }

    // ==========================================================================
    // DOCTOR VIEWS
    // ==========================================================================

    pub async fn has_doctor_with_patient(&self, doctor_id: i64, patient_id: i64) -> Result<bool, PatientError> {
        let path = format!(
            "/rest/v1/appointments?select=appointment_id&doctor_id=eq.{}&patient_id=eq.{}&limit=1",
            doctor_id, patient_id
        );
        let rows: Vec<Value> = self.supabase
            .select(&path)
            .await
            .map_err(|e| PatientError::DatabaseError(e.to_string()))?;
        Ok(!rows.is_empty())
    }

    pub async fn get_last_visit_date(
        &self,
        patient_id: i64,
        doctor_id: i64,
    ) -> Result<Option<NaiveDateTime>, PatientError> {
        let path = format!(
            "/rest/v1/appointments?select=patient_id,status,appointment_time&patient_id=eq.{}&doctor_id=eq.{}&order=appointment_time.desc&limit=1",
            patient_id, doctor_id
        );
        let latest: Option<VisitRow> = self.supabase
            .select_one(&path)
            .await
            .map_err(|e| PatientError::DatabaseError(e.to_string()))?;
        Ok(latest.map(|row| row.appointment_time))
    }

    pub async fn get_appointment_status_count(
        &self,
        patient_id: i64,
        doctor_id: i64,
    ) -> Result<BTreeMap<String, i64>, PatientError> {
        let rows = self.visit_rows(doctor_id, Some(patient_id)).await?;
        Ok(summarize_visits(&rows)
            .remove(&patient_id)
            .map(|summary| summary.status_counts)
            .unwrap_or_default())
    }

    /// Distinct patients with at least one appointment with this doctor,
    /// optionally only those with an appointment in `query.status`.
    pub async fn get_patients_by_doctor(
        &self,
        doctor_id: i64,
        query: &DoctorPatientsQuery,
    ) -> Result<DoctorPatientPage, PatientError> {
        let page = query.page.unwrap_or(1).max(1);
        let per_page = query.per_page.unwrap_or(DEFAULT_DOCTOR_PAGE_SIZE).clamp(1, 100);

        let rows = self.visit_rows(doctor_id, None).await?;
        let patient_ids: BTreeSet<i64> = rows
            .iter()
            .filter(|row| query.status.as_deref().map_or(true, |status| row.status == status))
            .map(|row| row.patient_id)
            .collect();

        if patient_ids.is_empty() {
            return Ok(DoctorPatientPage { patients: Vec::new(), total: 0, page, per_page });
        }

        let ids = patient_ids.iter().map(i64::to_string).collect::<Vec<_>>().join(",");
        let search = PatientSearchQuery { q: query.q.clone(), ..Default::default() };
        let path = format!(
            "{}&user_id=in.({}){}&order=last_name.asc,first_name.asc",
            PATIENT_SELECT,
            ids,
            patient_search_filter(&search)
        );
        let patients: Vec<Patient> = self.supabase
            .select(&path)
            .await
            .map_err(|e| PatientError::DatabaseError(e.to_string()))?;

        let total = patients.len();
        let mut summaries = summarize_visits(&rows);
        let today = Utc::now().date_naive();

        let patients = patients
            .into_iter()
            .skip(((page - 1) * per_page) as usize)
            .take(per_page as usize)
            .map(|patient| {
                let summary = summaries.remove(&patient.user_id).unwrap_or_default();
                DoctorPatient {
                    age: patient.age_on(today),
                    last_visit: summary.last_visit,
                    status_counts: summary.status_counts,
                    patient,
                }
            })
            .collect();

        Ok(DoctorPatientPage { patients, total, page, per_page })
    }

    async fn visit_rows(&self, doctor_id: i64, patient_id: Option<i64>) -> Result<Vec<VisitRow>, PatientError> {
        let mut path = format!(
            "/rest/v1/appointments?select=patient_id,status,appointment_time&doctor_id=eq.{}",
            doctor_id
        );
        if let Some(patient_id) = patient_id {
            path.push_str(&format!("&patient_id=eq.{}", patient_id));
        }

        self.supabase
            .select(&path)
            .await
            .map_err(|e| PatientError::DatabaseError(e.to_string()))
    }
}

/// PostgREST filters for a patient search, each prefixed with `&`.
///
/// `q` prefix-matches names, username, email and phone. Active and inactive
/// only filter when exactly one is set. The registration range needs both
/// ends and includes the whole of `date_to`.
pub fn patient_search_filter(query: &PatientSearchQuery) -> String {
    let mut filter = String::new();

    if let Some(q) = query.q.as_deref().map(sanitize_term).filter(|q| !q.is_empty()) {
        let term = urlencoding::encode(&q).into_owned();
        filter.push_str(&format!(
            "&or=(first_name.ilike.{t}*,last_name.ilike.{t}*,username.ilike.{t}*,email.ilike.{t}*,phone_number.ilike.{t}*)",
            t = term
        ));
    }

    match (query.active.unwrap_or(false), query.inactive.unwrap_or(false)) {
        (true, false) => filter.push_str("&is_active=eq.true"),
        (false, true) => filter.push_str("&is_active=eq.false"),
        _ => {}
    }

    if let (Some(from), Some(to)) = (query.date_from, query.date_to) {
        filter.push_str(&format!(
            "&created_at=gte.{}&created_at=lt.{}",
            from.format("%Y-%m-%d"),
            day_after(to).format("%Y-%m-%d")
        ));
    }

    filter
}

/// Characters that would break out of a PostgREST `or=(...)` group.
fn sanitize_term(q: &str) -> String {
    q.trim().chars().filter(|c| !matches!(c, ',' | '(' | ')' | '*')).collect()
}

fn day_after(date: NaiveDate) -> NaiveDate {
    date + Duration::days(1)
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn empty_search_adds_no_filters() {
        assert_eq!(patient_search_filter(&PatientSearchQuery::default()), "");
    }

    #[test]
    fn search_term_prefix_matches_every_contact_field() {
        let filter = patient_search_filter(&PatientSearchQuery {
            q: Some("  Nguyen ".to_string()),
            ..Default::default()
        });
        assert_eq!(
            filter,
            "&or=(first_name.ilike.Nguyen*,last_name.ilike.Nguyen*,username.ilike.Nguyen*,email.ilike.Nguyen*,phone_number.ilike.Nguyen*)"
        );
    }

    #[test]
    fn search_term_cannot_escape_the_or_group() {
        let filter = patient_search_filter(&PatientSearchQuery {
            q: Some("a),role.eq.admin".to_string()),
            ..Default::default()
        });
        assert!(filter.starts_with("&or=(first_name.ilike.arole.eq.admin*,"));
    }

    #[test]
    fn status_filter_applies_only_when_exactly_one_flag_is_set() {
        let active = PatientSearchQuery { active: Some(true), ..Default::default() };
        let inactive = PatientSearchQuery { inactive: Some(true), ..Default::default() };
        let both = PatientSearchQuery { active: Some(true), inactive: Some(true), ..Default::default() };

        assert_eq!(patient_search_filter(&active), "&is_active=eq.true");
        assert_eq!(patient_search_filter(&inactive), "&is_active=eq.false");
        assert_eq!(patient_search_filter(&both), "");
    }

    #[test]
    fn registration_range_needs_both_dates() {
        let open = PatientSearchQuery { date_from: Some(date(2026, 1, 1)), ..Default::default() };
        assert_eq!(patient_search_filter(&open), "");

        let closed = PatientSearchQuery {
            date_from: Some(date(2026, 1, 1)),
            date_to: Some(date(2026, 1, 31)),
            ..Default::default()
        };
        assert_eq!(
            patient_search_filter(&closed),
            "&created_at=gte.2026-01-01&created_at=lt.2026-02-01"
        );
    }
}
