use anyhow::Result;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{DoctorError, DoctorLicense, SubmitLicenseRequest};

pub struct LicenseService {
    supabase: SupabaseClient,
}

impl LicenseService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub async fn submit_license(
        &self,
        doctor_id: i64,
        request: SubmitLicenseRequest,
    ) -> Result<DoctorLicense, DoctorError> {
        let number = request.license_number.trim();
        if number.is_empty() || request.issuing_authority.trim().is_empty() {
            return Err(DoctorError::ValidationError(
                "License number and issuing authority are required".to_string(),
            ));
        }
        if let Some(expiry) = request.expiry_date {
            if expiry <= request.issue_date {
                return Err(DoctorError::ValidationError("Expiry date must be after issue date".to_string()));
            }
        }

        let duplicate_path = format!(
            "/rest/v1/doctor_licenses?license_number=eq.{}",
            urlencoding::encode(number)
        );
        let duplicates: Vec<DoctorLicense> = self.supabase
            .select(&duplicate_path)
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;
        if !duplicates.is_empty() {
            return Err(DoctorError::DuplicateLicense(number.to_string()));
        }

        let rows: Vec<DoctorLicense> = self.supabase
            .insert("doctor_licenses", json!({
                "doctor_id": doctor_id,
                "license_number": number,
                "issuing_authority": request.issuing_authority.trim(),
                "issue_date": request.issue_date,
                "expiry_date": request.expiry_date,
                "scope_description": request.scope_description,
                "is_verified": false,
            }))
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        let license = rows
            .into_iter()
            .next()
            .ok_or_else(|| DoctorError::DatabaseError("Failed to store license".to_string()))?;

        info!("License {} submitted by doctor {}", license.license_id, doctor_id);
        Ok(license)
    }

    pub async fn list_pending_licenses(&self) -> Result<Vec<DoctorLicense>, DoctorError> {
        debug!("Listing unverified licenses");
        self.supabase
            .select("/rest/v1/doctor_licenses?is_verified=eq.false&order=issue_date.asc")
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))
    }

    pub async fn list_doctor_licenses(&self, doctor_id: i64) -> Result<Vec<DoctorLicense>, DoctorError> {
        let path = format!("/rest/v1/doctor_licenses?doctor_id=eq.{}", doctor_id);
        self.supabase
            .select(&path)
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))
    }

    /// Verify a license and activate the owning doctor's account.
    pub async fn verify_license(&self, license_id: i64, admin_id: i64) -> Result<DoctorLicense, DoctorError> {
        let path = format!("/rest/v1/doctor_licenses?license_id=eq.{}", license_id);
        let license: DoctorLicense = self.supabase
            .select_one(&path)
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?
            .ok_or(DoctorError::LicenseNotFound)?;

        if license.is_verified {
            return Err(DoctorError::LicenseAlreadyVerified);
        }

        let rows: Vec<DoctorLicense> = self.supabase
            .update(&path, json!({
                "is_verified": true,
                "verification_date": Utc::now().date_naive(),
                "verified_by_admin_id": admin_id,
            }))
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;
        let verified = rows.into_iter().next().ok_or(DoctorError::LicenseNotFound)?;

        let user_path = format!("/rest/v1/users?user_id=eq.{}", license.doctor_id);
        let activated: Vec<Value> = self.supabase
            .update(&user_path, json!({ "is_active": true }))
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;
        if activated.is_empty() {
            warn!("License {} verified but doctor user {} does not exist", license_id, license.doctor_id);
        }

        info!("License {} verified by admin {}", license_id, admin_id);
        Ok(verified)
    }
}
