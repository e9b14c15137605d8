use anyhow::Result;
use serde_json::json;
use tracing::{debug, error, info};

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    Doctor, DoctorError, DoctorListing, DoctorSearchQuery, DoctorSearchResult, Hospital, Specialty,
};

const DOCTOR_LISTING_SELECT: &str = "doctor_id,years_experience,consultation_fee,average_rating,\
user:users!inner(first_name,last_name,is_active),\
hospital:hospitals!inner(name),\
specialty:specialties!inner(name)";

pub struct DoctorService {
    supabase: SupabaseClient,
}

impl DoctorService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub fn supabase(&self) -> &SupabaseClient {
        &self.supabase
    }

    /// Get doctor by ID
    pub async fn get_doctor(&self, doctor_id: i64) -> Result<Doctor, DoctorError> {
        debug!("Fetching doctor profile: {}", doctor_id);

        let path = format!("/rest/v1/doctors?doctor_id=eq.{}", doctor_id);
        self.supabase
            .select_one::<Doctor>(&path)
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?
            .ok_or(DoctorError::NotFound)
    }

    pub async fn list_hospitals(&self) -> Result<Vec<Hospital>, DoctorError> {
        self.supabase
            .select("/rest/v1/hospitals?order=name.asc")
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))
    }

    pub async fn list_specialties(&self) -> Result<Vec<Specialty>, DoctorError> {
        self.supabase
            .select("/rest/v1/specialties?order=name.asc")
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))
    }

    /// Search active doctors by hospital, specialty and name.
    ///
    /// Hospital and specialty are pushed down as `ilike` filters on the
    /// embedded resources; the name filter spans two columns and the
    /// concatenated full name, so it runs here.
    pub async fn search_doctors(
        &self,
        query: &DoctorSearchQuery,
    ) -> Result<Vec<DoctorSearchResult>, DoctorError> {
        debug!("Searching doctors with filters: {:?}", query);

        let mut path = format!(
            "/rest/v1/doctors?select={}&user.is_active=eq.true",
            DOCTOR_LISTING_SELECT
        );

        if let Some(hospital) = non_blank(&query.hospital) {
            path.push_str(&format!("&hospital.name=ilike.*{}*", urlencoding::encode(hospital)));
        }
        if let Some(specialty) = non_blank(&query.specialty) {
            path.push_str(&format!("&specialty.name=ilike.*{}*", urlencoding::encode(specialty)));
        }

        let listings: Vec<DoctorListing> = self.supabase
            .select(&path)
            .await
            .map_err(|e| {
                error!("Doctor search failed: {}", e);
                DoctorError::DatabaseError(e.to_string())
            })?;

        Ok(rank_search_results(listings, non_blank(&query.name), query.limit))
    }

    /// Store the recomputed mean rating on the doctor row.
    pub async fn update_average_rating(&self, doctor_id: i64, average: f64) -> Result<(), DoctorError> {
        let path = format!("/rest/v1/doctors?doctor_id=eq.{}", doctor_id);
        let _: Vec<Doctor> = self.supabase
            .update(&path, json!({ "average_rating": average }))
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        info!("Doctor {} average rating set to {:.2}", doctor_id, average);
        Ok(())
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Apply the name filter, order by first then last name and truncate.
pub fn rank_search_results(
    listings: Vec<DoctorListing>,
    name: Option<&str>,
    limit: Option<usize>,
) -> Vec<DoctorSearchResult> {
    let needle = name.map(str::to_lowercase);

    let mut matches: Vec<DoctorListing> = listings
        .into_iter()
        .filter(|listing| match &needle {
            Some(needle) => {
                let first = listing.user.first_name.to_lowercase();
                let last = listing.user.last_name.to_lowercase();
                first.contains(needle.as_str())
                    || last.contains(needle.as_str())
                    || format!("{} {}", first, last).contains(needle.as_str())
            }
            None => true,
        })
        .collect();

    matches.sort_by(|a, b| {
        a.user.first_name
            .cmp(&b.user.first_name)
            .then_with(|| a.user.last_name.cmp(&b.user.last_name))
    });

    if let Some(limit) = limit {
        matches.truncate(limit);
    }

    matches.into_iter().map(DoctorSearchResult::from).collect()
}
