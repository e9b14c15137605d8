use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{AvailableSlot, DoctorError, SlotFilters, SlotListing, SlotPage};

pub const DEFAULT_SLOTS_PER_PAGE: u32 = 10;

const SLOT_LISTING_SELECT: &str = "slot_id,doctor_id,slot_date,start_time,end_time,is_booked,\
doctor:doctors!inner(hospital_id,specialty_id,consultation_fee,\
user:users(first_name,last_name),hospital:hospitals(name),specialty:specialties(name))";

#[derive(Debug, Deserialize)]
struct SlotId {
    #[allow(dead_code)]
    slot_id: i64,
}

/// Slot reads plus the two state changes the booking workflow relies on.
///
/// `claim_slot` is a compare-and-swap: the PATCH only matches a row that is
/// still unbooked, so two concurrent claims cannot both succeed.
pub struct SlotService {
    supabase: SupabaseClient,
}

impl SlotService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub async fn get_slot(&self, slot_id: i64) -> Result<Option<AvailableSlot>, DoctorError> {
        debug!("Fetching slot {}", slot_id);

        let path = format!("/rest/v1/available_slots?slot_id=eq.{}", slot_id);
        self.supabase
            .select_one(&path)
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))
    }

    /// Mark the slot booked if and only if it is currently free.
    ///
    /// Returns `Ok(None)` when another booking got there first.
    pub async fn claim_slot(&self, slot_id: i64) -> Result<Option<AvailableSlot>, DoctorError> {
        let path = format!("/rest/v1/available_slots?slot_id=eq.{}&is_booked=eq.false", slot_id);
        let rows: Vec<AvailableSlot> = self.supabase
            .update(&path, json!({ "is_booked": true }))
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        match rows.into_iter().next() {
            Some(slot) => {
                info!("Slot {} claimed", slot_id);
                Ok(Some(slot))
            }
            None => {
                warn!("Slot {} could not be claimed, already booked or missing", slot_id);
                Ok(None)
            }
        }
    }

    /// Return the slot to the pool. `false` when no such slot exists.
    pub async fn release_slot(&self, slot_id: i64) -> Result<bool, DoctorError> {
        let path = format!("/rest/v1/available_slots?slot_id=eq.{}", slot_id);
        let rows: Vec<AvailableSlot> = self.supabase
            .update(&path, json!({ "is_booked": false }))
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        if rows.is_empty() {
            warn!("Slot {} not found while releasing", slot_id);
            return Ok(false);
        }

        info!("Slot {} released", slot_id);
        Ok(true)
    }

    /// Locate a slot by doctor, date and start time.
    pub async fn find_slot_at(
        &self,
        doctor_id: i64,
        date: NaiveDate,
        start_time: NaiveTime,
    ) -> Result<Option<AvailableSlot>, DoctorError> {
        let path = format!(
            "/rest/v1/available_slots?doctor_id=eq.{}&slot_date=eq.{}&start_time=eq.{}",
            doctor_id,
            date.format("%Y-%m-%d"),
            start_time.format("%H:%M:%S")
        );
        self.supabase
            .select_one(&path)
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))
    }

    /// Unbooked slots that have not started yet, ordered by date then start.
    pub async fn get_available_slots(&self, filters: &SlotFilters) -> Result<SlotPage, DoctorError> {
        let page = filters.page.unwrap_or(1).max(1);
        let per_page = filters.per_page.unwrap_or(DEFAULT_SLOTS_PER_PAGE).clamp(1, 100);
        let offset = (page - 1) * per_page;

        let now = Utc::now().naive_utc();
        let path = format!(
            "/rest/v1/available_slots?select={}&{}&order=slot_date.asc,start_time.asc&limit={}&offset={}",
            SLOT_LISTING_SELECT,
            available_slot_filter(filters, now),
            per_page,
            offset
        );

        let slots: Vec<SlotListing> = self.supabase
            .select(&path)
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;
        let total = self.count_available_slots(filters).await?;

        Ok(SlotPage { slots, page, per_page, total })
    }

    pub async fn count_available_slots(&self, filters: &SlotFilters) -> Result<usize, DoctorError> {
        let now = Utc::now().naive_utc();
        let path = format!(
            "/rest/v1/available_slots?select=slot_id,doctor:doctors!inner(hospital_id,specialty_id)&{}",
            available_slot_filter(filters, now)
        );

        let ids: Vec<SlotId> = self.supabase
            .select(&path)
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;
        Ok(ids.len())
    }
}

/// PostgREST filter for free, upcoming slots matching `filters`.
pub fn available_slot_filter(filters: &SlotFilters, now: NaiveDateTime) -> String {
    let today = now.date().format("%Y-%m-%d");
    let clock = now.time().format("%H:%M:%S");

    let mut parts = vec![
        "is_booked=eq.false".to_string(),
        format!("or=(slot_date.gt.{today},and(slot_date.eq.{today},start_time.gt.{clock}))"),
    ];

    if let Some(hospital_id) = filters.hospital_id {
        parts.push(format!("doctor.hospital_id=eq.{}", hospital_id));
    }
    if let Some(specialty_id) = filters.specialty_id {
        parts.push(format!("doctor.specialty_id=eq.{}", specialty_id));
    }
    if let Some(doctor_id) = filters.doctor_id {
        parts.push(format!("doctor_id=eq.{}", doctor_id));
    }
    if let Some(date) = filters.date {
        parts.push(format!("slot_date=eq.{}", date.format("%Y-%m-%d")));
    }

    parts.join("&")
}
