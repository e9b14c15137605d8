use std::collections::HashSet;

use anyhow::Result;
use chrono::{Duration, NaiveDate, NaiveTime};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    AvailableSlot, DayOfWeek, DoctorAvailability, DoctorError, UpsertAvailabilityRequest,
};

/// Longest date range one generation request may cover.
pub const MAX_GENERATION_DAYS: i64 = 90;

pub struct AvailabilityService {
    supabase: SupabaseClient,
    slot_duration_minutes: i64,
}

#[derive(Debug, Deserialize)]
struct ExistingSlot {
    slot_date: NaiveDate,
    start_time: NaiveTime,
}

impl AvailabilityService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            slot_duration_minutes: config.slot_duration_minutes,
        }
    }

    /// Create or replace the weekly window for one day.
    ///
    /// A doctor has at most one row per day of week.
    pub async fn upsert_availability(
        &self,
        doctor_id: i64,
        request: UpsertAvailabilityRequest,
    ) -> Result<DoctorAvailability, DoctorError> {
        debug!("Upserting {} availability for doctor: {}", request.day_of_week, doctor_id);

        if request.start_time >= request.end_time {
            return Err(DoctorError::ValidationError("Start time must be before end time".to_string()));
        }

        let body = json!({
            "doctor_id": doctor_id,
            "day_of_week": request.day_of_week,
            "start_time": request.start_time.format("%H:%M:%S").to_string(),
            "end_time": request.end_time.format("%H:%M:%S").to_string(),
            "is_available": request.is_available.unwrap_or(true),
        });

        let rows: Vec<DoctorAvailability> = match self.get_availability_by_day(doctor_id, request.day_of_week).await? {
            Some(existing) => {
                let path = format!(
                    "/rest/v1/doctor_availabilities?availability_id=eq.{}",
                    existing.availability_id
                );
                self.supabase.update(&path, body).await
            }
            None => self.supabase.insert("doctor_availabilities", body).await,
        }
        .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        let availability = rows
            .into_iter()
            .next()
            .ok_or_else(|| DoctorError::DatabaseError("Failed to store availability".to_string()))?;

        info!("Availability {} stored for doctor {}", availability.availability_id, doctor_id);
        Ok(availability)
    }

    pub async fn get_availabilities(&self, doctor_id: i64) -> Result<Vec<DoctorAvailability>, DoctorError> {
        let path = format!("/rest/v1/doctor_availabilities?doctor_id=eq.{}", doctor_id);
        self.supabase
            .select(&path)
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))
    }

    pub async fn get_availability_by_day(
        &self,
        doctor_id: i64,
        day: DayOfWeek,
    ) -> Result<Option<DoctorAvailability>, DoctorError> {
        let path = format!(
            "/rest/v1/doctor_availabilities?doctor_id=eq.{}&day_of_week=eq.{}",
            doctor_id, day
        );
        self.supabase
            .select_one(&path)
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))
    }

    /// Materialise bookable slots from the weekly windows for every date in
    /// `from..=to`, skipping slots that already exist.
    pub async fn generate_slots(
        &self,
        doctor_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AvailableSlot>, DoctorError> {
        if to < from {
            return Err(DoctorError::ValidationError("End date must not be before start date".to_string()));
        }
        if (to - from).num_days() >= MAX_GENERATION_DAYS {
            return Err(DoctorError::ValidationError(format!(
                "Slots can be generated for at most {} days at a time",
                MAX_GENERATION_DAYS
            )));
        }
        if self.slot_duration_minutes <= 0 {
            return Err(DoctorError::ValidationError("Slot duration must be positive".to_string()));
        }

        let availabilities = self.get_availabilities(doctor_id).await?;

        let existing_path = format!(
            "/rest/v1/available_slots?select=slot_date,start_time&doctor_id=eq.{}&slot_date=gte.{}&slot_date=lte.{}",
            doctor_id, from, to
        );
        let existing: Vec<ExistingSlot> = self.supabase
            .select(&existing_path)
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;
        let taken: HashSet<(NaiveDate, NaiveTime)> =
            existing.into_iter().map(|s| (s.slot_date, s.start_time)).collect();

        let planned = plan_slots(&availabilities, &taken, from, to, self.slot_duration_minutes);
        if planned.is_empty() {
            warn!("No new slots to generate for doctor {} between {} and {}", doctor_id, from, to);
            return Ok(Vec::new());
        }

        let rows: Vec<Value> = planned
            .iter()
            .map(|(date, start, end)| json!({
                "doctor_id": doctor_id,
                "slot_date": date.format("%Y-%m-%d").to_string(),
                "start_time": start.format("%H:%M:%S").to_string(),
                "end_time": end.format("%H:%M:%S").to_string(),
                "is_booked": false,
            }))
            .collect();

        let created: Vec<AvailableSlot> = self.supabase
            .insert("available_slots", Value::Array(rows))
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        info!("Generated {} slots for doctor {}", created.len(), doctor_id);
        Ok(created)
    }
}

/// Split a window into back-to-back slots of `minutes`; a trailing
/// remainder shorter than one slot is dropped.
pub fn split_window(start: NaiveTime, end: NaiveTime, minutes: i64) -> Vec<(NaiveTime, NaiveTime)> {
    let mut slots = Vec::new();
    if minutes <= 0 {
        return slots;
    }

    let step = Duration::minutes(minutes);
    let mut cursor = start;
    while cursor < end && end - cursor >= step {
        let next = cursor + step;
        slots.push((cursor, next));
        cursor = next;
    }
    slots
}

pub fn plan_slots(
    availabilities: &[DoctorAvailability],
    taken: &HashSet<(NaiveDate, NaiveTime)>,
    from: NaiveDate,
    to: NaiveDate,
    minutes: i64,
) -> Vec<(NaiveDate, NaiveTime, NaiveTime)> {
    let mut planned = Vec::new();

    for date in from.iter_days().take_while(|d| *d <= to) {
        let day = DayOfWeek::of(date);
        let windows = availabilities
            .iter()
            .filter(|a| a.is_available && a.day_of_week == day);

        for window in windows {
            for (start, end) in split_window(window.start_time, window.end_time, minutes) {
                if !taken.contains(&(date, start)) {
                    planned.push((date, start, end));
                }
            }
        }
    }

    planned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn window(day: DayOfWeek, start: NaiveTime, end: NaiveTime, is_available: bool) -> DoctorAvailability {
        DoctorAvailability {
            availability_id: 1,
            doctor_id: 7,
            day_of_week: day,
            is_available,
            start_time: start,
            end_time: end,
        }
    }

    #[test]
    fn split_window_drops_short_remainder() {
        let slots = split_window(t(8, 0), t(9, 40), 30);
        assert_eq!(slots, vec![(t(8, 0), t(8, 30)), (t(8, 30), t(9, 0)), (t(9, 0), t(9, 30))]);
    }

    #[test]
    fn split_window_rejects_non_positive_duration() {
        assert!(split_window(t(8, 0), t(9, 0), 0).is_empty());
    }

    #[test]
    fn plan_slots_uses_matching_weekdays_and_skips_existing() {
        // 2026-03-02 is a Monday, 2026-03-03 a Tuesday
        let monday = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2026, 3, 3).unwrap();
        let availabilities = vec![
            window(DayOfWeek::Monday, t(9, 0), t(10, 0), true),
            window(DayOfWeek::Tuesday, t(9, 0), t(10, 0), false),
        ];
        let mut taken = HashSet::new();
        taken.insert((monday, t(9, 0)));

        let planned = plan_slots(&availabilities, &taken, monday, tuesday, 30);
        assert_eq!(planned, vec![(monday, t(9, 30), t(10, 0))]);
    }
}
