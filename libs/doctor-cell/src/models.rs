// libs/doctor-cell/src/models.rs
use serde::{Deserialize, Serialize};
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use std::fmt;

// ==============================================================================
// DIRECTORY MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doctor {
    pub doctor_id: i64,
    pub hospital_id: i64,
    pub specialty_id: i64,
    #[serde(default)]
    pub years_experience: i32,
    pub educational_level: Option<String>,
    pub bio: Option<String>,
    #[serde(default)]
    pub consultation_fee: f64,
    #[serde(default)]
    pub average_rating: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hospital {
    pub hospital_id: i64,
    pub name: String,
    pub address: String,
    pub phone_number: Option<String>,
    #[serde(default)]
    pub accepts_insurance: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Specialty {
    pub specialty_id: i64,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameRef {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonName {
    pub first_name: String,
    pub last_name: String,
}

impl PersonName {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// A doctor row with its user, hospital and specialty embedded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorListing {
    pub doctor_id: i64,
    #[serde(default)]
    pub years_experience: i32,
    pub consultation_fee: Option<f64>,
    pub average_rating: Option<f64>,
    pub user: PersonName,
    pub hospital: NameRef,
    pub specialty: NameRef,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DoctorSearchQuery {
    pub hospital: Option<String>,
    pub specialty: Option<String>,
    pub name: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoctorSearchResult {
    pub doctor_id: i64,
    pub name: String,
    pub hospital: String,
    pub specialty: String,
    pub experience: i32,
    pub consultation_fee: Option<f64>,
    pub rating: Option<f64>,
}

impl From<DoctorListing> for DoctorSearchResult {
    fn from(listing: DoctorListing) -> Self {
        Self {
            doctor_id: listing.doctor_id,
            name: listing.user.full_name(),
            hospital: listing.hospital.name,
            specialty: listing.specialty.name,
            experience: listing.years_experience,
            consultation_fee: listing.consultation_fee,
            rating: listing.average_rating,
        }
    }
}

// ==============================================================================
// WEEKLY AVAILABILITY
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl From<Weekday> for DayOfWeek {
    fn from(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
            Weekday::Sun => DayOfWeek::Sunday,
        }
    }
}

impl DayOfWeek {
    pub fn of(date: NaiveDate) -> Self {
        date.weekday().into()
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorAvailability {
    pub availability_id: i64,
    pub doctor_id: i64,
    pub day_of_week: DayOfWeek,
    #[serde(default = "default_true")]
    pub is_available: bool,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertAvailabilityRequest {
    pub day_of_week: DayOfWeek,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_available: Option<bool>,
}

// ==============================================================================
// BOOKABLE SLOTS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailableSlot {
    pub slot_id: i64,
    pub doctor_id: i64,
    pub slot_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[serde(default)]
    pub is_booked: bool,
}

impl AvailableSlot {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.slot_date.and_time(self.start_time)
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }

    /// A slot is still offered while its start lies after `now`.
    pub fn is_upcoming(&self, now: NaiveDateTime) -> bool {
        self.starts_at() > now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotDoctor {
    pub hospital_id: i64,
    pub specialty_id: i64,
    pub consultation_fee: Option<f64>,
    pub user: Option<PersonName>,
    pub hospital: Option<NameRef>,
    pub specialty: Option<NameRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotListing {
    #[serde(flatten)]
    pub slot: AvailableSlot,
    pub doctor: Option<SlotDoctor>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotFilters {
    pub hospital_id: Option<i64>,
    pub specialty_id: Option<i64>,
    pub doctor_id: Option<i64>,
    pub date: Option<NaiveDate>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotPage {
    pub slots: Vec<SlotListing>,
    pub page: u32,
    pub per_page: u32,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateSlotsRequest {
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
}

// ==============================================================================
// LICENSES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorLicense {
    pub license_id: i64,
    pub doctor_id: i64,
    pub license_number: String,
    pub issuing_authority: String,
    pub issue_date: NaiveDate,
    pub expiry_date: Option<NaiveDate>,
    pub scope_description: Option<String>,
    #[serde(default)]
    pub is_verified: bool,
    pub verification_date: Option<NaiveDate>,
    pub verified_by_admin_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitLicenseRequest {
    pub license_number: String,
    pub issuing_authority: String,
    pub issue_date: NaiveDate,
    pub expiry_date: Option<NaiveDate>,
    pub scope_description: Option<String>,
}

// ==============================================================================
// REVIEWS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub review_id: i64,
    pub appointment_id: i64,
    pub patient_id: i64,
    pub doctor_id: i64,
    pub rating: i32,
    pub comment: Option<String>,
    pub review_date: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
    pub doctor_response: Option<String>,
    pub response_date: Option<NaiveDateTime>,
    pub response_updated_at: Option<NaiveDateTime>,
    #[serde(default = "default_true")]
    pub is_visible: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddReviewRequest {
    pub appointment_id: i64,
    pub doctor_id: i64,
    pub rating: i32,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateReviewRequest {
    pub rating: i32,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorReplyRequest {
    pub response: String,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum DoctorError {
    #[error("Doctor not found")]
    NotFound,

    #[error("Slot not found")]
    SlotNotFound,

    #[error("License not found")]
    LicenseNotFound,

    #[error("License has already been verified")]
    LicenseAlreadyVerified,

    #[error("License number {0} is already registered")]
    DuplicateLicense(String),

    #[error("Reviews can only be left after a completed visit with this doctor")]
    ReviewNotAllowed,

    #[error("This appointment has already been reviewed")]
    AlreadyReviewed,

    #[error("Review not found or not owned by you")]
    ReviewNotFound,

    #[error("A review can only be edited once")]
    ReviewAlreadyEdited,

    #[error("A reply can only be edited once")]
    ReplyAlreadyEdited,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_timing_helpers() {
        let slot = AvailableSlot {
            slot_id: 1,
            doctor_id: 2,
            slot_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(9, 45, 0).unwrap(),
            is_booked: false,
        };

        assert_eq!(slot.duration_minutes(), 45);
        assert_eq!(slot.starts_at().to_string(), "2026-03-02 09:00:00");
        assert!(slot.is_upcoming(slot.starts_at() - chrono::Duration::minutes(1)));
        assert!(!slot.is_upcoming(slot.starts_at()));
    }

    #[test]
    fn day_of_week_from_date() {
        // 2026-03-02 is a Monday
        assert_eq!(DayOfWeek::of(NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()), DayOfWeek::Monday);
        assert_eq!(DayOfWeek::Sunday.to_string(), "Sunday");
    }

    #[test]
    fn slot_listing_flattens_slot_columns() {
        let listing: SlotListing = serde_json::from_value(serde_json::json!({
            "slot_id": 4,
            "doctor_id": 9,
            "slot_date": "2026-03-02",
            "start_time": "10:00:00",
            "end_time": "10:30:00",
            "is_booked": false,
            "doctor": {
                "hospital_id": 1,
                "specialty_id": 2,
                "consultation_fee": 200000.0,
                "user": {"first_name": "An", "last_name": "Tran"},
                "hospital": {"name": "City Hospital"},
                "specialty": {"name": "Cardiology"}
            }
        })).unwrap();

        assert_eq!(listing.slot.slot_id, 4);
        assert_eq!(listing.doctor.unwrap().user.unwrap().full_name(), "An Tran");
    }
}
