// libs/appointment-cell/src/models.rs
use serde::{Deserialize, Serialize};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::fmt;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub appointment_id: i64,
    pub patient_id: i64,
    pub doctor_id: i64,
    /// Slot this appointment occupies. Legacy rows may lack it.
    pub slot_id: Option<i64>,
    pub appointment_time: NaiveDateTime,
    pub duration_minutes: i32,
    pub reason: Option<String>,
    pub status: AppointmentStatus,
    pub consultation_type: ConsultationType,
    pub cancellation_reason: Option<String>,
}

impl Appointment {
    pub fn scheduled_end_time(&self) -> NaiveDateTime {
        self.appointment_time + Duration::minutes(self.duration_minutes as i64)
    }

    /// Time left until the appointment starts; negative once it has begun.
    pub fn time_until_start(&self, now: NaiveDateTime) -> Duration {
        self.appointment_time - now
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    CancelledByPatient,
    CancelledByDoctor,
    NoShow,
}

impl AppointmentStatus {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppointmentStatus::CancelledByPatient | AppointmentStatus::CancelledByDoctor)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ConsultationType {
    #[default]
    Offline,
    Online,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    Patient,
    Doctor,
}

impl CancelledBy {
    pub fn status(&self) -> AppointmentStatus {
        match self {
            CancelledBy::Patient => AppointmentStatus::CancelledByPatient,
            CancelledBy::Doctor => AppointmentStatus::CancelledByDoctor,
        }
    }
}

// ==============================================================================
// BILLING MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_id: i64,
    pub appointment_id: i64,
    pub amount: f64,
    pub issue_date: Option<NaiveDateTime>,
    pub due_date: Option<NaiveDate>,
    pub status: InvoiceStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Cancelled,
    Overdue,
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ==============================================================================
// REQUEST / RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub slot_id: i64,
    pub reason: Option<String>,
    #[serde(default)]
    pub consultation_type: ConsultationType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
    /// Only honoured for admins; patients and doctors cancel as themselves.
    pub cancelled_by: Option<CancelledBy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub new_slot_id: i64,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingOutcome {
    pub appointment: Appointment,
    pub invoice: Invoice,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationOutcome {
    pub appointment: Appointment,
    /// False when the originating slot could not be found.
    pub slot_released: bool,
    pub payment_refunded: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentListQuery {
    pub status: Option<AppointmentStatus>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentPage {
    pub appointments: Vec<Appointment>,
    pub page: u32,
    pub per_page: u32,
}

// ==============================================================================
// ERROR MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Slot not found")]
    SlotNotFound,

    #[error("Slot already booked")]
    SlotAlreadyBooked,

    #[error("New slot not found")]
    NewSlotNotFound,

    #[error("New slot already booked")]
    NewSlotAlreadyBooked,

    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Invoice not found")]
    InvoiceNotFound,

    #[error("Appointments can only be cancelled at least {0} hours in advance")]
    CancellationWindowClosed(i64),

    #[error("Appointments can only be rescheduled at least {0} hours in advance")]
    RescheduleWindowClosed(i64),

    #[error("Appointment cannot be modified in current status: {0}")]
    InvalidStatusTransition(AppointmentStatus),

    #[error("Invalid appointment time: {0}")]
    InvalidTime(String),

    #[error("Unauthorized access to appointment")]
    Unauthorized,

    #[error("Appointment was changed by another request, please reload")]
    ConcurrentModification,

    #[error("System error while booking appointment")]
    BookingFailed,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

// ==============================================================================
// VALIDATION MODELS
// ==============================================================================

#[derive(Debug, Clone)]
pub struct AppointmentValidationRules {
    pub allowed_cancellation_hours: i64,
    pub allowed_reschedule_hours: i64,
    pub default_duration_minutes: i32,
    pub default_page_size: u32,
}

impl Default for AppointmentValidationRules {
    fn default() -> Self {
        Self {
            allowed_cancellation_hours: 24,
            allowed_reschedule_hours: 24,
            default_duration_minutes: 30,
            default_page_size: 6,
        }
    }
}
