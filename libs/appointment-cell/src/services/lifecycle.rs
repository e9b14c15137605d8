// libs/appointment-cell/src/services/lifecycle.rs
use chrono::{Duration, NaiveDateTime};
use tracing::{debug, warn};

use crate::models::{AppointmentError, AppointmentStatus};

/// Appointment status state machine.
///
/// `Scheduled` is the only non-terminal state.
pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that a status transition is allowed
    pub fn validate_status_transition(
        &self,
        current_status: &AppointmentStatus,
        new_status: &AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!("Validating status transition from {:?} to {:?}", current_status, new_status);

        if !self.get_valid_transitions(current_status).contains(new_status) {
            warn!("Invalid status transition attempted: {:?} -> {:?}", current_status, new_status);
            return Err(AppointmentError::InvalidStatusTransition(*current_status));
        }

        Ok(())
    }

    /// Get all valid next statuses for a given current status
    pub fn get_valid_transitions(&self, current_status: &AppointmentStatus) -> Vec<AppointmentStatus> {
        match current_status {
            AppointmentStatus::Scheduled => vec![
                AppointmentStatus::Completed,
                AppointmentStatus::CancelledByPatient,
                AppointmentStatus::CancelledByDoctor,
                AppointmentStatus::NoShow,
            ],
            // Terminal states - no transitions allowed
            AppointmentStatus::Completed
            | AppointmentStatus::CancelledByPatient
            | AppointmentStatus::CancelledByDoctor
            | AppointmentStatus::NoShow => vec![],
        }
    }

    pub fn is_terminal(&self, status: &AppointmentStatus) -> bool {
        self.get_valid_transitions(status).is_empty()
    }

    /// Cancelling and rescheduling need at least `notice_hours` before the
    /// appointment starts.
    pub fn has_required_notice(
        &self,
        appointment_time: NaiveDateTime,
        now: NaiveDateTime,
        notice_hours: i64,
    ) -> bool {
        appointment_time - now >= Duration::hours(notice_hours)
    }

    /// A no-show can only be recorded once the appointment time has passed.
    pub fn can_mark_no_show(&self, appointment_time: NaiveDateTime, now: NaiveDateTime) -> bool {
        now >= appointment_time
    }
}

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}
