// libs/appointment-cell/src/services/booking.rs
use anyhow::Result;
use chrono::{NaiveDateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};
use std::sync::Arc;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use doctor_cell::models::{AvailableSlot, DoctorError};
use doctor_cell::services::{DoctorService, SlotService};

use crate::models::{
    Appointment, AppointmentError, AppointmentListQuery, AppointmentPage, AppointmentStatus,
    AppointmentValidationRules, BookAppointmentRequest, BookingOutcome, CancelledBy,
    CancellationOutcome, Invoice, InvoiceStatus, RescheduleAppointmentRequest,
};
use crate::services::lifecycle::AppointmentLifecycleService;

/// Turns free slots into appointments and back.
///
/// PostgREST gives no multi-row transactions, so each workflow claims the
/// slot with a conditional update first and undoes its own writes if a
/// later step fails.
pub struct AppointmentBookingService {
    supabase: Arc<SupabaseClient>,
    slots: SlotService,
    doctors: DoctorService,
    lifecycle_service: AppointmentLifecycleService,
    validation_rules: AppointmentValidationRules,
}

impl AppointmentBookingService {
    pub fn new(config: &AppConfig) -> Self {
        let validation_rules = AppointmentValidationRules {
            allowed_cancellation_hours: config.cancellation_notice_hours,
            allowed_reschedule_hours: config.cancellation_notice_hours,
            ..AppointmentValidationRules::default()
        };

        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            slots: SlotService::new(config),
            doctors: DoctorService::new(config),
            lifecycle_service: AppointmentLifecycleService::new(),
            validation_rules,
        }
    }

    // ==========================================================================
    // BOOK
    // ==========================================================================

    pub async fn book_appointment(
        &self,
        patient_id: i64,
        request: BookAppointmentRequest,
    ) -> Result<BookingOutcome, AppointmentError> {
        debug!("Booking slot {} for patient {}", request.slot_id, patient_id);

        let slot = self.slots.get_slot(request.slot_id).await
            .map_err(slot_error)?
            .ok_or(AppointmentError::SlotNotFound)?;

        if slot.is_booked {
            warn!("Slot {} is already booked", slot.slot_id);
            return Err(AppointmentError::SlotAlreadyBooked);
        }
        if !slot.is_upcoming(now()) {
            return Err(AppointmentError::InvalidTime("This slot has already started".to_string()));
        }

        let doctor = self.doctors.get_doctor(slot.doctor_id).await
            .map_err(|e| match e {
                DoctorError::NotFound => AppointmentError::DoctorNotFound,
                other => AppointmentError::DatabaseError(other.to_string()),
            })?;

        if self.slots.claim_slot(slot.slot_id).await.map_err(slot_error)?.is_none() {
            return Err(AppointmentError::SlotAlreadyBooked);
        }

        let appointment = match self.insert_appointment(patient_id, &slot, &request).await {
            Ok(appointment) => appointment,
            Err(e) => {
                error!("Failed to create appointment for slot {}: {}", slot.slot_id, e);
                self.compensate_booking(slot.slot_id, None).await;
                return Err(AppointmentError::BookingFailed);
            }
        };

        let invoice = match self.insert_invoice(&appointment, &slot, doctor.consultation_fee).await {
            Ok(invoice) => invoice,
            Err(e) => {
                error!("Failed to create invoice for appointment {}: {}", appointment.appointment_id, e);
                self.compensate_booking(slot.slot_id, Some(appointment.appointment_id)).await;
                return Err(AppointmentError::BookingFailed);
            }
        };

        info!(
            "Appointment {} booked on slot {} (invoice {})",
            appointment.appointment_id, slot.slot_id, invoice.invoice_id
        );
        Ok(BookingOutcome { appointment, invoice })
    }

    async fn insert_appointment(
        &self,
        patient_id: i64,
        slot: &AvailableSlot,
        request: &BookAppointmentRequest,
    ) -> Result<Appointment> {
        let duration = match slot.duration_minutes() {
            d if d > 0 => d as i32,
            _ => self.validation_rules.default_duration_minutes,
        };

        let rows: Vec<Appointment> = self.supabase.insert("appointments", json!({
            "patient_id": patient_id,
            "doctor_id": slot.doctor_id,
            "slot_id": slot.slot_id,
            "appointment_time": slot.starts_at(),
            "duration_minutes": duration,
            "reason": request.reason,
            "status": AppointmentStatus::Scheduled,
            "consultation_type": request.consultation_type,
        })).await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Appointment insert returned no rows"))
    }

    async fn insert_invoice(&self, appointment: &Appointment, slot: &AvailableSlot, amount: f64) -> Result<Invoice> {
        let rows: Vec<Invoice> = self.supabase.insert("invoices", json!({
            "appointment_id": appointment.appointment_id,
            "amount": amount,
            "issue_date": now(),
            "due_date": slot.slot_date,
            "status": InvoiceStatus::Pending,
        })).await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Invoice insert returned no rows"))
    }

    /// Undo a partially applied booking. Failures are logged; the caller
    /// already reports the booking as failed.
    async fn compensate_booking(&self, slot_id: i64, appointment_id: Option<i64>) {
        if let Some(appointment_id) = appointment_id {
            let path = format!("/rest/v1/appointments?appointment_id=eq.{}", appointment_id);
            if let Err(e) = self.supabase.delete::<Value>(&path).await {
                error!("Compensation failed to delete appointment {}: {}", appointment_id, e);
            }
        }

        if let Err(e) = self.slots.release_slot(slot_id).await {
            error!("Compensation failed to release slot {}: {}", slot_id, e);
        }
    }

    // ==========================================================================
    // CANCEL
    // ==========================================================================

    pub async fn cancel_appointment(
        &self,
        appointment_id: i64,
        reason: Option<String>,
        cancelled_by: CancelledBy,
    ) -> Result<CancellationOutcome, AppointmentError> {
        let appointment = self.get_appointment(appointment_id).await?;
        let new_status = cancelled_by.status();

        self.lifecycle_service.validate_status_transition(&appointment.status, &new_status)?;

        let notice = self.validation_rules.allowed_cancellation_hours;
        if !self.lifecycle_service.has_required_notice(appointment.appointment_time, now(), notice) {
            warn!("Cancellation of appointment {} rejected, less than {}h notice", appointment_id, notice);
            return Err(AppointmentError::CancellationWindowClosed(notice));
        }

        let updated = self.update_scheduled(appointment_id, json!({
            "status": new_status,
            "cancellation_reason": reason,
        })).await?;

        let payment_refunded = match self.cancel_invoice(appointment_id).await {
            Ok(refunded) => refunded,
            Err(e) => {
                error!("Cancelling invoice of appointment {} failed, restoring it: {}", appointment_id, e);
                self.restore_cancelled(&appointment, &new_status).await;
                return Err(e);
            }
        };
        let slot_released = self.release_appointment_slot(&appointment).await;

        info!(
            "Appointment {} cancelled ({}), slot released: {}, refunded: {}",
            appointment_id, new_status, slot_released, payment_refunded
        );

        Ok(CancellationOutcome {
            appointment: updated,
            slot_released,
            payment_refunded,
        })
    }

    /// Put a cancelled appointment back to `Scheduled` so the cancellation
    /// can be retried.
    async fn restore_cancelled(&self, appointment: &Appointment, cancelled_status: &AppointmentStatus) {
        let path = format!(
            "/rest/v1/appointments?appointment_id=eq.{}&status=eq.{}",
            appointment.appointment_id, cancelled_status
        );
        let restored: Result<Vec<Appointment>> = self.supabase
            .update(&path, json!({
                "status": AppointmentStatus::Scheduled,
                "cancellation_reason": appointment.cancellation_reason,
            }))
            .await;

        match restored {
            Ok(rows) if !rows.is_empty() => {
                info!("Appointment {} restored to Scheduled", appointment.appointment_id)
            }
            Ok(_) => warn!("Appointment {} changed before it could be restored", appointment.appointment_id),
            Err(e) => error!("Failed to restore appointment {}: {}", appointment.appointment_id, e),
        }
    }

    /// Cancel the invoice and settle its payment: a completed payment on a
    /// paid invoice becomes a refund, a pending one is failed so a late
    /// gateway callback cannot complete it. Returns whether a refund was
    /// recorded. On a payment error the invoice status is put back.
    async fn cancel_invoice(&self, appointment_id: i64) -> Result<bool, AppointmentError> {
        let invoice = match self.get_invoice_for_appointment(appointment_id).await {
            Ok(invoice) => invoice,
            Err(AppointmentError::InvoiceNotFound) => {
                warn!("Appointment {} has no invoice to cancel", appointment_id);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        if invoice.status == InvoiceStatus::Cancelled {
            return Ok(false);
        }

        let path = format!(
            "/rest/v1/invoices?invoice_id=eq.{}&status=eq.{}",
            invoice.invoice_id, invoice.status
        );
        let cancelled: Vec<Invoice> = self.supabase
            .update(&path, json!({ "status": InvoiceStatus::Cancelled }))
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;
        if cancelled.is_empty() {
            return Err(AppointmentError::ConcurrentModification);
        }

        let (path, body) = if invoice.status == InvoiceStatus::Paid {
            (
                format!("/rest/v1/payments?invoice_id=eq.{}&status=eq.Completed", invoice.invoice_id),
                json!({ "status": "Refunded" }),
            )
        } else {
            (
                format!("/rest/v1/payments?invoice_id=eq.{}&status=eq.Pending", invoice.invoice_id),
                json!({ "status": "Failed", "notes": "Appointment cancelled" }),
            )
        };

        match self.supabase.update::<Value>(&path, body).await {
            Ok(rows) => Ok(invoice.status == InvoiceStatus::Paid && !rows.is_empty()),
            Err(e) => {
                let restore = format!(
                    "/rest/v1/invoices?invoice_id=eq.{}&status=eq.Cancelled",
                    invoice.invoice_id
                );
                if let Err(restore_err) = self.supabase
                    .update::<Invoice>(&restore, json!({ "status": invoice.status }))
                    .await
                {
                    error!("Failed to restore invoice {}: {}", invoice.invoice_id, restore_err);
                }
                Err(AppointmentError::DatabaseError(e.to_string()))
            }
        }
    }

    // ==========================================================================
    // RESCHEDULE
    // ==========================================================================

    /// Move a scheduled appointment onto another free slot, possibly with a
    /// different doctor. The invoice keeps the fee agreed at booking and is
    /// not re-priced.
    pub async fn reschedule_appointment(
        &self,
        appointment_id: i64,
        request: RescheduleAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.get_appointment(appointment_id).await?;

        if appointment.status != AppointmentStatus::Scheduled {
            return Err(AppointmentError::InvalidStatusTransition(appointment.status));
        }

        let notice = self.validation_rules.allowed_reschedule_hours;
        if !self.lifecycle_service.has_required_notice(appointment.appointment_time, now(), notice) {
            warn!("Reschedule of appointment {} rejected, less than {}h notice", appointment_id, notice);
            return Err(AppointmentError::RescheduleWindowClosed(notice));
        }

        if appointment.slot_id == Some(request.new_slot_id) {
            return Err(AppointmentError::ValidationError(
                "The new slot is the one already booked".to_string(),
            ));
        }

        let new_slot = self.slots.get_slot(request.new_slot_id).await
            .map_err(slot_error)?
            .ok_or(AppointmentError::NewSlotNotFound)?;
        if new_slot.is_booked {
            return Err(AppointmentError::NewSlotAlreadyBooked);
        }
        if !new_slot.is_upcoming(now()) {
            return Err(AppointmentError::InvalidTime("The new slot has already started".to_string()));
        }

        if self.slots.claim_slot(new_slot.slot_id).await.map_err(slot_error)?.is_none() {
            return Err(AppointmentError::NewSlotAlreadyBooked);
        }

        let mut changes = Map::new();
        changes.insert("doctor_id".to_string(), json!(new_slot.doctor_id));
        changes.insert("slot_id".to_string(), json!(new_slot.slot_id));
        changes.insert("appointment_time".to_string(), json!(new_slot.starts_at()));
        let duration = match new_slot.duration_minutes() {
            d if d > 0 => d as i32,
            _ => self.validation_rules.default_duration_minutes,
        };
        changes.insert("duration_minutes".to_string(), json!(duration));
        if let Some(reason) = request.reason.filter(|r| !r.trim().is_empty()) {
            changes.insert("reason".to_string(), json!(reason));
        }

        let updated = match self.update_scheduled(appointment_id, Value::Object(changes)).await {
            Ok(updated) => updated,
            Err(e) => {
                error!("Reschedule of appointment {} failed, releasing slot {}: {}", appointment_id, new_slot.slot_id, e);
                if let Err(release_err) = self.slots.release_slot(new_slot.slot_id).await {
                    error!("Failed to release slot {}: {}", new_slot.slot_id, release_err);
                }
                return Err(e);
            }
        };

        match self.try_release_appointment_slot(&appointment).await {
            Ok(true) => {}
            Ok(false) => warn!("Appointment {} had no previous slot to release", appointment_id),
            Err(e) => {
                error!("Releasing previous slot of appointment {} failed, undoing move: {}", appointment_id, e);
                self.undo_reschedule(&appointment, new_slot.slot_id).await;
                return Err(e);
            }
        }

        info!("Appointment {} moved to slot {}", appointment_id, new_slot.slot_id);
        Ok(updated)
    }

    // ==========================================================================
    // COMPLETE / NO-SHOW
    // ==========================================================================

    pub async fn complete_appointment(&self, appointment_id: i64) -> Result<Appointment, AppointmentError> {
        let appointment = self.get_appointment(appointment_id).await?;
        self.lifecycle_service
            .validate_status_transition(&appointment.status, &AppointmentStatus::Completed)?;

        let updated = self.update_scheduled(appointment_id, json!({ "status": AppointmentStatus::Completed })).await?;
        info!("Appointment {} completed", appointment_id);
        Ok(updated)
    }

    pub async fn mark_no_show(&self, appointment_id: i64) -> Result<Appointment, AppointmentError> {
        let appointment = self.get_appointment(appointment_id).await?;
        self.lifecycle_service
            .validate_status_transition(&appointment.status, &AppointmentStatus::NoShow)?;

        if !self.lifecycle_service.can_mark_no_show(appointment.appointment_time, now()) {
            return Err(AppointmentError::InvalidTime(
                "A no-show can only be recorded after the appointment time".to_string(),
            ));
        }

        let updated = self.update_scheduled(appointment_id, json!({ "status": AppointmentStatus::NoShow })).await?;
        info!("Appointment {} marked as no-show", appointment_id);
        Ok(updated)
    }

    // ==========================================================================
    // QUERIES
    // ==========================================================================

    pub async fn get_appointment(&self, appointment_id: i64) -> Result<Appointment, AppointmentError> {
        debug!("Fetching appointment: {}", appointment_id);

        let path = format!("/rest/v1/appointments?appointment_id=eq.{}", appointment_id);
        self.supabase
            .select_one::<Appointment>(&path)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?
            .ok_or(AppointmentError::NotFound)
    }

    pub async fn get_patient_appointments(
        &self,
        patient_id: i64,
        query: &AppointmentListQuery,
    ) -> Result<AppointmentPage, AppointmentError> {
        self.list_appointments("patient_id", patient_id, query).await
    }

    pub async fn get_doctor_appointments(
        &self,
        doctor_id: i64,
        query: &AppointmentListQuery,
    ) -> Result<AppointmentPage, AppointmentError> {
        self.list_appointments("doctor_id", doctor_id, query).await
    }

    pub async fn get_invoice_for_appointment(&self, appointment_id: i64) -> Result<Invoice, AppointmentError> {
        let path = format!("/rest/v1/invoices?appointment_id=eq.{}", appointment_id);
        self.supabase
            .select_one::<Invoice>(&path)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?
            .ok_or(AppointmentError::InvoiceNotFound)
    }

    async fn list_appointments(
        &self,
        owner_column: &str,
        owner_id: i64,
        query: &AppointmentListQuery,
    ) -> Result<AppointmentPage, AppointmentError> {
        let page = query.page.unwrap_or(1).max(1);
        let per_page = query.per_page.unwrap_or(self.validation_rules.default_page_size).clamp(1, 100);

        let mut path = format!(
            "/rest/v1/appointments?{}=eq.{}&order=appointment_time.desc&limit={}&offset={}",
            owner_column,
            owner_id,
            per_page,
            (page - 1) * per_page
        );
        if let Some(status) = query.status {
            path.push_str(&format!("&status=eq.{}", status));
        }

        let appointments: Vec<Appointment> = self.supabase
            .select(&path)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        Ok(AppointmentPage { appointments, page, per_page })
    }

    // ==========================================================================
    // HELPERS
    // ==========================================================================

    /// PATCH an appointment only while it is still `Scheduled`, so two
    /// concurrent transitions cannot both apply.
    async fn update_scheduled(&self, appointment_id: i64, changes: Value) -> Result<Appointment, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?appointment_id=eq.{}&status=eq.Scheduled",
            appointment_id
        );
        let rows: Vec<Appointment> = self.supabase
            .update(&path, changes)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        rows.into_iter().next().ok_or(AppointmentError::ConcurrentModification)
    }

    /// Free the slot an appointment occupied. Rows without `slot_id` are
    /// matched by doctor, date and start time. `Ok(false)` when no slot
    /// exists; `Err` when the database could not be reached.
    async fn try_release_appointment_slot(&self, appointment: &Appointment) -> Result<bool, AppointmentError> {
        let slot_id = match appointment.slot_id {
            Some(slot_id) => Some(slot_id),
            None => {
                let time = appointment.appointment_time;
                self.slots
                    .find_slot_at(appointment.doctor_id, time.date(), time.time())
                    .await
                    .map_err(slot_error)?
                    .map(|s| s.slot_id)
            }
        };

        let Some(slot_id) = slot_id else {
            warn!("No slot found for appointment {}", appointment.appointment_id);
            return Ok(false);
        };

        self.slots.release_slot(slot_id).await.map_err(slot_error)
    }

    async fn release_appointment_slot(&self, appointment: &Appointment) -> bool {
        self.try_release_appointment_slot(appointment).await.unwrap_or_else(|e| {
            error!("Failed to release slot of appointment {}: {}", appointment.appointment_id, e);
            false
        })
    }

    /// Move a rescheduled appointment back onto its previous slot and free
    /// the new one.
    async fn undo_reschedule(&self, previous: &Appointment, new_slot_id: i64) {
        let path = format!(
            "/rest/v1/appointments?appointment_id=eq.{}&slot_id=eq.{}&status=eq.Scheduled",
            previous.appointment_id, new_slot_id
        );
        let reverted: Result<Vec<Appointment>> = self.supabase
            .update(&path, json!({
                "doctor_id": previous.doctor_id,
                "slot_id": previous.slot_id,
                "appointment_time": previous.appointment_time,
                "duration_minutes": previous.duration_minutes,
                "reason": previous.reason,
            }))
            .await;

        match reverted {
            Ok(rows) if !rows.is_empty() => {
                if let Err(e) = self.slots.release_slot(new_slot_id).await {
                    error!("Failed to release slot {}: {}", new_slot_id, e);
                }
            }
            Ok(_) => warn!("Appointment {} changed before the move could be undone", previous.appointment_id),
            Err(e) => error!("Failed to undo reschedule of appointment {}: {}", previous.appointment_id, e),
        }
    }
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

fn slot_error(e: DoctorError) -> AppointmentError {
    AppointmentError::DatabaseError(e.to_string())
}
