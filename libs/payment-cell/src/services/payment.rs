use std::collections::BTreeMap;

use chrono::{NaiveDateTime, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};

use appointment_cell::models::{AppointmentError, AppointmentStatus, InvoiceStatus};
use appointment_cell::AppointmentBookingService;
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::gateway::{to_minor_units, VnPayGateway};
use crate::models::{
    CallbackOutcome, Payment, PaymentCheckout, PaymentError, PaymentMethod, PaymentStatus,
};

const SUCCESS_CODE: &str = "00";

pub struct PaymentService {
    supabase: SupabaseClient,
    appointments: AppointmentBookingService,
    gateway: VnPayGateway,
    gateway_configured: bool,
}

impl PaymentService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            appointments: AppointmentBookingService::new(config),
            gateway: VnPayGateway::new(config),
            gateway_configured: config.is_payment_gateway_configured(),
        }
    }

    /// Open (or reopen) the VNPay payment for an appointment's invoice and
    /// return the signed redirect URL.
    pub async fn create_vnpay_payment(
        &self,
        appointment_id: i64,
        ip_addr: &str,
    ) -> Result<PaymentCheckout, PaymentError> {
        if !self.gateway_configured {
            return Err(PaymentError::GatewayNotConfigured);
        }

        let appointment = self.appointments.get_appointment(appointment_id).await
            .map_err(|e| match e {
                AppointmentError::NotFound => PaymentError::AppointmentNotFound,
                other => PaymentError::DatabaseError(other.to_string()),
            })?;

        if !matches!(appointment.status, AppointmentStatus::Scheduled | AppointmentStatus::Completed) {
            warn!("Appointment {} is {} and cannot be paid", appointment_id, appointment.status);
            return Err(PaymentError::AppointmentNotPayable);
        }

        let invoice = self.appointments.get_invoice_for_appointment(appointment_id).await
            .map_err(|e| match e {
                AppointmentError::InvoiceNotFound => PaymentError::InvoiceNotPayable,
                other => PaymentError::DatabaseError(other.to_string()),
            })?;

        if invoice.status != InvoiceStatus::Pending {
            return Err(PaymentError::InvoiceNotPayable);
        }

        let payment = match self.find_payment_for_invoice(invoice.invoice_id).await? {
            Some(existing) => match existing.status {
                PaymentStatus::Pending => existing,
                PaymentStatus::Failed => self.reopen_payment(&existing).await?,
                PaymentStatus::Completed | PaymentStatus::Refunded => {
                    return Err(PaymentError::InvoiceNotPayable);
                }
            },
            None => self.insert_payment(invoice.invoice_id, invoice.amount).await?,
        };

        let payment_url = self.gateway.create_payment_url(
            &format!("Payment for appointment {}", appointment_id),
            payment.amount_paid,
            payment.payment_id,
            ip_addr,
            now(),
        )?;

        info!("VNPay checkout opened for payment {} (invoice {})", payment.payment_id, invoice.invoice_id);
        Ok(PaymentCheckout { payment, payment_url })
    }

    /// Apply a gateway return/IPN callback.
    ///
    /// Nothing is written unless the signature and amount check out. A
    /// callback for a payment that is already settled is acknowledged without
    /// writing again.
    pub async fn process_callback(
        &self,
        params: &BTreeMap<String, String>,
    ) -> Result<CallbackOutcome, PaymentError> {
        if !self.gateway.verify_response(params) {
            warn!("Rejected VNPay callback with an invalid signature");
            return Err(PaymentError::InvalidSignature);
        }

        let payment_id = params
            .get("vnp_TxnRef")
            .and_then(|r| r.parse::<i64>().ok())
            .ok_or(PaymentError::PaymentNotFound)?;

        let payment = self.get_payment(payment_id).await?;

        let paid_minor_units = params.get("vnp_Amount").and_then(|a| a.parse::<i64>().ok());
        if paid_minor_units != Some(to_minor_units(payment.amount_paid)) {
            warn!(
                "Amount mismatch for payment {}: expected {}, got {:?}",
                payment_id,
                to_minor_units(payment.amount_paid),
                paid_minor_units
            );
            return Err(PaymentError::AmountMismatch);
        }

        if matches!(payment.status, PaymentStatus::Completed | PaymentStatus::Refunded) {
            debug!("Payment {} already settled, ignoring callback", payment_id);
            return Ok(CallbackOutcome {
                payment_id,
                invoice_id: payment.invoice_id,
                status: payment.status,
                already_processed: true,
            });
        }

        let response_code = params.get("vnp_ResponseCode").map(String::as_str).unwrap_or_default();
        if response_code != SUCCESS_CODE {
            self.mark_failed(&payment, response_code).await?;
            return Err(PaymentError::Declined(response_code.to_string()));
        }

        let path = format!(
            "/rest/v1/payments?payment_id=eq.{}&status=neq.{}",
            payment_id,
            PaymentStatus::Completed
        );
        let updated: Vec<Payment> = self.supabase
            .update(&path, json!({
                "status": PaymentStatus::Completed,
                "transaction_id": params.get("vnp_TransactionNo"),
                "payment_date": now(),
            }))
            .await
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))?;

        if updated.is_empty() {
            // A concurrent callback settled it first.
            return Ok(CallbackOutcome {
                payment_id,
                invoice_id: payment.invoice_id,
                status: PaymentStatus::Completed,
                already_processed: true,
            });
        }

        // Only an open invoice may be settled; a cancelled appointment keeps
        // its cancelled invoice and the captured amount is refunded.
        let invoice_path = format!(
            "/rest/v1/invoices?invoice_id=eq.{}&status=in.({},{})",
            payment.invoice_id,
            InvoiceStatus::Pending,
            InvoiceStatus::Overdue
        );
        let invoices: Vec<serde_json::Value> = self.supabase
            .update(&invoice_path, json!({ "status": InvoiceStatus::Paid }))
            .await
            .map_err(|e| {
                error!("Payment {} completed but invoice {} was not updated: {}", payment_id, payment.invoice_id, e);
                PaymentError::DatabaseError(e.to_string())
            })?;
        if invoices.is_empty() {
            warn!(
                "Invoice {} is no longer payable, refunding payment {}",
                payment.invoice_id, payment_id
            );
            self.mark_refunded(payment_id).await?;
            return Err(PaymentError::InvoiceNotPayable);
        }

        info!("Payment {} completed, invoice {} paid", payment_id, payment.invoice_id);
        Ok(CallbackOutcome {
            payment_id,
            invoice_id: payment.invoice_id,
            status: PaymentStatus::Completed,
            already_processed: false,
        })
    }

    async fn mark_refunded(&self, payment_id: i64) -> Result<(), PaymentError> {
        let path = format!(
            "/rest/v1/payments?payment_id=eq.{}&status=eq.{}",
            payment_id,
            PaymentStatus::Completed
        );
        let _: Vec<Payment> = self.supabase
            .update(&path, json!({
                "status": PaymentStatus::Refunded,
                "notes": "Invoice was no longer payable when the payment arrived",
            }))
            .await
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    pub async fn get_payment(&self, payment_id: i64) -> Result<Payment, PaymentError> {
        let path = format!("/rest/v1/payments?payment_id=eq.{}", payment_id);
        self.supabase
            .select_one::<Payment>(&path)
            .await
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))?
            .ok_or(PaymentError::PaymentNotFound)
    }

    async fn find_payment_for_invoice(&self, invoice_id: i64) -> Result<Option<Payment>, PaymentError> {
        let path = format!("/rest/v1/payments?invoice_id=eq.{}", invoice_id);
        self.supabase
            .select_one::<Payment>(&path)
            .await
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))
    }

    async fn insert_payment(&self, invoice_id: i64, amount: f64) -> Result<Payment, PaymentError> {
        let rows: Vec<Payment> = self.supabase
            .insert("payments", json!({
                "invoice_id": invoice_id,
                "amount_paid": amount,
                "payment_method": PaymentMethod::VNPay,
                "status": PaymentStatus::Pending,
                "payment_date": now(),
            }))
            .await
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .next()
            .ok_or_else(|| PaymentError::DatabaseError("Failed to create payment".to_string()))
    }

    async fn reopen_payment(&self, payment: &Payment) -> Result<Payment, PaymentError> {
        let path = format!(
            "/rest/v1/payments?payment_id=eq.{}&status=eq.{}",
            payment.payment_id,
            PaymentStatus::Failed
        );
        let rows: Vec<Payment> = self.supabase
            .update(&path, json!({ "status": PaymentStatus::Pending, "notes": null }))
            .await
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))?;

        rows.into_iter().next().ok_or(PaymentError::InvoiceNotPayable)
    }

    async fn mark_failed(&self, payment: &Payment, response_code: &str) -> Result<(), PaymentError> {
        warn!("VNPay declined payment {} with code {}", payment.payment_id, response_code);

        let path = format!(
            "/rest/v1/payments?payment_id=eq.{}&status=eq.{}",
            payment.payment_id,
            PaymentStatus::Pending
        );
        let _: Vec<Payment> = self.supabase
            .update(&path, json!({
                "status": PaymentStatus::Failed,
                "notes": format!("VNPay response code {}", response_code),
            }))
            .await
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))?;
        Ok(())
    }
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}
