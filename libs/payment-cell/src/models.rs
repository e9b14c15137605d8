use serde::{Deserialize, Serialize};
use chrono::NaiveDateTime;
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: i64,
    pub invoice_id: i64,
    pub amount_paid: f64,
    pub payment_method: PaymentMethod,
    pub transaction_id: Option<String>,
    pub status: PaymentStatus,
    pub payment_date: Option<NaiveDateTime>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentMethod {
    MoMo,
    ZaloPay,
    VNPay,
}

/// A payment row plus the gateway URL the patient is redirected to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCheckout {
    pub payment: Payment,
    pub payment_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackOutcome {
    pub payment_id: i64,
    pub invoice_id: i64,
    pub status: PaymentStatus,
    /// The gateway retried a callback that was already applied.
    pub already_processed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum PaymentError {
    #[error("Appointment not found")]
    AppointmentNotFound,

    #[error("Only scheduled or completed appointments can be paid")]
    AppointmentNotPayable,

    #[error("Invoice does not exist or has already been settled")]
    InvoiceNotPayable,

    #[error("Invalid payment signature")]
    InvalidSignature,

    #[error("Payment not found")]
    PaymentNotFound,

    #[error("Paid amount does not match the payment")]
    AmountMismatch,

    #[error("Payment failed: {0}")]
    Declined(String),

    #[error("Payment gateway is not configured")]
    GatewayNotConfigured,

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}
