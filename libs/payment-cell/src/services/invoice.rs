use chrono::NaiveDate;
use serde_json::json;
use tracing::info;

use appointment_cell::models::{Invoice, InvoiceStatus};
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::PaymentError;

pub struct InvoiceService {
    supabase: SupabaseClient,
}

impl InvoiceService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    /// Flag every pending invoice whose due date is before `today`.
    pub async fn mark_overdue_invoices(&self, today: NaiveDate) -> Result<Vec<Invoice>, PaymentError> {
        let path = format!(
            "/rest/v1/invoices?status=eq.{}&due_date=lt.{}",
            InvoiceStatus::Pending,
            today.format("%Y-%m-%d")
        );

        let updated: Vec<Invoice> = self.supabase
            .update(&path, json!({ "status": InvoiceStatus::Overdue }))
            .await
            .map_err(|e| PaymentError::DatabaseError(e.to_string()))?;

        info!("Marked {} invoices overdue (due before {})", updated.len(), today);
        Ok(updated)
    }
}
