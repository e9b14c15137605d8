use anyhow::Result;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{AddReviewRequest, DoctorError, Review, UpdateReviewRequest};
use crate::services::doctor::DoctorService;

#[derive(Debug, Deserialize)]
struct Rating {
    rating: i32,
}

/// Patient reviews and doctor replies.
///
/// Every mutation that changes the visible set recomputes the doctor's
/// `average_rating`.
pub struct ReviewService {
    supabase: SupabaseClient,
    doctors: DoctorService,
}

impl ReviewService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            doctors: DoctorService::new(config),
        }
    }

    pub async fn add_review(&self, patient_id: i64, request: AddReviewRequest) -> Result<Review, DoctorError> {
        validate_rating(request.rating)?;

        let completed_path = format!(
            "/rest/v1/appointments?select=appointment_id&appointment_id=eq.{}&patient_id=eq.{}&doctor_id=eq.{}&status=eq.Completed",
            request.appointment_id, patient_id, request.doctor_id
        );
        let completed: Vec<Value> = self.supabase
            .select(&completed_path)
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;
        if completed.is_empty() {
            warn!("Patient {} tried to review appointment {} without a completed visit", patient_id, request.appointment_id);
            return Err(DoctorError::ReviewNotAllowed);
        }

        let existing_path = format!("/rest/v1/reviews?appointment_id=eq.{}", request.appointment_id);
        let existing: Option<Review> = self.supabase
            .select_one(&existing_path)
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;
        if existing.is_some() {
            return Err(DoctorError::AlreadyReviewed);
        }

        let rows: Vec<Review> = self.supabase
            .insert("reviews", json!({
                "appointment_id": request.appointment_id,
                "patient_id": patient_id,
                "doctor_id": request.doctor_id,
                "rating": request.rating,
                "comment": trimmed(request.comment),
                "review_date": Utc::now().naive_utc(),
                "is_visible": true,
            }))
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;
        let review = rows
            .into_iter()
            .next()
            .ok_or_else(|| DoctorError::DatabaseError("Failed to store review".to_string()))?;

        self.recompute_average(review.doctor_id).await?;
        info!("Review {} added for doctor {}", review.review_id, review.doctor_id);
        Ok(review)
    }

    /// Owners may edit a review once.
    pub async fn update_review(
        &self,
        review_id: i64,
        patient_id: i64,
        request: UpdateReviewRequest,
    ) -> Result<Review, DoctorError> {
        let review = self.owned_review(review_id, patient_id).await?;
        if review.updated_at.is_some() {
            return Err(DoctorError::ReviewAlreadyEdited);
        }
        validate_rating(request.rating)?;

        let path = format!("/rest/v1/reviews?review_id=eq.{}", review_id);
        let rows: Vec<Review> = self.supabase
            .update(&path, json!({
                "rating": request.rating,
                "comment": trimmed(request.comment),
                "updated_at": Utc::now().naive_utc(),
            }))
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;
        let updated = rows.into_iter().next().ok_or(DoctorError::ReviewNotFound)?;

        self.recompute_average(updated.doctor_id).await?;
        Ok(updated)
    }

    pub async fn delete_review(&self, review_id: i64, patient_id: i64) -> Result<i64, DoctorError> {
        let review = self.owned_review(review_id, patient_id).await?;

        let path = format!("/rest/v1/reviews?review_id=eq.{}", review_id);
        let _: Vec<Value> = self.supabase
            .delete(&path)
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        self.recompute_average(review.doctor_id).await?;
        info!("Review {} deleted", review_id);
        Ok(review.doctor_id)
    }

    /// First reply sets `response_date`; a single later edit sets
    /// `response_updated_at`.
    pub async fn doctor_reply(&self, review_id: i64, doctor_id: i64, response: &str) -> Result<Review, DoctorError> {
        let path = format!("/rest/v1/reviews?review_id=eq.{}&doctor_id=eq.{}", review_id, doctor_id);
        let review: Review = self.supabase
            .select_one(&path)
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?
            .ok_or(DoctorError::ReviewNotFound)?;

        let text = response.trim();
        if text.is_empty() {
            return Err(DoctorError::ValidationError("Reply must not be empty".to_string()));
        }

        let now = Utc::now().naive_utc();
        let body = match review.doctor_response {
            None => json!({ "doctor_response": text, "response_date": now }),
            Some(_) if review.response_updated_at.is_some() => return Err(DoctorError::ReplyAlreadyEdited),
            Some(_) => json!({ "doctor_response": text, "response_updated_at": now }),
        };

        let rows: Vec<Review> = self.supabase
            .update(&path, body)
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;
        rows.into_iter().next().ok_or(DoctorError::ReviewNotFound)
    }

    pub async fn list_doctor_reviews(&self, doctor_id: i64) -> Result<Vec<Review>, DoctorError> {
        debug!("Listing reviews for doctor {}", doctor_id);
        let path = format!(
            "/rest/v1/reviews?doctor_id=eq.{}&is_visible=eq.true&order=review_date.desc",
            doctor_id
        );
        self.supabase
            .select(&path)
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))
    }

    async fn owned_review(&self, review_id: i64, patient_id: i64) -> Result<Review, DoctorError> {
        let path = format!("/rest/v1/reviews?review_id=eq.{}&patient_id=eq.{}", review_id, patient_id);
        self.supabase
            .select_one(&path)
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?
            .ok_or(DoctorError::ReviewNotFound)
    }

    async fn recompute_average(&self, doctor_id: i64) -> Result<(), DoctorError> {
        let path = format!("/rest/v1/reviews?select=rating&doctor_id=eq.{}&is_visible=eq.true", doctor_id);
        let ratings: Vec<Rating> = self.supabase
            .select(&path)
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        let values: Vec<i32> = ratings.into_iter().map(|r| r.rating).collect();
        self.doctors.update_average_rating(doctor_id, average_rating(&values)).await
    }
}

fn validate_rating(rating: i32) -> Result<(), DoctorError> {
    if (1..=5).contains(&rating) {
        Ok(())
    } else {
        Err(DoctorError::ValidationError("Rating must be between 1 and 5".to_string()))
    }
}

fn trimmed(comment: Option<String>) -> String {
    comment.map(|c| c.trim().to_string()).unwrap_or_default()
}

/// Mean rounded to two decimals; 0 when there are no ratings.
pub fn average_rating(ratings: &[i32]) -> f64 {
    if ratings.is_empty() {
        return 0.0;
    }
    let sum: i64 = ratings.iter().map(|&r| r as i64).sum();
    let mean = sum as f64 / ratings.len() as f64;
    (mean * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_is_rounded_to_two_decimals() {
        assert_eq!(average_rating(&[5, 4, 4]), 4.33);
        assert_eq!(average_rating(&[]), 0.0);
    }

    #[test]
    fn rating_bounds() {
        assert!(validate_rating(1).is_ok());
        assert!(validate_rating(5).is_ok());
        assert!(validate_rating(0).is_err());
        assert!(validate_rating(6).is_err());
    }
}
