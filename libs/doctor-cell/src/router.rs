use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn doctor_routes(state: Arc<AppConfig>) -> Router {
    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/search", get(handlers::search_doctors))
        .route("/hospitals", get(handlers::list_hospitals))
        .route("/specialties", get(handlers::list_specialties))
        .route("/slots", get(handlers::get_available_slots))
        .route("/{doctor_id}", get(handlers::get_doctor))
        .route("/{doctor_id}/availability", get(handlers::get_availabilities))
        .route("/{doctor_id}/availability/{day}", get(handlers::get_availability_by_day))
        .route("/{doctor_id}/reviews", get(handlers::list_doctor_reviews));

    // Protected routes (authentication required)
    let protected_routes = Router::new()
        .route("/{doctor_id}/availability", post(handlers::upsert_availability))
        .route("/{doctor_id}/slots/generate", post(handlers::generate_slots))
        .route("/{doctor_id}/licenses", get(handlers::list_doctor_licenses))
        .route("/licenses", post(handlers::submit_license))
        .route("/licenses/pending", get(handlers::list_pending_licenses))
        .route("/licenses/{license_id}/verify", post(handlers::verify_license))
        .route("/reviews", post(handlers::add_review))
        .route("/reviews/{review_id}", put(handlers::update_review).delete(handlers::delete_review))
        .route("/reviews/{review_id}/reply", post(handlers::reply_to_review))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
