use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn patient_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(handlers::search_patients))
        .route("/mine", get(handlers::get_my_patients))
        .route(
            "/{patient_id}",
            get(handlers::get_patient)
                .put(handlers::update_patient)
                .delete(handlers::delete_patient),
        )
        .route("/{patient_id}/visits", get(handlers::get_visit_summary))
        .route("/{patient_id}/records", get(handlers::get_patient_records))
        .route(
            "/records/{record_id}",
            put(handlers::update_health_record).delete(handlers::delete_health_record),
        )
        .route("/appointments/{appointment_id}/diagnosis", post(handlers::record_diagnosis))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}
