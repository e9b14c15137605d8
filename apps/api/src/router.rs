use std::sync::Arc;

use axum::{
    Json,
    Router,
    routing::get,
};
use serde_json::json;

use appointment_cell::router::appointment_routes;
use auth_cell::router::auth_routes;
use doctor_cell::router::doctor_routes;
use patient_cell::router::patient_routes;
use payment_cell::router::payment_routes;
use shared_config::AppConfig;
use stats_cell::router::stats_routes;

pub fn create_router(state: Arc<AppConfig>) -> Router {
    let configured = state.is_configured();

    Router::new()
        .route("/", get(|| async { "Clinic booking API is running!" }))
        .route("/health", get(move || async move {
            Json(json!({ "status": "ok", "configured": configured }))
        }))
        .nest("/auth", auth_routes(state.clone()))
        .nest("/doctors", doctor_routes(state.clone()))
        .nest("/appointments", appointment_routes(state.clone()))
        .nest("/payments", payment_routes(state.clone()))
        .nest("/patients", patient_routes(state.clone()))
        .nest("/stats", stats_routes(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::{Request, StatusCode}};
    use tower::ServiceExt;

    fn config() -> AppConfig {
        AppConfig {
            supabase_url: "http://localhost:54321".to_string(),
            supabase_service_key: "service-key".to_string(),
            jwt_secret: "secret".to_string(),
            jwt_ttl_hours: 24,
            vnpay_tmn_code: String::new(),
            vnpay_hash_secret: String::new(),
            vnpay_url: String::new(),
            vnpay_return_url: String::new(),
            slot_duration_minutes: 30,
            cancellation_notice_hours: 24,
            server_port: 3000,
        }
    }

    #[tokio::test]
    async fn health_reports_configuration() {
        let app = create_router(Arc::new(config()));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["configured"], true);
    }

    #[tokio::test]
    async fn cell_routes_are_mounted_behind_auth() {
        let app = create_router(Arc::new(config()));
        for uri in ["/appointments/1", "/patients/mine", "/stats/revenue", "/auth/profile"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
        }
    }
}
