use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn payment_routes(state: Arc<AppConfig>) -> Router {
    // The gateway redirects the browser here without our token
    let public_routes = Router::new()
        .route("/vnpay/return", get(handlers::vnpay_return));

    let protected_routes = Router::new()
        .route("/vnpay/{appointment_id}", post(handlers::create_vnpay_payment))
        .route("/invoices/mark-overdue", post(handlers::mark_overdue_invoices))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
