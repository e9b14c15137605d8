use std::sync::Arc;

use axum::{
    extract::{Extension, Query, State},
    Json,
};
use serde_json::{json, Value};

use shared_config::AppConfig;
use shared_models::auth::{User, ROLE_ADMIN};
use shared_models::error::AppError;

use crate::models::{StatsError, StatsQuery};
use crate::services::StatsService;

fn map_stats_error(e: StatsError) -> AppError {
    match e {
        StatsError::ValidationError(msg) => AppError::ValidationError(msg),
        StatsError::DatabaseError(msg) => AppError::Database(msg),
    }
}

#[axum::debug_handler]
pub async fn get_appointment_stats(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Value>, AppError> {
    user.require_role(ROLE_ADMIN)?;

    let stats = StatsService::new(&state)
        .get_appointment_stats(&query)
        .await
        .map_err(map_stats_error)?;

    Ok(Json(json!({ "success": true, "stats": stats })))
}

#[axum::debug_handler]
pub async fn get_revenue_by_time_period(
    State(state): State<Arc<AppConfig>>,
    Extension(user): Extension<User>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Value>, AppError> {
    user.require_role(ROLE_ADMIN)?;

    let revenue = StatsService::new(&state)
        .get_revenue_by_time_period(&query)
        .await
        .map_err(map_stats_error)?;

    Ok(Json(json!({ "success": true, "revenue": revenue })))
}
