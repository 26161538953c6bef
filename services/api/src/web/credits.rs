//! services/api/src/web/credits.rs
//!
//! Read-only credit reporting for the authenticated user.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::web::{state::AppState, ApiFailure, ErrorBody};

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreditSummaryResponse {
    pub monthly_used: i64,
    pub monthly_total: i64,
    pub monthly_remaining: i64,
    pub next_reset_date: chrono::DateTime<chrono::Utc>,
    pub extra_credits: i64,
}

/// GET /api/credits/summary - Usage figures for the current billing period.
///
/// Monthly usage is derived from the audit log; the `extraCredits` figure is
/// the authoritative admission balance.
#[utoipa::path(
    get,
    path = "/api/credits/summary",
    responses(
        (status = 200, description = "Credit summary", body = CreditSummaryResponse),
        (status = 500, description = "Internal server error", body = ErrorBody)
    )
)]
pub async fn credit_summary_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, ApiFailure> {
    let summary = state.db.get_credit_summary(user_id).await.map_err(|e| {
        error!("Error fetching credit summary: {:?}", e);
        ErrorBody::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Error fetching credit summary",
        )
    })?;

    Ok(Json(CreditSummaryResponse {
        monthly_used: summary.monthly_used,
        monthly_total: summary.monthly_total,
        monthly_remaining: summary.monthly_remaining,
        next_reset_date: summary.next_reset_date,
        extra_credits: summary.extra_credits,
    }))
}
