pub mod admin;
pub mod auth;
pub mod expenses;
pub mod notifications;
pub mod reports;

use axum::{extract::State, Json};
use rust_decimal::Decimal;
use serde::Serialize;
use tower_cookies::Cookies;

use crate::{error::AppResult, middleware::require_user, AppState};

/// Success envelope: every endpoint responds `{ "data": ... }`.
#[derive(Serialize)]
pub struct Data<T> {
    pub data: T,
}

pub fn data<T: Serialize>(value: T) -> Json<Data<T>> {
    Json(Data { data: value })
}

#[derive(Serialize)]
pub struct DashboardData {
    pub pending_reports: i64,
    pub submitted_reports: i64,
    pub approved_reports: i64,
    pub reimbursed_reports: i64,
    pub reimbursed_total: Decimal,
    pub unreported_expenses: i64,
    pub unreported_reimbursable: Decimal,
}

pub async fn dashboard(
    State(state): State<AppState>,
    cookies: Cookies,
) -> AppResult<Json<Data<DashboardData>>> {
    let user = require_user(&cookies, &state.db).await?;

    let count_by_status = |status: &'static str| {
        let db = state.db.clone();
        let user_id = user.id;
        async move {
            sqlx::query_scalar::<_, i64>(&format!(
                "SELECT COUNT(*) FROM reports WHERE user_id = $1 AND status = '{}'",
                status
            ))
            .bind(user_id)
            .fetch_one(&db)
            .await
        }
    };

    let pending_reports = count_by_status("pending").await?;
    let submitted_reports = count_by_status("submitted").await?;
    let approved_reports = count_by_status("approved").await?;
    let reimbursed_reports = count_by_status("reimbursed").await?;

    let reimbursed_total: Decimal = sqlx::query_scalar(
        "SELECT COALESCE(SUM(total_amount), 0) FROM reports \
         WHERE user_id = $1 AND status = 'reimbursed'",
    )
    .bind(user.id)
    .fetch_one(&state.db)
    .await?;

    let unreported_expenses: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM expenses WHERE user_id = $1 AND report_id IS NULL",
    )
    .bind(user.id)
    .fetch_one(&state.db)
    .await?;

    // Same claim-flag rule as every other reimbursable subtotal.
    let unreported_reimbursable: Decimal = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM expenses \
         WHERE user_id = $1 AND report_id IS NULL AND claim_reimbursement",
    )
    .bind(user.id)
    .fetch_one(&state.db)
    .await?;

    Ok(data(DashboardData {
        pending_reports,
        submitted_reports,
        approved_reports,
        reimbursed_reports,
        reimbursed_total,
        unreported_expenses,
        unreported_reimbursable,
    }))
}
