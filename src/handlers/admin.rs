use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    handlers::{data, reports::report_response, Data},
    middleware::{require_admin, require_user},
    models::{ReportHistory, ReportListRow, ReportResponse, ReportStatus},
    services::{audit, lifecycle, notify},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ReimburseRequest {
    pub payment_reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    pub report_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct BulkRejectRequest {
    pub report_ids: Vec<i64>,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct BulkReimburseRequest {
    pub report_ids: Vec<i64>,
    pub payment_reference: Option<String>,
}

pub async fn approve_report(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(report_id): Path<i64>,
) -> AppResult<Json<Data<ReportResponse>>> {
    let user = require_user(&cookies, &state.db).await?;
    let report = lifecycle::approve(&state.db, &state.dispatcher, report_id, &user).await?;
    Ok(data(report_response(&state.db, report).await?))
}

pub async fn reject_report(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(report_id): Path<i64>,
    Json(body): Json<RejectRequest>,
) -> AppResult<Json<Data<ReportResponse>>> {
    let user = require_user(&cookies, &state.db).await?;
    let report =
        lifecycle::reject(&state.db, &state.dispatcher, report_id, &user, &body.reason).await?;
    Ok(data(report_response(&state.db, report).await?))
}

pub async fn reimburse_report(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(report_id): Path<i64>,
    Json(body): Json<ReimburseRequest>,
) -> AppResult<Json<Data<ReportResponse>>> {
    let user = require_user(&cookies, &state.db).await?;
    let report = lifecycle::reimburse(
        &state.db,
        &state.dispatcher,
        report_id,
        &user,
        body.payment_reference.as_deref(),
    )
    .await?;
    Ok(data(report_response(&state.db, report).await?))
}

pub async fn bulk_approve(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(body): Json<BulkRequest>,
) -> AppResult<Json<Data<lifecycle::BulkOutcome>>> {
    let user = require_user(&cookies, &state.db).await?;
    let outcome =
        lifecycle::bulk_approve(&state.db, &state.dispatcher, &body.report_ids, &user).await?;
    Ok(data(outcome))
}

pub async fn bulk_reject(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(body): Json<BulkRejectRequest>,
) -> AppResult<Json<Data<lifecycle::BulkOutcome>>> {
    let user = require_user(&cookies, &state.db).await?;
    let outcome = lifecycle::bulk_reject(
        &state.db,
        &state.dispatcher,
        &body.report_ids,
        &user,
        &body.reason,
    )
    .await?;
    Ok(data(outcome))
}

pub async fn bulk_reimburse(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(body): Json<BulkReimburseRequest>,
) -> AppResult<Json<Data<lifecycle::BulkOutcome>>> {
    let user = require_user(&cookies, &state.db).await?;
    let outcome = lifecycle::bulk_reimburse(
        &state.db,
        &state.dispatcher,
        &body.report_ids,
        &user,
        body.payment_reference.as_deref(),
    )
    .await?;
    Ok(data(outcome))
}

// Filter fields arrive as strings so that empty form values deserialize
// cleanly; unparseable values are simply ignored.
#[derive(Debug, Deserialize)]
pub struct ReportFilters {
    #[serde(default)]
    status: String,
    #[serde(default)]
    user_id: String,
    date_from: Option<String>,
    date_to: Option<String>,
}

#[derive(Debug, FromRow)]
struct AdminReportRow {
    #[sqlx(flatten)]
    report_row: ReportListRow,
    owner_name: String,
}

#[derive(Debug, Serialize)]
pub struct AdminReportResponse {
    #[serde(flatten)]
    report: ReportResponse,
    owner_name: String,
}

pub async fn list_reports(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(filters): Query<ReportFilters>,
) -> AppResult<Json<Data<Vec<AdminReportResponse>>>> {
    require_admin(&cookies, &state.db).await?;

    let status = ReportStatus::parse(&filters.status);
    let user_id = Uuid::parse_str(&filters.user_id).ok();
    let date_from = filters
        .date_from
        .as_deref()
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());
    let date_to = filters
        .date_to
        .as_deref()
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());

    let mut query_builder = sqlx::QueryBuilder::new(
        "SELECT r.*, \
         CONCAT(u.first_name, ' ', u.last_name) AS owner_name, \
         (SELECT COALESCE(SUM(e.amount), 0) FROM expenses e WHERE e.report_id = r.id) AS computed_total, \
         (SELECT COALESCE(SUM(e.amount), 0) FROM expenses e \
          WHERE e.report_id = r.id AND e.claim_reimbursement) AS reimbursable_subtotal, \
         (SELECT COUNT(*) FROM expenses e WHERE e.report_id = r.id) AS expense_count \
         FROM reports r JOIN users u ON r.user_id = u.id ",
    );

    let conditions = filter_conditions(status, user_id, date_from, date_to);
    if !conditions.is_empty() {
        query_builder.push(" WHERE ");
        query_builder.push(conditions.join(" AND "));
    }
    query_builder.push(" ORDER BY r.created_at DESC");

    let rows: Vec<AdminReportRow> = query_builder
        .build_query_as()
        .fetch_all(&state.db)
        .await?;

    Ok(data(
        rows.into_iter()
            .map(|r| AdminReportResponse {
                report: ReportResponse::from(r.report_row),
                owner_name: r.owner_name,
            })
            .collect(),
    ))
}

/// WHERE clauses for the admin listing. Both date bounds are inclusive of
/// the named day; created_at is a timestamp, so the upper bound is the
/// half-open start of the following day.
fn filter_conditions(
    status: Option<ReportStatus>,
    user_id: Option<Uuid>,
    date_from: Option<NaiveDate>,
    date_to: Option<NaiveDate>,
) -> Vec<String> {
    let mut conditions = Vec::new();
    if let Some(status) = status {
        conditions.push(format!("r.status = '{}'", status));
    }
    if let Some(id) = user_id {
        conditions.push(format!("r.user_id = '{}'", id));
    }
    if let Some(date) = date_from {
        conditions.push(format!("r.created_at >= '{}'", date));
    }
    if let Some(date) = date_to {
        conditions.push(format!("r.created_at < '{}'::date + 1", date));
    }
    conditions
}

pub async fn report_history(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(report_id): Path<i64>,
) -> AppResult<Json<Data<Vec<ReportHistory>>>> {
    require_admin(&cookies, &state.db).await?;

    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM reports WHERE id = $1")
        .bind(report_id)
        .fetch_optional(&state.db)
        .await?;
    if exists.is_none() {
        return Err(AppError::NotFound("report"));
    }

    Ok(data(audit::report_events(&state.db, report_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub title: String,
    pub message: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct BroadcastOutcome {
    pub recipients: u64,
}

pub async fn broadcast(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(body): Json<BroadcastRequest>,
) -> AppResult<Json<Data<BroadcastOutcome>>> {
    require_admin(&cookies, &state.db).await?;

    let title = body.title.trim();
    let message = body.message.trim();
    if title.is_empty() || message.is_empty() {
        return Err(AppError::InvalidState(
            "announcement title and message are required".to_string(),
        ));
    }

    // Direct dispatch path: persistence errors surface to the caller.
    let recipients = notify::broadcast(&state.db, title, message, body.expires_at).await?;
    Ok(data(BroadcastOutcome { recipients }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_to_filter_covers_the_whole_named_day() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let conditions = filter_conditions(None, None, None, Some(date));
        assert_eq!(
            conditions,
            vec!["r.created_at < '2024-03-05'::date + 1".to_string()]
        );
    }

    #[test]
    fn filters_combine_in_declaration_order() {
        let from = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let conditions =
            filter_conditions(Some(ReportStatus::Submitted), None, Some(from), None);
        assert_eq!(
            conditions,
            vec![
                "r.status = 'submitted'".to_string(),
                "r.created_at >= '2024-03-01'".to_string(),
            ]
        );
    }
}
