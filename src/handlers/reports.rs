use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::Database,
    error::{AppError, AppResult},
    handlers::{data, Data},
    middleware::{require_user, CurrentUser},
    models::{
        CreateReport, Expense, HistoryEvent, Report, ReportDetail, ReportHistory, ReportListRow,
        ReportResponse,
    },
    services::{association, audit, lifecycle},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct ExpenseIdList {
    pub expense_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AnnotationRequest {
    pub details: String,
}

/// Projection of a report with totals recomputed from its expenses.
pub(crate) async fn report_response(db: &Database, report: Report) -> AppResult<ReportResponse> {
    let expenses: Vec<Expense> =
        sqlx::query_as("SELECT * FROM expenses WHERE report_id = $1 ORDER BY expense_date, id")
            .bind(report.id)
            .fetch_all(db)
            .await?;
    Ok(ReportResponse::with_expenses(report, &expenses))
}

pub async fn create_report(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(form): Json<CreateReport>,
) -> AppResult<Json<Data<ReportResponse>>> {
    let user = require_user(&cookies, &state.db).await?;

    let title = form.title.trim();
    if title.is_empty() {
        return Err(AppError::InvalidState("a title is required".to_string()));
    }
    if let (Some(start), Some(end)) = (form.start_date, form.end_date) {
        if end < start {
            return Err(AppError::InvalidState(
                "end date cannot precede start date".to_string(),
            ));
        }
    }
    if let Some(approver_id) = form.approver_id {
        let exists: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM users WHERE id = $1 AND is_active = true")
                .bind(approver_id)
                .fetch_optional(&state.db)
                .await?;
        if exists.is_none() {
            return Err(AppError::NotFound("approver"));
        }
    }

    let report: Report = sqlx::query_as(
        "INSERT INTO reports (user_id, approver_id, title, description, start_date, end_date) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
    )
    .bind(user.id)
    .bind(form.approver_id)
    .bind(title)
    .bind(&form.description)
    .bind(form.start_date)
    .bind(form.end_date)
    .fetch_one(&state.db)
    .await?;

    Ok(data(ReportResponse::with_expenses(report, &[])))
}

pub async fn list_reports(
    State(state): State<AppState>,
    cookies: Cookies,
) -> AppResult<Json<Data<Vec<ReportResponse>>>> {
    let user = require_user(&cookies, &state.db).await?;

    // List views recompute totals rather than trusting the cached column.
    let rows: Vec<ReportListRow> = sqlx::query_as(
        "SELECT r.*, \
         (SELECT COALESCE(SUM(e.amount), 0) FROM expenses e WHERE e.report_id = r.id) AS computed_total, \
         (SELECT COALESCE(SUM(e.amount), 0) FROM expenses e \
          WHERE e.report_id = r.id AND e.claim_reimbursement) AS reimbursable_subtotal, \
         (SELECT COUNT(*) FROM expenses e WHERE e.report_id = r.id) AS expense_count \
         FROM reports r WHERE r.user_id = $1 ORDER BY r.created_at DESC",
    )
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(data(rows.into_iter().map(ReportResponse::from).collect()))
}

pub async fn report_detail(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(report_id): Path<i64>,
) -> AppResult<Json<Data<ReportDetail>>> {
    let user = require_user(&cookies, &state.db).await?;

    let report = fetch_report_scoped(&state.db, report_id, &user).await?;
    let expenses: Vec<Expense> =
        sqlx::query_as("SELECT * FROM expenses WHERE report_id = $1 ORDER BY expense_date, id")
            .bind(report_id)
            .fetch_all(&state.db)
            .await?;

    Ok(data(ReportDetail {
        report: ReportResponse::with_expenses(report, &expenses),
        expenses,
    }))
}

pub async fn submit_report(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(report_id): Path<i64>,
) -> AppResult<Json<Data<ReportResponse>>> {
    let user = require_user(&cookies, &state.db).await?;
    let report = lifecycle::submit(&state.db, &state.dispatcher, report_id, &user).await?;
    Ok(data(report_response(&state.db, report).await?))
}

pub async fn add_expenses(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(report_id): Path<i64>,
    Json(body): Json<ExpenseIdList>,
) -> AppResult<Json<Data<ReportResponse>>> {
    let user = require_user(&cookies, &state.db).await?;
    let report =
        association::add_expenses(&state.db, report_id, &body.expense_ids, &user).await?;
    Ok(data(report_response(&state.db, report).await?))
}

pub async fn remove_expenses(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(report_id): Path<i64>,
    Json(body): Json<ExpenseIdList>,
) -> AppResult<Json<Data<ReportResponse>>> {
    let user = require_user(&cookies, &state.db).await?;
    let report =
        association::remove_expenses(&state.db, report_id, &body.expense_ids, &user).await?;
    Ok(data(report_response(&state.db, report).await?))
}

pub async fn report_history(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(report_id): Path<i64>,
) -> AppResult<Json<Data<Vec<ReportHistory>>>> {
    let user = require_user(&cookies, &state.db).await?;
    fetch_report_scoped(&state.db, report_id, &user).await?;
    Ok(data(audit::report_events(&state.db, report_id).await?))
}

/// Append a manual annotation to the report's history.
pub async fn annotate_report(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(report_id): Path<i64>,
    Json(body): Json<AnnotationRequest>,
) -> AppResult<Json<Data<Vec<ReportHistory>>>> {
    let user = require_user(&cookies, &state.db).await?;
    fetch_report_scoped(&state.db, report_id, &user).await?;

    let details = body.details.trim();
    if details.is_empty() {
        return Err(AppError::InvalidState(
            "annotation details are required".to_string(),
        ));
    }

    let mut conn = state.db.acquire().await?;
    audit::record_report_event(
        &mut conn,
        report_id,
        HistoryEvent::Note,
        Some(details),
        Some(user.id),
    )
    .await?;

    Ok(data(audit::report_events(&state.db, report_id).await?))
}

pub async fn delete_report(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(report_id): Path<i64>,
) -> AppResult<Json<Data<&'static str>>> {
    let user = require_user(&cookies, &state.db).await?;
    lifecycle::delete_report(&state.db, report_id, &user).await?;
    Ok(data("deleted"))
}

/// Fetch a report visible to the actor: owners see their own, admins any.
/// Not-owned reads surface as NotFound, never Forbidden.
async fn fetch_report_scoped(
    db: &Database,
    report_id: i64,
    user: &CurrentUser,
) -> AppResult<Report> {
    let report: Option<Report> = if user.is_admin() {
        sqlx::query_as("SELECT * FROM reports WHERE id = $1")
            .bind(report_id)
            .fetch_optional(db)
            .await?
    } else {
        sqlx::query_as("SELECT * FROM reports WHERE id = $1 AND user_id = $2")
            .bind(report_id)
            .bind(user.id)
            .fetch_optional(db)
            .await?
    };
    report.ok_or(AppError::NotFound("report"))
}
