use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use tower_cookies::Cookies;

use crate::{
    database::Database,
    error::{AppError, AppResult},
    handlers::{data, Data},
    middleware::{require_user, CurrentUser},
    handlers::reports::AnnotationRequest,
    models::{
        CreateExpense, Expense, ExpenseCategory, ExpenseHistory, ExpenseStatus, HistoryEvent,
        UpdateExpense,
    },
    services::{association, audit},
    AppState,
};

// Filter fields arrive as strings so that empty form values deserialize
// cleanly; unparseable values are simply ignored.
#[derive(Debug, Deserialize)]
pub struct ExpenseFilters {
    #[serde(default)]
    status: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    report_id: String,
    date_from: Option<String>,
    date_to: Option<String>,
}

pub async fn list_expenses(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(filters): Query<ExpenseFilters>,
) -> AppResult<Json<Data<Vec<Expense>>>> {
    let user = require_user(&cookies, &state.db).await?;

    let status = ExpenseStatus::parse(&filters.status);
    let category = ExpenseCategory::parse(&filters.category);
    let report_id = filters.report_id.parse::<i64>().ok();
    let date_from = filters
        .date_from
        .as_deref()
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());
    let date_to = filters
        .date_to
        .as_deref()
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());

    let mut query_builder =
        sqlx::QueryBuilder::new("SELECT * FROM expenses e WHERE e.user_id = ");
    query_builder.push_bind(user.id);

    let mut conditions = Vec::new();
    if let Some(status) = status {
        conditions.push(format!("e.status = '{}'", status));
    }
    if let Some(category) = category {
        conditions.push(format!("e.category = '{}'", category));
    }
    if let Some(id) = report_id {
        conditions.push(format!("e.report_id = {}", id));
    }
    if let Some(date) = date_from {
        conditions.push(format!("e.expense_date >= '{}'", date));
    }
    if let Some(date) = date_to {
        conditions.push(format!("e.expense_date <= '{}'", date));
    }

    for condition in conditions {
        query_builder.push(" AND ");
        query_builder.push(condition);
    }
    query_builder.push(" ORDER BY e.expense_date DESC, e.id DESC");

    let expenses: Vec<Expense> = query_builder
        .build_query_as()
        .fetch_all(&state.db)
        .await?;

    Ok(data(expenses))
}

pub async fn create_expense(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(form): Json<CreateExpense>,
) -> AppResult<Json<Data<Expense>>> {
    let user = require_user(&cookies, &state.db).await?;
    let expense = association::create_expense(&state.db, &user, &form).await?;
    Ok(data(expense))
}

pub async fn expense_detail(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(expense_id): Path<i64>,
) -> AppResult<Json<Data<Expense>>> {
    let user = require_user(&cookies, &state.db).await?;
    let expense = fetch_expense_scoped(&state.db, expense_id, &user).await?;
    Ok(data(expense))
}

pub async fn update_expense(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(expense_id): Path<i64>,
    Json(form): Json<UpdateExpense>,
) -> AppResult<Json<Data<Expense>>> {
    let user = require_user(&cookies, &state.db).await?;
    let expense = association::update_expense(&state.db, expense_id, &user, &form).await?;
    Ok(data(expense))
}

pub async fn delete_expense(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(expense_id): Path<i64>,
) -> AppResult<Json<Data<&'static str>>> {
    let user = require_user(&cookies, &state.db).await?;
    association::delete_expense(&state.db, expense_id, &user).await?;
    Ok(data("deleted"))
}

pub async fn expense_history(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(expense_id): Path<i64>,
) -> AppResult<Json<Data<Vec<ExpenseHistory>>>> {
    let user = require_user(&cookies, &state.db).await?;
    fetch_expense_scoped(&state.db, expense_id, &user).await?;
    Ok(data(audit::expense_events(&state.db, expense_id).await?))
}

/// Append a manual annotation to the expense's history.
pub async fn annotate_expense(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(expense_id): Path<i64>,
    Json(body): Json<AnnotationRequest>,
) -> AppResult<Json<Data<Vec<ExpenseHistory>>>> {
    let user = require_user(&cookies, &state.db).await?;
    fetch_expense_scoped(&state.db, expense_id, &user).await?;

    let details = body.details.trim();
    if details.is_empty() {
        return Err(AppError::InvalidState(
            "annotation details are required".to_string(),
        ));
    }

    let mut conn = state.db.acquire().await?;
    audit::record_expense_event(
        &mut conn,
        expense_id,
        HistoryEvent::Note,
        Some(details),
        Some(user.id),
    )
    .await?;

    Ok(data(audit::expense_events(&state.db, expense_id).await?))
}

/// Owners see their own expenses, admins any; not-owned reads are NotFound.
async fn fetch_expense_scoped(
    db: &Database,
    expense_id: i64,
    user: &CurrentUser,
) -> AppResult<Expense> {
    let expense: Option<Expense> = if user.is_admin() {
        sqlx::query_as("SELECT * FROM expenses WHERE id = $1")
            .bind(expense_id)
            .fetch_optional(db)
            .await?
    } else {
        sqlx::query_as("SELECT * FROM expenses WHERE id = $1 AND user_id = $2")
            .bind(expense_id)
            .bind(user.id)
            .fetch_optional(db)
            .await?
    };
    expense.ok_or(AppError::NotFound("expense"))
}
