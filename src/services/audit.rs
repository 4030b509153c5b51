//! Append-only history recorder. Rows are written inside the caller's
//! transaction and are never updated or deleted.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    database::Database,
    models::{ExpenseHistory, HistoryEvent, ReportHistory},
};

pub async fn record_report_event(
    conn: &mut PgConnection,
    report_id: i64,
    event: HistoryEvent,
    details: Option<&str>,
    performed_by: Option<Uuid>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO report_history (report_id, event_type, details, performed_by) \
         VALUES ($1, $2, $3, $4)",
    )
    .bind(report_id)
    .bind(event)
    .bind(details)
    .bind(performed_by)
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn record_expense_event(
    conn: &mut PgConnection,
    expense_id: i64,
    event: HistoryEvent,
    details: Option<&str>,
    performed_by: Option<Uuid>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO expense_history (expense_id, event_type, details, performed_by) \
         VALUES ($1, $2, $3, $4)",
    )
    .bind(expense_id)
    .bind(event)
    .bind(details)
    .bind(performed_by)
    .execute(conn)
    .await?;

    Ok(())
}

/// Mirror a report lifecycle event onto the history of every attached expense.
pub async fn mirror_report_event(
    conn: &mut PgConnection,
    report_id: i64,
    event: HistoryEvent,
    performed_by: Option<Uuid>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO expense_history (expense_id, event_type, performed_by) \
         SELECT id, $2, $3 FROM expenses WHERE report_id = $1",
    )
    .bind(report_id)
    .bind(event)
    .bind(performed_by)
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn report_events(
    db: &Database,
    report_id: i64,
) -> Result<Vec<ReportHistory>, sqlx::Error> {
    sqlx::query_as(
        "SELECT * FROM report_history WHERE report_id = $1 ORDER BY event_date, id",
    )
    .bind(report_id)
    .fetch_all(db)
    .await
}

pub async fn expense_events(
    db: &Database,
    expense_id: i64,
) -> Result<Vec<ExpenseHistory>, sqlx::Error> {
    sqlx::query_as(
        "SELECT * FROM expense_history WHERE expense_id = $1 ORDER BY event_date, id",
    )
    .bind(expense_id)
    .fetch_all(db)
    .await
}
