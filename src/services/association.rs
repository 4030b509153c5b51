//! Expense-report association manager. Owns the many-to-one relation
//! between expenses and reports: membership changes only while the report
//! is pending, expense status mirrors the report, and the cached report
//! total is recomputed in the same transaction as any membership change.

use sqlx::PgConnection;

use crate::{
    database::Database,
    error::{AppError, AppResult},
    middleware::CurrentUser,
    models::{CreateExpense, Expense, Report, ReportStatus, UpdateExpense},
};

/// Recompute and persist the report total from its attached expenses.
/// The pure equivalents live in `models::expense` and are what tests use
/// to assert the cached column never drifts.
pub async fn recompute_total(
    conn: &mut PgConnection,
    report_id: i64,
) -> Result<Report, sqlx::Error> {
    sqlx::query_as(
        "UPDATE reports SET total_amount = \
         (SELECT COALESCE(SUM(amount), 0) FROM expenses WHERE report_id = $1), \
         updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(report_id)
    .fetch_one(conn)
    .await
}

fn dedup_ids(expense_ids: &[i64]) -> AppResult<Vec<i64>> {
    let mut ids = expense_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    if ids.is_empty() {
        return Err(AppError::InvalidState("no expense ids given".to_string()));
    }
    Ok(ids)
}

/// Attach expenses to a pending report the actor owns. All-or-nothing:
/// every id must exist, belong to the actor, and be unattached (or already
/// attached to this report), otherwise nothing changes.
pub async fn add_expenses(
    db: &Database,
    report_id: i64,
    expense_ids: &[i64],
    actor: &CurrentUser,
) -> AppResult<Report> {
    let ids = dedup_ids(expense_ids)?;
    let mut tx = db.begin().await?;

    let report: Report =
        sqlx::query_as("SELECT * FROM reports WHERE id = $1 AND user_id = $2 FOR UPDATE")
            .bind(report_id)
            .bind(actor.id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AppError::NotFound("report"))?;

    if report.status != ReportStatus::Pending {
        return Err(AppError::InvalidState(format!(
            "expenses can only be added while the report is pending, not {}",
            report.status
        )));
    }

    let eligible: Vec<i64> = sqlx::query_scalar(
        "SELECT id FROM expenses WHERE id = ANY($1) AND user_id = $2 \
         AND (report_id IS NULL OR report_id = $3) FOR UPDATE",
    )
    .bind(&ids[..])
    .bind(actor.id)
    .bind(report_id)
    .fetch_all(&mut *tx)
    .await?;

    if eligible.len() != ids.len() {
        return Err(AppError::InvalidState(
            "one or more expenses are missing, not yours, or attached to another report"
                .to_string(),
        ));
    }

    sqlx::query(
        "UPDATE expenses SET report_id = $1, status = 'reported', updated_at = NOW() \
         WHERE id = ANY($2)",
    )
    .bind(report_id)
    .bind(&ids[..])
    .execute(&mut *tx)
    .await?;

    let updated = recompute_total(&mut tx, report_id).await?;
    tx.commit().await?;
    Ok(updated)
}

/// Detach expenses from a pending report the actor owns. All-or-nothing
/// over ids actually attached to this report.
pub async fn remove_expenses(
    db: &Database,
    report_id: i64,
    expense_ids: &[i64],
    actor: &CurrentUser,
) -> AppResult<Report> {
    let ids = dedup_ids(expense_ids)?;
    let mut tx = db.begin().await?;

    let report: Report =
        sqlx::query_as("SELECT * FROM reports WHERE id = $1 AND user_id = $2 FOR UPDATE")
            .bind(report_id)
            .bind(actor.id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AppError::NotFound("report"))?;

    if report.status != ReportStatus::Pending {
        return Err(AppError::InvalidState(format!(
            "expenses can only be removed while the report is pending, not {}",
            report.status
        )));
    }

    let attached: Vec<i64> =
        sqlx::query_scalar("SELECT id FROM expenses WHERE id = ANY($1) AND report_id = $2 FOR UPDATE")
            .bind(&ids[..])
            .bind(report_id)
            .fetch_all(&mut *tx)
            .await?;

    if attached.len() != ids.len() {
        return Err(AppError::InvalidState(
            "one or more expenses are not attached to this report".to_string(),
        ));
    }

    sqlx::query(
        "UPDATE expenses SET report_id = NULL, status = 'unreported', updated_at = NOW() \
         WHERE id = ANY($1)",
    )
    .bind(&ids[..])
    .execute(&mut *tx)
    .await?;

    let updated = recompute_total(&mut tx, report_id).await?;
    tx.commit().await?;
    Ok(updated)
}

/// Create an expense, optionally pre-assigned to a pending report the
/// actor owns.
pub async fn create_expense(
    db: &Database,
    actor: &CurrentUser,
    payload: &CreateExpense,
) -> AppResult<Expense> {
    if payload.amount.is_sign_negative() || payload.amount.is_zero() {
        return Err(AppError::InvalidState(
            "expense amount must be positive".to_string(),
        ));
    }
    if payload.merchant.trim().is_empty() {
        return Err(AppError::InvalidState("a merchant is required".to_string()));
    }

    let mut tx = db.begin().await?;

    if let Some(report_id) = payload.report_id {
        let report: Report =
            sqlx::query_as("SELECT * FROM reports WHERE id = $1 AND user_id = $2 FOR UPDATE")
                .bind(report_id)
                .bind(actor.id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(AppError::NotFound("report"))?;
        if report.status != ReportStatus::Pending {
            return Err(AppError::InvalidState(format!(
                "expenses can only be added while the report is pending, not {}",
                report.status
            )));
        }
    }

    let expense: Expense = sqlx::query_as(
        "INSERT INTO expenses \
         (user_id, report_id, amount, merchant, expense_date, description, category, notes, \
          receipt_urls, claim_reimbursement, status) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, \
                 CASE WHEN $2::bigint IS NULL THEN 'unreported'::expense_status \
                      ELSE 'reported'::expense_status END) \
         RETURNING *",
    )
    .bind(actor.id)
    .bind(payload.report_id)
    .bind(payload.amount)
    .bind(payload.merchant.trim())
    .bind(payload.expense_date)
    .bind(&payload.description)
    .bind(payload.category)
    .bind(&payload.notes)
    .bind(&payload.receipt_urls)
    .bind(payload.claim_reimbursement.unwrap_or(true))
    .fetch_one(&mut *tx)
    .await?;

    if let Some(report_id) = payload.report_id {
        recompute_total(&mut tx, report_id).await?;
    }

    tx.commit().await?;
    Ok(expense)
}

/// Edit an expense the actor owns. Allowed while unreported or while its
/// report is still pending; reported fields are otherwise frozen.
pub async fn update_expense(
    db: &Database,
    expense_id: i64,
    actor: &CurrentUser,
    payload: &UpdateExpense,
) -> AppResult<Expense> {
    if payload.amount.is_sign_negative() || payload.amount.is_zero() {
        return Err(AppError::InvalidState(
            "expense amount must be positive".to_string(),
        ));
    }
    if payload.merchant.trim().is_empty() {
        return Err(AppError::InvalidState("a merchant is required".to_string()));
    }

    let mut tx = db.begin().await?;

    let expense: Expense =
        sqlx::query_as("SELECT * FROM expenses WHERE id = $1 AND user_id = $2 FOR UPDATE")
            .bind(expense_id)
            .bind(actor.id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AppError::NotFound("expense"))?;

    if let Some(report_id) = expense.report_id {
        let status: ReportStatus =
            sqlx::query_scalar("SELECT status FROM reports WHERE id = $1 FOR UPDATE")
                .bind(report_id)
                .fetch_one(&mut *tx)
                .await?;
        if status != ReportStatus::Pending {
            return Err(AppError::InvalidState(format!(
                "expense belongs to a report in status {} and can no longer be edited",
                status
            )));
        }
    }

    let updated: Expense = sqlx::query_as(
        "UPDATE expenses SET amount = $2, merchant = $3, expense_date = $4, description = $5, \
         category = $6, notes = $7, receipt_urls = $8, claim_reimbursement = $9, \
         updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(expense_id)
    .bind(payload.amount)
    .bind(payload.merchant.trim())
    .bind(payload.expense_date)
    .bind(&payload.description)
    .bind(payload.category)
    .bind(&payload.notes)
    .bind(&payload.receipt_urls)
    .bind(payload.claim_reimbursement.unwrap_or(expense.claim_reimbursement))
    .fetch_one(&mut *tx)
    .await?;

    if let Some(report_id) = expense.report_id {
        recompute_total(&mut tx, report_id).await?;
    }

    tx.commit().await?;
    Ok(updated)
}

/// Delete an expense. Owners may delete while it is unreported or its
/// report is pending; admins at any status. Removes it from the report
/// total when attached.
pub async fn delete_expense(db: &Database, expense_id: i64, actor: &CurrentUser) -> AppResult<()> {
    let mut tx = db.begin().await?;

    let expense: Expense = if actor.is_admin() {
        sqlx::query_as("SELECT * FROM expenses WHERE id = $1 FOR UPDATE")
            .bind(expense_id)
            .fetch_optional(&mut *tx)
            .await?
    } else {
        sqlx::query_as("SELECT * FROM expenses WHERE id = $1 AND user_id = $2 FOR UPDATE")
            .bind(expense_id)
            .bind(actor.id)
            .fetch_optional(&mut *tx)
            .await?
    }
    .ok_or(AppError::NotFound("expense"))?;

    if let Some(report_id) = expense.report_id {
        let status: ReportStatus =
            sqlx::query_scalar("SELECT status FROM reports WHERE id = $1 FOR UPDATE")
                .bind(report_id)
                .fetch_one(&mut *tx)
                .await?;
        if !actor.is_admin() && status != ReportStatus::Pending {
            return Err(AppError::InvalidState(format!(
                "expense belongs to a report in status {} and can only be deleted by an admin",
                status
            )));
        }
    }

    sqlx::query("DELETE FROM expenses WHERE id = $1")
        .bind(expense_id)
        .execute(&mut *tx)
        .await?;

    if let Some(report_id) = expense.report_id {
        recompute_total(&mut tx, report_id).await?;
    }

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_ids_collapse() {
        assert_eq!(dedup_ids(&[3, 1, 3, 2, 1]).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn empty_id_list_is_rejected() {
        assert!(matches!(
            dedup_ids(&[]),
            Err(AppError::InvalidState(_))
        ));
    }
}
