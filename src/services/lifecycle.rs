//! Report lifecycle engine. Owns the state machine: each operation is a
//! single transaction (row lock, guard check, status + timestamp update,
//! history append, expense-status mirror) that returns a [`TransitionEvent`].
//! Notification and email fan-out happens after commit via the dispatcher
//! and never rolls back or fails the transition.

use serde::Serialize;
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::{
    database::Database,
    error::{AppError, AppResult},
    middleware::CurrentUser,
    models::{ExpenseStatus, HistoryEvent, LifecycleAction, NotificationKind, Report, ReportStatus},
    services::{audit, notify::Dispatcher},
};

/// Who a lifecycle notification is addressed to.
#[derive(Debug, Clone, FromRow)]
pub struct Recipient {
    pub user_id: Uuid,
    pub email: String,
    pub first_name: String,
}

/// Domain event produced by a committed transition, consumed by the
/// dispatcher. Carrying it out of the transaction keeps the best-effort
/// side effects separate from the guarded core.
#[derive(Debug)]
pub struct TransitionEvent {
    pub report_id: i64,
    pub report_title: String,
    pub event: HistoryEvent,
    pub details: Option<String>,
    pub recipient: Option<Recipient>,
}

impl TransitionEvent {
    /// Submit only notifies in-app; the admin decisions also email the owner.
    pub fn sends_email(&self) -> bool {
        matches!(
            self.event,
            HistoryEvent::Approved | HistoryEvent::Rejected | HistoryEvent::Reimbursed
        )
    }

    pub fn render(&self) -> Option<(NotificationKind, String, String)> {
        let title = &self.report_title;
        match self.event {
            HistoryEvent::Submitted => Some((
                NotificationKind::ReportSubmitted,
                "Expense report submitted".to_string(),
                format!("Report \"{}\" is awaiting your approval", title),
            )),
            HistoryEvent::Approved => Some((
                NotificationKind::ReportApproved,
                "Expense report approved".to_string(),
                format!("Your report \"{}\" has been approved", title),
            )),
            HistoryEvent::Rejected => {
                let reason = self.details.as_deref().unwrap_or("no reason given");
                Some((
                    NotificationKind::ReportRejected,
                    "Expense report rejected".to_string(),
                    format!("Your report \"{}\" was rejected: {}", title, reason),
                ))
            }
            HistoryEvent::Reimbursed => {
                let message = match self.details.as_deref() {
                    Some(reference) => format!(
                        "Your report \"{}\" has been reimbursed (ref {})",
                        title, reference
                    ),
                    None => format!("Your report \"{}\" has been reimbursed", title),
                };
                Some((
                    NotificationKind::ReportReimbursed,
                    "Expense report reimbursed".to_string(),
                    message,
                ))
            }
            HistoryEvent::Note => None,
        }
    }
}

/// Admin decision on a submitted or approved report, with its payload.
#[derive(Debug, Clone)]
enum AdminAction {
    Approve,
    Reject(String),
    Reimburse(Option<String>),
}

impl AdminAction {
    fn lifecycle(&self) -> LifecycleAction {
        match self {
            Self::Approve => LifecycleAction::Approve,
            Self::Reject(_) => LifecycleAction::Reject,
            Self::Reimburse(_) => LifecycleAction::Reimburse,
        }
    }

    fn event(&self) -> HistoryEvent {
        match self {
            Self::Approve => HistoryEvent::Approved,
            Self::Reject(_) => HistoryEvent::Rejected,
            Self::Reimburse(_) => HistoryEvent::Reimbursed,
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            Self::Approve => None,
            Self::Reject(reason) => Some(reason.clone()),
            Self::Reimburse(reference) => reference.clone(),
        }
    }
}

/// Counts returned by the bulk endpoints. A skipped id is one that was
/// missing, ineligible, or failed; it never aborts the rest of the batch.
#[derive(Debug, Default, Serialize)]
pub struct BulkOutcome {
    pub processed: usize,
    pub skipped: usize,
}

fn normalized_reason(reason: &str) -> Option<&str> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

async fn fetch_recipient(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> Result<Option<Recipient>, sqlx::Error> {
    sqlx::query_as("SELECT id AS user_id, email, first_name FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(conn)
        .await
}

/// Submit a pending report for approval. Owner only; the report must have
/// at least one attached expense.
pub async fn submit(
    db: &Database,
    dispatcher: &Dispatcher,
    report_id: i64,
    actor: &CurrentUser,
) -> AppResult<Report> {
    let mut tx = db.begin().await?;

    let report: Report =
        sqlx::query_as("SELECT * FROM reports WHERE id = $1 AND user_id = $2 FOR UPDATE")
            .bind(report_id)
            .bind(actor.id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AppError::NotFound("report"))?;

    if report.status.next(LifecycleAction::Submit).is_none() {
        return Err(AppError::InvalidState(format!(
            "report in status {} cannot be submitted",
            report.status
        )));
    }

    let expense_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM expenses WHERE report_id = $1")
        .bind(report_id)
        .fetch_one(&mut *tx)
        .await?;
    if expense_count == 0 {
        return Err(AppError::InvalidState(
            "report has no expenses attached".to_string(),
        ));
    }

    let updated: Report = sqlx::query_as(
        "UPDATE reports SET status = 'submitted', submitted_at = NOW(), updated_at = NOW() \
         WHERE id = $1 AND status = 'pending' RETURNING *",
    )
    .bind(report_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::InvalidState("report is no longer pending".to_string()))?;

    sqlx::query("UPDATE expenses SET status = 'reported', updated_at = NOW() WHERE report_id = $1")
        .bind(report_id)
        .execute(&mut *tx)
        .await?;

    audit::record_report_event(&mut tx, report_id, HistoryEvent::Submitted, None, Some(actor.id))
        .await?;
    audit::mirror_report_event(&mut tx, report_id, HistoryEvent::Submitted, Some(actor.id)).await?;

    // Missing approver is a logged no-op on the submit path, not a failure.
    let recipient = match updated.approver_id {
        Some(approver_id) => fetch_recipient(&mut tx, approver_id).await?,
        None => None,
    };

    tx.commit().await?;

    let event = TransitionEvent {
        report_id,
        report_title: updated.title.clone(),
        event: HistoryEvent::Submitted,
        details: None,
        recipient,
    };
    dispatcher.dispatch(&event).await;

    Ok(updated)
}

pub async fn approve(
    db: &Database,
    dispatcher: &Dispatcher,
    report_id: i64,
    actor: &CurrentUser,
) -> AppResult<Report> {
    admin_transition(db, dispatcher, report_id, actor, AdminAction::Approve).await
}

pub async fn reject(
    db: &Database,
    dispatcher: &Dispatcher,
    report_id: i64,
    actor: &CurrentUser,
    reason: &str,
) -> AppResult<Report> {
    let reason = normalized_reason(reason).ok_or_else(|| {
        AppError::InvalidState("a rejection reason is required".to_string())
    })?;
    admin_transition(
        db,
        dispatcher,
        report_id,
        actor,
        AdminAction::Reject(reason.to_string()),
    )
    .await
}

pub async fn reimburse(
    db: &Database,
    dispatcher: &Dispatcher,
    report_id: i64,
    actor: &CurrentUser,
    payment_reference: Option<&str>,
) -> AppResult<Report> {
    let reference = payment_reference
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string);
    admin_transition(db, dispatcher, report_id, actor, AdminAction::Reimburse(reference)).await
}

async fn admin_transition(
    db: &Database,
    dispatcher: &Dispatcher,
    report_id: i64,
    actor: &CurrentUser,
    action: AdminAction,
) -> AppResult<Report> {
    if !actor.is_admin() {
        return Err(AppError::Forbidden);
    }

    let mut tx = db.begin().await?;

    let report: Report = sqlx::query_as("SELECT * FROM reports WHERE id = $1 FOR UPDATE")
        .bind(report_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("report"))?;

    let target = report.status.next(action.lifecycle()).ok_or_else(|| {
        AppError::InvalidState(format!(
            "report in status {} cannot be {}",
            report.status,
            action.lifecycle().verb()
        ))
    })?;

    // The status predicate doubles as the optimistic re-check: a concurrent
    // transition that won the race leaves zero rows here.
    let updated: Option<Report> = match &action {
        AdminAction::Approve => {
            sqlx::query_as(
                "UPDATE reports SET status = 'approved', approved_at = NOW(), approver_id = $2, \
                 updated_at = NOW() WHERE id = $1 AND status = 'submitted' RETURNING *",
            )
            .bind(report_id)
            .bind(actor.id)
            .fetch_optional(&mut *tx)
            .await?
        }
        AdminAction::Reject(reason) => {
            sqlx::query_as(
                "UPDATE reports SET status = 'rejected', rejected_at = NOW(), approver_id = $2, \
                 reimbursement_notes = $3, updated_at = NOW() \
                 WHERE id = $1 AND status = 'submitted' RETURNING *",
            )
            .bind(report_id)
            .bind(actor.id)
            .bind(reason)
            .fetch_optional(&mut *tx)
            .await?
        }
        AdminAction::Reimburse(reference) => {
            sqlx::query_as(
                "UPDATE reports SET status = 'reimbursed', reimbursed_at = NOW(), \
                 reimbursement_notes = COALESCE($2, reimbursement_notes), updated_at = NOW() \
                 WHERE id = $1 AND status = 'approved' RETURNING *",
            )
            .bind(report_id)
            .bind(reference.as_deref())
            .fetch_optional(&mut *tx)
            .await?
        }
    };
    let updated = updated.ok_or_else(|| {
        AppError::InvalidState(format!(
            "report is no longer {}",
            report.status
        ))
    })?;

    sqlx::query("UPDATE expenses SET status = $2, updated_at = NOW() WHERE report_id = $1")
        .bind(report_id)
        .bind(ExpenseStatus::mirroring(target))
        .execute(&mut *tx)
        .await?;

    let details = action.details();
    audit::record_report_event(
        &mut tx,
        report_id,
        action.event(),
        details.as_deref(),
        Some(actor.id),
    )
    .await?;
    audit::mirror_report_event(&mut tx, report_id, action.event(), Some(actor.id)).await?;

    let recipient = fetch_recipient(&mut tx, updated.user_id).await?;

    tx.commit().await?;

    let event = TransitionEvent {
        report_id,
        report_title: updated.title.clone(),
        event: action.event(),
        details,
        recipient,
    };
    dispatcher.dispatch(&event).await;

    Ok(updated)
}

/// Apply one admin action per id. Ineligible or failing ids are skipped
/// and logged; the batch always runs to completion.
async fn bulk_apply(
    db: &Database,
    dispatcher: &Dispatcher,
    report_ids: &[i64],
    actor: &CurrentUser,
    action: AdminAction,
) -> AppResult<BulkOutcome> {
    if !actor.is_admin() {
        return Err(AppError::Forbidden);
    }
    let mut outcome = BulkOutcome::default();
    for &id in report_ids {
        match admin_transition(db, dispatcher, id, actor, action.clone()).await {
            Ok(_) => outcome.processed += 1,
            Err(err) => {
                log::debug!(
                    "bulk {}: skipping report {}: {}",
                    action.lifecycle().verb(),
                    id,
                    err
                );
                outcome.skipped += 1;
            }
        }
    }
    Ok(outcome)
}

pub async fn bulk_approve(
    db: &Database,
    dispatcher: &Dispatcher,
    report_ids: &[i64],
    actor: &CurrentUser,
) -> AppResult<BulkOutcome> {
    bulk_apply(db, dispatcher, report_ids, actor, AdminAction::Approve).await
}

pub async fn bulk_reject(
    db: &Database,
    dispatcher: &Dispatcher,
    report_ids: &[i64],
    actor: &CurrentUser,
    reason: &str,
) -> AppResult<BulkOutcome> {
    let reason = normalized_reason(reason)
        .ok_or_else(|| AppError::InvalidState("a rejection reason is required".to_string()))?;
    bulk_apply(
        db,
        dispatcher,
        report_ids,
        actor,
        AdminAction::Reject(reason.to_string()),
    )
    .await
}

pub async fn bulk_reimburse(
    db: &Database,
    dispatcher: &Dispatcher,
    report_ids: &[i64],
    actor: &CurrentUser,
    payment_reference: Option<&str>,
) -> AppResult<BulkOutcome> {
    let reference = payment_reference
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string);
    bulk_apply(
        db,
        dispatcher,
        report_ids,
        actor,
        AdminAction::Reimburse(reference),
    )
    .await
}

/// Delete a report. Owners may delete only while pending; admins at any
/// status (intentional override). Attached expenses are detached first;
/// history rows cascade with the report.
pub async fn delete_report(db: &Database, report_id: i64, actor: &CurrentUser) -> AppResult<()> {
    let mut tx = db.begin().await?;

    let report: Report = if actor.is_admin() {
        sqlx::query_as("SELECT * FROM reports WHERE id = $1 FOR UPDATE")
            .bind(report_id)
            .fetch_optional(&mut *tx)
            .await?
    } else {
        sqlx::query_as("SELECT * FROM reports WHERE id = $1 AND user_id = $2 FOR UPDATE")
            .bind(report_id)
            .bind(actor.id)
            .fetch_optional(&mut *tx)
            .await?
    }
    .ok_or(AppError::NotFound("report"))?;

    if !actor.is_admin() && report.status != ReportStatus::Pending {
        return Err(AppError::InvalidState(format!(
            "report in status {} can only be deleted by an admin",
            report.status
        )));
    }

    sqlx::query(
        "UPDATE expenses SET report_id = NULL, status = 'unreported', updated_at = NOW() \
         WHERE report_id = $1",
    )
    .bind(report_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM reports WHERE id = $1")
        .bind(report_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: HistoryEvent, details: Option<&str>) -> TransitionEvent {
        TransitionEvent {
            report_id: 5,
            report_title: "Q1 travel".to_string(),
            event: kind,
            details: details.map(str::to_string),
            recipient: None,
        }
    }

    #[test]
    fn submit_notifies_without_email() {
        let e = event(HistoryEvent::Submitted, None);
        assert!(!e.sends_email());
        let (kind, _, message) = e.render().unwrap();
        assert_eq!(kind, NotificationKind::ReportSubmitted);
        assert!(message.contains("Q1 travel"));
        assert!(message.contains("awaiting your approval"));
    }

    #[test]
    fn admin_decisions_also_send_email() {
        for kind in [
            HistoryEvent::Approved,
            HistoryEvent::Rejected,
            HistoryEvent::Reimbursed,
        ] {
            assert!(event(kind, None).sends_email());
        }
    }

    #[test]
    fn rejection_message_carries_the_reason() {
        let e = event(HistoryEvent::Rejected, Some("missing receipts"));
        let (kind, _, message) = e.render().unwrap();
        assert_eq!(kind, NotificationKind::ReportRejected);
        assert!(message.contains("missing receipts"));
    }

    #[test]
    fn reimbursement_message_includes_the_payment_reference_when_given() {
        let (_, _, with_ref) = event(HistoryEvent::Reimbursed, Some("PAY-123")).render().unwrap();
        assert!(with_ref.contains("PAY-123"));

        let (_, _, without) = event(HistoryEvent::Reimbursed, None).render().unwrap();
        assert!(!without.contains("ref"));
    }

    #[test]
    fn notes_never_render_a_notification() {
        assert!(event(HistoryEvent::Note, None).render().is_none());
    }

    #[test]
    fn rejection_reason_is_required_and_trimmed() {
        assert_eq!(normalized_reason(""), None);
        assert_eq!(normalized_reason("   \t"), None);
        assert_eq!(normalized_reason("  too vague  "), Some("too vague"));
    }

    use rust_decimal::Decimal;

    use crate::models::{
        expense, Expense, Notification, NotificationRow, RelatedEntity, Role,
    };
    use crate::services::notify::LogMailer;

    fn dispatcher(db: &Database) -> Dispatcher {
        Dispatcher::new(db.clone(), Box::new(LogMailer))
    }

    async fn seed_user(db: &Database, role: Role) -> CurrentUser {
        let email = format!("{}@example.com", Uuid::new_v4());
        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO users (email, password_hash, first_name, last_name, role) \
             VALUES ($1, 'not-a-hash', 'Avery', 'Nguyen', $2) RETURNING id",
        )
        .bind(&email)
        .bind(role)
        .fetch_one(db)
        .await
        .unwrap();
        CurrentUser {
            id,
            email,
            first_name: "Avery".to_string(),
            last_name: "Nguyen".to_string(),
            role,
        }
    }

    async fn seed_report(
        db: &Database,
        owner: &CurrentUser,
        title: &str,
        approver_id: Option<Uuid>,
    ) -> i64 {
        sqlx::query_scalar(
            "INSERT INTO reports (user_id, title, approver_id) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(owner.id)
        .bind(title)
        .bind(approver_id)
        .fetch_one(db)
        .await
        .unwrap()
    }

    async fn seed_expense(
        db: &Database,
        owner: &CurrentUser,
        report_id: i64,
        amount: Decimal,
        claim_reimbursement: bool,
    ) -> i64 {
        sqlx::query_scalar(
            "INSERT INTO expenses \
             (user_id, report_id, amount, merchant, expense_date, claim_reimbursement, status) \
             VALUES ($1, $2, $3, 'Acme Travel', '2024-03-01', $4, 'reported') RETURNING id",
        )
        .bind(owner.id)
        .bind(report_id)
        .bind(amount)
        .bind(claim_reimbursement)
        .fetch_one(db)
        .await
        .unwrap()
    }

    async fn fetch_report(db: &Database, report_id: i64) -> Report {
        sqlx::query_as("SELECT * FROM reports WHERE id = $1")
            .bind(report_id)
            .fetch_one(db)
            .await
            .unwrap()
    }

    async fn history_events(db: &Database, report_id: i64) -> Vec<HistoryEvent> {
        sqlx::query_scalar(
            "SELECT event_type FROM report_history WHERE report_id = $1 ORDER BY event_date, id",
        )
        .bind(report_id)
        .fetch_all(db)
        .await
        .unwrap()
    }

    async fn mark_submitted(db: &Database, report_id: i64) {
        sqlx::query(
            "UPDATE reports SET status = 'submitted', submitted_at = NOW() WHERE id = $1",
        )
        .bind(report_id)
        .execute(db)
        .await
        .unwrap();
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn report_moves_through_submit_approve_reimburse(pool: sqlx::PgPool) {
        let owner = seed_user(&pool, Role::User).await;
        let admin = seed_user(&pool, Role::Admin).await;
        let dispatcher = dispatcher(&pool);

        let report_id = seed_report(&pool, &owner, "March client visit", Some(admin.id)).await;
        seed_expense(&pool, &owner, report_id, Decimal::new(250, 0), false).await;
        seed_expense(&pool, &owner, report_id, Decimal::new(100, 0), true).await;

        let submitted = submit(&pool, &dispatcher, report_id, &owner).await.unwrap();
        assert_eq!(submitted.status, ReportStatus::Submitted);
        let submitted_at = submitted.submitted_at.unwrap();

        // The approver gets an in-app notification pointing back at the report.
        let row: NotificationRow = sqlx::query_as("SELECT * FROM notifications WHERE user_id = $1")
            .bind(admin.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        let notification = Notification::from(row);
        assert_eq!(
            notification.notification_type,
            NotificationKind::ReportSubmitted
        );
        assert_eq!(
            notification.related,
            Some(RelatedEntity::Report { id: report_id })
        );

        let approved = approve(&pool, &dispatcher, report_id, &admin).await.unwrap();
        assert_eq!(approved.status, ReportStatus::Approved);
        assert_eq!(approved.submitted_at, Some(submitted_at));
        let approved_at = approved.approved_at.unwrap();

        let reimbursed = reimburse(&pool, &dispatcher, report_id, &admin, Some("PAY-88"))
            .await
            .unwrap();
        assert_eq!(reimbursed.status, ReportStatus::Reimbursed);

        // Earlier transition timestamps survive later transitions.
        let finished = fetch_report(&pool, report_id).await;
        assert_eq!(finished.status, ReportStatus::Reimbursed);
        assert_eq!(finished.submitted_at, Some(submitted_at));
        assert_eq!(finished.approved_at, Some(approved_at));
        assert!(finished.reimbursed_at.is_some());

        let expenses: Vec<Expense> = sqlx::query_as("SELECT * FROM expenses WHERE report_id = $1")
            .bind(report_id)
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(expense::total_amount(&expenses), Decimal::new(350, 0));
        assert_eq!(expense::reimbursable_subtotal(&expenses), Decimal::new(100, 0));
        assert!(expenses
            .iter()
            .all(|e| e.status == ExpenseStatus::Reimbursed));

        assert_eq!(
            history_events(&pool, report_id).await,
            vec![
                HistoryEvent::Submitted,
                HistoryEvent::Approved,
                HistoryEvent::Reimbursed,
            ]
        );
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn bulk_approve_counts_eligible_and_skipped(pool: sqlx::PgPool) {
        let owner = seed_user(&pool, Role::User).await;
        let admin = seed_user(&pool, Role::Admin).await;
        let dispatcher = dispatcher(&pool);

        let first = seed_report(&pool, &owner, "First", None).await;
        let second = seed_report(&pool, &owner, "Second", None).await;
        let still_pending = seed_report(&pool, &owner, "Third", None).await;
        mark_submitted(&pool, first).await;
        mark_submitted(&pool, second).await;

        let outcome = bulk_approve(&pool, &dispatcher, &[first, second, still_pending], &admin)
            .await
            .unwrap();
        assert_eq!(outcome.processed, 2);
        assert_eq!(outcome.skipped, 1);

        // History rows exist only for the two reports that transitioned.
        assert_eq!(history_events(&pool, first).await, vec![HistoryEvent::Approved]);
        assert_eq!(history_events(&pool, second).await, vec![HistoryEvent::Approved]);
        assert!(history_events(&pool, still_pending).await.is_empty());
        assert_eq!(
            fetch_report(&pool, still_pending).await.status,
            ReportStatus::Pending
        );
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn failed_submit_guard_writes_nothing(pool: sqlx::PgPool) {
        let owner = seed_user(&pool, Role::User).await;
        let dispatcher = dispatcher(&pool);

        // No expenses attached, so the submit guard fires.
        let report_id = seed_report(&pool, &owner, "Empty report", None).await;
        let err = submit(&pool, &dispatcher, report_id, &owner).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        let report = fetch_report(&pool, report_id).await;
        assert_eq!(report.status, ReportStatus::Pending);
        assert!(report.submitted_at.is_none());
        assert!(history_events(&pool, report_id).await.is_empty());

        let notifications: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(notifications, 0);
    }
}
