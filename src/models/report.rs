use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::Expense;

/// Lifecycle status of a report. Initial state is `Pending`;
/// `Rejected` and `Reimbursed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "report_status", rename_all = "lowercase")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Pending,
    Submitted,
    Approved,
    Rejected,
    Reimbursed,
}

impl ReportStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Reimbursed)
    }

    /// The target status if `action` is legal from this status, `None` otherwise.
    /// This is the whole transition table; reverse transitions do not exist.
    pub fn next(self, action: LifecycleAction) -> Option<ReportStatus> {
        match (self, action) {
            (Self::Pending, LifecycleAction::Submit) => Some(Self::Submitted),
            (Self::Submitted, LifecycleAction::Approve) => Some(Self::Approved),
            (Self::Submitted, LifecycleAction::Reject) => Some(Self::Rejected),
            (Self::Approved, LifecycleAction::Reimburse) => Some(Self::Reimbursed),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "submitted" => Some(Self::Submitted),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "reimbursed" => Some(Self::Reimbursed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Reimbursed => "reimbursed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Submit,
    Approve,
    Reject,
    Reimburse,
}

impl LifecycleAction {
    pub const ALL: [LifecycleAction; 4] = [
        Self::Submit,
        Self::Approve,
        Self::Reject,
        Self::Reimburse,
    ];

    /// Past-tense verb for guard failure messages.
    pub fn verb(self) -> &'static str {
        match self {
            Self::Submit => "submitted",
            Self::Approve => "approved",
            Self::Reject => "rejected",
            Self::Reimburse => "reimbursed",
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Report {
    pub id: i64,
    pub user_id: Uuid,
    pub approver_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub status: ReportStatus,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub total_amount: Decimal,
    pub reimbursement_notes: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub reimbursed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// UI projection of a status: label, color, and a contextual date line.
/// Derived purely from the status and the matching timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusDisplay {
    pub label: &'static str,
    pub color: &'static str,
    pub date_line: String,
}

impl Report {
    pub fn status_display(&self) -> StatusDisplay {
        let (label, color, verb, stamp) = match self.status {
            ReportStatus::Pending => ("Pending", "gray", "Created", None),
            ReportStatus::Submitted => ("Submitted", "blue", "Submitted", self.submitted_at),
            ReportStatus::Approved => ("Approved", "green", "Approved", self.approved_at),
            ReportStatus::Rejected => ("Rejected", "red", "Rejected", self.rejected_at),
            ReportStatus::Reimbursed => ("Reimbursed", "purple", "Reimbursed", self.reimbursed_at),
        };
        let date = stamp.unwrap_or(self.created_at);
        StatusDisplay {
            label,
            color,
            date_line: format!("{} {}", verb, date.format("%b %-d, %Y")),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateReport {
    pub title: String,
    pub description: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub approver_id: Option<Uuid>,
}

/// Report row joined with recomputed aggregates, as fetched by list views.
/// List views never trust the cached total_amount column.
#[derive(Debug, FromRow)]
pub struct ReportListRow {
    #[sqlx(flatten)]
    pub report: Report,
    pub computed_total: Decimal,
    pub reimbursable_subtotal: Decimal,
    pub expense_count: i64,
}

#[derive(Debug, Serialize)]
pub struct ReportResponse {
    pub id: i64,
    pub user_id: Uuid,
    pub approver_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub status: ReportStatus,
    pub status_display: StatusDisplay,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub total_amount: Decimal,
    pub reimbursable_subtotal: Decimal,
    pub expense_count: i64,
    pub reimbursement_notes: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub reimbursed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ReportResponse {
    pub fn from_report(
        report: Report,
        total_amount: Decimal,
        reimbursable_subtotal: Decimal,
        expense_count: i64,
    ) -> Self {
        let status_display = report.status_display();
        Self {
            id: report.id,
            user_id: report.user_id,
            approver_id: report.approver_id,
            title: report.title,
            description: report.description,
            status: report.status,
            status_display,
            start_date: report.start_date,
            end_date: report.end_date,
            total_amount,
            reimbursable_subtotal,
            expense_count,
            reimbursement_notes: report.reimbursement_notes,
            submitted_at: report.submitted_at,
            approved_at: report.approved_at,
            rejected_at: report.rejected_at,
            reimbursed_at: report.reimbursed_at,
            created_at: report.created_at,
        }
    }

    /// Projection with totals recomputed from the attached expenses,
    /// used by detail views and the write paths.
    pub fn with_expenses(report: Report, expenses: &[Expense]) -> Self {
        let total = crate::models::expense::total_amount(expenses);
        let reimbursable = crate::models::expense::reimbursable_subtotal(expenses);
        Self::from_report(report, total, reimbursable, expenses.len() as i64)
    }
}

impl From<ReportListRow> for ReportResponse {
    fn from(row: ReportListRow) -> Self {
        Self::from_report(
            row.report,
            row.computed_total,
            row.reimbursable_subtotal,
            row.expense_count,
        )
    }
}

#[derive(Debug, Serialize)]
pub struct ReportDetail {
    #[serde(flatten)]
    pub report: ReportResponse,
    pub expenses: Vec<Expense>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn report(status: ReportStatus) -> Report {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        Report {
            id: 1,
            user_id: Uuid::new_v4(),
            approver_id: None,
            title: "March travel".to_string(),
            description: None,
            status,
            start_date: None,
            end_date: None,
            total_amount: Decimal::ZERO,
            reimbursement_notes: None,
            submitted_at: None,
            approved_at: None,
            rejected_at: None,
            reimbursed_at: None,
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn legal_transitions_match_table() {
        use LifecycleAction::*;
        use ReportStatus::*;

        assert_eq!(Pending.next(Submit), Some(Submitted));
        assert_eq!(Submitted.next(Approve), Some(Approved));
        assert_eq!(Submitted.next(Reject), Some(Rejected));
        assert_eq!(Approved.next(Reimburse), Some(Reimbursed));
    }

    #[test]
    fn terminal_states_allow_nothing() {
        for action in LifecycleAction::ALL {
            assert_eq!(ReportStatus::Rejected.next(action), None);
            assert_eq!(ReportStatus::Reimbursed.next(action), None);
        }
        assert!(ReportStatus::Rejected.is_terminal());
        assert!(ReportStatus::Reimbursed.is_terminal());
        assert!(!ReportStatus::Approved.is_terminal());
    }

    #[test]
    fn full_lifecycle_reaches_reimbursed_in_three_steps() {
        use LifecycleAction::*;

        let mut status = ReportStatus::Pending;
        let mut transitions = 0;
        for action in [Submit, Approve, Reimburse] {
            status = status.next(action).unwrap();
            transitions += 1;
        }
        assert_eq!(status, ReportStatus::Reimbursed);
        assert_eq!(transitions, 3);
    }

    proptest! {
        #[test]
        fn everything_outside_the_table_is_illegal(
            status in proptest::sample::select(vec![
                ReportStatus::Pending,
                ReportStatus::Submitted,
                ReportStatus::Approved,
                ReportStatus::Rejected,
                ReportStatus::Reimbursed,
            ]),
            action in proptest::sample::select(LifecycleAction::ALL.to_vec()),
        ) {
            use LifecycleAction::*;
            use ReportStatus::*;

            let legal = matches!(
                (status, action),
                (Pending, Submit) | (Submitted, Approve) | (Submitted, Reject) | (Approved, Reimburse)
            );
            prop_assert_eq!(status.next(action).is_some(), legal);
        }
    }

    #[test]
    fn status_display_uses_the_matching_timestamp() {
        let mut r = report(ReportStatus::Approved);
        r.submitted_at = Some(Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 0).unwrap());
        r.approved_at = Some(Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap());

        let display = r.status_display();
        assert_eq!(display.label, "Approved");
        assert_eq!(display.color, "green");
        assert_eq!(display.date_line, "Approved Mar 5, 2024");
    }

    #[test]
    fn pending_display_falls_back_to_creation_date() {
        let display = report(ReportStatus::Pending).status_display();
        assert_eq!(display.label, "Pending");
        assert_eq!(display.color, "gray");
        assert_eq!(display.date_line, "Created Mar 1, 2024");
    }

    #[test]
    fn rejected_display_is_red() {
        let mut r = report(ReportStatus::Rejected);
        r.rejected_at = Some(Utc.with_ymd_and_hms(2024, 3, 9, 8, 0, 0).unwrap());
        let display = r.status_display();
        assert_eq!(display.color, "red");
        assert_eq!(display.date_line, "Rejected Mar 9, 2024");
    }

    #[test]
    fn parse_round_trips_through_display() {
        for status in [
            ReportStatus::Pending,
            ReportStatus::Submitted,
            ReportStatus::Approved,
            ReportStatus::Rejected,
            ReportStatus::Reimbursed,
        ] {
            assert_eq!(ReportStatus::parse(&status.to_string()), Some(status));
        }
        assert_eq!(ReportStatus::parse("denied"), None);
    }
}
