use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::ReportStatus;

/// Status of an expense. Mirrors the owning report's status once the
/// expense is attached; `Unreported` while report_id is null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "expense_status", rename_all = "lowercase")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpenseStatus {
    Unreported,
    Reported,
    Approved,
    Rejected,
    Reimbursed,
}

impl ExpenseStatus {
    /// The expense status that mirrors a given report status.
    pub fn mirroring(report: ReportStatus) -> Self {
        match report {
            ReportStatus::Pending | ReportStatus::Submitted => Self::Reported,
            ReportStatus::Approved => Self::Approved,
            ReportStatus::Rejected => Self::Rejected,
            ReportStatus::Reimbursed => Self::Reimbursed,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unreported" => Some(Self::Unreported),
            "reported" => Some(Self::Reported),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "reimbursed" => Some(Self::Reimbursed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExpenseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unreported => "unreported",
            Self::Reported => "reported",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Reimbursed => "reimbursed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "expense_category", rename_all = "lowercase")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpenseCategory {
    Travel,
    Meals,
    Lodging,
    Supplies,
    Software,
    Other,
}

impl ExpenseCategory {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "travel" => Some(Self::Travel),
            "meals" => Some(Self::Meals),
            "lodging" => Some(Self::Lodging),
            "supplies" => Some(Self::Supplies),
            "software" => Some(Self::Software),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExpenseCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Travel => "travel",
            Self::Meals => "meals",
            Self::Lodging => "lodging",
            Self::Supplies => "supplies",
            Self::Software => "software",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Expense {
    pub id: i64,
    pub user_id: Uuid,
    pub report_id: Option<i64>,
    pub amount: Decimal,
    pub merchant: String,
    pub expense_date: NaiveDate,
    pub description: Option<String>,
    pub category: ExpenseCategory,
    pub notes: Option<String>,
    pub receipt_urls: Vec<String>,
    pub claim_reimbursement: bool,
    pub status: ExpenseStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateExpense {
    pub amount: Decimal,
    pub merchant: String,
    pub expense_date: NaiveDate,
    pub description: Option<String>,
    pub category: ExpenseCategory,
    pub notes: Option<String>,
    #[serde(default)]
    pub receipt_urls: Vec<String>,
    pub claim_reimbursement: Option<bool>,
    pub report_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateExpense {
    pub amount: Decimal,
    pub merchant: String,
    pub expense_date: NaiveDate,
    pub description: Option<String>,
    pub category: ExpenseCategory,
    pub notes: Option<String>,
    #[serde(default)]
    pub receipt_urls: Vec<String>,
    pub claim_reimbursement: Option<bool>,
}

/// Sum of all attached expense amounts, claim flag or not. The cached
/// reports.total_amount column must always agree with this.
pub fn total_amount(expenses: &[Expense]) -> Decimal {
    expenses.iter().map(|e| e.amount).sum()
}

/// Sum of amounts flagged for reimbursement. A subset of the total.
pub fn reimbursable_subtotal(expenses: &[Expense]) -> Decimal {
    expenses
        .iter()
        .filter(|e| e.claim_reimbursement)
        .map(|e| e.amount)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn expense(amount: &str, claim: bool) -> Expense {
        let now = Utc::now();
        Expense {
            id: 0,
            user_id: Uuid::new_v4(),
            report_id: None,
            amount: amount.parse().unwrap(),
            merchant: "Acme".to_string(),
            expense_date: now.date_naive(),
            description: None,
            category: ExpenseCategory::Other,
            notes: None,
            receipt_urls: Vec::new(),
            claim_reimbursement: claim,
            status: ExpenseStatus::Unreported,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn total_sums_everything_regardless_of_claim_flag() {
        let expenses = vec![expense("100.00", true), expense("250.00", false)];
        assert_eq!(total_amount(&expenses), "350.00".parse().unwrap());
    }

    #[test]
    fn subtotal_excludes_unclaimed_expenses() {
        let expenses = vec![expense("100.00", true), expense("250.00", false)];
        assert_eq!(reimbursable_subtotal(&expenses), "100.00".parse().unwrap());
    }

    #[test]
    fn flipping_the_claim_flag_moves_the_subtotal_by_that_amount() {
        let mut expenses = vec![
            expense("40.00", true),
            expense("60.00", false),
            expense("19.99", true),
        ];
        let before = reimbursable_subtotal(&expenses);
        expenses[1].claim_reimbursement = true;
        let after = reimbursable_subtotal(&expenses);
        assert_eq!(after - before, expenses[1].amount);
        // total is unaffected by the flip
        assert_eq!(total_amount(&expenses), "119.99".parse().unwrap());
    }

    #[test]
    fn recompute_is_idempotent() {
        let expenses = vec![expense("12.50", true), expense("7.50", true)];
        assert_eq!(total_amount(&expenses), total_amount(&expenses));
        assert_eq!(
            reimbursable_subtotal(&expenses),
            reimbursable_subtotal(&expenses)
        );
    }

    #[test]
    fn empty_report_totals_are_zero() {
        assert_eq!(total_amount(&[]), Decimal::ZERO);
        assert_eq!(reimbursable_subtotal(&[]), Decimal::ZERO);
    }

    #[test]
    fn expense_status_mirrors_report_status() {
        assert_eq!(
            ExpenseStatus::mirroring(ReportStatus::Pending),
            ExpenseStatus::Reported
        );
        assert_eq!(
            ExpenseStatus::mirroring(ReportStatus::Submitted),
            ExpenseStatus::Reported
        );
        assert_eq!(
            ExpenseStatus::mirroring(ReportStatus::Approved),
            ExpenseStatus::Approved
        );
        assert_eq!(
            ExpenseStatus::mirroring(ReportStatus::Rejected),
            ExpenseStatus::Rejected
        );
        assert_eq!(
            ExpenseStatus::mirroring(ReportStatus::Reimbursed),
            ExpenseStatus::Reimbursed
        );
    }
}
