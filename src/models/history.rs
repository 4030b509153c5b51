use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Audit event types. One row per lifecycle transition; `Note` is for
/// manual annotations and never maps to a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "history_event", rename_all = "lowercase")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryEvent {
    Submitted,
    Approved,
    Rejected,
    Reimbursed,
    Note,
}

impl std::fmt::Display for HistoryEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Reimbursed => "reimbursed",
            Self::Note => "note",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ReportHistory {
    pub id: i64,
    pub report_id: i64,
    pub event_type: HistoryEvent,
    pub event_date: DateTime<Utc>,
    pub details: Option<String>,
    pub performed_by: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ExpenseHistory {
    pub id: i64,
    pub expense_id: i64,
    pub event_type: HistoryEvent,
    pub event_date: DateTime<Utc>,
    pub details: Option<String>,
    pub performed_by: Option<Uuid>,
}
