use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "notification_type", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    ReportSubmitted,
    ReportApproved,
    ReportRejected,
    ReportReimbursed,
    SystemAnnouncement,
}

/// What a notification points back at. Stored as a nullable type/id
/// column pair; surfaced to JSON as a tagged object so each variant
/// carries only the fields relevant to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelatedEntity {
    Report { id: i64 },
    Expense { id: i64 },
    System,
}

impl RelatedEntity {
    pub fn from_columns(entity_type: Option<&str>, entity_id: Option<i64>) -> Option<Self> {
        match (entity_type, entity_id) {
            (Some("report"), Some(id)) => Some(Self::Report { id }),
            (Some("expense"), Some(id)) => Some(Self::Expense { id }),
            (Some("system"), _) => Some(Self::System),
            _ => None,
        }
    }

    pub fn type_column(&self) -> &'static str {
        match self {
            Self::Report { .. } => "report",
            Self::Expense { .. } => "expense",
            Self::System => "system",
        }
    }

    pub fn id_column(&self) -> Option<i64> {
        match self {
            Self::Report { id } | Self::Expense { id } => Some(*id),
            Self::System => None,
        }
    }
}

/// Raw notification row as stored.
#[derive(Debug, FromRow)]
pub struct NotificationRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    pub notification_type: NotificationKind,
    pub is_read: bool,
    pub related_entity_type: Option<String>,
    pub related_entity_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    pub notification_type: NotificationKind,
    pub read: bool,
    pub related: Option<RelatedEntity>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<NotificationRow> for Notification {
    fn from(row: NotificationRow) -> Self {
        let related =
            RelatedEntity::from_columns(row.related_entity_type.as_deref(), row.related_entity_id);
        Self {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            message: row.message,
            notification_type: row.notification_type,
            read: row.is_read,
            related,
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn related_entity_round_trips_through_columns() {
        for entity in [
            RelatedEntity::Report { id: 5 },
            RelatedEntity::Expense { id: 9 },
            RelatedEntity::System,
        ] {
            let restored =
                RelatedEntity::from_columns(Some(entity.type_column()), entity.id_column());
            assert_eq!(restored, Some(entity));
        }
    }

    #[test]
    fn unknown_or_partial_columns_yield_none() {
        assert_eq!(RelatedEntity::from_columns(None, None), None);
        assert_eq!(RelatedEntity::from_columns(Some("report"), None), None);
        assert_eq!(RelatedEntity::from_columns(Some("widget"), Some(1)), None);
    }

    #[test]
    fn related_entity_serializes_tagged() {
        let json = serde_json::to_value(RelatedEntity::Report { id: 42 }).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "REPORT", "id": 42 }));

        let json = serde_json::to_value(RelatedEntity::System).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "SYSTEM" }));
    }
}
