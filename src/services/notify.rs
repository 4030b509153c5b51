//! Notification dispatcher: writes in-app notification rows and sends
//! templated email through the `Mailer` seam. Lifecycle side effects go
//! through [`Dispatcher::dispatch`], which is fire-and-forget: its own
//! failures are logged and never surfaced to the triggering request.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    database::Database,
    models::{Notification, NotificationKind, NotificationRow, RelatedEntity},
    services::lifecycle::TransitionEvent,
};

#[derive(Debug, Error)]
#[error("mail delivery failed: {0}")]
pub struct MailError(pub String);

/// Email delivery seam. The transport is an external collaborator; the
/// default implementation just logs what would have been sent.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError>;
}

pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<(), MailError> {
        log::info!("email to {}: {}", to, subject);
        Ok(())
    }
}

/// Create an in-app notification row. Direct callers (admin broadcast,
/// tooling) get persistence errors back; lifecycle side effects go through
/// `Dispatcher::dispatch` instead, which swallows them.
pub async fn create_notification(
    db: &Database,
    user_id: Uuid,
    kind: NotificationKind,
    title: &str,
    message: &str,
    related: Option<RelatedEntity>,
    expires_at: Option<DateTime<Utc>>,
) -> Result<Notification, sqlx::Error> {
    let row: NotificationRow = sqlx::query_as(
        "INSERT INTO notifications \
         (user_id, title, message, notification_type, related_entity_type, related_entity_id, expires_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
    )
    .bind(user_id)
    .bind(title)
    .bind(message)
    .bind(kind)
    .bind(related.map(|r| r.type_column()))
    .bind(related.and_then(|r| r.id_column()))
    .bind(expires_at)
    .fetch_one(db)
    .await?;

    Ok(row.into())
}

/// Announce to every active user. Returns the recipient count.
pub async fn broadcast(
    db: &Database,
    title: &str,
    message: &str,
    expires_at: Option<DateTime<Utc>>,
) -> Result<u64, sqlx::Error> {
    let related = RelatedEntity::System;
    let result = sqlx::query(
        "INSERT INTO notifications \
         (user_id, title, message, notification_type, related_entity_type, related_entity_id, expires_at) \
         SELECT id, $1, $2, $3, $4, $5, $6 FROM users WHERE is_active = true",
    )
    .bind(title)
    .bind(message)
    .bind(NotificationKind::SystemAnnouncement)
    .bind(related.type_column())
    .bind(related.id_column())
    .bind(expires_at)
    .execute(db)
    .await?;

    Ok(result.rows_affected())
}

fn email_body(first_name: &str, message: &str) -> String {
    format!("Hi {},\n\n{}", first_name, message)
}

pub struct Dispatcher {
    db: Database,
    mailer: Box<dyn Mailer>,
}

impl Dispatcher {
    pub fn new(db: Database, mailer: Box<dyn Mailer>) -> Self {
        Self { db, mailer }
    }

    /// Phase two of a lifecycle transition: consume the domain event the
    /// transaction returned and fan out the in-app notification and email.
    /// Best-effort by contract; no retries.
    pub async fn dispatch(&self, event: &TransitionEvent) {
        let Some((kind, title, message)) = event.render() else {
            return;
        };
        let Some(recipient) = &event.recipient else {
            log::warn!(
                "report {}: no recipient configured for {} notification, skipping",
                event.report_id,
                event.event
            );
            return;
        };

        if let Err(err) = create_notification(
            &self.db,
            recipient.user_id,
            kind,
            &title,
            &message,
            Some(RelatedEntity::Report {
                id: event.report_id,
            }),
            None,
        )
        .await
        {
            log::warn!(
                "report {}: failed to create notification: {}",
                event.report_id,
                err
            );
        }

        if event.sends_email() {
            let body = email_body(&recipient.first_name, &message);
            if let Err(err) = self.mailer.send(&recipient.email, &title, &body).await {
                log::warn!(
                    "report {}: failed to email {}: {}",
                    event.report_id,
                    recipient.email,
                    err
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_body_greets_the_recipient_by_first_name() {
        let body = email_body("Avery", "Your report \"Q1 travel\" has been approved");
        assert!(body.starts_with("Hi Avery,\n\n"));
        assert!(body.ends_with("has been approved"));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn announcements_carry_a_system_reference(pool: sqlx::PgPool) {
        for n in 0..2 {
            sqlx::query(
                "INSERT INTO users (email, password_hash, first_name, last_name) \
                 VALUES ($1, 'not-a-hash', 'Avery', 'Nguyen')",
            )
            .bind(format!("user{}@example.com", n))
            .execute(&pool)
            .await
            .unwrap();
        }
        sqlx::query(
            "INSERT INTO users (email, password_hash, first_name, last_name, is_active) \
             VALUES ('gone@example.com', 'not-a-hash', 'Gone', 'User', false)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let recipients = broadcast(&pool, "Maintenance", "Down Sunday 02:00-03:00 UTC", None)
            .await
            .unwrap();
        assert_eq!(recipients, 2);

        let rows: Vec<NotificationRow> = sqlx::query_as("SELECT * FROM notifications")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        for row in rows {
            let notification = Notification::from(row);
            assert_eq!(
                notification.notification_type,
                NotificationKind::SystemAnnouncement
            );
            assert_eq!(notification.related, Some(RelatedEntity::System));
        }
    }
}
