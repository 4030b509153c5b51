use axum::{
    extract::{Path, State},
    Json,
};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    handlers::{data, Data},
    middleware::require_user,
    models::{Notification, NotificationRow},
    AppState,
};

pub async fn list_notifications(
    State(state): State<AppState>,
    cookies: Cookies,
) -> AppResult<Json<Data<Vec<Notification>>>> {
    let user = require_user(&cookies, &state.db).await?;

    let rows: Vec<NotificationRow> = sqlx::query_as(
        "SELECT * FROM notifications WHERE user_id = $1 \
         AND (expires_at IS NULL OR expires_at > NOW()) \
         ORDER BY created_at DESC",
    )
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(data(rows.into_iter().map(Notification::from).collect()))
}

pub async fn mark_read(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(notification_id): Path<Uuid>,
) -> AppResult<Json<Data<Notification>>> {
    let user = require_user(&cookies, &state.db).await?;

    let row: NotificationRow = sqlx::query_as(
        "UPDATE notifications SET is_read = true WHERE id = $1 AND user_id = $2 RETURNING *",
    )
    .bind(notification_id)
    .bind(user.id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound("notification"))?;

    Ok(data(Notification::from(row)))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(notification_id): Path<Uuid>,
) -> AppResult<Json<Data<&'static str>>> {
    let user = require_user(&cookies, &state.db).await?;

    let result = sqlx::query("DELETE FROM notifications WHERE id = $1 AND user_id = $2")
        .bind(notification_id)
        .bind(user.id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("notification"));
    }
    Ok(data("deleted"))
}
