use serde::Serialize;
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::Database,
    error::{AppError, AppResult},
    models::{Role, User},
    utils::verify_token,
};

/// The resolved identity threaded into every service call. The core never
/// reads ambient session state; handlers resolve this once per request.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentUser {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

pub async fn get_current_user(cookies: &Cookies, db: &Database) -> Option<CurrentUser> {
    let token = cookies.get("auth_token")?.value().to_string();
    let claims = verify_token(&token).ok()?;
    let user_id = Uuid::parse_str(&claims.sub).ok()?;

    let user: User = sqlx::query_as("SELECT * FROM users WHERE id = $1 AND is_active = true")
        .bind(user_id)
        .fetch_optional(db)
        .await
        .ok()??;

    Some(CurrentUser {
        id: user.id,
        email: user.email,
        first_name: user.first_name,
        last_name: user.last_name,
        role: user.role,
    })
}

pub async fn require_user(cookies: &Cookies, db: &Database) -> AppResult<CurrentUser> {
    get_current_user(cookies, db)
        .await
        .ok_or(AppError::Unauthorized)
}

pub async fn require_admin(cookies: &Cookies, db: &Database) -> AppResult<CurrentUser> {
    let user = require_user(cookies, db).await?;
    if !user.is_admin() {
        return Err(AppError::Forbidden);
    }
    Ok(user)
}
