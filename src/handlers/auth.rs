use axum::{extract::State, Json};
use tower_cookies::{Cookie, Cookies};

use crate::{
    error::{AppError, AppResult},
    handlers::{data, Data},
    models::{LoginRequest, RegisterRequest, User, UserResponse},
    utils::{create_token, hash_password, verify_password},
    AppState,
};

pub async fn register(
    State(state): State<AppState>,
    Json(form): Json<RegisterRequest>,
) -> AppResult<Json<Data<UserResponse>>> {
    let email = form.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::InvalidState("a valid email is required".to_string()));
    }
    if form.password.len() < 8 {
        return Err(AppError::InvalidState(
            "password must be at least 8 characters".to_string(),
        ));
    }

    let password_hash = hash_password(&form.password)
        .map_err(|err| AppError::Internal(format!("password hashing failed: {}", err)))?;

    let user: User = sqlx::query_as(
        "INSERT INTO users (email, password_hash, first_name, last_name) \
         VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(&email)
    .bind(&password_hash)
    .bind(form.first_name.trim())
    .bind(form.last_name.trim())
    .fetch_one(&state.db)
    .await
    .map_err(|err| match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            AppError::InvalidState("email is already registered".to_string())
        }
        _ => AppError::Database(err),
    })?;

    Ok(data(UserResponse::from(user)))
}

pub async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(form): Json<LoginRequest>,
) -> AppResult<Json<Data<UserResponse>>> {
    let user: User =
        sqlx::query_as("SELECT * FROM users WHERE email = $1 AND is_active = true")
            .bind(form.email.trim().to_lowercase())
            .fetch_optional(&state.db)
            .await?
            .ok_or(AppError::Unauthorized)?;

    if !verify_password(&form.password, &user.password_hash).unwrap_or(false) {
        return Err(AppError::Unauthorized);
    }

    let token = create_token(user.id, user.email.clone(), user.role)
        .map_err(|err| AppError::Internal(format!("token creation failed: {}", err)))?;

    let cookie = Cookie::build(("auth_token", token))
        .path("/")
        .http_only(true)
        .max_age(time::Duration::hours(24))
        .build();
    cookies.add(cookie);

    Ok(data(UserResponse::from(user)))
}

pub async fn logout(cookies: Cookies) -> Json<Data<&'static str>> {
    cookies.remove(Cookie::from("auth_token"));
    data("logged out")
}
