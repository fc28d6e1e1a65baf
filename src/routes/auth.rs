use axum::extract::State;
use axum::Json;

use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::models::user::{AuthResponse, DbUser, LoginRequest};
use crate::utils::verify_password;

/// `POST /auth`: exchanges username and password for an identity token.
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let db_user = sqlx::query_as::<_, DbUser>(
        "SELECT id, username, password_hash, created_at, updated_at FROM users WHERE username = ?",
    )
    .bind(&payload.username)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;

    if !verify_password(&payload.password, &db_user.password_hash)? {
        tracing::info!(target: "audit", username = %payload.username, "login rejected");
        return Err(AppError::unauthorized("invalid credentials"));
    }

    let token = state.tokens.issue(&db_user.username)?;
    tracing::info!(target: "audit", username = %db_user.username, expires_at = %token.expires_at, "token issued");

    Ok(Json(AuthResponse {
        token,
        username: db_user.username,
    }))
}
