use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use sqlx::SqlitePool;

use crate::app::AppState;
use crate::authz::PolicyChange;
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;
use crate::models::user::{DbUser, User, UserCreateRequest, UserRole, UserUpdateRequest};
use crate::routes::roles::ensure_roles_exist;
use crate::utils::hash_password;

pub async fn list_users(State(state): State<AppState>) -> AppResult<Json<Vec<User>>> {
    let rows = sqlx::query_as::<_, DbUser>(
        "SELECT id, username, password_hash, created_at, updated_at FROM users ORDER BY id",
    )
    .fetch_all(&state.pool)
    .await?;

    let mut users = Vec::with_capacity(rows.len());
    for row in rows {
        let roles = fetch_user_roles(&state.pool, row.id).await?;
        users.push(User::from_parts(row, roles));
    }

    Ok(Json(users))
}

pub async fn get_user(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Json<User>> {
    Ok(Json(fetch_user(&state.pool, id).await?))
}

pub async fn create_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<UserCreateRequest>,
) -> AppResult<(StatusCode, Json<User>)> {
    let username = payload.username.trim();
    if username.is_empty() {
        return Err(AppError::bad_request("username must not be empty"));
    }
    ensure_username_available(&state.pool, username).await?;
    ensure_roles_exist(&state.pool, &payload.role_ids).await?;
    let password_hash = hash_password(&payload.password)?;

    let id = state
        .policy_store
        .create_user(username, &password_hash, &payload.role_ids)
        .await?;

    tracing::info!(actor = %auth.username, user_id = id, username = %username, "user created");

    if !payload.role_ids.is_empty() {
        state.policy_changed(PolicyChange::User { id }).await?;
    }

    let user = fetch_user(&state.pool, id).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(payload): Json<UserUpdateRequest>,
) -> AppResult<Json<User>> {
    let _ = fetch_db_user(&state.pool, id).await?;

    let password_hash = payload.password.as_deref().map(hash_password).transpose()?;
    if let Some(role_ids) = payload.role_ids.as_deref() {
        ensure_roles_exist(&state.pool, role_ids).await?;
    }

    state
        .policy_store
        .update_user(id, password_hash.as_deref(), payload.role_ids.as_deref())
        .await?;

    if let Some(role_ids) = payload.role_ids.as_deref() {
        tracing::info!(actor = %auth.username, user_id = id, roles = ?role_ids, "user roles replaced");
        state.policy_changed(PolicyChange::User { id }).await?;
    }

    Ok(Json(fetch_user(&state.pool, id).await?))
}

pub async fn delete_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    let affected = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(&state.pool)
        .await?;

    if affected.rows_affected() == 0 {
        return Err(AppError::not_found("user not found"));
    }

    tracing::info!(actor = %auth.username, user_id = id, "user deleted");
    state.policy_changed(PolicyChange::User { id }).await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn fetch_db_user(pool: &SqlitePool, id: i64) -> AppResult<DbUser> {
    sqlx::query_as::<_, DbUser>(
        "SELECT id, username, password_hash, created_at, updated_at FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("user not found"))
}

async fn fetch_user(pool: &SqlitePool, id: i64) -> AppResult<User> {
    let row = fetch_db_user(pool, id).await?;
    let roles = fetch_user_roles(pool, id).await?;
    Ok(User::from_parts(row, roles))
}

async fn fetch_user_roles(pool: &SqlitePool, user_id: i64) -> AppResult<Vec<UserRole>> {
    let roles = sqlx::query_as::<_, UserRole>(
        "SELECT r.id AS role_id, r.name FROM user_roles ur JOIN roles r ON r.id = ur.role_id \
         WHERE ur.user_id = ? ORDER BY r.id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(roles)
}

async fn ensure_username_available(pool: &SqlitePool, username: &str) -> AppResult<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE username = ?")
        .bind(username)
        .fetch_one(pool)
        .await?;

    if count > 0 {
        return Err(AppError::conflict("username already in use"));
    }

    Ok(())
}
