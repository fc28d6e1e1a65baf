use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use sqlx::SqlitePool;

use crate::app::AppState;
use crate::authz::PolicyChange;
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;
use crate::models::menu::{Menu, MenuCreateRequest, MenuUpdateRequest};
use crate::utils::utc_now;

const METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

pub async fn list_menus(State(state): State<AppState>) -> AppResult<Json<Vec<Menu>>> {
    let menus = sqlx::query_as::<_, Menu>(
        "SELECT id, name, path, method, created_at, updated_at FROM menus ORDER BY id",
    )
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(menus))
}

pub async fn get_menu(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Json<Menu>> {
    Ok(Json(fetch_menu(&state.pool, id).await?))
}

pub async fn create_menu(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<MenuCreateRequest>,
) -> AppResult<(StatusCode, Json<Menu>)> {
    let name = validate_name(&payload.name)?;
    let path = validate_path(&payload.path)?;
    let method = validate_method(&payload.method)?;

    let id = sqlx::query("INSERT INTO menus (name, path, method) VALUES (?, ?, ?)")
        .bind(name)
        .bind(path)
        .bind(&method)
        .execute(&state.pool)
        .await?
        .last_insert_rowid();

    tracing::info!(actor = %auth.username, menu_id = id, path, method = %method, "menu created");

    // Not yet granted to any role, so the policy is unchanged.
    let menu = fetch_menu(&state.pool, id).await?;
    Ok((StatusCode::CREATED, Json(menu)))
}

pub async fn update_menu(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(payload): Json<MenuUpdateRequest>,
) -> AppResult<Json<Menu>> {
    let mut menu = fetch_menu(&state.pool, id).await?;

    if let Some(name) = payload.name.as_deref() {
        menu.name = validate_name(name)?.to_string();
    }
    if let Some(path) = payload.path.as_deref() {
        menu.path = validate_path(path)?.to_string();
    }
    if let Some(method) = payload.method.as_deref() {
        menu.method = validate_method(method)?;
    }

    let now = utc_now();
    sqlx::query("UPDATE menus SET name = ?, path = ?, method = ?, updated_at = ? WHERE id = ?")
        .bind(&menu.name)
        .bind(&menu.path)
        .bind(&menu.method)
        .bind(now)
        .bind(id)
        .execute(&state.pool)
        .await?;
    menu.updated_at = now;

    tracing::info!(actor = %auth.username, menu_id = id, "menu updated");
    state.policy_changed(PolicyChange::Menu { id }).await?;

    Ok(Json(menu))
}

pub async fn delete_menu(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    let affected = sqlx::query("DELETE FROM menus WHERE id = ?")
        .bind(id)
        .execute(&state.pool)
        .await?;

    if affected.rows_affected() == 0 {
        return Err(AppError::not_found("menu not found"));
    }

    tracing::info!(actor = %auth.username, menu_id = id, "menu deleted");
    state.policy_changed(PolicyChange::Menu { id }).await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn fetch_menu(pool: &SqlitePool, id: i64) -> AppResult<Menu> {
    sqlx::query_as::<_, Menu>("SELECT id, name, path, method, created_at, updated_at FROM menus WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("menu not found"))
}

pub(crate) async fn ensure_menus_exist(pool: &SqlitePool, ids: &[i64]) -> AppResult<()> {
    for id in ids {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM menus WHERE id = ?")
            .bind(*id)
            .fetch_one(pool)
            .await?;
        if count == 0 {
            return Err(AppError::bad_request(format!("menu {id} does not exist")));
        }
    }
    Ok(())
}

fn validate_name(name: &str) -> AppResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }
    Ok(name)
}

/// Accepts `*`, or an absolute path optionally ending in `/*`.
fn validate_path(path: &str) -> AppResult<&str> {
    let path = path.trim();
    if path == "*" || path.starts_with('/') {
        return Ok(path);
    }
    Err(AppError::bad_request("path must be `*` or start with `/`"))
}

fn validate_method(method: &str) -> AppResult<String> {
    let method = method.trim().to_ascii_uppercase();
    if METHODS.contains(&method.as_str()) {
        Ok(method)
    } else {
        Err(AppError::bad_request(format!("unsupported method `{method}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_must_be_absolute_or_star() {
        assert_eq!(validate_path(" /api/v1/menus/* ").unwrap(), "/api/v1/menus/*");
        assert_eq!(validate_path("*").unwrap(), "*");
        assert!(validate_path("api/v1").is_err());
    }

    #[test]
    fn methods_are_upper_cased_and_restricted() {
        assert_eq!(validate_method("post").unwrap(), "POST");
        assert!(validate_method("TRACE").is_err());
    }
}
