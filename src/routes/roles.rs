use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use sqlx::SqlitePool;

use crate::app::AppState;
use crate::authz::PolicyChange;
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;
use crate::models::role::{DbRole, Role, RoleCreateRequest, RoleMenu, RoleUpdateRequest};
use crate::routes::menus::ensure_menus_exist;

pub async fn list_roles(State(state): State<AppState>) -> AppResult<Json<Vec<Role>>> {
    let rows = sqlx::query_as::<_, DbRole>("SELECT id, name, created_at, updated_at FROM roles ORDER BY name")
        .fetch_all(&state.pool)
        .await?;

    let mut roles = Vec::with_capacity(rows.len());
    for row in rows {
        let menus = fetch_role_menus(&state.pool, row.id).await?;
        roles.push(Role::from_parts(row, menus));
    }

    Ok(Json(roles))
}

pub async fn get_role(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Json<Role>> {
    Ok(Json(fetch_role(&state.pool, id).await?))
}

pub async fn create_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<RoleCreateRequest>,
) -> AppResult<(StatusCode, Json<Role>)> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("role name must not be empty"));
    }
    ensure_role_name_available(&state.pool, name, None).await?;
    let menu_ids: Vec<i64> = payload.menus.iter().map(|grant| grant.menu_id).collect();
    ensure_menus_exist(&state.pool, &menu_ids).await?;

    let id = state.policy_store.create_role(name, &payload.menus).await?;

    tracing::info!(actor = %auth.username, role_id = id, role = %name, grants = payload.menus.len(), "role created");

    if !payload.menus.is_empty() {
        state.policy_changed(PolicyChange::Role { id }).await?;
    }

    let role = fetch_role(&state.pool, id).await?;
    Ok((StatusCode::CREATED, Json(role)))
}

pub async fn update_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(payload): Json<RoleUpdateRequest>,
) -> AppResult<Json<Role>> {
    let current = fetch_db_role(&state.pool, id).await?;

    let name = match payload.name.as_deref().map(str::trim) {
        Some("") => return Err(AppError::bad_request("role name must not be empty")),
        Some(name) => {
            if name != current.name {
                ensure_role_name_available(&state.pool, name, Some(id)).await?;
            }
            Some(name)
        }
        None => None,
    };

    if let Some(grants) = payload.menus.as_deref() {
        let menu_ids: Vec<i64> = grants.iter().map(|grant| grant.menu_id).collect();
        ensure_menus_exist(&state.pool, &menu_ids).await?;
    }

    state
        .policy_store
        .update_role(id, name, payload.menus.as_deref())
        .await?;

    tracing::info!(actor = %auth.username, role_id = id, "role updated");
    state.policy_changed(PolicyChange::Role { id }).await?;

    Ok(Json(fetch_role(&state.pool, id).await?))
}

pub async fn delete_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    let affected = sqlx::query("DELETE FROM roles WHERE id = ?")
        .bind(id)
        .execute(&state.pool)
        .await?;

    if affected.rows_affected() == 0 {
        return Err(AppError::not_found("role not found"));
    }

    tracing::info!(actor = %auth.username, role_id = id, "role deleted");
    state.policy_changed(PolicyChange::Role { id }).await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn fetch_db_role(pool: &SqlitePool, id: i64) -> AppResult<DbRole> {
    sqlx::query_as::<_, DbRole>("SELECT id, name, created_at, updated_at FROM roles WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("role not found"))
}

async fn fetch_role(pool: &SqlitePool, id: i64) -> AppResult<Role> {
    let row = fetch_db_role(pool, id).await?;
    let menus = fetch_role_menus(pool, id).await?;
    Ok(Role::from_parts(row, menus))
}

async fn fetch_role_menus(pool: &SqlitePool, role_id: i64) -> AppResult<Vec<RoleMenu>> {
    let menus = sqlx::query_as::<_, RoleMenu>(
        "SELECT m.id AS menu_id, m.name, m.path, m.method, rm.effect \
         FROM role_menus rm JOIN menus m ON m.id = rm.menu_id \
         WHERE rm.role_id = ? ORDER BY rm.id",
    )
    .bind(role_id)
    .fetch_all(pool)
    .await?;

    Ok(menus)
}

async fn ensure_role_name_available(pool: &SqlitePool, name: &str, except: Option<i64>) -> AppResult<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM roles WHERE name = ? AND id IS NOT ?")
        .bind(name)
        .bind(except)
        .fetch_one(pool)
        .await?;

    if count > 0 {
        return Err(AppError::conflict("role name already in use"));
    }

    Ok(())
}

pub(crate) async fn ensure_roles_exist(pool: &SqlitePool, ids: &[i64]) -> AppResult<()> {
    for id in ids {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM roles WHERE id = ?")
            .bind(*id)
            .fetch_one(pool)
            .await?;
        if count == 0 {
            return Err(AppError::bad_request(format!("role {id} does not exist")));
        }
    }
    Ok(())
}
