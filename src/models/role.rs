use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::authz::RoleGrant;

#[derive(Debug, Clone, FromRow)]
pub struct DbRole {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RoleMenu {
    pub menu_id: i64,
    pub name: String,
    pub path: String,
    pub method: String,
    pub effect: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub menus: Vec<RoleMenu>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn from_parts(db: DbRole, menus: Vec<RoleMenu>) -> Self {
        Role {
            id: db.id,
            name: db.name,
            menus,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RoleCreateRequest {
    pub name: String,
    #[serde(default)]
    pub menus: Vec<RoleGrant>,
}

#[derive(Debug, Deserialize)]
pub struct RoleUpdateRequest {
    pub name: Option<String>,
    /// Replaces every grant when present.
    pub menus: Option<Vec<RoleGrant>>,
}
