use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A permission object: requests to `path` with `method`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Menu {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub method: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct MenuCreateRequest {
    pub name: String,
    pub path: String,
    pub method: String,
}

#[derive(Debug, Deserialize)]
pub struct MenuUpdateRequest {
    pub name: Option<String>,
    pub path: Option<String>,
    pub method: Option<String>,
}
