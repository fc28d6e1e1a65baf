use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};

use super::{Effect, PolicyError, PolicyRule, PolicySet, RoleAssignment};
use crate::utils::utc_now;

/// Source of the complete policy and assignment sets.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Reads everything. Calls without an intervening mutation return equal sets.
    async fn load_all_policy(&self) -> Result<PolicySet, PolicyError>;
}

/// One menu granted to a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub menu_id: i64,
    #[serde(default)]
    pub effect: Effect,
}

#[derive(Debug, FromRow)]
struct RuleRow {
    role: String,
    object: String,
    action: String,
    effect: String,
}

#[derive(Debug, FromRow)]
struct AssignmentRow {
    subject: String,
    role: String,
}

#[derive(Debug, Clone)]
pub struct SqlitePolicyStore {
    pool: SqlitePool,
}

impl SqlitePolicyStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a role and its grants in one transaction.
    pub async fn create_role(&self, name: &str, grants: &[RoleGrant]) -> Result<i64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let role_id = sqlx::query("INSERT INTO roles (name) VALUES (?)")
            .bind(name)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();
        write_role_grants(&mut tx, role_id, grants).await?;

        tx.commit().await?;
        Ok(role_id)
    }

    /// Renames a role and/or replaces its grants; both land or neither does.
    pub async fn update_role(
        &self,
        role_id: i64,
        name: Option<&str>,
        grants: Option<&[RoleGrant]>,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        if let Some(name) = name {
            sqlx::query("UPDATE roles SET name = ? WHERE id = ?")
                .bind(name)
                .bind(role_id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(grants) = grants {
            write_role_grants(&mut tx, role_id, grants).await?;
        }
        sqlx::query("UPDATE roles SET updated_at = ? WHERE id = ?")
            .bind(utc_now())
            .bind(role_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await
    }

    /// Replaces every grant held by `role_id`. Later entries win on duplicate menus.
    pub async fn replace_role_grants(&self, role_id: i64, grants: &[RoleGrant]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        write_role_grants(&mut tx, role_id, grants).await?;
        tx.commit().await
    }

    /// Inserts a user and its role assignments in one transaction.
    pub async fn create_user(&self, username: &str, password_hash: &str, role_ids: &[i64]) -> Result<i64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let user_id = sqlx::query("INSERT INTO users (username, password_hash) VALUES (?, ?)")
            .bind(username)
            .bind(password_hash)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();
        write_user_roles(&mut tx, user_id, role_ids).await?;

        tx.commit().await?;
        Ok(user_id)
    }

    pub async fn update_user(
        &self,
        user_id: i64,
        password_hash: Option<&str>,
        role_ids: Option<&[i64]>,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        if let Some(password_hash) = password_hash {
            sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
                .bind(password_hash)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(role_ids) = role_ids {
            write_user_roles(&mut tx, user_id, role_ids).await?;
        }
        sqlx::query("UPDATE users SET updated_at = ? WHERE id = ?")
            .bind(utc_now())
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await
    }

    /// Replaces every role held by `user_id`.
    pub async fn replace_user_roles(&self, user_id: i64, role_ids: &[i64]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        write_user_roles(&mut tx, user_id, role_ids).await?;
        tx.commit().await
    }
}

async fn write_role_grants(conn: &mut SqliteConnection, role_id: i64, grants: &[RoleGrant]) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM role_menus WHERE role_id = ?")
        .bind(role_id)
        .execute(&mut *conn)
        .await?;

    for grant in grants {
        sqlx::query(
            "INSERT INTO role_menus (role_id, menu_id, effect) VALUES (?, ?, ?) \
             ON CONFLICT(role_id, menu_id) DO UPDATE SET effect = excluded.effect",
        )
        .bind(role_id)
        .bind(grant.menu_id)
        .bind(grant.effect.as_str())
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

async fn write_user_roles(conn: &mut SqliteConnection, user_id: i64, role_ids: &[i64]) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM user_roles WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

    for role_id in role_ids {
        sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(*role_id)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

#[async_trait]
impl PolicyStore for SqlitePolicyStore {
    async fn load_all_policy(&self) -> Result<PolicySet, PolicyError> {
        let rule_rows = sqlx::query_as::<_, RuleRow>(
            "SELECT r.name AS role, m.path AS object, m.method AS action, rm.effect AS effect \
             FROM role_menus rm \
             JOIN roles r ON r.id = rm.role_id \
             JOIN menus m ON m.id = rm.menu_id \
             ORDER BY rm.id",
        )
        .fetch_all(&self.pool)
        .await?;

        let rules = rule_rows
            .into_iter()
            .map(|row| {
                Ok(PolicyRule {
                    effect: row.effect.parse()?,
                    role: row.role,
                    object: row.object,
                    action: row.action,
                })
            })
            .collect::<Result<Vec<_>, PolicyError>>()?;

        let assignments = sqlx::query_as::<_, AssignmentRow>(
            "SELECT u.username AS subject, r.name AS role \
             FROM user_roles ur \
             JOIN users u ON u.id = ur.user_id \
             JOIN roles r ON r.id = ur.role_id \
             ORDER BY ur.user_id, ur.role_id",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| RoleAssignment::new(row.subject, row.role))
        .collect();

        Ok(PolicySet::new(rules, assignments))
    }
}

/// Policy held in memory, with a switch to simulate an unreachable backend.
#[derive(Debug, Default)]
pub struct MemoryPolicyStore {
    set: RwLock<PolicySet>,
    unavailable: AtomicBool,
}

impl MemoryPolicyStore {
    pub fn new(set: PolicySet) -> Self {
        Self {
            set: RwLock::new(set),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn replace(&self, set: PolicySet) {
        let mut guard = self.set.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = set;
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn load_all_policy(&self) -> Result<PolicySet, PolicyError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PolicyError::StoreUnavailable("memory store marked unavailable".to_string()));
        }

        let guard = self.set.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(guard.clone())
    }
}
