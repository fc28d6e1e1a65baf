#![allow(dead_code)]

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::Duration;
use serde_json::Value;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::ServiceExt; // for `oneshot`

use rbac_admin::utils::hash_password;
use rbac_admin::{create_app, AuthConfig};

pub const SECRET: &str = "integration-test-secret";
pub const ADMIN: &str = "root";
pub const ADMIN_PASSWORD: &str = "root-password";

/// Seeded menu ids, in migration order.
pub const MENUS_GET: i64 = 1;
pub const MENUS_POST: i64 = 2;
pub const USERS_DELETE: i64 = 12;

pub struct TestApp {
    // Keeps the database file alive for the lifetime of the test.
    _dir: TempDir,
    pub pool: SqlitePool,
    pub app: Router,
}

pub fn auth_config() -> AuthConfig {
    AuthConfig::new(SECRET, Duration::hours(3))
}

pub async fn migrated_pool() -> Result<(TempDir, SqlitePool)> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");

    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator =
        sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;

    Ok((dir, pool))
}

/// Fresh database with the seeded `admin` role granted to `root`.
pub async fn spawn() -> Result<TestApp> {
    let (dir, pool) = migrated_pool().await?;
    insert_user(&pool, ADMIN, ADMIN_PASSWORD, &["admin"]).await?;

    let app = create_app(pool.clone(), &auth_config()).await?;
    Ok(TestApp { _dir: dir, pool, app })
}

pub async fn insert_user(pool: &SqlitePool, username: &str, password: &str, roles: &[&str]) -> Result<i64> {
    let id = sqlx::query("INSERT INTO users (username, password_hash) VALUES (?, ?)")
        .bind(username)
        .bind(hash_password(password)?)
        .execute(pool)
        .await?
        .last_insert_rowid();

    for role in roles {
        sqlx::query("INSERT INTO user_roles (user_id, role_id) SELECT ?, id FROM roles WHERE name = ?")
            .bind(id)
            .bind(*role)
            .execute(pool)
            .await?;
    }

    Ok(id)
}

impl TestApp {
    pub async fn send(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))?,
            None => builder.body(Body::empty())?,
        };

        let response = self.app.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX).await?;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).context("response body is not JSON")?
        };

        Ok((status, value))
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<String> {
        let (status, body) = self
            .send(
                Method::POST,
                "/auth",
                None,
                Some(serde_json::json!({ "username": username, "password": password })),
            )
            .await?;
        anyhow::ensure!(status == StatusCode::OK, "login for {username} failed with {status}: {body}");

        body.get("token")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .context("missing token")
    }

    pub async fn admin_token(&self) -> Result<String> {
        self.login(ADMIN, ADMIN_PASSWORD).await
    }

    pub async fn count(&self, table: &str) -> Result<i64> {
        let count = sqlx::query_scalar(&format!("SELECT COUNT(1) FROM {table}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
