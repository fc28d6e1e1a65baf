use std::sync::Arc;

use axum::routing::{get, post};
use axum::{middleware, Router};
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;

use crate::authz::{PolicyChange, PolicyEnforcer, PolicyStore, PolicySync, SqlitePolicyStore};
use crate::config::AuthConfig;
use crate::errors::{AppError, AppResult};
use crate::gate::{run_pipeline, Pipeline};
use crate::jwt::TokenCodec;
use crate::routes::{auth, health, menus, roles, users};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub tokens: Arc<TokenCodec>,
    pub enforcer: Arc<PolicyEnforcer>,
    pub policy_store: Arc<SqlitePolicyStore>,
    pub policy: Arc<PolicySync>,
}

impl AppState {
    /// Builds the shared state and performs the startup policy load.
    ///
    /// Fails when the policy cannot be loaded; the service must not accept
    /// traffic without a policy.
    pub async fn initialize(pool: SqlitePool, auth: &AuthConfig) -> Result<Self, AppError> {
        let tokens = Arc::new(TokenCodec::from_config(auth));
        let enforcer = Arc::new(PolicyEnforcer::new());
        let policy_store = Arc::new(SqlitePolicyStore::new(pool.clone()));
        let policy = Arc::new(PolicySync::new(
            Arc::clone(&policy_store) as Arc<dyn PolicyStore>,
            Arc::clone(&enforcer),
        ));

        let stats = policy.initialize().await?;
        tracing::info!(
            rules = stats.rules,
            assignments = stats.assignments,
            subjects = stats.subjects,
            overridden = stats.overridden,
            "policy loaded"
        );

        Ok(Self {
            pool,
            tokens,
            enforcer,
            policy_store,
            policy,
        })
    }

    /// Reloads the enforcer after a committed write to menus, roles or users.
    ///
    /// The write itself has already been persisted, so a failed reload is
    /// reported as unavailable rather than rolled back.
    pub async fn policy_changed(&self, change: PolicyChange) -> AppResult<()> {
        self.policy.policy_changed(change).await.map(|_| ()).map_err(|err| {
            AppError::ServiceUnavailable(format!(
                "change saved but policy reload failed ({err}); previous policy remains in effect"
            ))
        })
    }
}

pub async fn create_app(pool: SqlitePool, auth: &AuthConfig) -> Result<Router, AppError> {
    let state = AppState::initialize(pool, auth).await?;
    Ok(router(state))
}

pub fn router(state: AppState) -> Router {
    let pipeline = Arc::new(Pipeline::access_control(
        Arc::clone(&state.tokens),
        Arc::clone(&state.enforcer),
    ));

    let menu_routes = Router::new()
        .route("/", get(menus::list_menus).post(menus::create_menu))
        .route(
            "/:id",
            get(menus::get_menu).put(menus::update_menu).delete(menus::delete_menu),
        );

    let role_routes = Router::new()
        .route("/", get(roles::list_roles).post(roles::create_role))
        .route(
            "/:id",
            get(roles::get_role).put(roles::update_role).delete(roles::delete_role),
        );

    let user_routes = Router::new()
        .route("/", get(users::list_users).post(users::create_user))
        .route(
            "/:id",
            get(users::get_user).put(users::update_user).delete(users::delete_user),
        );

    // Every route under /api/v1 passes authentication then authorization.
    let api_routes = Router::new()
        .nest("/menus", menu_routes)
        .nest("/roles", role_routes)
        .nest("/users", user_routes)
        .layer(middleware::from_fn_with_state(pipeline, run_pipeline));

    Router::new()
        .route("/auth", post(auth::login))
        .route("/api/health", get(health::health))
        .nest("/api/v1", api_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
