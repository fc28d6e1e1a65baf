//! Request gates run before protected handlers.
//!
//! A [`Pipeline`] is an ordered list of [`Gate`]s. [`run_pipeline`] is the one
//! axum middleware that drives it: every gate runs in order, and the first
//! rejection becomes the response without the handler ever executing.

mod authn;
mod authz;

pub use authn::{bearer_token, AuthenticationGate};
pub use authz::AuthorizationGate;

use std::sync::Arc;

use axum::extract::{OriginalUri, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::authz::PolicyEnforcer;
use crate::errors::AppError;
use crate::jwt::TokenCodec;

pub trait Gate: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(())` lets the request continue; `Err` halts it with that response.
    fn check(&self, request: &mut Request) -> Result<(), AppError>;
}

#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Gate>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, gate: impl Gate + 'static) -> Self {
        self.stages.push(Arc::new(gate));
        self
    }

    /// Authentication then authorization.
    pub fn access_control(tokens: Arc<TokenCodec>, enforcer: Arc<PolicyEnforcer>) -> Self {
        Self::new()
            .with(AuthenticationGate::new(tokens))
            .with(AuthorizationGate::new(enforcer))
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn run(&self, request: &mut Request) -> Result<(), AppError> {
        for stage in &self.stages {
            if let Err(err) = stage.check(request) {
                tracing::debug!(stage = stage.name(), error = %err, "request halted");
                return Err(err);
            }
        }
        Ok(())
    }
}

/// Full request path, including any prefix a nested router stripped from `uri`.
pub(crate) fn request_path(request: &Request) -> &str {
    request
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.path())
        .unwrap_or_else(|| request.uri().path())
}

pub async fn run_pipeline(State(pipeline): State<Arc<Pipeline>>, mut request: Request, next: Next) -> Response {
    match pipeline.run(&mut request) {
        Ok(()) => next.run(request).await,
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::body::{self, Body};
    use axum::http::{Method, StatusCode};
    use axum::routing::get;
    use axum::{middleware, Router};
    use chrono::Duration;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::authz::{PolicyRule, RoleAssignment};
    use crate::jwt::AuthUser;
    use crate::utils::utc_now;

    struct Fixture {
        router: Router,
        tokens: Arc<TokenCodec>,
        hits: Arc<AtomicUsize>,
    }

    fn fixture() -> Fixture {
        let tokens = Arc::new(TokenCodec::new("gate-secret", Duration::hours(2)));
        let enforcer = Arc::new(PolicyEnforcer::new());
        enforcer.reload(
            &[PolicyRule::allow("editor", "/api/v1/menus/*", "POST")],
            &[RoleAssignment::new("alice", "editor")],
        );

        let hits = Arc::new(AtomicUsize::new(0));
        let pipeline = Arc::new(Pipeline::access_control(Arc::clone(&tokens), enforcer));

        let handler_hits = Arc::clone(&hits);
        let handler = move |user: AuthUser| {
            let hits = Arc::clone(&handler_hits);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                user.username
            }
        };

        let api = Router::new().route("/menus", get(handler.clone()).post(handler.clone()));
        let router = Router::new()
            .nest("/api/v1", api)
            .route("/api/v1/users/:id", axum::routing::delete(handler))
            .layer(middleware::from_fn_with_state(pipeline, run_pipeline));

        Fixture { router, tokens, hits }
    }

    async fn send(router: &Router, method: Method, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let response = router
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::String(String::from_utf8_lossy(&bytes).into()));
        (status, value)
    }

    #[test]
    fn pipeline_order_is_authentication_then_authorization() {
        let pipeline = Pipeline::access_control(
            Arc::new(TokenCodec::new("k", Duration::hours(1))),
            Arc::new(PolicyEnforcer::new()),
        );
        assert_eq!(pipeline.stage_names(), vec!["authentication", "authorization"]);
    }

    #[tokio::test]
    async fn missing_credential_halts_before_handler() {
        let fx = fixture();
        let (status, body) = send(&fx.router, Method::POST, "/api/v1/menus", None).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "missing_credential");
        assert_eq!(fx.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_and_invalid_tokens_are_distinguished() {
        let fx = fixture();
        let expired = fx.tokens.issue_at("alice", utc_now() - Duration::hours(3)).unwrap();

        let (status, body) = send(&fx.router, Method::POST, "/api/v1/menus", Some(expired.token.as_str())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "token_expired");

        let (status, body) = send(&fx.router, Method::POST, "/api/v1/menus", Some("garbage")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "token_invalid");
        assert_eq!(fx.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn permitted_request_reaches_handler_with_identity() {
        let fx = fixture();
        let token = fx.tokens.issue("alice").unwrap().token;

        let (status, body) = send(&fx.router, Method::POST, "/api/v1/menus", Some(token.as_str())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::String("alice".into()));
        assert_eq!(fx.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn denied_request_gets_forbidden() {
        let fx = fixture();
        let token = fx.tokens.issue("alice").unwrap().token;

        let (status, body) = send(&fx.router, Method::DELETE, "/api/v1/users/1", Some(token.as_str())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "permission_denied");

        let (status, _) = send(&fx.router, Method::GET, "/api/v1/menus", Some(token.as_str())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(fx.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_subject_is_denied() {
        let fx = fixture();
        let token = fx.tokens.issue("mallory").unwrap().token;

        let (status, _) = send(&fx.router, Method::POST, "/api/v1/menus", Some(token.as_str())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn request_path_prefers_the_pre_nesting_uri() {
        let mut request = axum::http::Request::builder()
            .uri("/menus/1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(request_path(&request), "/menus/1");

        request
            .extensions_mut()
            .insert(OriginalUri("/api/v1/menus/1".parse().unwrap()));
        assert_eq!(request_path(&request), "/api/v1/menus/1");
    }

    #[test]
    fn authorization_without_identity_is_unauthenticated() {
        let gate = AuthorizationGate::new(Arc::new(PolicyEnforcer::new()));
        let mut request = axum::http::Request::builder()
            .uri("/api/v1/menus")
            .body(Body::empty())
            .unwrap();

        assert!(matches!(gate.check(&mut request), Err(AppError::MissingCredential)));
    }
}
